//! Order store

use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use tabsync_core::{EntityId, MutationOp, Order, OrderItem, OrderStatus, TabsyncResult};

use crate::store::{EntityStore, StoreContext};

/// Fields of a new order; the id is assigned locally and reconciled later
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub customer_name: String,
    #[serde(default)]
    pub items: Vec<OrderItem>,
    /// Computed from `items` when zero
    #[serde(default)]
    pub total_amount: i64,
}

impl NewOrder {
    pub fn new(customer_name: impl Into<String>) -> Self {
        Self {
            customer_name: customer_name.into(),
            ..Default::default()
        }
    }

    pub fn item(mut self, name: impl Into<String>, quantity: u32, unit_price: i64) -> Self {
        self.items.push(OrderItem {
            name: name.into(),
            quantity,
            unit_price,
        });
        self
    }

    pub fn total(mut self, total_amount: i64) -> Self {
        self.total_amount = total_amount;
        self
    }

    fn computed_total(&self) -> i64 {
        if self.total_amount != 0 {
            return self.total_amount;
        }
        self.items
            .iter()
            .map(|i| i64::from(i.quantity) * i.unit_price)
            .sum()
    }
}

/// Orders collection with domain helpers
#[derive(Debug)]
pub struct OrderStore {
    inner: EntityStore<Order>,
}

impl OrderStore {
    pub fn open(ctx: &StoreContext) -> Self {
        Self {
            inner: EntityStore::open(ctx),
        }
    }

    /// Create an order optimistically; returns its temporary id
    pub fn add_order(&mut self, order: NewOrder) -> TabsyncResult<EntityId> {
        let payload = json!({
            "customerName": order.customer_name,
            "items": order.items,
            "totalAmount": order.computed_total(),
            "status": OrderStatus::Pending,
        });
        self.inner.apply_local(MutationOp::Create, None, payload)
    }

    pub fn update_status(&mut self, id: &EntityId, status: OrderStatus) -> TabsyncResult<()> {
        self.inner
            .apply_local(MutationOp::Update, Some(id.clone()), json!({ "status": status }))?;
        Ok(())
    }

    /// Apply an arbitrary shallow patch
    pub fn update_order(&mut self, id: &EntityId, patch: Value) -> TabsyncResult<()> {
        self.inner
            .apply_local(MutationOp::Update, Some(id.clone()), patch)?;
        Ok(())
    }

    pub fn delete_order(&mut self, id: &EntityId) -> TabsyncResult<()> {
        self.inner
            .apply_local(MutationOp::Delete, Some(id.clone()), Value::Null)?;
        Ok(())
    }

    /// Orders currently in `status`
    pub fn with_status(&self, status: OrderStatus) -> Vec<&Order> {
        self.inner.iter().filter(|o| o.status == status).collect()
    }

    pub fn into_inner(self) -> EntityStore<Order> {
        self.inner
    }
}

impl Deref for OrderStore {
    type Target = EntityStore<Order>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for OrderStore {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tabsync_broadcast::{BroadcastBus, BroadcastConfig};
    use tabsync_core::{SharedMedium, SyncStatus, TabId, TabsyncError, SystemClock};
    use tabsync_storage::{MemoryMedium, QueueConfig};

    fn orders() -> OrderStore {
        let medium: Arc<dyn SharedMedium> = Arc::new(MemoryMedium::new());
        let tab_id = TabId::new("a");
        OrderStore::open(&StoreContext {
            bus: Arc::new(BroadcastBus::new(
                medium.clone(),
                tab_id.clone(),
                &BroadcastConfig::default(),
            )),
            tab_id,
            medium,
            clock: Arc::new(SystemClock),
            namespace: "tabsync".into(),
            queue: QueueConfig::default(),
        })
    }

    #[test]
    fn test_add_order_totals_items() {
        let mut orders = orders();
        let id = orders
            .add_order(NewOrder::new("Ada").item("Tea", 2, 350).item("Cake", 1, 500))
            .unwrap();
        let order = orders.get(&id).unwrap();
        assert_eq!(order.total_amount, 1200);
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.items.len(), 2);
        assert_eq!(orders.status(), SyncStatus::Pending);
    }

    #[test]
    fn test_explicit_total_wins() {
        let mut orders = orders();
        let id = orders
            .add_order(NewOrder::new("Ada").item("Tea", 2, 350).total(1000))
            .unwrap();
        assert_eq!(orders.get(&id).unwrap().total_amount, 1000);
    }

    #[test]
    fn test_status_and_delete() {
        let mut orders = orders();
        let id = orders.add_order(NewOrder::new("Ada")).unwrap();
        orders.update_status(&id, OrderStatus::Ready).unwrap();
        assert_eq!(orders.with_status(OrderStatus::Ready).len(), 1);

        orders.delete_order(&id).unwrap();
        assert!(orders.is_empty());
        assert!(matches!(
            orders.update_status(&id, OrderStatus::Delivered),
            Err(TabsyncError::UnknownEntity(_))
        ));
    }
}
