//! Custom tracing layers

use tracing::{Subscriber, span};
use tracing_subscriber::fmt::{self, format};
use tracing_subscriber::{
    layer::{Context, Layer},
    registry::LookupSpan,
};

use crate::config::JsonFields;
use crate::context::{TabContextData, TabContextGuard};

/// Layer that attaches the active tab context to new spans
///
/// Spans opened while a [`TabContextGuard`] is active get a
/// [`TabContextExtension`]; other layers and formatters can read it back.
#[derive(Debug, Default, Clone, Copy)]
pub struct TabContextLayer;

impl TabContextLayer {
    pub fn new() -> Self {
        Self
    }
}

/// Extension data stored on spans
#[derive(Debug, Clone)]
pub struct TabContextExtension {
    pub data: TabContextData,
}

impl<S> Layer<S> for TabContextLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_new_span(&self, _attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        if let Some(tab_ctx) = TabContextGuard::current() {
            span.extensions_mut()
                .insert(TabContextExtension { data: tab_ctx });
        }
    }
}

/// JSON lines formatter shaped by [`JsonFields`], for console or file
pub fn json_layer<S, W>(
    fields: JsonFields,
    writer: W,
) -> fmt::Layer<S, format::JsonFields, format::Format<format::Json>, W>
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    W: for<'writer> fmt::MakeWriter<'writer> + 'static,
{
    fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(fields.spans)
        .flatten_event(fields.flatten)
        .with_file(fields.location)
        .with_line_number(fields.location)
        .with_writer(writer)
}
