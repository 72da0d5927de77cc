//! Directory-backed shared medium
//!
//! Each key is one `<escaped-key>.json` file holding the raw value. Writes go
//! to a temp file first and are renamed into place, so a crash mid-write
//! leaves either the old or the new value, never a torn one.
//!
//! Change notifications are delivered to watchers in this process only.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use tabsync_core::{MediumEvent, SharedMedium, StorageError};

use crate::WATCH_CAPACITY;

const EXTENSION: &str = "json";

/// Durable medium storing one file per key
#[derive(Debug, Clone)]
pub struct FileMedium {
    root: PathBuf,
    events: broadcast::Sender<MediumEvent>,
}

impl FileMedium {
    /// Open (creating if needed) a medium rooted at `root`
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        debug!(path = ?root, "Opened file medium");

        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Ok(Self { root, events })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.{}", escape_key(key), EXTENSION))
    }

    fn notify(&self, key: &str, new_value: Option<String>) {
        let _ = self.events.send(MediumEvent {
            key: key.to_string(),
            new_value,
        });
    }
}

impl SharedMedium for FileMedium {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let target = self.path_for(key);
        let temp = target.with_extension("tmp");

        {
            let mut file = fs::File::create(&temp)?;
            file.write_all(value.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&temp, &target)?;

        trace!(key, len = value.len(), "file medium set");
        self.notify(key, Some(value.to_string()));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.notify(key, None);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match unescape_key(stem) {
                Some(key) if key.starts_with(prefix) => keys.push(key),
                Some(_) => {}
                None => warn!(path = ?path, "Skipping file with undecodable name"),
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn watch(&self) -> broadcast::Receiver<MediumEvent> {
        self.events.subscribe()
    }
}

fn escape_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02x}", byte));
        }
    }
    out
}

fn unescape_key(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
