//! Resources the server can hand out.
//!
//! The server looks names up through [`ResourceStore`] and never touches the
//! file system directly.  [`DirStore`] serves files below a root directory;
//! [`MemoryStore`] keeps everything in a map.  A missing resource is not a
//! protocol error: the server answers with [`not_found_payload`] in-band.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use crate::packet::MAX_PAYLOAD_SIZE;

const NOT_FOUND_PREFIX: &[u8] = b"404 No Such File: ";

/// Lookup of named content.
pub trait ResourceStore {
    /// The full content of `name`, or `None` when it does not exist.
    fn fetch(&self, name: &str) -> Option<Vec<u8>>;
}

/// Files below a root directory.
///
/// Names that are absolute or climb out of the root (`..`) are treated as
/// absent.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, name: &str) -> Option<PathBuf> {
        let relative = Path::new(name);
        let contained = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        (contained && !name.is_empty()).then(|| self.root.join(relative))
    }
}

impl ResourceStore for DirStore {
    fn fetch(&self, name: &str) -> Option<Vec<u8>> {
        let path = self.resolve(name)?;
        if !path.is_file() {
            return None;
        }
        match std::fs::read(&path) {
            Ok(content) => Some(content),
            Err(e) => {
                log::warn!("[resource] failed to read {}: {e}", path.display());
                None
            }
        }
    }
}

/// Resources held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: HashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.insert(name, content);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, content: impl Into<Vec<u8>>) {
        self.entries.insert(name.into(), content.into());
    }
}

impl ResourceStore for MemoryStore {
    fn fetch(&self, name: &str) -> Option<Vec<u8>> {
        self.entries.get(name).cloned()
    }
}

/// Split `content` into payload-sized pieces.  Empty content has no chunks.
pub fn chunks(content: &[u8]) -> std::slice::Chunks<'_, u8> {
    content.chunks(MAX_PAYLOAD_SIZE)
}

/// The in-band reply for a resource that does not exist.
pub fn not_found_payload(name: &str) -> Vec<u8> {
    let mut payload = NOT_FOUND_PREFIX.to_vec();
    payload.extend_from_slice(name.as_bytes());
    payload.truncate(MAX_PAYLOAD_SIZE);
    payload
}

/// `true` when `content` is a not-found reply.
pub fn is_not_found(content: &[u8]) -> bool {
    content.starts_with(NOT_FOUND_PREFIX)
}
