//! Revocable handles for locally held binaries.
//!
//! An `ObjectRef` stands in for a network URL once the loader has fetched and
//! recompressed the bytes itself. The store owns the bytes until the handle
//! is revoked.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ObjectRef(String);

impl ObjectRef {
    fn generate() -> Self {
        Self(format!("blob:lumen/{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Shared registry of live object references.
#[derive(Debug, Clone, Default)]
pub struct ObjectStore {
    objects: Arc<Mutex<HashMap<ObjectRef, Bytes>>>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, bytes: impl Into<Bytes>) -> ObjectRef {
        let object = ObjectRef::generate();
        self.lock().insert(object.clone(), bytes.into());
        object
    }

    pub fn get(&self, object: &ObjectRef) -> Option<Bytes> {
        self.lock().get(object).cloned()
    }

    /// Release the bytes behind `object`. Returns false if it was not live.
    pub fn revoke(&self, object: &ObjectRef) -> bool {
        self.lock().remove(object).is_some()
    }

    pub fn live_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ObjectRef, Bytes>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
