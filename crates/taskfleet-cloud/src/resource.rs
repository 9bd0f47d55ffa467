//! Resource and data source contracts
//!
//! Providers model a task as a graph of [`DataSource`]s (read-only references
//! resolved first) and [`Resource`]s (cloud objects the task owns). Each node
//! keeps `Arc` handles to the nodes it depends on and stores what it read in a
//! [`Slot`], so dependents can only observe values that were actually read.

use crate::error::{CloudError, Result};
use async_trait::async_trait;
use std::sync::Mutex;

/// Mutable cloud object owned by a task
#[async_trait]
pub trait Resource: Send + Sync {
    /// Create the object; an object that already exists is read instead
    async fn create(&self) -> Result<()>;

    async fn read(&self) -> Result<()>;

    /// Delete the object; an absent object is not an error
    async fn delete(&self) -> Result<()>;
}

/// Read-only external reference
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn read(&self) -> Result<()>;
}

/// Value populated by a read or create
#[derive(Debug)]
pub struct Slot<T> {
    name: &'static str,
    value: Mutex<Option<T>>,
}

impl<T: Clone> Slot<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            value: Mutex::new(None),
        }
    }

    pub fn set(&self, value: T) {
        *self.lock() = Some(value);
    }

    /// The stored value, or [`CloudError::Unresolved`] if nothing was read yet
    pub fn get(&self) -> Result<T> {
        self.lock().clone().ok_or(CloudError::Unresolved(self.name))
    }

    pub fn try_get(&self) -> Option<T> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        *self.lock() = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<T>> {
        self.value
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Map `NotFound` to success, for idempotent teardown
pub fn ignore_not_found(result: Result<()>) -> Result<()> {
    match result {
        Err(err) if err.is_not_found() => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_unresolved_until_set() {
        let slot: Slot<String> = Slot::new("security group");
        assert!(matches!(
            slot.get(),
            Err(CloudError::Unresolved("security group"))
        ));
        slot.set("sg-123".into());
        assert_eq!(slot.get().unwrap(), "sg-123");
        slot.clear();
        assert!(slot.try_get().is_none());
    }

    #[test]
    fn test_ignore_not_found() {
        assert!(ignore_not_found(Err(CloudError::NotFound("x".into()))).is_ok());
        assert!(ignore_not_found(Err(CloudError::Api("boom".into()))).is_err());
    }
}
