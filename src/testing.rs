//! Test doubles for the purchase service and storage

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::purchases::{
    CustomerInfo, Offerings, PackageRef, PurchaseError, PurchaseErrorKind, PurchaseService,
};
use crate::storage::{KeyValueStore, MemoryStore, StorageError};

/// Purchase service returning scripted snapshots
#[derive(Default)]
pub struct ScriptedPurchases {
    customer_info: Mutex<Option<CustomerInfo>>,
    purchase_info: Mutex<Option<CustomerInfo>>,
    fetch_failure: Mutex<Option<PurchaseErrorKind>>,
    purchase_failure: Mutex<Option<PurchaseErrorKind>>,
    log_ins: Mutex<Vec<String>>,
}

impl ScriptedPurchases {
    pub fn set_customer_info(&self, info: CustomerInfo) {
        *self.customer_info.lock().unwrap_or_else(PoisonError::into_inner) = Some(info);
    }

    pub fn set_purchase_info(&self, info: CustomerInfo) {
        *self.purchase_info.lock().unwrap_or_else(PoisonError::into_inner) = Some(info);
    }

    /// Make log_in, customer_info, restore and offerings fail
    pub fn fail_fetch_with(&self, kind: PurchaseErrorKind) {
        *self.fetch_failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(kind);
    }

    pub fn fail_purchase_with(&self, kind: PurchaseErrorKind) {
        *self.purchase_failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(kind);
    }

    pub fn log_in_calls(&self) -> Vec<String> {
        self.log_ins.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn fetch(&self, app_user_id: &str) -> Result<CustomerInfo, PurchaseError> {
        if let Some(kind) = *self.fetch_failure.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(PurchaseError::new(kind, "scripted failure"));
        }
        Ok(self
            .customer_info
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| CustomerInfo::new(app_user_id)))
    }
}

#[async_trait]
impl PurchaseService for ScriptedPurchases {
    async fn log_in(&self, app_user_id: &str) -> Result<CustomerInfo, PurchaseError> {
        self.log_ins
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(app_user_id.to_string());
        self.fetch(app_user_id)
    }

    async fn customer_info(&self, app_user_id: &str) -> Result<CustomerInfo, PurchaseError> {
        self.fetch(app_user_id)
    }

    async fn purchase_package(
        &self,
        app_user_id: &str,
        _package: &PackageRef,
    ) -> Result<CustomerInfo, PurchaseError> {
        if let Some(kind) = *self.purchase_failure.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(PurchaseError::new(kind, "scripted failure"));
        }
        Ok(self
            .purchase_info
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| CustomerInfo::new(app_user_id)))
    }

    async fn restore_purchases(&self, app_user_id: &str) -> Result<CustomerInfo, PurchaseError> {
        self.fetch(app_user_id)
    }

    async fn offerings(&self, app_user_id: &str) -> Result<Offerings, PurchaseError> {
        self.fetch(app_user_id).map(|_| Offerings::default())
    }
}

/// Memory store with injectable failures
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing_writes: AtomicU32,
    failing_reads: AtomicBool,
    reads: AtomicU32,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` write calls (a batch counts as one)
    pub fn fail_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.failing_reads.store(fail, Ordering::SeqCst);
    }

    /// Number of `get` calls served so far
    pub fn read_count(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }

    fn check_write(&self) -> Result<(), StorageError> {
        let took = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match took {
            Ok(_) => Err(StorageError::backend("injected write failure")),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.failing_reads.load(Ordering::SeqCst) {
            return Err(StorageError::backend("injected read failure"));
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.check_write()?;
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.check_write()?;
        self.inner.remove(key).await
    }

    async fn set_many(&self, entries: &[(&str, String)]) -> Result<(), StorageError> {
        self.check_write()?;
        self.inner.set_many(entries).await
    }

    async fn remove_many(&self, keys: &[&str]) -> Result<(), StorageError> {
        self.check_write()?;
        self.inner.remove_many(keys).await
    }
}
