//! Persistence for purchases, entitlements and ad slots.
//!
//! Mutable records carry a `version` counter. Writers go through a
//! compare-and-swap: a save succeeds only if the stored version still equals
//! the version the caller read, and the stored copy then gets the next
//! version. A `false` return means another writer got there first and the
//! caller must re-read.
//!
//! Redeemed transaction references live in their own table: once a
//! reference has paid for a purchase or booking it cannot pay for another.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use fs2::FileExt;
use raptorq_lib::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ads::{AdSlot, AdSlotId};
use crate::ledger::PurchaseRecord;
use crate::subscription::Entitlement;

/// Record with an optimistic-concurrency counter.
pub trait Versioned: Clone {
    fn version(&self) -> u64;
    fn set_version(&mut self, version: u64);
}

impl Versioned for PurchaseRecord {
    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

impl Versioned for AdSlot {
    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

/// Storage backend for the engine.
#[async_trait]
pub trait EngineStorage: Send + Sync {
    // Purchases
    async fn get_purchase(&self, id: &str) -> Result<Option<PurchaseRecord>>;
    async fn list_purchases(&self) -> Result<Vec<PurchaseRecord>>;
    async fn list_purchases_for_account(&self, account: &str) -> Result<Vec<PurchaseRecord>>;
    /// Store `record` if the stored version equals `expected` (None: no
    /// record yet). Returns whether the write happened.
    async fn save_purchase(&self, record: &PurchaseRecord, expected: Option<u64>) -> Result<bool>;

    // Entitlements (last write wins)
    async fn get_entitlement(&self, account: &str, service_id: &str) -> Result<Option<Entitlement>>;
    async fn list_entitlements(&self, account: &str) -> Result<Vec<Entitlement>>;
    async fn put_entitlement(&self, entitlement: &Entitlement) -> Result<()>;

    // Ad slots
    async fn get_slot(&self, id: AdSlotId) -> Result<Option<AdSlot>>;
    /// Same contract as [`EngineStorage::save_purchase`].
    async fn save_slot(&self, slot: &AdSlot, expected: Option<u64>) -> Result<bool>;

    // Redeemed transactions
    /// Bind `tx_reference` to `owner` unless it is already bound. Returns
    /// the owner the reference is bound to afterwards.
    async fn redeem_tx(&self, tx_reference: &str, owner: &str) -> Result<String>;
    /// Drop the binding if `owner` still holds it.
    async fn release_tx(&self, tx_reference: &str, owner: &str) -> Result<()>;
}

/// Stored binding of a transaction reference to what it paid for.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Redemption {
    tx_reference: String,
    owner: String,
}

fn next_version(expected: Option<u64>) -> u64 {
    expected.map_or(1, |v| v + 1)
}

fn swap_in<K, V>(map: &mut HashMap<K, V>, key: K, value: &V, expected: Option<u64>) -> bool
where
    K: std::hash::Hash + Eq,
    V: Versioned,
{
    if map.get(&key).map(Versioned::version) != expected {
        return false;
    }
    let mut stored = value.clone();
    stored.set_version(next_version(expected));
    map.insert(key, stored);
    true
}

/// In-process storage.
#[derive(Default)]
pub struct MemoryStorage {
    purchases: RwLock<HashMap<String, PurchaseRecord>>,
    entitlements: RwLock<HashMap<(String, String), Entitlement>>,
    slots: RwLock<HashMap<AdSlotId, AdSlot>>,
    redemptions: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EngineStorage for MemoryStorage {
    async fn get_purchase(&self, id: &str) -> Result<Option<PurchaseRecord>> {
        let purchases = self.purchases.read().unwrap_or_else(|e| e.into_inner());
        Ok(purchases.get(id).cloned())
    }

    async fn list_purchases(&self) -> Result<Vec<PurchaseRecord>> {
        let purchases = self.purchases.read().unwrap_or_else(|e| e.into_inner());
        Ok(purchases.values().cloned().collect())
    }

    async fn list_purchases_for_account(&self, account: &str) -> Result<Vec<PurchaseRecord>> {
        let purchases = self.purchases.read().unwrap_or_else(|e| e.into_inner());
        Ok(purchases
            .values()
            .filter(|p| p.account == account)
            .cloned()
            .collect())
    }

    async fn save_purchase(&self, record: &PurchaseRecord, expected: Option<u64>) -> Result<bool> {
        let mut purchases = self.purchases.write().unwrap_or_else(|e| e.into_inner());
        Ok(swap_in(&mut *purchases, record.id.clone(), record, expected))
    }

    async fn get_entitlement(&self, account: &str, service_id: &str) -> Result<Option<Entitlement>> {
        let entitlements = self.entitlements.read().unwrap_or_else(|e| e.into_inner());
        Ok(entitlements
            .get(&(account.to_string(), service_id.to_string()))
            .cloned())
    }

    async fn list_entitlements(&self, account: &str) -> Result<Vec<Entitlement>> {
        let entitlements = self.entitlements.read().unwrap_or_else(|e| e.into_inner());
        Ok(entitlements
            .values()
            .filter(|e| e.account == account)
            .cloned()
            .collect())
    }

    async fn put_entitlement(&self, entitlement: &Entitlement) -> Result<()> {
        let mut entitlements = self.entitlements.write().unwrap_or_else(|e| e.into_inner());
        entitlements.insert(
            (entitlement.account.clone(), entitlement.service_id.clone()),
            entitlement.clone(),
        );
        Ok(())
    }

    async fn get_slot(&self, id: AdSlotId) -> Result<Option<AdSlot>> {
        let slots = self.slots.read().unwrap_or_else(|e| e.into_inner());
        Ok(slots.get(&id).cloned())
    }

    async fn save_slot(&self, slot: &AdSlot, expected: Option<u64>) -> Result<bool> {
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        Ok(swap_in(&mut *slots, slot.id, slot, expected))
    }

    async fn redeem_tx(&self, tx_reference: &str, owner: &str) -> Result<String> {
        let mut redemptions = self.redemptions.write().unwrap_or_else(|e| e.into_inner());
        Ok(redemptions
            .entry(tx_reference.to_string())
            .or_insert_with(|| owner.to_string())
            .clone())
    }

    async fn release_tx(&self, tx_reference: &str, owner: &str) -> Result<()> {
        let mut redemptions = self.redemptions.write().unwrap_or_else(|e| e.into_inner());
        if redemptions.get(tx_reference).map(String::as_str) == Some(owner) {
            redemptions.remove(tx_reference);
        }
        Ok(())
    }
}

/// JSON-file storage (native only).
///
/// One file per record under `purchases/`, `entitlements/`, `slots/` and
/// `redemptions/`.
/// Compare-and-swap holds an exclusive fs2 lock on the table's `.lock`
/// file, so separate processes sharing a directory also serialize.
pub struct FileStorage {
    base_path: PathBuf,
}

const PURCHASES: &str = "purchases";
const ENTITLEMENTS: &str = "entitlements";
const SLOTS: &str = "slots";
const REDEMPTIONS: &str = "redemptions";

impl FileStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        for table in [PURCHASES, ENTITLEMENTS, SLOTS, REDEMPTIONS] {
            fs::create_dir_all(base_path.join(table))?;
        }
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn record_path(&self, table: &str, key: &str) -> PathBuf {
        self.base_path.join(table).join(format!("{}.json", key))
    }

    fn entitlement_key(account: &str, service_id: &str) -> String {
        format!("{}_{}", hex::encode(account), hex::encode(service_id))
    }

    // Transaction references are caller-supplied and unbounded in length.
    fn redemption_key(tx_reference: &str) -> String {
        hex::encode(Sha256::digest(tx_reference.as_bytes()))
    }

    fn lock_table(&self, table: &str) -> Result<File> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.base_path.join(table).join(".lock"))?;
        file.lock_exclusive()?;
        Ok(file)
    }

    fn read_record<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    fn write_record<T: Serialize>(path: &Path, value: &T) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(value)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn read_table<T: DeserializeOwned>(&self, table: &str) -> Result<Vec<T>> {
        let mut records = Vec::new();
        for entry in fs::read_dir(self.base_path.join(table))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(record) = Self::read_record(&path)? {
                    records.push(record);
                }
            }
        }
        Ok(records)
    }

    fn swap_file<T: Versioned + Serialize + DeserializeOwned>(
        &self,
        table: &str,
        key: &str,
        value: &T,
        expected: Option<u64>,
    ) -> Result<bool> {
        let lock = self.lock_table(table)?;
        let path = self.record_path(table, key);

        let current: Option<T> = Self::read_record(&path)?;
        let swapped = if current.as_ref().map(Versioned::version) == expected {
            let mut stored = value.clone();
            stored.set_version(next_version(expected));
            Self::write_record(&path, &stored)?;
            true
        } else {
            false
        };

        lock.unlock()?;
        Ok(swapped)
    }
}

/// Purchase ids are generated UUIDs; anything else cannot name a file.
fn is_safe_key(key: &str) -> bool {
    !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[async_trait]
impl EngineStorage for FileStorage {
    async fn get_purchase(&self, id: &str) -> Result<Option<PurchaseRecord>> {
        if !is_safe_key(id) {
            return Ok(None);
        }
        Self::read_record(&self.record_path(PURCHASES, id))
    }

    async fn list_purchases(&self) -> Result<Vec<PurchaseRecord>> {
        self.read_table(PURCHASES)
    }

    async fn list_purchases_for_account(&self, account: &str) -> Result<Vec<PurchaseRecord>> {
        Ok(self
            .read_table::<PurchaseRecord>(PURCHASES)?
            .into_iter()
            .filter(|p| p.account == account)
            .collect())
    }

    async fn save_purchase(&self, record: &PurchaseRecord, expected: Option<u64>) -> Result<bool> {
        if !is_safe_key(&record.id) {
            return Err(raptorq_lib::EngineError::invalid(
                "purchase id",
                format!("{:?} is not a storable key", record.id),
            ));
        }
        self.swap_file(PURCHASES, &record.id, record, expected)
    }

    async fn get_entitlement(&self, account: &str, service_id: &str) -> Result<Option<Entitlement>> {
        Self::read_record(&self.record_path(ENTITLEMENTS, &Self::entitlement_key(account, service_id)))
    }

    async fn list_entitlements(&self, account: &str) -> Result<Vec<Entitlement>> {
        Ok(self
            .read_table::<Entitlement>(ENTITLEMENTS)?
            .into_iter()
            .filter(|e| e.account == account)
            .collect())
    }

    async fn put_entitlement(&self, entitlement: &Entitlement) -> Result<()> {
        let lock = self.lock_table(ENTITLEMENTS)?;
        let path = self.record_path(
            ENTITLEMENTS,
            &Self::entitlement_key(&entitlement.account, &entitlement.service_id),
        );
        Self::write_record(&path, entitlement)?;
        lock.unlock()?;
        Ok(())
    }

    async fn get_slot(&self, id: AdSlotId) -> Result<Option<AdSlot>> {
        Self::read_record(&self.record_path(SLOTS, id.as_str()))
    }

    async fn save_slot(&self, slot: &AdSlot, expected: Option<u64>) -> Result<bool> {
        self.swap_file(SLOTS, slot.id.as_str(), slot, expected)
    }

    async fn redeem_tx(&self, tx_reference: &str, owner: &str) -> Result<String> {
        let lock = self.lock_table(REDEMPTIONS)?;
        let path = self.record_path(REDEMPTIONS, &Self::redemption_key(tx_reference));

        let holder = match Self::read_record::<Redemption>(&path)? {
            Some(existing) => existing.owner,
            None => {
                let redemption = Redemption {
                    tx_reference: tx_reference.to_string(),
                    owner: owner.to_string(),
                };
                Self::write_record(&path, &redemption)?;
                redemption.owner
            }
        };

        lock.unlock()?;
        Ok(holder)
    }

    async fn release_tx(&self, tx_reference: &str, owner: &str) -> Result<()> {
        let lock = self.lock_table(REDEMPTIONS)?;
        let path = self.record_path(REDEMPTIONS, &Self::redemption_key(tx_reference));

        if let Some(existing) = Self::read_record::<Redemption>(&path)? {
            if existing.owner == owner {
                fs::remove_file(&path)?;
            }
        }

        lock.unlock()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Amount;
    use crate::ledger::PurchaseStatus;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn purchase(id: &str, account: &str) -> PurchaseRecord {
        let created_at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        PurchaseRecord {
            id: id.to_string(),
            service_id: "binarai_unlimited".to_string(),
            account: account.to_string(),
            price_local: Amount::new(dec!(10000)),
            price_major: Amount::new(dec!(100)),
            status: PurchaseStatus::PendingPayment,
            created_at,
            payment_window_expires_at: created_at + Duration::hours(1),
            tx_reference: None,
            confirmed_at: None,
            version: 0,
        }
    }

    async fn exercise_cas(storage: &dyn EngineStorage) {
        let record = purchase("p-1", "alice");
        assert!(storage.save_purchase(&record, None).await.unwrap());
        assert!(!storage.save_purchase(&record, None).await.unwrap());

        let stored = storage.get_purchase("p-1").await.unwrap().unwrap();
        assert_eq!(stored.version, 1);

        let mut confirmed = stored.clone();
        confirmed.status = PurchaseStatus::Confirmed;
        assert!(storage.save_purchase(&confirmed, Some(1)).await.unwrap());
        // Stale writer loses.
        assert!(!storage.save_purchase(&stored, Some(1)).await.unwrap());

        let stored = storage.get_purchase("p-1").await.unwrap().unwrap();
        assert_eq!(stored.status, PurchaseStatus::Confirmed);
        assert_eq!(stored.version, 2);

        storage
            .save_purchase(&purchase("p-2", "bob"), None)
            .await
            .unwrap();
        assert_eq!(storage.list_purchases().await.unwrap().len(), 2);
        assert_eq!(
            storage.list_purchases_for_account("bob").await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_memory_cas() {
        exercise_cas(&MemoryStorage::new()).await;
    }

    #[tokio::test]
    async fn test_file_cas() {
        let dir = TempDir::new().unwrap();
        exercise_cas(&FileStorage::new(dir.path()).unwrap()).await;
    }

    async fn exercise_redemptions(storage: &dyn EngineStorage) {
        let tx = "ab".repeat(32);
        assert_eq!(storage.redeem_tx(&tx, "purchase:p-1").await.unwrap(), "purchase:p-1");
        assert_eq!(storage.redeem_tx(&tx, "purchase:p-2").await.unwrap(), "purchase:p-1");

        // Only the holder can release.
        storage.release_tx(&tx, "purchase:p-2").await.unwrap();
        assert_eq!(storage.redeem_tx(&tx, "purchase:p-2").await.unwrap(), "purchase:p-1");

        storage.release_tx(&tx, "purchase:p-1").await.unwrap();
        assert_eq!(storage.redeem_tx(&tx, "purchase:p-2").await.unwrap(), "purchase:p-2");
    }

    #[tokio::test]
    async fn test_memory_redemptions() {
        exercise_redemptions(&MemoryStorage::new()).await;
    }

    #[tokio::test]
    async fn test_file_redemptions() {
        let dir = TempDir::new().unwrap();
        exercise_redemptions(&FileStorage::new(dir.path()).unwrap()).await;

        let reopened = FileStorage::new(dir.path()).unwrap();
        let long_tx = "../".repeat(200);
        assert_eq!(reopened.redeem_tx(&"ab".repeat(32), "ad:x").await.unwrap(), "purchase:p-2");
        assert_eq!(reopened.redeem_tx(&long_tx, "ad:x").await.unwrap(), "ad:x");
    }

    #[tokio::test]
    async fn test_file_entitlements_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let entitlement = Entitlement {
            account: "RTM/odd account".to_string(),
            service_id: "pro_mode_console".to_string(),
            activated_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            expires_at: None,
            active: true,
            purchase_id: None,
        };

        FileStorage::new(dir.path())
            .unwrap()
            .put_entitlement(&entitlement)
            .await
            .unwrap();

        let reopened = FileStorage::new(dir.path()).unwrap();
        let loaded = reopened
            .get_entitlement("RTM/odd account", "pro_mode_console")
            .await
            .unwrap();
        assert_eq!(loaded, Some(entitlement));
        assert_eq!(
            reopened.list_entitlements("RTM/odd account").await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_file_rejects_path_like_ids() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();

        assert!(storage.get_purchase("../escape").await.unwrap().is_none());
        assert!(storage
            .save_purchase(&purchase("../escape", "alice"), None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_slot_cas() {
        let storage = MemoryStorage::new();
        let slot = AdSlot::vacant(AdSlotId::HeaderBanner);

        assert!(storage.get_slot(AdSlotId::HeaderBanner).await.unwrap().is_none());
        assert!(storage.save_slot(&slot, None).await.unwrap());
        assert!(!storage.save_slot(&slot, None).await.unwrap());
        assert_eq!(
            storage
                .get_slot(AdSlotId::HeaderBanner)
                .await
                .unwrap()
                .unwrap()
                .version,
            1
        );
    }
}
