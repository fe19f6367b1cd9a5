//! DEPOT Store - Entity Store Trait and In-Memory Implementation
//!
//! Defines the persistence abstraction for DEPOT entities and the atomic
//! write-batch protocol the ledger engine relies on. Every multi-entity
//! custody transition is expressed as one [`WriteSet`] that the store commits
//! all-or-nothing, guarded by per-entity version preconditions.

use depot_core::{
    AddRecord, DemobRecord, EntityId, EntityType, Item, LocationType, OffboardingTask,
    OffboardingTaskStatus, Person, PersonStatus, StoreError, TransferRecord, TransferStatus,
    Warehouse, WarehouseTransferRecord,
};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

// ============================================================================
// VERSIONED READS
// ============================================================================

/// A stored entity together with its optimistic-concurrency version.
///
/// The version is the precondition a later [`WriteOp`] carries: if another
/// writer got in between, `apply` rejects the whole batch and the caller
/// re-reads and retries.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

impl<T> Versioned<T> {
    fn new(value: T) -> Self {
        Self { value, version: 1 }
    }
}

// ============================================================================
// UPDATE TYPES
// ============================================================================

/// Update payload for items.
#[derive(Debug, Clone, Default)]
pub struct ItemUpdate {
    /// New total owned count
    pub quantity: Option<i64>,
    /// New custody location
    pub location: Option<LocationType>,
    /// New assignee; `Some(None)` clears the field
    pub assigned_to: Option<Option<EntityId>>,
    /// New home warehouse
    pub warehouse_id: Option<EntityId>,
}

/// Update payload for people.
#[derive(Debug, Clone, Default)]
pub struct PersonUpdate {
    /// New status
    pub status: Option<PersonStatus>,
    /// New denormalized stock counter
    pub stock_qty: Option<i64>,
}

/// Update payload for warehouses.
#[derive(Debug, Clone, Default)]
pub struct WarehouseUpdate {
    /// New denormalized stock counter
    pub stock_qty: Option<i64>,
}

/// Update payload for offboarding tasks.
#[derive(Debug, Clone, Default)]
pub struct OffboardingTaskUpdate {
    /// New status
    pub status: Option<OffboardingTaskStatus>,
}

// ============================================================================
// WRITE BATCH
// ============================================================================

/// One write in an atomic batch. Counter updates carry the version the
/// writer read; ledger record inserts and status flips do not (records are
/// append-mostly and their status transition is monotonic).
#[derive(Debug, Clone)]
pub enum WriteOp {
    UpdateItem {
        id: EntityId,
        expected_version: u64,
        update: ItemUpdate,
    },
    UpdatePerson {
        id: EntityId,
        expected_version: u64,
        update: PersonUpdate,
    },
    UpdateWarehouse {
        id: EntityId,
        expected_version: u64,
        update: WarehouseUpdate,
    },
    UpdateOffboardingTask {
        id: EntityId,
        expected_version: u64,
        update: OffboardingTaskUpdate,
    },
    InsertTransferRecord(TransferRecord),
    InsertAddRecord(AddRecord),
    InsertWarehouseTransferRecord(WarehouseTransferRecord),
    InsertDemobRecord(DemobRecord),
    UpdateTransferRecordStatus {
        id: EntityId,
        status: TransferStatus,
    },
}

/// An ordered batch of writes committed as a single atomic unit.
#[derive(Debug, Clone, Default)]
pub struct WriteSet {
    pub ops: Vec<WriteOp>,
}

impl WriteSet {
    /// Create an empty write set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one write.
    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

// ============================================================================
// ENTITY STORE TRAIT
// ============================================================================

/// Persistence abstraction for DEPOT entities.
///
/// Reads return entities with their current version. All multi-entity writes
/// go through [`EntityStore::apply`], which commits the whole batch or none
/// of it. Master-data inserts (items, people, warehouses, tasks) are
/// standalone because they touch a single entity.
pub trait EntityStore: Send + Sync {
    // === Item Operations ===

    /// Insert a new item.
    fn item_insert(&self, item: &Item) -> Result<(), StoreError>;

    /// Get an item by ID.
    fn item_get(&self, id: EntityId) -> Result<Option<Versioned<Item>>, StoreError>;

    /// List all items. Used by batch maintenance operations.
    fn item_list(&self) -> Result<Vec<Versioned<Item>>, StoreError>;

    // === Person Operations ===

    /// Insert a new person.
    fn person_insert(&self, person: &Person) -> Result<(), StoreError>;

    /// Get a person by ID.
    fn person_get(&self, id: EntityId) -> Result<Option<Versioned<Person>>, StoreError>;

    // === Warehouse Operations ===

    /// Insert a new warehouse.
    fn warehouse_insert(&self, warehouse: &Warehouse) -> Result<(), StoreError>;

    /// Get a warehouse by ID.
    fn warehouse_get(&self, id: EntityId) -> Result<Option<Versioned<Warehouse>>, StoreError>;

    // === Ledger Record Operations ===

    /// Get a transfer record by ID.
    fn transfer_record_get(&self, id: EntityId) -> Result<Option<TransferRecord>, StoreError>;

    /// Find the most recent `Active` transfer record for `(item, person)`.
    /// Ordered by creation time descending, first match wins.
    fn find_active_transfer(
        &self,
        item_id: EntityId,
        person_id: EntityId,
    ) -> Result<Option<TransferRecord>, StoreError>;

    /// Find the most recent `Active` transfer record for an item regardless
    /// of person. Drives reconciliation.
    fn find_latest_active_transfer_for_item(
        &self,
        item_id: EntityId,
    ) -> Result<Option<TransferRecord>, StoreError>;

    /// Get an add record by ID.
    fn add_record_get(&self, id: EntityId) -> Result<Option<AddRecord>, StoreError>;

    /// Get a demob record by ID.
    fn demob_record_get(&self, id: EntityId) -> Result<Option<DemobRecord>, StoreError>;

    // === Offboarding Task Operations ===

    /// Insert a new offboarding task.
    fn task_insert(&self, task: &OffboardingTask) -> Result<(), StoreError>;

    /// Get an offboarding task by ID.
    fn task_get(&self, id: EntityId) -> Result<Option<Versioned<OffboardingTask>>, StoreError>;

    // === Atomic Batch ===

    /// Commit a write set as a single atomic unit.
    ///
    /// Validation happens before any mutation: if any op references a
    /// missing entity, carries a stale version, or would double-insert a
    /// record, the whole batch is rejected and nothing is written.
    fn apply(&self, writes: WriteSet) -> Result<(), StoreError>;
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

#[derive(Debug, Default)]
struct StoreState {
    items: HashMap<EntityId, Versioned<Item>>,
    people: HashMap<EntityId, Versioned<Person>>,
    warehouses: HashMap<EntityId, Versioned<Warehouse>>,
    tasks: HashMap<EntityId, Versioned<OffboardingTask>>,
    transfers: HashMap<EntityId, TransferRecord>,
    adds: HashMap<EntityId, AddRecord>,
    warehouse_transfers: HashMap<EntityId, WarehouseTransferRecord>,
    demobs: HashMap<EntityId, DemobRecord>,
}

/// In-memory entity store.
///
/// A single lock over the whole state makes `apply` trivially atomic: the
/// batch validates and commits under one write guard, so a concurrent
/// writer either sees nothing or everything.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreState>, StoreError> {
        self.state.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreState>, StoreError> {
        self.state.write().map_err(|_| StoreError::LockPoisoned)
    }

    /// Count of stored items.
    pub fn item_count(&self) -> usize {
        self.read().map(|s| s.items.len()).unwrap_or(0)
    }

    /// Count of stored transfer records.
    pub fn transfer_record_count(&self) -> usize {
        self.read().map(|s| s.transfers.len()).unwrap_or(0)
    }

    /// Count of stored add records.
    pub fn add_record_count(&self) -> usize {
        self.read().map(|s| s.adds.len()).unwrap_or(0)
    }

    /// Count of stored warehouse transfer records.
    pub fn warehouse_transfer_count(&self) -> usize {
        self.read().map(|s| s.warehouse_transfers.len()).unwrap_or(0)
    }

    /// Count of stored demob records.
    pub fn demob_record_count(&self) -> usize {
        self.read().map(|s| s.demobs.len()).unwrap_or(0)
    }

    /// Count of `Active` transfer records for one item. Test/diagnostic aid
    /// for the custody-exclusivity invariant.
    pub fn active_transfer_count_for_item(&self, item_id: EntityId) -> usize {
        self.read()
            .map(|s| {
                s.transfers
                    .values()
                    .filter(|t| t.item_id == item_id && t.status == TransferStatus::Active)
                    .count()
            })
            .unwrap_or(0)
    }

    fn validate(state: &StoreState, writes: &WriteSet) -> Result<(), StoreError> {
        for op in &writes.ops {
            match op {
                WriteOp::UpdateItem {
                    id,
                    expected_version,
                    ..
                } => check_version(state.items.get(id), EntityType::Item, *id, *expected_version)?,
                WriteOp::UpdatePerson {
                    id,
                    expected_version,
                    ..
                } => check_version(
                    state.people.get(id),
                    EntityType::Person,
                    *id,
                    *expected_version,
                )?,
                WriteOp::UpdateWarehouse {
                    id,
                    expected_version,
                    ..
                } => check_version(
                    state.warehouses.get(id),
                    EntityType::Warehouse,
                    *id,
                    *expected_version,
                )?,
                WriteOp::UpdateOffboardingTask {
                    id,
                    expected_version,
                    ..
                } => check_version(
                    state.tasks.get(id),
                    EntityType::OffboardingTask,
                    *id,
                    *expected_version,
                )?,
                WriteOp::InsertTransferRecord(r) => {
                    if state.transfers.contains_key(&r.transfer_id) {
                        return Err(StoreError::InsertFailed {
                            entity_type: EntityType::TransferRecord,
                            reason: "already exists".to_string(),
                        });
                    }
                }
                WriteOp::InsertAddRecord(r) => {
                    if state.adds.contains_key(&r.add_id) {
                        return Err(StoreError::InsertFailed {
                            entity_type: EntityType::AddRecord,
                            reason: "already exists".to_string(),
                        });
                    }
                }
                WriteOp::InsertWarehouseTransferRecord(r) => {
                    if state.warehouse_transfers.contains_key(&r.transfer_id) {
                        return Err(StoreError::InsertFailed {
                            entity_type: EntityType::WarehouseTransferRecord,
                            reason: "already exists".to_string(),
                        });
                    }
                }
                WriteOp::InsertDemobRecord(r) => {
                    if state.demobs.contains_key(&r.demob_id) {
                        return Err(StoreError::InsertFailed {
                            entity_type: EntityType::DemobRecord,
                            reason: "already exists".to_string(),
                        });
                    }
                }
                WriteOp::UpdateTransferRecordStatus { id, .. } => {
                    if !state.transfers.contains_key(id) {
                        return Err(StoreError::NotFound {
                            entity_type: EntityType::TransferRecord,
                            id: *id,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn commit(state: &mut StoreState, writes: WriteSet) {
        let now = chrono::Utc::now();
        for op in writes.ops {
            match op {
                WriteOp::UpdateItem { id, update, .. } => {
                    // Validated above; entry is present
                    if let Some(entry) = state.items.get_mut(&id) {
                        if let Some(quantity) = update.quantity {
                            entry.value.quantity = quantity;
                        }
                        if let Some(location) = update.location {
                            entry.value.location = location;
                        }
                        if let Some(assigned_to) = update.assigned_to {
                            entry.value.assigned_to = assigned_to;
                        }
                        if let Some(warehouse_id) = update.warehouse_id {
                            entry.value.warehouse_id = warehouse_id;
                        }
                        entry.value.updated_at = now;
                        entry.version += 1;
                    }
                }
                WriteOp::UpdatePerson { id, update, .. } => {
                    if let Some(entry) = state.people.get_mut(&id) {
                        if let Some(status) = update.status {
                            entry.value.status = status;
                        }
                        if let Some(stock_qty) = update.stock_qty {
                            entry.value.stock_qty = stock_qty;
                        }
                        entry.value.updated_at = now;
                        entry.version += 1;
                    }
                }
                WriteOp::UpdateWarehouse { id, update, .. } => {
                    if let Some(entry) = state.warehouses.get_mut(&id) {
                        if let Some(stock_qty) = update.stock_qty {
                            entry.value.stock_qty = stock_qty;
                        }
                        entry.value.updated_at = now;
                        entry.version += 1;
                    }
                }
                WriteOp::UpdateOffboardingTask { id, update, .. } => {
                    if let Some(entry) = state.tasks.get_mut(&id) {
                        if let Some(status) = update.status {
                            entry.value.status = status;
                        }
                        entry.value.updated_at = now;
                        entry.version += 1;
                    }
                }
                WriteOp::InsertTransferRecord(r) => {
                    state.transfers.insert(r.transfer_id, r);
                }
                WriteOp::InsertAddRecord(r) => {
                    state.adds.insert(r.add_id, r);
                }
                WriteOp::InsertWarehouseTransferRecord(r) => {
                    state.warehouse_transfers.insert(r.transfer_id, r);
                }
                WriteOp::InsertDemobRecord(r) => {
                    state.demobs.insert(r.demob_id, r);
                }
                WriteOp::UpdateTransferRecordStatus { id, status } => {
                    if let Some(record) = state.transfers.get_mut(&id) {
                        record.status = status;
                    }
                }
            }
        }
    }
}

fn check_version<T>(
    entry: Option<&Versioned<T>>,
    entity_type: EntityType,
    id: EntityId,
    expected: u64,
) -> Result<(), StoreError> {
    match entry {
        None => Err(StoreError::NotFound { entity_type, id }),
        Some(v) if v.version != expected => Err(StoreError::VersionConflict {
            entity_type,
            id,
            expected,
            found: v.version,
        }),
        Some(_) => Ok(()),
    }
}

impl EntityStore for MemoryStore {
    // === Item Operations ===

    fn item_insert(&self, item: &Item) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if state.items.contains_key(&item.item_id) {
            return Err(StoreError::InsertFailed {
                entity_type: EntityType::Item,
                reason: "already exists".to_string(),
            });
        }
        state.items.insert(item.item_id, Versioned::new(item.clone()));
        Ok(())
    }

    fn item_get(&self, id: EntityId) -> Result<Option<Versioned<Item>>, StoreError> {
        Ok(self.read()?.items.get(&id).cloned())
    }

    fn item_list(&self) -> Result<Vec<Versioned<Item>>, StoreError> {
        let state = self.read()?;
        let mut items: Vec<Versioned<Item>> = state.items.values().cloned().collect();
        items.sort_by_key(|i| i.value.item_id);
        Ok(items)
    }

    // === Person Operations ===

    fn person_insert(&self, person: &Person) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if state.people.contains_key(&person.person_id) {
            return Err(StoreError::InsertFailed {
                entity_type: EntityType::Person,
                reason: "already exists".to_string(),
            });
        }
        state
            .people
            .insert(person.person_id, Versioned::new(person.clone()));
        Ok(())
    }

    fn person_get(&self, id: EntityId) -> Result<Option<Versioned<Person>>, StoreError> {
        Ok(self.read()?.people.get(&id).cloned())
    }

    // === Warehouse Operations ===

    fn warehouse_insert(&self, warehouse: &Warehouse) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if state.warehouses.contains_key(&warehouse.warehouse_id) {
            return Err(StoreError::InsertFailed {
                entity_type: EntityType::Warehouse,
                reason: "already exists".to_string(),
            });
        }
        state
            .warehouses
            .insert(warehouse.warehouse_id, Versioned::new(warehouse.clone()));
        Ok(())
    }

    fn warehouse_get(&self, id: EntityId) -> Result<Option<Versioned<Warehouse>>, StoreError> {
        Ok(self.read()?.warehouses.get(&id).cloned())
    }

    // === Ledger Record Operations ===

    fn transfer_record_get(&self, id: EntityId) -> Result<Option<TransferRecord>, StoreError> {
        Ok(self.read()?.transfers.get(&id).cloned())
    }

    fn find_active_transfer(
        &self,
        item_id: EntityId,
        person_id: EntityId,
    ) -> Result<Option<TransferRecord>, StoreError> {
        let state = self.read()?;
        Ok(state
            .transfers
            .values()
            .filter(|t| {
                t.item_id == item_id && t.person_id == person_id && t.status == TransferStatus::Active
            })
            .max_by_key(|t| (t.created_at, t.transfer_id))
            .cloned())
    }

    fn find_latest_active_transfer_for_item(
        &self,
        item_id: EntityId,
    ) -> Result<Option<TransferRecord>, StoreError> {
        let state = self.read()?;
        Ok(state
            .transfers
            .values()
            .filter(|t| t.item_id == item_id && t.status == TransferStatus::Active)
            .max_by_key(|t| (t.created_at, t.transfer_id))
            .cloned())
    }

    fn add_record_get(&self, id: EntityId) -> Result<Option<AddRecord>, StoreError> {
        Ok(self.read()?.adds.get(&id).cloned())
    }

    fn demob_record_get(&self, id: EntityId) -> Result<Option<DemobRecord>, StoreError> {
        Ok(self.read()?.demobs.get(&id).cloned())
    }

    // === Offboarding Task Operations ===

    fn task_insert(&self, task: &OffboardingTask) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if state.tasks.contains_key(&task.task_id) {
            return Err(StoreError::InsertFailed {
                entity_type: EntityType::OffboardingTask,
                reason: "already exists".to_string(),
            });
        }
        state.tasks.insert(task.task_id, Versioned::new(task.clone()));
        Ok(())
    }

    fn task_get(&self, id: EntityId) -> Result<Option<Versioned<OffboardingTask>>, StoreError> {
        Ok(self.read()?.tasks.get(&id).cloned())
    }

    // === Atomic Batch ===

    fn apply(&self, writes: WriteSet) -> Result<(), StoreError> {
        let mut state = self.write()?;
        Self::validate(&state, &writes)?;
        Self::commit(&mut state, writes);
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// A batch with any stale version leaves the store untouched.
        #[test]
        fn prop_stale_batch_never_mutates(initial in 0i64..1000, attempted in 0i64..1000, stale in 2u64..50) {
            let store = MemoryStore::new();
            let warehouse = Warehouse::new("W").with_stock_qty(initial);
            store.warehouse_insert(&warehouse).unwrap();

            let mut writes = WriteSet::new();
            writes.push(WriteOp::UpdateWarehouse {
                id: warehouse.warehouse_id,
                expected_version: stale,
                update: WarehouseUpdate { stock_qty: Some(attempted) },
            });
            prop_assert!(store.apply(writes).is_err());

            let after = store.warehouse_get(warehouse.warehouse_id).unwrap().unwrap();
            prop_assert_eq!(after.value.stock_qty, initial);
            prop_assert_eq!(after.version, 1);
        }

        /// Versions advance by exactly one per committed update.
        #[test]
        fn prop_version_increments_monotonically(updates in 1usize..10) {
            let store = MemoryStore::new();
            let warehouse = Warehouse::new("W").with_stock_qty(0);
            store.warehouse_insert(&warehouse).unwrap();

            for n in 0..updates {
                let current = store.warehouse_get(warehouse.warehouse_id).unwrap().unwrap();
                prop_assert_eq!(current.version, n as u64 + 1);

                let mut writes = WriteSet::new();
                writes.push(WriteOp::UpdateWarehouse {
                    id: warehouse.warehouse_id,
                    expected_version: current.version,
                    update: WarehouseUpdate { stock_qty: Some(n as i64) },
                });
                store.apply(writes).unwrap();
            }

            let last = store.warehouse_get(warehouse.warehouse_id).unwrap().unwrap();
            prop_assert_eq!(last.version, updates as u64 + 1);
        }
    }
}
