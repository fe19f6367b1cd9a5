//! DEPOT Ledger - Stock Ledger Engine
//!
//! The custody-transfer core: operations that move a serialized item between
//! warehouse and person custody while keeping the three denormalized
//! counters (item quantity, person stock, warehouse stock) consistent with
//! the ledger of transfer records.
//!
//! Every operation follows the same shape: read the entities it touches
//! (with versions), validate preconditions, build one [`WriteSet`], and ask
//! the store to commit it atomically. A version conflict means another
//! writer got in between; the operation re-reads and retries up to
//! `EngineConfig::max_apply_attempts` before surfacing
//! [`LedgerError::Unavailable`]. No partial state is observable either way.

use depot_core::{
    AddRecord, EngineConfig, EntityId, EntityType, Item, LedgerError, LocationType, Person,
    StoreError, TransferRecord, TransferStatus, Warehouse, WarehouseTransferRecord,
};
use depot_store::{
    EntityStore, ItemUpdate, PersonUpdate, Versioned, WarehouseUpdate, WriteOp, WriteSet,
};
use std::collections::HashMap;
use std::sync::Arc;

// ============================================================================
// REQUESTS AND OUTCOMES
// ============================================================================

/// Request to assign an item from warehouse stock to a person.
#[derive(Debug, Clone)]
pub struct AssignRequest {
    pub item_id: EntityId,
    pub person_id: EntityId,
    pub giving_warehouse_id: EntityId,
    pub quantity: i64,
    pub reference_number: String,
    pub notes: Option<String>,
}

/// Request to return a person-held item into warehouse stock.
#[derive(Debug, Clone)]
pub struct ReturnRequest {
    pub item_id: EntityId,
    pub person_id: EntityId,
    pub receiving_warehouse_id: EntityId,
    pub quantity: i64,
    pub reference_number: String,
    pub notes: Option<String>,
}

/// Request to move stock between two warehouses with no person involved.
#[derive(Debug, Clone)]
pub struct WarehouseTransferRequest {
    pub item_id: EntityId,
    pub giving_warehouse_id: EntityId,
    pub receiving_warehouse_id: EntityId,
    pub quantity: i64,
    pub reference_number: String,
    pub notes: Option<String>,
}

/// Result of a return. `closed_transfer_id` is `None` when no active
/// transfer record matched the `(item, person)` pair - the return still
/// went through, but the ledger had nothing to close (data drift, logged
/// as a warning).
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnOutcome {
    pub add_record: AddRecord,
    pub closed_transfer_id: Option<EntityId>,
}

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub total_items: usize,
    pub fixed_to_person: usize,
    pub fixed_to_warehouse: usize,
    pub already_correct: usize,
    pub failed: usize,
}

/// Summary of one unassign-without-ledger-record pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnassignSummary {
    pub items_unassigned: usize,
    pub people_updated: usize,
    pub warehouses_updated: usize,
}

// ============================================================================
// RETRY PLUMBING
// ============================================================================

/// Outcome of one read-compute-apply attempt. A version conflict is
/// retryable; everything else ends the operation.
enum AttemptError {
    Conflict,
    Fail(LedgerError),
}

impl From<StoreError> for AttemptError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict { .. } => AttemptError::Conflict,
            other => AttemptError::Fail(other.into()),
        }
    }
}

impl From<LedgerError> for AttemptError {
    fn from(err: LedgerError) -> Self {
        AttemptError::Fail(err)
    }
}

// ============================================================================
// STOCK LEDGER ENGINE
// ============================================================================

/// The stock ledger engine. Holds an injected store reference - no ambient
/// globals - and is cheap to clone.
#[derive(Clone)]
pub struct StockLedgerEngine {
    store: Arc<dyn EntityStore>,
    config: EngineConfig,
}

impl StockLedgerEngine {
    /// Create an engine over the given store.
    pub fn new(store: Arc<dyn EntityStore>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Access the underlying store.
    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    fn run_with_retry<T>(
        &self,
        mut attempt: impl FnMut() -> Result<T, AttemptError>,
    ) -> Result<T, LedgerError> {
        for _ in 0..self.config.max_apply_attempts.max(1) {
            match attempt() {
                Ok(value) => return Ok(value),
                Err(AttemptError::Conflict) => continue,
                Err(AttemptError::Fail(err)) => return Err(err),
            }
        }
        Err(LedgerError::Unavailable {
            reason: "write conflict retries exhausted".to_string(),
        })
    }

    fn require_item(&self, id: EntityId) -> Result<Versioned<Item>, AttemptError> {
        self.store.item_get(id)?.ok_or(AttemptError::Fail(LedgerError::NotFound {
            entity_type: EntityType::Item,
            id,
        }))
    }

    fn require_person(&self, id: EntityId) -> Result<Versioned<Person>, AttemptError> {
        self.store.person_get(id)?.ok_or(AttemptError::Fail(LedgerError::NotFound {
            entity_type: EntityType::Person,
            id,
        }))
    }

    fn require_warehouse(&self, id: EntityId) -> Result<Versioned<Warehouse>, AttemptError> {
        self.store
            .warehouse_get(id)?
            .ok_or(AttemptError::Fail(LedgerError::NotFound {
                entity_type: EntityType::Warehouse,
                id,
            }))
    }

    fn require_positive_quantity(quantity: i64) -> Result<(), AttemptError> {
        if quantity <= 0 {
            return Err(AttemptError::Fail(LedgerError::InvalidState {
                reason: format!("quantity must be positive, got {quantity}"),
            }));
        }
        Ok(())
    }

    // ========================================================================
    // ASSIGN
    // ========================================================================

    /// Assign an item from warehouse stock to a person.
    ///
    /// The stock precondition is a strict greater-than: a warehouse whose
    /// stock exactly equals the requested quantity rejects the transfer.
    /// This matches the recorded behavior the surrounding tooling depends on.
    ///
    /// Atomic effects: warehouse stock down, person stock up, item custody
    /// to the person, one `Active` transfer record created.
    pub fn assign_item(&self, req: &AssignRequest) -> Result<TransferRecord, LedgerError> {
        self.run_with_retry(|| {
            Self::require_positive_quantity(req.quantity)?;
            let warehouse = self.require_warehouse(req.giving_warehouse_id)?;
            let person = self.require_person(req.person_id)?;
            let item = self.require_item(req.item_id)?;

            // An item already in person custody must come back through a
            // return first; a second assignment would leave two active
            // transfer records claiming it.
            if item.value.location == LocationType::Person {
                return Err(AttemptError::Fail(LedgerError::InvalidState {
                    reason: format!("item {} is already assigned", req.item_id),
                }));
            }

            if warehouse.value.stock_qty <= req.quantity {
                return Err(AttemptError::Fail(LedgerError::InsufficientStock {
                    warehouse_id: req.giving_warehouse_id,
                    available: warehouse.value.stock_qty,
                    requested: req.quantity,
                }));
            }

            let record = TransferRecord::new(
                req.item_id,
                req.person_id,
                req.giving_warehouse_id,
                req.quantity,
                &req.reference_number,
                req.notes.clone(),
            );

            let mut writes = WriteSet::new();
            writes.push(WriteOp::UpdateWarehouse {
                id: req.giving_warehouse_id,
                expected_version: warehouse.version,
                update: WarehouseUpdate {
                    stock_qty: Some(warehouse.value.stock_qty - req.quantity),
                },
            });
            writes.push(WriteOp::UpdatePerson {
                id: req.person_id,
                expected_version: person.version,
                update: PersonUpdate {
                    stock_qty: Some(person.value.stock_qty + req.quantity),
                    ..Default::default()
                },
            });
            writes.push(WriteOp::UpdateItem {
                id: req.item_id,
                expected_version: item.version,
                update: ItemUpdate {
                    location: Some(LocationType::Person),
                    assigned_to: Some(Some(req.person_id)),
                    ..Default::default()
                },
            });
            writes.push(WriteOp::InsertTransferRecord(record.clone()));

            self.store.apply(writes)?;

            tracing::debug!(
                item_id = %req.item_id,
                person_id = %req.person_id,
                warehouse_id = %req.giving_warehouse_id,
                quantity = req.quantity,
                "item assigned"
            );
            Ok(record)
        })
    }

    // ========================================================================
    // RETURN
    // ========================================================================

    /// Return a person-held item into warehouse stock.
    ///
    /// Closes the most recent `Active` transfer record for `(item, person)`
    /// if one exists. A missing record does not abort the return: counters
    /// and custody are still corrected, the drift is logged, and the outcome
    /// reports `closed_transfer_id = None`.
    ///
    /// The person counter is floored at zero - a defensive clamp against
    /// pre-existing drift, not an error.
    pub fn return_item(&self, req: &ReturnRequest) -> Result<ReturnOutcome, LedgerError> {
        self.run_with_retry(|| {
            Self::require_positive_quantity(req.quantity)?;
            let item = self.require_item(req.item_id)?;
            let person = self.require_person(req.person_id)?;
            let warehouse = self.require_warehouse(req.receiving_warehouse_id)?;

            let active = self.store.find_active_transfer(req.item_id, req.person_id)?;
            if active.is_none() {
                tracing::warn!(
                    item_id = %req.item_id,
                    person_id = %req.person_id,
                    "return without matching active transfer record; counters updated, nothing closed"
                );
            }

            let add_record = AddRecord::new(
                req.item_id,
                Some(req.person_id),
                req.receiving_warehouse_id,
                req.quantity,
                &req.reference_number,
                req.notes.clone(),
            );

            let mut writes = WriteSet::new();
            writes.push(WriteOp::UpdateItem {
                id: req.item_id,
                expected_version: item.version,
                update: ItemUpdate {
                    quantity: Some(item.value.quantity + req.quantity),
                    location: Some(LocationType::Warehouse),
                    assigned_to: Some(None),
                    warehouse_id: Some(req.receiving_warehouse_id),
                },
            });
            writes.push(WriteOp::UpdatePerson {
                id: req.person_id,
                expected_version: person.version,
                update: PersonUpdate {
                    stock_qty: Some((person.value.stock_qty - req.quantity).max(0)),
                    ..Default::default()
                },
            });
            writes.push(WriteOp::UpdateWarehouse {
                id: req.receiving_warehouse_id,
                expected_version: warehouse.version,
                update: WarehouseUpdate {
                    stock_qty: Some(warehouse.value.stock_qty + req.quantity),
                },
            });
            if let Some(ref record) = active {
                writes.push(WriteOp::UpdateTransferRecordStatus {
                    id: record.transfer_id,
                    status: TransferStatus::Returned,
                });
            }
            writes.push(WriteOp::InsertAddRecord(add_record.clone()));

            self.store.apply(writes)?;

            tracing::debug!(
                item_id = %req.item_id,
                person_id = %req.person_id,
                warehouse_id = %req.receiving_warehouse_id,
                quantity = req.quantity,
                "item returned"
            );
            Ok(ReturnOutcome {
                add_record,
                closed_transfer_id: active.map(|r| r.transfer_id),
            })
        })
    }

    // ========================================================================
    // WAREHOUSE TRANSFER
    // ========================================================================

    /// Move stock between two warehouses. Custody stays `Warehouse`; the
    /// item's home warehouse follows the stock. Same strict stock
    /// precondition as assignment.
    pub fn transfer_between_warehouses(
        &self,
        req: &WarehouseTransferRequest,
    ) -> Result<WarehouseTransferRecord, LedgerError> {
        self.run_with_retry(|| {
            Self::require_positive_quantity(req.quantity)?;
            if req.giving_warehouse_id == req.receiving_warehouse_id {
                return Err(AttemptError::Fail(LedgerError::InvalidState {
                    reason: "giving and receiving warehouse are the same".to_string(),
                }));
            }
            let item = self.require_item(req.item_id)?;
            let giving = self.require_warehouse(req.giving_warehouse_id)?;
            let receiving = self.require_warehouse(req.receiving_warehouse_id)?;

            if giving.value.stock_qty <= req.quantity {
                return Err(AttemptError::Fail(LedgerError::InsufficientStock {
                    warehouse_id: req.giving_warehouse_id,
                    available: giving.value.stock_qty,
                    requested: req.quantity,
                }));
            }

            let record = WarehouseTransferRecord::new(
                req.item_id,
                req.giving_warehouse_id,
                req.receiving_warehouse_id,
                req.quantity,
                &req.reference_number,
                req.notes.clone(),
            );

            let mut writes = WriteSet::new();
            writes.push(WriteOp::UpdateWarehouse {
                id: req.giving_warehouse_id,
                expected_version: giving.version,
                update: WarehouseUpdate {
                    stock_qty: Some(giving.value.stock_qty - req.quantity),
                },
            });
            writes.push(WriteOp::UpdateWarehouse {
                id: req.receiving_warehouse_id,
                expected_version: receiving.version,
                update: WarehouseUpdate {
                    stock_qty: Some(receiving.value.stock_qty + req.quantity),
                },
            });
            writes.push(WriteOp::UpdateItem {
                id: req.item_id,
                expected_version: item.version,
                update: ItemUpdate {
                    warehouse_id: Some(req.receiving_warehouse_id),
                    ..Default::default()
                },
            });
            writes.push(WriteOp::InsertWarehouseTransferRecord(record.clone()));

            self.store.apply(writes)?;
            Ok(record)
        })
    }

    // ========================================================================
    // MAINTENANCE: RECONCILE LOCATIONS
    // ========================================================================

    /// Repair drift between the ledger and the denormalized item fields.
    ///
    /// For every item, the latest `Active` transfer record decides the
    /// correct custody: person custody of that record's holder, or warehouse
    /// custody with no assignee when no record exists. Idempotent: a second
    /// run finds everything already correct.
    pub fn reconcile_locations(&self) -> Result<ReconcileSummary, LedgerError> {
        let items = self.store.item_list().map_err(LedgerError::from)?;
        let mut summary = ReconcileSummary {
            total_items: items.len(),
            ..Default::default()
        };

        for item in items {
            let latest = self
                .store
                .find_latest_active_transfer_for_item(item.value.item_id)
                .map_err(LedgerError::from)?;

            let (want_location, want_assignee) = match latest {
                Some(ref record) => (LocationType::Person, Some(record.person_id)),
                None => (LocationType::Warehouse, None),
            };

            if item.value.location == want_location && item.value.assigned_to == want_assignee {
                summary.already_correct += 1;
                continue;
            }

            let mut writes = WriteSet::new();
            writes.push(WriteOp::UpdateItem {
                id: item.value.item_id,
                expected_version: item.version,
                update: ItemUpdate {
                    location: Some(want_location),
                    assigned_to: Some(want_assignee),
                    ..Default::default()
                },
            });

            match self.store.apply(writes) {
                Ok(()) => match want_location {
                    LocationType::Person => summary.fixed_to_person += 1,
                    LocationType::Warehouse => summary.fixed_to_warehouse += 1,
                },
                Err(err) => {
                    summary.failed += 1;
                    tracing::error!(
                        item_id = %item.value.item_id,
                        error = %err,
                        "failed to reconcile item location"
                    );
                }
            }
        }

        tracing::info!(
            total = summary.total_items,
            fixed_to_person = summary.fixed_to_person,
            fixed_to_warehouse = summary.fixed_to_warehouse,
            already_correct = summary.already_correct,
            failed = summary.failed,
            "location reconciliation finished"
        );
        Ok(summary)
    }

    // ========================================================================
    // MAINTENANCE: UNASSIGN WITHOUT LEDGER RECORD
    // ========================================================================

    /// Compensate for items bulk-imported as "assigned" without ledger
    /// entries: any item in person custody with no `Active` transfer record
    /// reverts to warehouse custody, with the person and warehouse counters
    /// adjusted. Deltas are grouped per person and per warehouse and
    /// committed as one batch. Idempotent: a second run finds zero items.
    pub fn unassign_without_ledger_record(&self) -> Result<UnassignSummary, LedgerError> {
        self.run_with_retry(|| {
            let items = self.store.item_list()?;

            let mut to_fix: Vec<Versioned<Item>> = Vec::new();
            for item in items {
                if item.value.location != LocationType::Person {
                    continue;
                }
                if self
                    .store
                    .find_latest_active_transfer_for_item(item.value.item_id)?
                    .is_none()
                {
                    to_fix.push(item);
                }
            }

            if to_fix.is_empty() {
                return Ok(UnassignSummary::default());
            }

            // Group counter deltas so each person/warehouse is read and
            // written once per batch.
            let mut person_decrements: HashMap<EntityId, i64> = HashMap::new();
            let mut warehouse_increments: HashMap<EntityId, i64> = HashMap::new();

            let mut writes = WriteSet::new();
            for item in &to_fix {
                writes.push(WriteOp::UpdateItem {
                    id: item.value.item_id,
                    expected_version: item.version,
                    update: ItemUpdate {
                        location: Some(LocationType::Warehouse),
                        assigned_to: Some(None),
                        ..Default::default()
                    },
                });
                if let Some(person_id) = item.value.assigned_to {
                    *person_decrements.entry(person_id).or_insert(0) += 1;
                }
                *warehouse_increments
                    .entry(item.value.warehouse_id)
                    .or_insert(0) += 1;
            }

            let mut people_updated = 0;
            for (person_id, decrement) in &person_decrements {
                match self.store.person_get(*person_id)? {
                    Some(person) => {
                        writes.push(WriteOp::UpdatePerson {
                            id: *person_id,
                            expected_version: person.version,
                            update: PersonUpdate {
                                stock_qty: Some((person.value.stock_qty - decrement).max(0)),
                                ..Default::default()
                            },
                        });
                        people_updated += 1;
                    }
                    None => {
                        tracing::warn!(
                            person_id = %person_id,
                            "assignee missing while unassigning imported items; item still reverted"
                        );
                    }
                }
            }

            let mut warehouses_updated = 0;
            for (warehouse_id, increment) in &warehouse_increments {
                match self.store.warehouse_get(*warehouse_id)? {
                    Some(warehouse) => {
                        writes.push(WriteOp::UpdateWarehouse {
                            id: *warehouse_id,
                            expected_version: warehouse.version,
                            update: WarehouseUpdate {
                                stock_qty: Some(warehouse.value.stock_qty + increment),
                            },
                        });
                        warehouses_updated += 1;
                    }
                    None => {
                        tracing::warn!(
                            warehouse_id = %warehouse_id,
                            "home warehouse missing while unassigning imported items"
                        );
                    }
                }
            }

            self.store.apply(writes)?;

            let summary = UnassignSummary {
                items_unassigned: to_fix.len(),
                people_updated,
                warehouses_updated,
            };
            tracing::info!(
                items_unassigned = summary.items_unassigned,
                people_updated = summary.people_updated,
                warehouses_updated = summary.warehouses_updated,
                "unassigned items lacking ledger records"
            );
            Ok(summary)
        })
    }
}
