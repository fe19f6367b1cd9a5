//! DEPOT Workflow - Custody Transition Orchestration
//!
//! Wraps the stock ledger engine with the cross-cutting concerns a custody
//! change drags along: audit emission, access revocation, demobilization
//! checklists, and the offboarding task state machine.
//!
//! The workflow never touches counters itself. Every stock movement goes
//! through [`StockLedgerEngine`]; this layer sequences those calls, collects
//! per-step outcomes, and talks to the collaborator seams
//! ([`AuditNotifier`], [`AccessRevoker`]).

use depot_core::{
    AuditAction, AuditEvent, AuditNotifier, DemobChecklistEntry, DemobRecord, EntityId, EntityType,
    LedgerError, OffboardingTask, OffboardingTaskStatus, OffboardingTaskType, PersonStatus,
    StoreError,
};
use depot_ledger::{ReturnOutcome, ReturnRequest, StockLedgerEngine};
use depot_store::{OffboardingTaskUpdate, PersonUpdate, WriteOp, WriteSet};
use std::sync::Arc;
use thiserror::Error;

pub use depot_ledger::{AssignRequest, WarehouseTransferRequest};

// ============================================================================
// COLLABORATOR SEAMS
// ============================================================================

/// Error from the access revocation collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Access revocation failed: {reason}")]
pub struct RevokeError {
    pub reason: String,
}

/// External system that can revoke a person's access (VPN account, badge,
/// SaaS seat). Synchronous from the workflow's point of view.
pub trait AccessRevoker: Send + Sync {
    fn revoke(&self, person_id: EntityId, access_id: EntityId, title: &str)
        -> Result<(), RevokeError>;
}

/// The user driving a workflow call, carried into audit events.
#[derive(Debug, Clone)]
pub struct Actor {
    pub name: String,
    pub email: String,
}

impl Actor {
    pub fn new(name: &str, email: &str) -> Self {
        Self {
            name: name.to_string(),
            email: email.to_string(),
        }
    }
}

// ============================================================================
// OUTCOME TYPES
// ============================================================================

/// Result of one step of a multi-step workflow. A skipped step was not
/// attempted (nothing to do); a failed step was attempted and rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Succeeded,
    Skipped { reason: String },
    Failed { error: String },
}

impl StepStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, StepStatus::Succeeded)
    }
}

/// Per-item outcome of a demobilization return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemReturnOutcome {
    pub item_id: EntityId,
    pub title: String,
    pub status: StepStatus,
}

/// Per-access outcome of a demobilization revocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRevokeOutcome {
    pub access_id: EntityId,
    pub title: String,
    pub status: StepStatus,
}

/// Full result of a demobilization: the stored record plus what happened
/// to each selected item and access. Callers inspect the outcome lists to
/// tell which of N steps failed; the operation itself is best-effort and
/// does not abort on a single failure.
#[derive(Debug, Clone)]
pub struct DemobOutcome {
    pub record: DemobRecord,
    pub items: Vec<ItemReturnOutcome>,
    pub accesses: Vec<AccessRevokeOutcome>,
}

/// What happened to the item return behind a collection task. Once the task
/// has advanced, a rejected return must not fail the whole operation (the
/// task cannot legally re-enter `AssetCollected`), so the failure is carried
/// here instead of as an error.
#[derive(Debug, Clone)]
pub enum CollectionReturn {
    Returned(ReturnOutcome),
    Skipped { reason: String },
    Failed { error: String },
}

/// Result of completing an item-collection task: the advanced task plus what
/// happened to the return it triggered.
#[derive(Debug, Clone)]
pub struct CollectionOutcome {
    pub task: OffboardingTask,
    pub item_return: CollectionReturn,
}

/// Request payload for a demobilization.
#[derive(Debug, Clone)]
pub struct DemobilizeRequest {
    pub person_id: EntityId,
    pub performed_by: String,
    pub performed_by_email: String,
    pub items_returned: Vec<DemobChecklistEntry>,
    pub accesses_revoked: Vec<DemobChecklistEntry>,
}

// ============================================================================
// CUSTODY WORKFLOW
// ============================================================================

// Small-write retry bound, matching the engine's conflict tolerance.
const STATUS_WRITE_ATTEMPTS: u32 = 4;

/// Orchestrates custody transitions over the ledger engine.
pub struct CustodyWorkflow {
    engine: StockLedgerEngine,
    audit: Arc<dyn AuditNotifier>,
    revoker: Arc<dyn AccessRevoker>,
}

impl CustodyWorkflow {
    pub fn new(
        engine: StockLedgerEngine,
        audit: Arc<dyn AuditNotifier>,
        revoker: Arc<dyn AccessRevoker>,
    ) -> Self {
        Self {
            engine,
            audit,
            revoker,
        }
    }

    /// Fire-and-forget audit emission. A rejected event is logged and
    /// dropped; the ledger transition it describes has already committed.
    fn emit(&self, event: AuditEvent) {
        if let Err(err) = self.audit.record(event) {
            tracing::warn!(error = %err, "audit event dropped");
        }
    }

    fn actor_event(event: AuditEvent, actor: Option<&Actor>) -> AuditEvent {
        match actor {
            Some(actor) => event.with_actor(&actor.name, &actor.email),
            None => event,
        }
    }

    // ========================================================================
    // AUDITED LEDGER OPERATIONS
    // ========================================================================

    /// Assign an item to a person, then emit an `AssignItem` audit event.
    pub fn assign_item(
        &self,
        req: &AssignRequest,
        actor: Option<&Actor>,
    ) -> Result<depot_core::TransferRecord, LedgerError> {
        let record = self.engine.assign_item(req)?;
        let name = self.item_name(req.item_id);
        self.emit(Self::actor_event(
            AuditEvent::new(AuditAction::AssignItem, EntityType::Item, req.item_id, &name)
                .with_details(serde_json::json!({
                    "person_id": req.person_id,
                    "giving_warehouse_id": req.giving_warehouse_id,
                    "quantity": req.quantity,
                    "reference_number": req.reference_number,
                })),
            actor,
        ));
        Ok(record)
    }

    /// Return an item to warehouse stock, then emit a `ReturnItem` audit
    /// event.
    pub fn return_item(
        &self,
        req: &ReturnRequest,
        actor: Option<&Actor>,
    ) -> Result<ReturnOutcome, LedgerError> {
        let outcome = self.engine.return_item(req)?;
        let name = self.item_name(req.item_id);
        self.emit(Self::actor_event(
            AuditEvent::new(AuditAction::ReturnItem, EntityType::Item, req.item_id, &name)
                .with_details(serde_json::json!({
                    "person_id": req.person_id,
                    "receiving_warehouse_id": req.receiving_warehouse_id,
                    "quantity": req.quantity,
                    "closed_transfer_id": outcome.closed_transfer_id,
                })),
            actor,
        ));
        Ok(outcome)
    }

    /// Move stock between warehouses, then emit a `WarehouseTransfer` audit
    /// event.
    pub fn transfer_between_warehouses(
        &self,
        req: &WarehouseTransferRequest,
        actor: Option<&Actor>,
    ) -> Result<depot_core::WarehouseTransferRecord, LedgerError> {
        let record = self.engine.transfer_between_warehouses(req)?;
        let name = self.item_name(req.item_id);
        self.emit(Self::actor_event(
            AuditEvent::new(
                AuditAction::WarehouseTransfer,
                EntityType::Item,
                req.item_id,
                &name,
            )
            .with_details(serde_json::json!({
                "giving_warehouse_id": req.giving_warehouse_id,
                "receiving_warehouse_id": req.receiving_warehouse_id,
                "quantity": req.quantity,
            })),
            actor,
        ));
        Ok(record)
    }

    fn item_name(&self, item_id: EntityId) -> String {
        self.engine
            .store()
            .item_get(item_id)
            .ok()
            .flatten()
            .map(|i| i.value.name)
            .unwrap_or_default()
    }

    // ========================================================================
    // DEMOBILIZATION
    // ========================================================================

    /// Close out a person's custody: return every checked item, revoke every
    /// checked access, store a [`DemobRecord`] of the full checklist, and
    /// mark the person inactive.
    ///
    /// Best-effort across steps: one item's failed return (say its warehouse
    /// is gone) is logged, captured in the outcome list, and does not stop
    /// the remaining items or accesses.
    pub fn demobilize(&self, req: &DemobilizeRequest) -> Result<DemobOutcome, LedgerError> {
        let store = self.engine.store();
        let person = store
            .person_get(req.person_id)?
            .ok_or(LedgerError::NotFound {
                entity_type: EntityType::Person,
                id: req.person_id,
            })?;

        if person.value.contract_end_date.is_none() {
            return Err(LedgerError::InvalidState {
                reason: format!(
                    "person {} has no contract end date; cannot demobilize",
                    req.person_id
                ),
            });
        }

        let mut items = Vec::with_capacity(req.items_returned.len());
        for entry in req.items_returned.iter().filter(|e| e.checked) {
            items.push(self.demob_return_one(req.person_id, entry));
        }

        let mut accesses = Vec::with_capacity(req.accesses_revoked.len());
        for entry in req.accesses_revoked.iter().filter(|e| e.checked) {
            let status = match self.revoker.revoke(req.person_id, entry.entry_id, &entry.title) {
                Ok(()) => StepStatus::Succeeded,
                Err(err) => {
                    tracing::error!(
                        person_id = %req.person_id,
                        access_id = %entry.entry_id,
                        error = %err,
                        "access revocation failed during demobilization"
                    );
                    StepStatus::Failed {
                        error: err.to_string(),
                    }
                }
            };
            accesses.push(AccessRevokeOutcome {
                access_id: entry.entry_id,
                title: entry.title.clone(),
                status,
            });
        }

        let mut record = DemobRecord::new(
            req.person_id,
            &req.performed_by,
            &req.performed_by_email,
            req.items_returned.clone(),
            req.accesses_revoked.clone(),
        );
        record.is_completed = items.iter().all(|i| i.status.is_success())
            && accesses.iter().all(|a| a.status.is_success());

        self.write_demob_record(&record)?;

        self.emit(
            AuditEvent::new(
                AuditAction::Demobilize,
                EntityType::Person,
                req.person_id,
                &person.value.name,
            )
            .with_actor(&req.performed_by, &req.performed_by_email)
            .with_details(serde_json::json!({
                "demob_id": record.demob_id,
                "items_selected": items.len(),
                "accesses_selected": accesses.len(),
                "completed": record.is_completed,
            })),
        );

        tracing::info!(
            person_id = %req.person_id,
            demob_id = %record.demob_id,
            items = items.len(),
            accesses = accesses.len(),
            completed = record.is_completed,
            "demobilization finished"
        );
        Ok(DemobOutcome {
            record,
            items,
            accesses,
        })
    }

    /// Return one checklist item through the ledger. The receiving warehouse
    /// and quantity come from the active transfer record; an item with no
    /// record is skipped, not failed.
    fn demob_return_one(
        &self,
        person_id: EntityId,
        entry: &DemobChecklistEntry,
    ) -> ItemReturnOutcome {
        let found = self
            .engine
            .store()
            .find_active_transfer(entry.entry_id, person_id);
        let status = match found {
            Ok(Some(transfer)) => {
                let req = ReturnRequest {
                    item_id: entry.entry_id,
                    person_id,
                    receiving_warehouse_id: transfer.giving_warehouse_id,
                    quantity: transfer.quantity,
                    reference_number: demob_reference(),
                    notes: Some("demobilization return".to_string()),
                };
                match self.engine.return_item(&req) {
                    Ok(_) => StepStatus::Succeeded,
                    Err(err) => {
                        tracing::error!(
                            item_id = %entry.entry_id,
                            person_id = %person_id,
                            error = %err,
                            "item return failed during demobilization"
                        );
                        StepStatus::Failed {
                            error: err.to_string(),
                        }
                    }
                }
            }
            Ok(None) => StepStatus::Skipped {
                reason: "no active transfer record".to_string(),
            },
            Err(err) => StepStatus::Failed {
                error: err.to_string(),
            },
        };
        ItemReturnOutcome {
            item_id: entry.entry_id,
            title: entry.title.clone(),
            status,
        }
    }

    // ========================================================================
    // OFFBOARDING TASKS
    // ========================================================================

    /// Advance an offboarding task to `next`. Only the single next status in
    /// the task type's ordering is legal; any jump, repeat, or reversal is
    /// rejected with `InvalidState`.
    pub fn advance_task(
        &self,
        task_id: EntityId,
        next: OffboardingTaskStatus,
        actor: Option<&Actor>,
    ) -> Result<OffboardingTask, LedgerError> {
        let task = self.transition_task(task_id, next)?;
        self.emit(Self::actor_event(
            AuditEvent::new(
                AuditAction::TaskAdvanced,
                EntityType::OffboardingTask,
                task_id,
                &format!("{:?}", task.task_type),
            )
            .with_details(serde_json::json!({
                "person_id": task.person_id,
                "status": task.status,
            })),
            actor,
        ));
        Ok(task)
    }

    /// Collect the item behind an item-collection task: advance the task to
    /// `AssetCollected` and run the same return sequence as demobilization
    /// for that single item, with an `OFFBOARD-<task_id>` reference.
    ///
    /// An item with no active transfer record still advances the task; the
    /// drift is logged and the return is reported as skipped. A return that
    /// fails after the task has advanced is likewise captured in the outcome
    /// rather than propagated, so the caller sees the advanced task and can
    /// resolve the custody drift separately.
    pub fn complete_item_collection_task(
        &self,
        task_id: EntityId,
        actor: Option<&Actor>,
    ) -> Result<CollectionOutcome, LedgerError> {
        let store = self.engine.store();
        let task = store.task_get(task_id)?.ok_or(LedgerError::NotFound {
            entity_type: EntityType::OffboardingTask,
            id: task_id,
        })?;

        if task.value.task_type != OffboardingTaskType::ItemCollection {
            return Err(LedgerError::InvalidState {
                reason: format!("task {task_id} is not an item collection task"),
            });
        }

        let advanced = self.advance_task(task_id, OffboardingTaskStatus::AssetCollected, actor)?;

        // The task has already moved to AssetCollected; from here on the
        // return must not bubble an error, or the task would be stranded
        // with the return never re-runnable.
        let item_return = match store
            .find_active_transfer(task.value.subject_id, task.value.person_id)
        {
            Ok(Some(transfer)) => {
                let req = ReturnRequest {
                    item_id: task.value.subject_id,
                    person_id: task.value.person_id,
                    receiving_warehouse_id: transfer.giving_warehouse_id,
                    quantity: transfer.quantity,
                    reference_number: format!("OFFBOARD-{task_id}"),
                    notes: Some("offboarding item collection".to_string()),
                };
                match self.return_item(&req, actor) {
                    Ok(outcome) => CollectionReturn::Returned(outcome),
                    Err(err) => {
                        tracing::error!(
                            task_id = %task_id,
                            item_id = %task.value.subject_id,
                            error = %err,
                            "item return failed after collection task advanced"
                        );
                        CollectionReturn::Failed {
                            error: err.to_string(),
                        }
                    }
                }
            }
            Ok(None) => {
                tracing::warn!(
                    task_id = %task_id,
                    item_id = %task.value.subject_id,
                    "item collection task with no active transfer record"
                );
                CollectionReturn::Skipped {
                    reason: "no active transfer record".to_string(),
                }
            }
            Err(err) => {
                tracing::error!(
                    task_id = %task_id,
                    item_id = %task.value.subject_id,
                    error = %err,
                    "transfer record lookup failed after collection task advanced"
                );
                CollectionReturn::Failed {
                    error: err.to_string(),
                }
            }
        };

        Ok(CollectionOutcome {
            task: advanced,
            item_return,
        })
    }

    // ========================================================================
    // SMALL GUARDED WRITES
    // ========================================================================

    fn transition_task(
        &self,
        task_id: EntityId,
        next: OffboardingTaskStatus,
    ) -> Result<OffboardingTask, LedgerError> {
        let store = self.engine.store();
        for _ in 0..STATUS_WRITE_ATTEMPTS {
            let task = store.task_get(task_id)?.ok_or(LedgerError::NotFound {
                entity_type: EntityType::OffboardingTask,
                id: task_id,
            })?;

            if !task.value.status.can_advance_to(next, task.value.task_type) {
                return Err(LedgerError::InvalidState {
                    reason: format!(
                        "illegal {:?} task transition {:?} -> {:?}",
                        task.value.task_type, task.value.status, next
                    ),
                });
            }

            let mut writes = WriteSet::new();
            writes.push(WriteOp::UpdateOffboardingTask {
                id: task_id,
                expected_version: task.version,
                update: OffboardingTaskUpdate { status: Some(next) },
            });
            match store.apply(writes) {
                Ok(()) => {
                    let mut updated = task.value;
                    updated.status = next;
                    return Ok(updated);
                }
                Err(StoreError::VersionConflict { .. }) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(LedgerError::Unavailable {
            reason: "task status write conflict retries exhausted".to_string(),
        })
    }

    // The demob record and the status flip land in a single write set: a
    // person is never left inactive without a record, or recorded as
    // demobilized while still active.
    fn write_demob_record(&self, record: &DemobRecord) -> Result<(), LedgerError> {
        let store = self.engine.store();
        for _ in 0..STATUS_WRITE_ATTEMPTS {
            let person = store
                .person_get(record.person_id)?
                .ok_or(LedgerError::NotFound {
                    entity_type: EntityType::Person,
                    id: record.person_id,
                })?;

            let mut writes = WriteSet::new();
            writes.push(WriteOp::InsertDemobRecord(record.clone()));
            writes.push(WriteOp::UpdatePerson {
                id: record.person_id,
                expected_version: person.version,
                update: PersonUpdate {
                    status: Some(PersonStatus::Inactive),
                    ..Default::default()
                },
            });
            match store.apply(writes) {
                Ok(()) => return Ok(()),
                Err(StoreError::VersionConflict { .. }) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(LedgerError::Unavailable {
            reason: "demobilization record write conflict retries exhausted".to_string(),
        })
    }
}

/// Synthesized reference for demobilization returns.
fn demob_reference() -> String {
    format!("DEMOB-{}", chrono::Utc::now().timestamp_millis())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use depot_core::{Item, LocationType, Person, TransferRecord};
    use depot_store::EntityStore;
    use depot_test_utils::{FailingAuditNotifier, LedgerFixture, RecordingAuditNotifier};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingRevoker {
        revoked: Mutex<Vec<EntityId>>,
    }

    impl RecordingRevoker {
        fn revoked(&self) -> Vec<EntityId> {
            self.revoked.lock().unwrap().clone()
        }
    }

    impl AccessRevoker for RecordingRevoker {
        fn revoke(
            &self,
            _person_id: EntityId,
            access_id: EntityId,
            _title: &str,
        ) -> Result<(), RevokeError> {
            self.revoked.lock().unwrap().push(access_id);
            Ok(())
        }
    }

    struct FailingRevoker;

    impl AccessRevoker for FailingRevoker {
        fn revoke(
            &self,
            _person_id: EntityId,
            _access_id: EntityId,
            title: &str,
        ) -> Result<(), RevokeError> {
            Err(RevokeError {
                reason: format!("ticket system rejected {title}"),
            })
        }
    }

    struct Harness {
        fx: LedgerFixture,
        audit: Arc<RecordingAuditNotifier>,
        revoker: Arc<RecordingRevoker>,
    }

    impl Harness {
        fn new(stock: i64) -> Self {
            Self {
                fx: LedgerFixture::new(stock),
                audit: Arc::new(RecordingAuditNotifier::new()),
                revoker: Arc::new(RecordingRevoker::default()),
            }
        }

        fn workflow(&self) -> CustodyWorkflow {
            CustodyWorkflow::new(self.fx.engine(), self.audit.clone(), self.revoker.clone())
        }
    }

    fn checked_entry(id: EntityId, title: &str) -> DemobChecklistEntry {
        DemobChecklistEntry {
            entry_id: id,
            title: title.to_string(),
            serial_number: None,
            checked: true,
        }
    }

    fn demob_person(fx: &LedgerFixture) -> Person {
        let person = Person::new("Grace Hopper", "grace@example.com")
            .with_contract_end_date(NaiveDate::from_ymd_opt(2025, 6, 30).unwrap());
        fx.store.person_insert(&person).unwrap();
        person
    }

    fn demob_request(person_id: EntityId, items: Vec<DemobChecklistEntry>) -> DemobilizeRequest {
        DemobilizeRequest {
            person_id,
            performed_by: "IT Admin".to_string(),
            performed_by_email: "admin@example.com".to_string(),
            items_returned: items,
            accesses_revoked: Vec::new(),
        }
    }

    #[test]
    fn test_assign_emits_audit_event() {
        let harness = Harness::new(5);
        let workflow = harness.workflow();
        let actor = Actor::new("IT Admin", "admin@example.com");

        workflow
            .assign_item(
                &AssignRequest {
                    item_id: harness.fx.item.item_id,
                    person_id: harness.fx.person.person_id,
                    giving_warehouse_id: harness.fx.warehouse.warehouse_id,
                    quantity: 1,
                    reference_number: "REF-1".to_string(),
                    notes: None,
                },
                Some(&actor),
            )
            .unwrap();

        let events = harness.audit.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, AuditAction::AssignItem);
        assert_eq!(events[0].entity_id, harness.fx.item.item_id);
        assert_eq!(events[0].performed_by.as_deref(), Some("IT Admin"));
        assert_eq!(events[0].entity_name, "ThinkPad X1");
    }

    #[test]
    fn test_failed_assign_emits_nothing() {
        let harness = Harness::new(5);
        let workflow = harness.workflow();

        let err = workflow
            .assign_item(
                &AssignRequest {
                    item_id: harness.fx.item.item_id,
                    person_id: harness.fx.person.person_id,
                    giving_warehouse_id: harness.fx.warehouse.warehouse_id,
                    quantity: 5,
                    reference_number: "REF-1".to_string(),
                    notes: None,
                },
                None,
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientStock { .. }));
        assert_eq!(harness.audit.event_count(), 0);
    }

    #[test]
    fn test_audit_failure_does_not_fail_operation() {
        let fx = LedgerFixture::new(5);
        let workflow = CustodyWorkflow::new(
            fx.engine(),
            Arc::new(FailingAuditNotifier),
            Arc::new(RecordingRevoker::default()),
        );

        let result = workflow.assign_item(
            &AssignRequest {
                item_id: fx.item.item_id,
                person_id: fx.person.person_id,
                giving_warehouse_id: fx.warehouse.warehouse_id,
                quantity: 1,
                reference_number: "REF-1".to_string(),
                notes: None,
            },
            None,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_demobilize_returns_items_and_deactivates_person() {
        let harness = Harness::new(5);
        let workflow = harness.workflow();
        let person = demob_person(&harness.fx);

        workflow
            .assign_item(
                &AssignRequest {
                    item_id: harness.fx.item.item_id,
                    person_id: person.person_id,
                    giving_warehouse_id: harness.fx.warehouse.warehouse_id,
                    quantity: 2,
                    reference_number: "REF-1".to_string(),
                    notes: None,
                },
                None,
            )
            .unwrap();

        let access_id = depot_core::new_entity_id();
        let outcome = workflow
            .demobilize(&DemobilizeRequest {
                person_id: person.person_id,
                performed_by: "IT Admin".to_string(),
                performed_by_email: "admin@example.com".to_string(),
                items_returned: vec![checked_entry(harness.fx.item.item_id, "ThinkPad X1")],
                accesses_revoked: vec![checked_entry(access_id, "VPN")],
            })
            .unwrap();

        assert_eq!(outcome.items.len(), 1);
        assert_eq!(outcome.items[0].status, StepStatus::Succeeded);
        assert_eq!(outcome.accesses.len(), 1);
        assert_eq!(outcome.accesses[0].status, StepStatus::Succeeded);
        assert!(outcome.record.is_completed);
        assert_eq!(harness.revoker.revoked(), vec![access_id]);

        // Stock returned to the giving warehouse
        let warehouse = harness
            .fx
            .store
            .warehouse_get(harness.fx.warehouse.warehouse_id)
            .unwrap()
            .unwrap();
        assert_eq!(warehouse.value.stock_qty, 5);

        let stored_person = harness.fx.store.person_get(person.person_id).unwrap().unwrap();
        assert_eq!(stored_person.value.status, PersonStatus::Inactive);
        assert_eq!(harness.fx.store.demob_record_count(), 1);

        let item = harness.fx.store.item_get(harness.fx.item.item_id).unwrap().unwrap();
        assert_eq!(item.value.location, LocationType::Warehouse);
    }

    #[test]
    fn test_demobilize_record_and_status_commit_together() {
        // Store double that rejects any batch carrying a person status
        // flip. If the record insert and the flip share one write set,
        // rejecting the batch must leave no demob record behind.
        struct RejectingStore {
            inner: Arc<depot_store::MemoryStore>,
        }

        impl depot_store::EntityStore for RejectingStore {
            fn item_insert(&self, item: &Item) -> Result<(), StoreError> {
                self.inner.item_insert(item)
            }
            fn item_get(
                &self,
                id: EntityId,
            ) -> Result<Option<depot_store::Versioned<Item>>, StoreError> {
                self.inner.item_get(id)
            }
            fn item_list(&self) -> Result<Vec<depot_store::Versioned<Item>>, StoreError> {
                self.inner.item_list()
            }
            fn person_insert(&self, person: &Person) -> Result<(), StoreError> {
                self.inner.person_insert(person)
            }
            fn person_get(
                &self,
                id: EntityId,
            ) -> Result<Option<depot_store::Versioned<Person>>, StoreError> {
                self.inner.person_get(id)
            }
            fn warehouse_insert(&self, warehouse: &depot_core::Warehouse) -> Result<(), StoreError> {
                self.inner.warehouse_insert(warehouse)
            }
            fn warehouse_get(
                &self,
                id: EntityId,
            ) -> Result<Option<depot_store::Versioned<depot_core::Warehouse>>, StoreError> {
                self.inner.warehouse_get(id)
            }
            fn transfer_record_get(
                &self,
                id: EntityId,
            ) -> Result<Option<TransferRecord>, StoreError> {
                self.inner.transfer_record_get(id)
            }
            fn find_active_transfer(
                &self,
                item_id: EntityId,
                person_id: EntityId,
            ) -> Result<Option<TransferRecord>, StoreError> {
                self.inner.find_active_transfer(item_id, person_id)
            }
            fn find_latest_active_transfer_for_item(
                &self,
                item_id: EntityId,
            ) -> Result<Option<TransferRecord>, StoreError> {
                self.inner.find_latest_active_transfer_for_item(item_id)
            }
            fn add_record_get(&self, id: EntityId) -> Result<Option<depot_core::AddRecord>, StoreError> {
                self.inner.add_record_get(id)
            }
            fn demob_record_get(&self, id: EntityId) -> Result<Option<DemobRecord>, StoreError> {
                self.inner.demob_record_get(id)
            }
            fn task_insert(&self, task: &OffboardingTask) -> Result<(), StoreError> {
                self.inner.task_insert(task)
            }
            fn task_get(
                &self,
                id: EntityId,
            ) -> Result<Option<depot_store::Versioned<OffboardingTask>>, StoreError> {
                self.inner.task_get(id)
            }
            fn apply(&self, writes: WriteSet) -> Result<(), StoreError> {
                let flips_status = writes.ops.iter().any(|op| {
                    matches!(
                        op,
                        WriteOp::UpdatePerson { update, .. } if update.status.is_some()
                    )
                });
                if flips_status {
                    return Err(StoreError::UpdateFailed {
                        entity_type: EntityType::Person,
                        id: depot_core::new_entity_id(),
                        reason: "simulated storage failure".to_string(),
                    });
                }
                self.inner.apply(writes)
            }
        }

        let inner = Arc::new(depot_store::MemoryStore::new());
        let person = Person::new("Grace Hopper", "grace@example.com")
            .with_contract_end_date(NaiveDate::from_ymd_opt(2025, 6, 30).unwrap());
        inner.person_insert(&person).unwrap();

        let store: Arc<dyn depot_store::EntityStore> = Arc::new(RejectingStore {
            inner: inner.clone(),
        });
        let engine = StockLedgerEngine::new(store, depot_core::EngineConfig::default());
        let workflow = CustodyWorkflow::new(
            engine,
            Arc::new(RecordingAuditNotifier::new()),
            Arc::new(RecordingRevoker::default()),
        );

        let err = workflow
            .demobilize(&demob_request(person.person_id, Vec::new()))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Unavailable { .. }));

        // Nothing half-written: no record, person still active
        assert_eq!(inner.demob_record_count(), 0);
        let stored = inner.person_get(person.person_id).unwrap().unwrap();
        assert_eq!(stored.value.status, PersonStatus::Active);
    }

    #[test]
    fn test_demobilize_requires_contract_end_date() {
        let harness = Harness::new(5);
        let workflow = harness.workflow();

        // The default fixture person has no end date
        let err = workflow
            .demobilize(&demob_request(harness.fx.person.person_id, Vec::new()))
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidState { .. }));
        assert_eq!(harness.fx.store.demob_record_count(), 0);
    }

    #[test]
    fn test_demobilize_skips_unchecked_and_recordless_items() {
        let harness = Harness::new(5);
        let workflow = harness.workflow();
        let person = demob_person(&harness.fx);

        let unchecked = DemobChecklistEntry {
            checked: false,
            ..checked_entry(harness.fx.item.item_id, "ThinkPad X1")
        };
        let no_record = harness
            .fx
            .add_item("Monitor", "SN-0002", harness.fx.warehouse.warehouse_id);

        let outcome = workflow
            .demobilize(&demob_request(
                person.person_id,
                vec![unchecked, checked_entry(no_record.item_id, "Monitor")],
            ))
            .unwrap();

        // Unchecked entry not processed at all; recordless one skipped
        assert_eq!(outcome.items.len(), 1);
        assert_eq!(outcome.items[0].item_id, no_record.item_id);
        assert!(matches!(outcome.items[0].status, StepStatus::Skipped { .. }));
        // The full checklist is still captured on the record
        assert_eq!(outcome.record.items_returned.len(), 2);
    }

    #[test]
    fn test_demobilize_continues_past_failing_item() {
        let harness = Harness::new(10);
        let workflow = harness.workflow();
        let person = demob_person(&harness.fx);

        // Healthy assignment for the fixture item
        workflow
            .assign_item(
                &AssignRequest {
                    item_id: harness.fx.item.item_id,
                    person_id: person.person_id,
                    giving_warehouse_id: harness.fx.warehouse.warehouse_id,
                    quantity: 1,
                    reference_number: "REF-1".to_string(),
                    notes: None,
                },
                None,
            )
            .unwrap();

        // Drifted assignment: an active transfer record whose giving
        // warehouse never existed, so its return cannot resolve a
        // receiving warehouse.
        let orphan = Item::new("Dock", "SN-0003", harness.fx.warehouse.warehouse_id);
        harness.fx.store.item_insert(&orphan).unwrap();
        let ghost_warehouse = depot_core::new_entity_id();
        let mut writes = WriteSet::new();
        writes.push(WriteOp::InsertTransferRecord(TransferRecord::new(
            orphan.item_id,
            person.person_id,
            ghost_warehouse,
            1,
            "LEGACY-1",
            None,
        )));
        harness.fx.store.apply(writes).unwrap();

        let outcome = workflow
            .demobilize(&demob_request(
                person.person_id,
                vec![
                    checked_entry(orphan.item_id, "Dock"),
                    checked_entry(harness.fx.item.item_id, "ThinkPad X1"),
                ],
            ))
            .unwrap();

        assert_eq!(outcome.items.len(), 2);
        assert!(matches!(outcome.items[0].status, StepStatus::Failed { .. }));
        assert_eq!(outcome.items[1].status, StepStatus::Succeeded);
        assert!(!outcome.record.is_completed);

        // The failure did not block deactivation
        let stored = harness.fx.store.person_get(person.person_id).unwrap().unwrap();
        assert_eq!(stored.value.status, PersonStatus::Inactive);
    }

    #[test]
    fn test_demobilize_records_failed_revocations() {
        let harness = Harness::new(5);
        let person = demob_person(&harness.fx);
        let workflow = CustodyWorkflow::new(
            harness.fx.engine(),
            harness.audit.clone(),
            Arc::new(FailingRevoker),
        );

        let outcome = workflow
            .demobilize(&DemobilizeRequest {
                person_id: person.person_id,
                performed_by: "IT Admin".to_string(),
                performed_by_email: "admin@example.com".to_string(),
                items_returned: Vec::new(),
                accesses_revoked: vec![checked_entry(depot_core::new_entity_id(), "VPN")],
            })
            .unwrap();

        assert!(matches!(outcome.accesses[0].status, StepStatus::Failed { .. }));
        assert!(!outcome.record.is_completed);
    }

    #[test]
    fn test_demobilize_missing_person() {
        let harness = Harness::new(5);
        let workflow = harness.workflow();

        let err = workflow
            .demobilize(&demob_request(depot_core::new_entity_id(), Vec::new()))
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::NotFound {
                entity_type: EntityType::Person,
                ..
            }
        ));
    }

    #[test]
    fn test_advance_task_follows_ordering() {
        let harness = Harness::new(5);
        let workflow = harness.workflow();
        let task = depot_core::OffboardingTask::new(
            OffboardingTaskType::AccessRevocation,
            harness.fx.person.person_id,
            depot_core::new_entity_id(),
        );
        harness.fx.store.task_insert(&task).unwrap();

        for next in [
            OffboardingTaskStatus::TicketRaised,
            OffboardingTaskStatus::InProgress,
            OffboardingTaskStatus::RevokeGranted,
            OffboardingTaskStatus::Completed,
        ] {
            let advanced = workflow.advance_task(task.task_id, next, None).unwrap();
            assert_eq!(advanced.status, next);
        }
        assert_eq!(harness.audit.event_count(), 4);
    }

    #[test]
    fn test_advance_task_rejects_jump() {
        let harness = Harness::new(5);
        let workflow = harness.workflow();
        let task = depot_core::OffboardingTask::new(
            OffboardingTaskType::ItemCollection,
            harness.fx.person.person_id,
            harness.fx.item.item_id,
        );
        harness.fx.store.task_insert(&task).unwrap();

        let err = workflow
            .advance_task(task.task_id, OffboardingTaskStatus::Completed, None)
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidState { .. }));

        let stored = harness.fx.store.task_get(task.task_id).unwrap().unwrap();
        assert_eq!(stored.value.status, OffboardingTaskStatus::Pending);
    }

    #[test]
    fn test_complete_item_collection_task_returns_item() {
        let harness = Harness::new(5);
        let workflow = harness.workflow();

        workflow
            .assign_item(
                &AssignRequest {
                    item_id: harness.fx.item.item_id,
                    person_id: harness.fx.person.person_id,
                    giving_warehouse_id: harness.fx.warehouse.warehouse_id,
                    quantity: 1,
                    reference_number: "REF-1".to_string(),
                    notes: None,
                },
                None,
            )
            .unwrap();

        let task = depot_core::OffboardingTask::new(
            OffboardingTaskType::ItemCollection,
            harness.fx.person.person_id,
            harness.fx.item.item_id,
        );
        harness.fx.store.task_insert(&task).unwrap();

        let outcome = workflow
            .complete_item_collection_task(task.task_id, None)
            .unwrap();

        assert_eq!(outcome.task.status, OffboardingTaskStatus::AssetCollected);
        let returned = match outcome.item_return {
            CollectionReturn::Returned(returned) => returned,
            other => panic!("expected a completed return, got {other:?}"),
        };
        assert!(returned.closed_transfer_id.is_some());
        assert_eq!(
            returned.add_record.reference_number,
            format!("OFFBOARD-{}", task.task_id)
        );

        let item = harness.fx.store.item_get(harness.fx.item.item_id).unwrap().unwrap();
        assert_eq!(item.value.location, LocationType::Warehouse);
        let warehouse = harness
            .fx
            .store
            .warehouse_get(harness.fx.warehouse.warehouse_id)
            .unwrap()
            .unwrap();
        assert_eq!(warehouse.value.stock_qty, 5);
    }

    #[test]
    fn test_complete_item_collection_without_record_still_advances() {
        let harness = Harness::new(5);
        let workflow = harness.workflow();
        let task = depot_core::OffboardingTask::new(
            OffboardingTaskType::ItemCollection,
            harness.fx.person.person_id,
            harness.fx.item.item_id,
        );
        harness.fx.store.task_insert(&task).unwrap();

        let outcome = workflow
            .complete_item_collection_task(task.task_id, None)
            .unwrap();
        assert_eq!(outcome.task.status, OffboardingTaskStatus::AssetCollected);
        assert!(matches!(outcome.item_return, CollectionReturn::Skipped { .. }));
    }

    #[test]
    fn test_complete_item_collection_captures_failed_return() {
        // An active transfer record pointing at a warehouse that no longer
        // exists makes the return fail after the task has advanced. The
        // failure must land in the outcome, not error out and strand the
        // task at AssetCollected with no way to rerun the return.
        let harness = Harness::new(5);
        let workflow = harness.workflow();

        let record = depot_core::TransferRecord::new(
            harness.fx.item.item_id,
            harness.fx.person.person_id,
            depot_core::new_entity_id(),
            1,
            "REF-GHOST",
            None,
        );
        let mut writes = depot_store::WriteSet::new();
        writes.push(depot_store::WriteOp::InsertTransferRecord(record));
        harness.fx.store.apply(writes).unwrap();

        let task = depot_core::OffboardingTask::new(
            OffboardingTaskType::ItemCollection,
            harness.fx.person.person_id,
            harness.fx.item.item_id,
        );
        harness.fx.store.task_insert(&task).unwrap();

        let outcome = workflow
            .complete_item_collection_task(task.task_id, None)
            .unwrap();

        assert_eq!(outcome.task.status, OffboardingTaskStatus::AssetCollected);
        assert!(matches!(outcome.item_return, CollectionReturn::Failed { .. }));

        let stored = harness.fx.store.task_get(task.task_id).unwrap().unwrap();
        assert_eq!(stored.value.status, OffboardingTaskStatus::AssetCollected);
        // The ghost record is still active; nothing was half-closed.
        assert_eq!(
            harness.fx.store.active_transfer_count_for_item(harness.fx.item.item_id),
            1
        );
    }

    #[test]
    fn test_complete_item_collection_rejects_access_task() {
        let harness = Harness::new(5);
        let workflow = harness.workflow();
        let task = depot_core::OffboardingTask::new(
            OffboardingTaskType::AccessRevocation,
            harness.fx.person.person_id,
            depot_core::new_entity_id(),
        );
        harness.fx.store.task_insert(&task).unwrap();

        let err = workflow
            .complete_item_collection_task(task.task_id, None)
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidState { .. }));
    }

    #[test]
    fn test_demob_reference_format() {
        let reference = demob_reference();
        assert!(reference.starts_with("DEMOB-"));
        assert!(reference["DEMOB-".len()..].chars().all(|c| c.is_ascii_digit()));
    }
}
