//! DEPOT Core - Entity Types
//!
//! Pure data structures with no behavior. All other crates depend on this.
//! This crate contains ONLY data types - no business logic.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Entity identifier using UUIDv7 for timestamp-sortable IDs.
/// UUIDv7 embeds a Unix timestamp, making IDs naturally sortable by creation time.
pub type EntityId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Generate a new UUIDv7 EntityId (timestamp-sortable).
pub fn new_entity_id() -> EntityId {
    Uuid::now_v7()
}

// ============================================================================
// ENUMS
// ============================================================================

/// Entity type discriminator for polymorphic references and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum EntityType {
    Item,
    Person,
    Warehouse,
    TransferRecord,
    AddRecord,
    WarehouseTransferRecord,
    DemobRecord,
    OffboardingTask,
}

/// Where an item currently resides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum LocationType {
    /// Sitting in warehouse stock
    Warehouse,
    /// Checked out to a person
    Person,
}

/// Employment status of a person.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum PersonStatus {
    /// Active employee
    Active,
    /// Contract end date announced, offboarding may be in progress
    OnNotice,
    /// Demobilized - custody closed out, no items may be assigned
    Inactive,
}

/// Status of a custody transfer record (warehouse -> person).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum TransferStatus {
    /// Item is currently with the person
    Active,
    /// Item has been returned to warehouse stock
    Returned,
}

/// Kind of offboarding task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum OffboardingTaskType {
    /// Collect a physical item back from the person
    ItemCollection,
    /// Revoke a system access
    AccessRevocation,
}

/// Status of an offboarding task.
///
/// Two state machines share this enum, one per task type:
/// - ItemCollection: `Pending -> AssetCollected -> ReturnFormFilled -> Completed`
/// - AccessRevocation: `Pending -> TicketRaised -> InProgress -> RevokeGranted -> Completed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum OffboardingTaskStatus {
    Pending,
    AssetCollected,
    ReturnFormFilled,
    TicketRaised,
    InProgress,
    RevokeGranted,
    Completed,
}

impl OffboardingTaskStatus {
    /// The single legal successor status for the given task type, if any.
    /// `Completed` is terminal; statuses belonging to the other machine have no successor.
    pub fn next(self, task_type: OffboardingTaskType) -> Option<OffboardingTaskStatus> {
        use OffboardingTaskStatus::*;
        match task_type {
            OffboardingTaskType::ItemCollection => match self {
                Pending => Some(AssetCollected),
                AssetCollected => Some(ReturnFormFilled),
                ReturnFormFilled => Some(Completed),
                _ => None,
            },
            OffboardingTaskType::AccessRevocation => match self {
                Pending => Some(TicketRaised),
                TicketRaised => Some(InProgress),
                InProgress => Some(RevokeGranted),
                RevokeGranted => Some(Completed),
                _ => None,
            },
        }
    }

    /// Check whether a transition to `next` is legal for the given task type.
    pub fn can_advance_to(self, next: OffboardingTaskStatus, task_type: OffboardingTaskType) -> bool {
        self.next(task_type) == Some(next)
    }
}

/// Action recorded against the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum AuditAction {
    AssignItem,
    ReturnItem,
    WarehouseTransfer,
    Demobilize,
    TaskAdvanced,
}

// ============================================================================
// CORE ENTITY STRUCTS
// ============================================================================

/// Item - a discrete, uniquely-serialized ICT asset.
///
/// Custody invariant: `location == Person` iff `assigned_to` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Item {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub item_id: EntityId,
    pub name: String,
    pub serial_number: String,
    /// Total owned count for this record. Serialized assets carry 1 in
    /// practice but the field is modeled as a counter.
    pub quantity: i64,
    pub location: LocationType,
    /// Set iff `location == Person`
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub assigned_to: Option<EntityId>,
    /// Home/current warehouse reference
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub warehouse_id: EntityId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub updated_at: Timestamp,
}

impl Item {
    /// Create a new item sitting in warehouse stock.
    pub fn new(name: &str, serial_number: &str, warehouse_id: EntityId) -> Self {
        let now = Utc::now();
        Self {
            item_id: new_entity_id(),
            name: name.to_string(),
            serial_number: serial_number.to_string(),
            quantity: 1,
            location: LocationType::Warehouse,
            assigned_to: None,
            warehouse_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the item is currently checked out to a person.
    pub fn is_assigned(&self) -> bool {
        self.location == LocationType::Person
    }

    /// Check the custody invariant: person custody iff an assignee is set.
    pub fn custody_consistent(&self) -> bool {
        (self.location == LocationType::Person) == self.assigned_to.is_some()
    }
}

/// Person - an employee who can hold items.
///
/// `stock_qty` is a denormalized counter: the count of items currently
/// assigned to this person. Every custody transition maintains it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Person {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub person_id: EntityId,
    pub name: String,
    pub email: String,
    pub status: PersonStatus,
    pub stock_qty: i64,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date"))]
    pub contract_end_date: Option<NaiveDate>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub updated_at: Timestamp,
}

impl Person {
    /// Create a new active person with no items.
    pub fn new(name: &str, email: &str) -> Self {
        let now = Utc::now();
        Self {
            person_id: new_entity_id(),
            name: name.to_string(),
            email: email.to_string(),
            status: PersonStatus::Active,
            stock_qty: 0,
            contract_end_date: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the contract end date.
    pub fn with_contract_end_date(mut self, date: NaiveDate) -> Self {
        self.contract_end_date = Some(date);
        self
    }
}

/// Warehouse - a storage location holding item stock.
///
/// `stock_qty` is a denormalized counter with the same maintenance
/// requirement as `Person::stock_qty`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Warehouse {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub warehouse_id: EntityId,
    pub name: String,
    pub stock_qty: i64,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub updated_at: Timestamp,
}

impl Warehouse {
    /// Create a new empty warehouse.
    pub fn new(name: &str) -> Self {
        let now = Utc::now();
        Self {
            warehouse_id: new_entity_id(),
            name: name.to_string(),
            stock_qty: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the initial stock count.
    pub fn with_stock_qty(mut self, qty: i64) -> Self {
        self.stock_qty = qty;
        self
    }
}

/// TransferRecord - ledger entry for a warehouse -> person custody change.
///
/// Exactly one `Active` record should exist per person-held item. This is the
/// ledger's source of truth for who holds what and from where, independent of
/// the denormalized counters. Never deleted; `status` is the only
/// post-create mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TransferRecord {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub transfer_id: EntityId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub item_id: EntityId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub person_id: EntityId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub giving_warehouse_id: EntityId,
    pub quantity: i64,
    pub status: TransferStatus,
    pub reference_number: String,
    pub notes: Option<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
}

impl TransferRecord {
    /// Create a new active transfer record.
    pub fn new(
        item_id: EntityId,
        person_id: EntityId,
        giving_warehouse_id: EntityId,
        quantity: i64,
        reference_number: &str,
        notes: Option<String>,
    ) -> Self {
        Self {
            transfer_id: new_entity_id(),
            item_id,
            person_id,
            giving_warehouse_id,
            quantity,
            status: TransferStatus::Active,
            reference_number: reference_number.to_string(),
            notes,
            created_at: Utc::now(),
        }
    }
}

/// AddRecord - ledger entry for a return into warehouse stock.
///
/// Created for direct returns and for system-generated returns during
/// demobilization and offboarding (with synthetic reference numbers).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AddRecord {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub add_id: EntityId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub item_id: EntityId,
    /// The person the item came back from, if any
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub person_id: Option<EntityId>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub receiving_warehouse_id: EntityId,
    pub quantity: i64,
    pub reference_number: String,
    pub notes: Option<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
}

impl AddRecord {
    /// Create a new add record.
    pub fn new(
        item_id: EntityId,
        person_id: Option<EntityId>,
        receiving_warehouse_id: EntityId,
        quantity: i64,
        reference_number: &str,
        notes: Option<String>,
    ) -> Self {
        Self {
            add_id: new_entity_id(),
            item_id,
            person_id,
            receiving_warehouse_id,
            quantity,
            reference_number: reference_number.to_string(),
            notes,
            created_at: Utc::now(),
        }
    }
}

/// WarehouseTransferRecord - ledger entry for a warehouse -> warehouse stock
/// move with no person involved. Custody stays `Warehouse` throughout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct WarehouseTransferRecord {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub transfer_id: EntityId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub item_id: EntityId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub giving_warehouse_id: EntityId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub receiving_warehouse_id: EntityId,
    pub quantity: i64,
    pub reference_number: String,
    pub notes: Option<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
}

impl WarehouseTransferRecord {
    /// Create a new warehouse-to-warehouse transfer record.
    pub fn new(
        item_id: EntityId,
        giving_warehouse_id: EntityId,
        receiving_warehouse_id: EntityId,
        quantity: i64,
        reference_number: &str,
        notes: Option<String>,
    ) -> Self {
        Self {
            transfer_id: new_entity_id(),
            item_id,
            giving_warehouse_id,
            receiving_warehouse_id,
            quantity,
            reference_number: reference_number.to_string(),
            notes,
            created_at: Utc::now(),
        }
    }
}

/// One line of a demobilization checklist (an item to collect or an access
/// to revoke). Only `checked` entries are acted on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct DemobChecklistEntry {
    /// Item id or access id, depending on which list the entry is in
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub entry_id: EntityId,
    pub title: String,
    pub serial_number: Option<String>,
    pub checked: bool,
}

/// DemobRecord - snapshot of one demobilization event.
///
/// Immutable once created except for the `signed_document_url` /
/// `is_completed` patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct DemobRecord {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub demob_id: EntityId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub person_id: EntityId,
    pub items_returned: Vec<DemobChecklistEntry>,
    pub accesses_revoked: Vec<DemobChecklistEntry>,
    pub performed_by: String,
    pub performed_by_email: String,
    pub is_completed: bool,
    pub signed_document_url: Option<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
}

impl DemobRecord {
    /// Create a new demobilization record capturing the full checklist.
    pub fn new(
        person_id: EntityId,
        performed_by: &str,
        performed_by_email: &str,
        items_returned: Vec<DemobChecklistEntry>,
        accesses_revoked: Vec<DemobChecklistEntry>,
    ) -> Self {
        Self {
            demob_id: new_entity_id(),
            person_id,
            items_returned,
            accesses_revoked,
            performed_by: performed_by.to_string(),
            performed_by_email: performed_by_email.to_string(),
            is_completed: false,
            signed_document_url: None,
            created_at: Utc::now(),
        }
    }
}

/// OffboardingTask - one step of an employee offboarding checklist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct OffboardingTask {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub task_id: EntityId,
    pub task_type: OffboardingTaskType,
    pub status: OffboardingTaskStatus,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub person_id: EntityId,
    /// The item being collected or the access being revoked
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub subject_id: EntityId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub updated_at: Timestamp,
}

impl OffboardingTask {
    /// Create a new pending task.
    pub fn new(task_type: OffboardingTaskType, person_id: EntityId, subject_id: EntityId) -> Self {
        let now = Utc::now();
        Self {
            task_id: new_entity_id(),
            task_type,
            status: OffboardingTaskStatus::Pending,
            person_id,
            subject_id,
            created_at: now,
            updated_at: now,
        }
    }
}

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Entity not found: {entity_type:?} with id {id}")]
    NotFound { entity_type: EntityType, id: EntityId },

    #[error("Insert failed for {entity_type:?}: {reason}")]
    InsertFailed { entity_type: EntityType, reason: String },

    #[error("Update failed for {entity_type:?} with id {id}: {reason}")]
    UpdateFailed {
        entity_type: EntityType,
        id: EntityId,
        reason: String,
    },

    #[error("Version conflict on {entity_type:?} with id {id}: expected v{expected}, found v{found}")]
    VersionConflict {
        entity_type: EntityType,
        id: EntityId,
        expected: u64,
        found: u64,
    },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Ledger operation errors - the caller-facing taxonomy.
///
/// `NotFound` / `InsufficientStock` / `InvalidState` are expected,
/// recoverable-by-caller conditions. `Unavailable` is an infrastructure
/// failure; the operation is guaranteed to have made no partial writes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Entity not found: {entity_type:?} with id {id}")]
    NotFound { entity_type: EntityType, id: EntityId },

    #[error("Warehouse {warehouse_id} has no enough stock: {available} available, {requested} requested")]
    InsufficientStock {
        warehouse_id: EntityId,
        available: i64,
        requested: i64,
    },

    #[error("Invalid state: {reason}")]
    InvalidState { reason: String },

    #[error("Ledger engine unavailable: {reason}")]
    Unavailable { reason: String },
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity_type, id } => LedgerError::NotFound { entity_type, id },
            other => LedgerError::Unavailable {
                reason: other.to_string(),
            },
        }
    }
}

/// Master error type for all DEPOT errors.
#[derive(Debug, Clone, Error)]
pub enum DepotError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Result type alias for DEPOT operations.
pub type DepotResult<T> = Result<T, DepotError>;

// ============================================================================
// AUDIT
// ============================================================================

/// Structured audit event emitted after a custody transition commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AuditEvent {
    pub action: AuditAction,
    pub entity_type: EntityType,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub entity_id: EntityId,
    pub entity_name: String,
    pub performed_by: Option<String>,
    pub performed_by_email: Option<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub details: Option<serde_json::Value>,
    /// Request metadata from the calling surface (ip, user agent, ...)
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub source: Option<serde_json::Value>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub recorded_at: Timestamp,
}

impl AuditEvent {
    /// Create a new audit event.
    pub fn new(
        action: AuditAction,
        entity_type: EntityType,
        entity_id: EntityId,
        entity_name: &str,
    ) -> Self {
        Self {
            action,
            entity_type,
            entity_id,
            entity_name: entity_name.to_string(),
            performed_by: None,
            performed_by_email: None,
            details: None,
            source: None,
            recorded_at: Utc::now(),
        }
    }

    /// Set the acting user.
    pub fn with_actor(mut self, performed_by: &str, performed_by_email: &str) -> Self {
        self.performed_by = Some(performed_by.to_string());
        self.performed_by_email = Some(performed_by_email.to_string());
        self
    }

    /// Attach a free-form details payload.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Attach request metadata from the calling surface.
    pub fn with_source(mut self, source: serde_json::Value) -> Self {
        self.source = Some(source);
        self
    }
}

/// Error from an audit sink. Callers log it and move on; a failed audit
/// write never rolls back the ledger transition it describes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Audit sink rejected event: {reason}")]
pub struct AuditError {
    pub reason: String,
}

/// Sink for audit events. Implementations must not block the ledger:
/// emission is fire-and-forget relative to the transaction that produced it.
pub trait AuditNotifier: Send + Sync {
    /// Record one audit event.
    fn record(&self, event: AuditEvent) -> Result<(), AuditError>;
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Engine tuning knobs, injected into the ledger engine constructor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on read-compute-apply attempts before an operation
    /// surfaces `LedgerError::Unavailable` on repeated version conflicts.
    pub max_apply_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_apply_attempts: 4,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_item_starts_in_warehouse() {
        let warehouse_id = new_entity_id();
        let item = Item::new("ThinkPad X1", "SN-0001", warehouse_id);

        assert_eq!(item.location, LocationType::Warehouse);
        assert!(item.assigned_to.is_none());
        assert_eq!(item.quantity, 1);
        assert_eq!(item.warehouse_id, warehouse_id);
        assert!(item.custody_consistent());
        assert!(!item.is_assigned());
    }

    #[test]
    fn test_custody_consistent_detects_drift() {
        let mut item = Item::new("iPhone 15", "SN-0002", new_entity_id());

        // Assignee without person custody is drift
        item.assigned_to = Some(new_entity_id());
        assert!(!item.custody_consistent());

        // Person custody with assignee is fine
        item.location = LocationType::Person;
        assert!(item.custody_consistent());

        // Person custody without assignee is drift
        item.assigned_to = None;
        assert!(!item.custody_consistent());
    }

    #[test]
    fn test_new_person_defaults() {
        let person = Person::new("Ada Lovelace", "ada@example.com");
        assert_eq!(person.status, PersonStatus::Active);
        assert_eq!(person.stock_qty, 0);
        assert!(person.contract_end_date.is_none());
    }

    #[test]
    fn test_person_with_contract_end_date() {
        let date = NaiveDate::from_ymd_opt(2026, 12, 31).unwrap();
        let person = Person::new("Ada Lovelace", "ada@example.com").with_contract_end_date(date);
        assert_eq!(person.contract_end_date, Some(date));
    }

    #[test]
    fn test_transfer_record_starts_active() {
        let record = TransferRecord::new(
            new_entity_id(),
            new_entity_id(),
            new_entity_id(),
            1,
            "REF-1",
            None,
        );
        assert_eq!(record.status, TransferStatus::Active);
        assert_eq!(record.quantity, 1);
    }

    #[test]
    fn test_item_task_happy_path() {
        use OffboardingTaskStatus::*;
        let ty = OffboardingTaskType::ItemCollection;

        assert_eq!(Pending.next(ty), Some(AssetCollected));
        assert_eq!(AssetCollected.next(ty), Some(ReturnFormFilled));
        assert_eq!(ReturnFormFilled.next(ty), Some(Completed));
        assert_eq!(Completed.next(ty), None);
    }

    #[test]
    fn test_access_task_happy_path() {
        use OffboardingTaskStatus::*;
        let ty = OffboardingTaskType::AccessRevocation;

        assert_eq!(Pending.next(ty), Some(TicketRaised));
        assert_eq!(TicketRaised.next(ty), Some(InProgress));
        assert_eq!(InProgress.next(ty), Some(RevokeGranted));
        assert_eq!(RevokeGranted.next(ty), Some(Completed));
        assert_eq!(Completed.next(ty), None);
    }

    #[test]
    fn test_task_transition_rejects_illegal_jump() {
        use OffboardingTaskStatus::*;

        // pending -> completed directly is illegal for both machines
        assert!(!Pending.can_advance_to(Completed, OffboardingTaskType::ItemCollection));
        assert!(!Pending.can_advance_to(Completed, OffboardingTaskType::AccessRevocation));

        // Statuses from the other machine have no successor
        assert_eq!(TicketRaised.next(OffboardingTaskType::ItemCollection), None);
        assert_eq!(AssetCollected.next(OffboardingTaskType::AccessRevocation), None);
    }

    #[test]
    fn test_insufficient_stock_error_display() {
        let err = LedgerError::InsufficientStock {
            warehouse_id: Uuid::nil(),
            available: 2,
            requested: 5,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("no enough stock"));
        assert!(msg.contains("2 available"));
        assert!(msg.contains("5 requested"));
    }

    #[test]
    fn test_store_error_maps_into_ledger_error() {
        let not_found = StoreError::NotFound {
            entity_type: EntityType::Warehouse,
            id: Uuid::nil(),
        };
        assert!(matches!(
            LedgerError::from(not_found),
            LedgerError::NotFound {
                entity_type: EntityType::Warehouse,
                ..
            }
        ));

        let poisoned = StoreError::LockPoisoned;
        assert!(matches!(
            LedgerError::from(poisoned),
            LedgerError::Unavailable { .. }
        ));
    }

    #[test]
    fn test_depot_error_from_variants() {
        let store = DepotError::from(StoreError::LockPoisoned);
        assert!(matches!(store, DepotError::Store(_)));

        let ledger = DepotError::from(LedgerError::InvalidState {
            reason: "test".to_string(),
        });
        assert!(matches!(ledger, DepotError::Ledger(_)));
    }

    #[test]
    fn test_audit_event_builders() {
        let id = new_entity_id();
        let event = AuditEvent::new(AuditAction::AssignItem, EntityType::Item, id, "ThinkPad X1")
            .with_actor("Grace Hopper", "grace@example.com")
            .with_details(serde_json::json!({ "quantity": 1 }));

        assert_eq!(event.entity_id, id);
        assert_eq!(event.performed_by.as_deref(), Some("Grace Hopper"));
        assert!(event.details.is_some());
        assert!(event.source.is_none());
    }

    #[test]
    fn test_engine_config_default() {
        assert_eq!(EngineConfig::default().max_apply_attempts, 4);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn any_status() -> impl Strategy<Value = OffboardingTaskStatus> {
        use OffboardingTaskStatus::*;
        prop_oneof![
            Just(Pending),
            Just(AssetCollected),
            Just(ReturnFormFilled),
            Just(TicketRaised),
            Just(InProgress),
            Just(RevokeGranted),
            Just(Completed),
        ]
    }

    fn any_task_type() -> impl Strategy<Value = OffboardingTaskType> {
        prop_oneof![
            Just(OffboardingTaskType::ItemCollection),
            Just(OffboardingTaskType::AccessRevocation),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Each status has at most one legal successor, and Completed has none.
        #[test]
        fn prop_task_machine_is_linear(status in any_status(), ty in any_task_type()) {
            let next = status.next(ty);
            if status == OffboardingTaskStatus::Completed {
                prop_assert!(next.is_none());
            }
            if let Some(next) = next {
                // The successor is reachable and nothing else is
                prop_assert!(status.can_advance_to(next, ty));
                prop_assert_ne!(next, status);
            }
        }

        /// No status can ever advance to Pending and no status advances to itself.
        #[test]
        fn prop_no_backward_or_self_transitions(status in any_status(), ty in any_task_type()) {
            prop_assert!(!status.can_advance_to(OffboardingTaskStatus::Pending, ty));
            prop_assert!(!status.can_advance_to(status, ty));
        }
    }
}
