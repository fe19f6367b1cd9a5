//! DEPOT Test Utilities
//!
//! Centralized test infrastructure for the DEPOT workspace:
//! - Seeded store fixtures for ledger scenarios
//! - Audit notifier doubles (recording, failing)
//! - Proptest generators for entity types

// Re-export the in-memory store from its source crate
pub use depot_store::MemoryStore;

// Re-export core types for convenience
pub use depot_core::{
    AddRecord, AuditAction, AuditError, AuditEvent, AuditNotifier, DemobRecord, EngineConfig,
    EntityId, EntityType, Item, LedgerError, LocationType, OffboardingTask, OffboardingTaskStatus,
    OffboardingTaskType, Person, PersonStatus, Timestamp, TransferRecord, TransferStatus,
    Warehouse, new_entity_id,
};

use depot_ledger::StockLedgerEngine;
use depot_store::EntityStore;
use proptest::prelude::*;
use std::sync::{Arc, Mutex};

// ============================================================================
// LEDGER FIXTURE
// ============================================================================

/// A seeded store for custody scenarios: one warehouse with the given
/// stock, one active person, and one item homed at the warehouse.
pub struct LedgerFixture {
    pub store: Arc<MemoryStore>,
    pub warehouse: Warehouse,
    pub person: Person,
    pub item: Item,
}

impl LedgerFixture {
    pub fn new(warehouse_stock: i64) -> Self {
        let store = Arc::new(MemoryStore::new());
        let warehouse = Warehouse::new("Main Warehouse").with_stock_qty(warehouse_stock);
        let person = Person::new("Ada Lovelace", "ada@example.com");
        let item = Item::new("ThinkPad X1", "SN-0001", warehouse.warehouse_id);

        store
            .warehouse_insert(&warehouse)
            .and_then(|_| store.person_insert(&person))
            .and_then(|_| store.item_insert(&item))
            .unwrap_or_else(|e| panic!("fixture seed failed: {e}"));

        Self {
            store,
            warehouse,
            person,
            item,
        }
    }

    /// Engine over this fixture's store with default config.
    pub fn engine(&self) -> StockLedgerEngine {
        StockLedgerEngine::new(self.store.clone(), EngineConfig::default())
    }

    /// Insert and return an extra warehouse.
    pub fn add_warehouse(&self, name: &str, stock: i64) -> Warehouse {
        let warehouse = Warehouse::new(name).with_stock_qty(stock);
        self.store
            .warehouse_insert(&warehouse)
            .unwrap_or_else(|e| panic!("fixture seed failed: {e}"));
        warehouse
    }

    /// Insert and return an extra person.
    pub fn add_person(&self, name: &str, email: &str) -> Person {
        let person = Person::new(name, email);
        self.store
            .person_insert(&person)
            .unwrap_or_else(|e| panic!("fixture seed failed: {e}"));
        person
    }

    /// Insert and return an extra item homed at the given warehouse.
    pub fn add_item(&self, name: &str, serial: &str, warehouse_id: EntityId) -> Item {
        let item = Item::new(name, serial, warehouse_id);
        self.store
            .item_insert(&item)
            .unwrap_or_else(|e| panic!("fixture seed failed: {e}"));
        item
    }
}

// ============================================================================
// AUDIT NOTIFIER DOUBLES
// ============================================================================

/// Audit notifier that captures every event for later inspection.
#[derive(Debug, Default)]
pub struct RecordingAuditNotifier {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAuditNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }
}

impl AuditNotifier for RecordingAuditNotifier {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        self.events
            .lock()
            .map_err(|_| AuditError {
                reason: "recording sink lock poisoned".to_string(),
            })?
            .push(event);
        Ok(())
    }
}

/// Audit notifier that rejects every event. Callers are expected to log
/// the failure and carry on.
#[derive(Debug, Default)]
pub struct FailingAuditNotifier;

impl AuditNotifier for FailingAuditNotifier {
    fn record(&self, _event: AuditEvent) -> Result<(), AuditError> {
        Err(AuditError {
            reason: "audit sink unavailable".to_string(),
        })
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

/// Strategy for a positive stock quantity in a realistic range.
pub fn arb_quantity() -> impl Strategy<Value = i64> {
    1i64..1000
}

/// Strategy for a person in any status with a small stock counter.
pub fn arb_person() -> impl Strategy<Value = Person> {
    (
        "[A-Z][a-z]{2,10}",
        "[a-z]{3,10}",
        prop_oneof![
            Just(PersonStatus::Active),
            Just(PersonStatus::OnNotice),
            Just(PersonStatus::Inactive),
        ],
        0i64..50,
    )
        .prop_map(|(name, user, status, stock_qty)| {
            let mut person = Person::new(&name, &format!("{user}@example.com"));
            person.status = status;
            person.stock_qty = stock_qty;
            person
        })
}

/// Strategy for a warehouse with non-negative stock.
pub fn arb_warehouse() -> impl Strategy<Value = Warehouse> {
    ("[A-Z][a-z]{2,10}", 0i64..1000)
        .prop_map(|(name, stock)| Warehouse::new(&name).with_stock_qty(stock))
}

/// Strategy for an offboarding task type.
pub fn arb_task_type() -> impl Strategy<Value = OffboardingTaskType> {
    prop_oneof![
        Just(OffboardingTaskType::ItemCollection),
        Just(OffboardingTaskType::AccessRevocation),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_seeds_consistent_state() {
        let fx = LedgerFixture::new(7);
        let warehouse = fx.store.warehouse_get(fx.warehouse.warehouse_id).unwrap().unwrap();
        let item = fx.store.item_get(fx.item.item_id).unwrap().unwrap();
        assert_eq!(warehouse.value.stock_qty, 7);
        assert_eq!(item.value.warehouse_id, fx.warehouse.warehouse_id);
        assert_eq!(item.value.location, LocationType::Warehouse);
    }

    #[test]
    fn test_recording_notifier_captures_events() {
        let notifier = RecordingAuditNotifier::new();
        let event = AuditEvent::new(
            AuditAction::AssignItem,
            EntityType::Item,
            new_entity_id(),
            "ThinkPad X1",
        );
        notifier.record(event.clone()).unwrap();
        assert_eq!(notifier.event_count(), 1);
        assert_eq!(notifier.events()[0].entity_name, "ThinkPad X1");
    }

    #[test]
    fn test_failing_notifier_always_rejects() {
        let notifier = FailingAuditNotifier;
        let event = AuditEvent::new(
            AuditAction::ReturnItem,
            EntityType::Item,
            new_entity_id(),
            "ThinkPad X1",
        );
        assert!(notifier.record(event).is_err());
    }
}
