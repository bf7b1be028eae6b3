use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use ulid::Ulid;

use crate::model::*;

use super::{Filter, Store, StoreError};

/// Rows of every table, keyed by id. Ids are ULIDs and therefore unique
/// across tables.
pub struct MemoryStore {
    rows: DashMap<Ulid, Record>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Wrap a body in a fresh id and timestamp without storing it.
    pub fn stamp(body: RecordBody) -> Record {
        Record {
            id: Ulid::new(),
            created_at: Utc::now(),
            body,
        }
    }

    pub fn find(&self, table: Table, id: &Ulid) -> Option<Record> {
        self.rows
            .get(id)
            .filter(|r| r.table() == table)
            .map(|r| r.value().clone())
    }

    /// Build the replacement row for an update, keeping id and `created_at`.
    pub fn prepare_update(&self, id: Ulid, body: RecordBody) -> Result<Record, StoreError> {
        let existing = self.rows.get(&id).ok_or(StoreError::NotFound {
            table: body.table(),
            id,
        })?;
        if existing.table() != body.table() {
            return Err(StoreError::TableMismatch {
                expected: body.table(),
                found: existing.table(),
            });
        }
        Ok(Record {
            id,
            created_at: existing.created_at,
            body,
        })
    }

    /// Swap in a new body under the row's lock, keeping id and `created_at`.
    pub fn replace(&self, id: Ulid, body: RecordBody) -> Result<Record, StoreError> {
        let mut row = self.rows.get_mut(&id).ok_or(StoreError::NotFound {
            table: body.table(),
            id,
        })?;
        if row.table() != body.table() {
            return Err(StoreError::TableMismatch {
                expected: body.table(),
                found: row.table(),
            });
        }
        let record = Record {
            id,
            created_at: row.created_at,
            body,
        };
        *row = record.clone();
        Ok(record)
    }

    pub fn ensure_exists(&self, table: Table, id: Ulid) -> Result<(), StoreError> {
        if self.find(table, &id).is_some() {
            Ok(())
        } else {
            Err(StoreError::NotFound { table, id })
        }
    }

    pub fn select(&self, table: Table, filter: &Filter) -> Vec<Record> {
        let mut rows: Vec<Record> = self
            .rows
            .iter()
            .filter(|r| r.table() == table && filter.matches(r.value()))
            .map(|r| r.value().clone())
            .collect();
        filter.sort(&mut rows);
        rows
    }

    // ── Event application ────────────────────────────────────

    pub fn apply_event(&self, event: &Event) {
        match event {
            Event::Inserted(record) => {
                self.rows.insert(record.id, record.clone());
            }
            // Never brings back a deleted row.
            Event::Updated(record) => {
                if let Some(mut row) = self.rows.get_mut(&record.id) {
                    *row = record.clone();
                }
            }
            Event::Deleted { id, .. } => {
                self.rows.remove(id);
            }
        }
    }

    /// Minimal event list that recreates the current rows.
    pub fn snapshot(&self) -> Vec<Event> {
        let mut records: Vec<Record> = self.rows.iter().map(|r| r.value().clone()).collect();
        records.sort_by_key(|r| r.id);
        records.into_iter().map(Event::Inserted).collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert(&self, body: RecordBody) -> Result<Record, StoreError> {
        let record = Self::stamp(body);
        self.apply_event(&Event::Inserted(record.clone()));
        Ok(record)
    }

    async fn update(&self, id: Ulid, body: RecordBody) -> Result<Record, StoreError> {
        self.replace(id, body)
    }

    async fn delete(&self, table: Table, id: Ulid) -> Result<(), StoreError> {
        self.ensure_exists(table, id)?;
        self.apply_event(&Event::Deleted { table, id });
        Ok(())
    }

    async fn query(&self, table: Table, filter: &Filter) -> Result<Vec<Record>, StoreError> {
        Ok(self.select(table, filter))
    }

    async fn get(&self, table: Table, id: Ulid) -> Result<Option<Record>, StoreError> {
        Ok(self.find(table, &id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(name: &str) -> RecordBody {
        RecordBody::Room(Room {
            name: name.into(),
            notes: None,
        })
    }

    #[tokio::test]
    async fn insert_assigns_id_and_timestamp() {
        let store = MemoryStore::new();
        let a = store.insert(room("Hall")).await.unwrap();
        let b = store.insert(room("Kitchen")).await.unwrap();
        assert_ne!(a.id, b.id);
        assert!(a.created_at <= b.created_at);
        assert_eq!(store.get(Table::Rooms, a.id).await.unwrap(), Some(a));
    }

    #[tokio::test]
    async fn get_respects_table() {
        let store = MemoryStore::new();
        let a = store.insert(room("Hall")).await.unwrap();
        assert_eq!(store.get(Table::Bookings, a.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn update_keeps_identity() {
        let store = MemoryStore::new();
        let a = store.insert(room("Hall")).await.unwrap();
        let b = store.update(a.id, room("Great Hall")).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.created_at, b.created_at);
        assert_eq!(b.label(), "Great Hall");
    }

    #[tokio::test]
    async fn update_cannot_change_table() {
        let store = MemoryStore::new();
        let a = store.insert(room("Hall")).await.unwrap();
        let err = store
            .update(
                a.id,
                RecordBody::Partner(Contact {
                    name: "x".into(),
                    organisation: None,
                    email: None,
                    phone: None,
                    active: true,
                }),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::TableMismatch { .. }));
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store.delete(Table::Rooms, Ulid::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { table: Table::Rooms, .. }));
    }

    #[tokio::test]
    async fn query_filters_by_table() {
        let store = MemoryStore::new();
        store.insert(room("Hall")).await.unwrap();
        store
            .insert(RecordBody::Caretaker(Contact {
                name: "Sam".into(),
                organisation: None,
                email: None,
                phone: None,
                active: true,
            }))
            .await
            .unwrap();
        assert_eq!(store.query(Table::Rooms, &Filter::all()).await.unwrap().len(), 1);
        assert_eq!(store.query(Table::Caretakers, &Filter::all()).await.unwrap().len(), 1);
        assert!(store.query(Table::Partners, &Filter::all()).await.unwrap().is_empty());
    }

    #[test]
    fn update_after_delete_does_not_resurrect() {
        let store = MemoryStore::new();
        let hall = MemoryStore::stamp(room("Hall"));
        let renamed = Record {
            body: room("Great Hall"),
            ..hall.clone()
        };
        store.apply_event(&Event::Inserted(hall.clone()));
        store.apply_event(&Event::Deleted {
            table: Table::Rooms,
            id: hall.id,
        });
        store.apply_event(&Event::Updated(renamed));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn update_of_deleted_row_is_not_found() {
        let store = MemoryStore::new();
        let a = store.insert(room("Hall")).await.unwrap();
        store.delete(Table::Rooms, a.id).await.unwrap();
        let err = store.update(a.id, room("Great Hall")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn snapshot_recreates_rows() {
        let store = MemoryStore::new();
        let a = store.insert(room("Hall")).await.unwrap();
        let b = store.insert(room("Kitchen")).await.unwrap();
        store.delete(Table::Rooms, a.id).await.unwrap();

        let copy = MemoryStore::new();
        for event in store.snapshot() {
            copy.apply_event(&event);
        }
        assert_eq!(copy.len(), 1);
        assert_eq!(copy.find(Table::Rooms, &b.id), Some(b));
    }
}
