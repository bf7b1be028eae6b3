//! Persistence collaborator: a table-oriented CRUD client over typed records.
//!
//! The booking engine only talks to [`Store`]; which implementation sits behind
//! it (in-memory, WAL-backed, a test fake) is decided by whoever builds the
//! engine.

mod durable;
mod memory;

pub use durable::DurableStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use ulid::Ulid;

use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NotFound { table: Table, id: Ulid },
    /// An update tried to move a row into another table.
    TableMismatch { expected: Table, found: Table },
    Io(String),
    Closed,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound { table, id } => write!(f, "{table}: no row {id}"),
            StoreError::TableMismatch { expected, found } => {
                write!(f, "row belongs to {found}, not {expected}")
            }
            StoreError::Io(e) => write!(f, "storage I/O error: {e}"),
            StoreError::Closed => write!(f, "store is shut down"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Order {
    /// By start time (reservations, weekend assignments), then id.
    #[default]
    Start,
    /// By id, i.e. creation order.
    Id,
}

/// Row predicate for [`Store::query`]. Empty filter matches every row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub room_id: Option<Ulid>,
    pub owner: Option<Owner>,
    pub series_id: Option<Ulid>,
    pub linked_visit: Option<Ulid>,
    pub caretaker_id: Option<Ulid>,
    /// Rows whose span overlaps this one (half-open).
    pub overlapping: Option<Span>,
    pub active_only: bool,
    pub order: Order,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn room(mut self, id: Ulid) -> Self {
        self.room_id = Some(id);
        self
    }

    pub fn owner(mut self, owner: Owner) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn series(mut self, id: Ulid) -> Self {
        self.series_id = Some(id);
        self
    }

    pub fn linked_to(mut self, visit_id: Ulid) -> Self {
        self.linked_visit = Some(visit_id);
        self
    }

    pub fn caretaker(mut self, id: Ulid) -> Self {
        self.caretaker_id = Some(id);
        self
    }

    pub fn overlapping(mut self, span: Span) -> Self {
        self.overlapping = Some(span);
        self
    }

    pub fn active(mut self) -> Self {
        self.active_only = true;
        self
    }

    pub fn ordered_by(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    pub fn matches(&self, record: &Record) -> bool {
        let reservation = record.body.as_reservation();
        if let Some(room) = self.room_id
            && record.room_id() != Some(room)
        {
            return false;
        }
        if let Some(owner) = &self.owner
            && reservation.is_none_or(|r| &r.owner != owner)
        {
            return false;
        }
        if let Some(series) = self.series_id
            && reservation.is_none_or(|r| r.series_id != Some(series))
        {
            return false;
        }
        if let Some(visit) = self.linked_visit
            && reservation.is_none_or(|r| r.linked_visit != Some(visit))
        {
            return false;
        }
        if let Some(caretaker) = self.caretaker_id {
            match &record.body {
                RecordBody::WeekendAssignment(w) if w.caretaker_id == caretaker => {}
                _ => return false,
            }
        }
        if let Some(window) = &self.overlapping
            && record.span().is_none_or(|s| !s.overlaps(window))
        {
            return false;
        }
        if self.active_only && record.body.as_contact().is_some_and(|c| !c.active) {
            return false;
        }
        true
    }

    /// Sort query results in place according to `self.order`.
    pub fn sort(&self, rows: &mut [Record]) {
        match self.order {
            Order::Id => rows.sort_by_key(|r| r.id),
            Order::Start => rows.sort_by_key(|r| (r.span().map(|s| s.start), r.id)),
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a new row; the store assigns id and `created_at`.
    async fn insert(&self, body: RecordBody) -> Result<Record, StoreError>;

    /// Replace the body of an existing row. The table may not change.
    async fn update(&self, id: Ulid, body: RecordBody) -> Result<Record, StoreError>;

    async fn delete(&self, table: Table, id: Ulid) -> Result<(), StoreError>;

    async fn query(&self, table: Table, filter: &Filter) -> Result<Vec<Record>, StoreError>;

    async fn get(&self, table: Table, id: Ulid) -> Result<Option<Record>, StoreError>;
}
