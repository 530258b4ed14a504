//! Process-wide registry of in-flight transactions and their entities.
//!
//! # Responsibility
//! - Track which transactions exist and which entities each one owns.
//! - Answer reverse lookups: every transaction currently tracking an entity.
//!
//! # Invariants
//! - Lookup of an unknown transaction id is a sentinel (`None`), never an
//!   error.
//! - Entity identity is the instance id: snapshots (clones) of one logical
//!   object are the same tracked object.
//! - A transaction's own tracking is not internally thread-safe; only the
//!   registry map is guarded.

use crate::model::entity::{Entity, Reference};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

pub type TrackerResult<T> = Result<T, TrackerError>;

/// Object-tracking failures.
#[derive(Debug)]
pub enum TrackerError {
    /// The tracker was driven into (or found in) an inconsistent state.
    InvalidState(String),
    /// Identity lookup expected at most one match.
    MultipleTrackedObjects { class: String, id: Option<i64> },
    /// An id-less reference is used by a tracked entity but its target is
    /// not part of the tracked set.
    UntrackedReference { class: String, attr: String },
}

impl Display for TrackerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidState(message) => write!(f, "invalid tracker state: {message}"),
            Self::MultipleTrackedObjects { class, id } => write!(
                f,
                "`{class}` (id {id:?}) is tracked more than once where uniqueness was assumed"
            ),
            Self::UntrackedReference { class, attr } => write!(
                f,
                "reference `{attr}` to `{class}` has no id and its target is not tracked"
            ),
        }
    }
}

impl Error for TrackerError {}

/// Lifecycle state of an entity within one transaction's working set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackedState {
    New,
    Clean,
    Dirty,
    Deleted,
}

/// One entity snapshot inside a transaction's working set.
#[derive(Debug, Clone)]
pub struct TrackedEntity {
    entity: Entity,
    state: TrackedState,
}

impl TrackedEntity {
    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    pub fn state(&self) -> TrackedState {
        self.state
    }
}

/// One bound unit of work.
#[derive(Debug)]
pub struct Transaction {
    uuid: Uuid,
    tracked: Vec<TrackedEntity>,
}

impl Transaction {
    pub fn new() -> Self {
        Self {
            uuid: Uuid::new_v4(),
            tracked: Vec::new(),
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Starts tracking an entity snapshot. Tracking the same logical object
    /// twice is an inconsistency.
    pub fn track(&mut self, entity: &Entity, state: TrackedState) -> TrackerResult<()> {
        if self.fetch_object(entity).is_some() {
            return Err(TrackerError::InvalidState(format!(
                "`{}` (instance {}) is already tracked",
                entity.class_name(),
                entity.instance_id()
            )));
        }
        self.tracked.push(TrackedEntity {
            entity: entity.clone(),
            state,
        });
        Ok(())
    }

    /// Moves a tracked object to a new state, refreshing its snapshot.
    ///
    /// `Deleted` is terminal; a `New` object stays `New` when marked dirty
    /// (it has never been persisted, so dirtiness adds nothing).
    pub fn mark(&mut self, entity: &Entity, state: TrackedState) -> TrackerResult<()> {
        let instance = entity.instance_id();
        let Some(slot) = self
            .tracked
            .iter_mut()
            .find(|tracked| tracked.entity.instance_id() == instance)
        else {
            return Err(TrackerError::InvalidState(format!(
                "`{}` (instance {instance}) is not tracked",
                entity.class_name()
            )));
        };
        if slot.state == TrackedState::Deleted {
            return Err(TrackerError::InvalidState(format!(
                "`{}` (instance {instance}) is already deleted",
                entity.class_name()
            )));
        }
        let next = match (slot.state, state) {
            (TrackedState::New, TrackedState::Dirty) => TrackedState::New,
            (_, requested) => requested,
        };
        slot.entity = entity.clone();
        slot.state = next;
        Ok(())
    }

    /// Looks a tracked object up by instance identity.
    pub fn fetch_object(&self, entity: &Entity) -> Option<&TrackedEntity> {
        let instance = entity.instance_id();
        self.tracked
            .iter()
            .find(|tracked| tracked.entity.instance_id() == instance)
    }

    /// Looks a tracked object up by identity equivalence (class + id).
    /// More than one match is an inconsistency.
    pub fn fetch_by_identity(
        &self,
        class_name: &str,
        id: i64,
    ) -> TrackerResult<Option<&TrackedEntity>> {
        let mut matches = self.tracked.iter().filter(|tracked| {
            tracked.entity.class_name() == class_name && tracked.entity.id() == Some(id)
        });
        let first = matches.next();
        if matches.next().is_some() {
            return Err(TrackerError::MultipleTrackedObjects {
                class: class_name.to_string(),
                id: Some(id),
            });
        }
        Ok(first)
    }

    /// Every tracked snapshot, in tracking order (commit-time flush order).
    pub fn tracked(&self) -> &[TrackedEntity] {
        &self.tracked
    }

    /// Verifies that every id-less reference used by tracked entities points
    /// at an object this transaction also tracks.
    pub fn check_reference_integrity(&self) -> TrackerResult<()> {
        for tracked in &self.tracked {
            let entity = &tracked.entity;
            let mut pending: Vec<(&'static str, &Reference)> = Vec::new();
            for attr in entity.def().multi_refs() {
                for reference in entity.references(attr.name) {
                    pending.push((attr.name, reference));
                }
            }
            for attr in entity.def().immutable_refs() {
                if let Some(reference) = entity.reference(attr.name) {
                    pending.push((attr.name, reference));
                }
            }
            for (attr, reference) in pending {
                if reference.id().is_some() {
                    continue;
                }
                let target_tracked = reference.target_instance().is_some_and(|instance| {
                    self.tracked
                        .iter()
                        .any(|other| other.entity.instance_id() == instance)
                });
                if !target_tracked {
                    return Err(TrackerError::UntrackedReference {
                        class: reference.class_name().to_string(),
                        attr: attr.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Reverse-lookup result: a transaction/state pair for one tracked entity.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub transaction: Uuid,
    pub class_name: &'static str,
    pub id: Option<i64>,
    pub state: TrackedState,
}

static GLOBAL_REGISTRY: Lazy<TransactionRegistry> = Lazy::new(TransactionRegistry::new);

/// Shared map of transaction id to in-flight transaction.
#[derive(Debug, Default)]
pub struct TransactionRegistry {
    inner: Mutex<HashMap<Uuid, Transaction>>,
}

impl TransactionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide instance. Prefer passing a registry explicitly;
    /// this exists for hosts with a single application scope.
    pub fn global() -> &'static Self {
        &GLOBAL_REGISTRY
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Transaction>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A transaction registers itself on creation.
    pub fn register(&self, transaction: Transaction) -> Uuid {
        let uuid = transaction.uuid();
        self.lock().insert(uuid, transaction);
        uuid
    }

    pub fn contains(&self, uuid: Uuid) -> bool {
        self.lock().contains_key(&uuid)
    }

    /// Removes a transaction on commit/rollback completion.
    pub fn deregister(&self, uuid: Uuid) -> Option<Transaction> {
        self.lock().remove(&uuid)
    }

    /// Runs `f` against a registered transaction. `None` is the sentinel for
    /// an unknown id; callers branch on it without error handling.
    pub fn with_transaction<R>(
        &self,
        uuid: Uuid,
        f: impl FnOnce(&mut Transaction) -> R,
    ) -> Option<R> {
        let mut registry = self.lock();
        registry.get_mut(&uuid).map(f)
    }

    /// Every transaction currently tracking the given entity instance.
    pub fn find_transactions(&self, entity: &Entity) -> Vec<SearchResult> {
        let registry = self.lock();
        let mut results = Vec::new();
        for (uuid, transaction) in registry.iter() {
            if let Some(tracked) = transaction.fetch_object(entity) {
                results.push(SearchResult {
                    transaction: *uuid,
                    class_name: tracked.entity().class_name(),
                    id: tracked.entity().id(),
                    state: tracked.state(),
                });
            }
        }
        results
    }

    /// Every entity tracked by one transaction, for commit-time flush.
    /// `None` is the unknown-transaction sentinel.
    pub fn entities_of(&self, uuid: Uuid) -> Option<Vec<SearchResult>> {
        let registry = self.lock();
        registry.get(&uuid).map(|transaction| {
            transaction
                .tracked()
                .iter()
                .map(|tracked| SearchResult {
                    transaction: uuid,
                    class_name: tracked.entity().class_name(),
                    id: tracked.entity().id(),
                    state: tracked.state(),
                })
                .collect()
        })
    }
}
