//! Unit-of-work transaction tracking.

pub mod registry;

pub use registry::{
    SearchResult, TrackedEntity, TrackedState, TrackerError, TrackerResult, Transaction,
    TransactionRegistry,
};
