//! Node graph engine for epower
//!
//! Evaluates a graph of logic nodes against day-ahead electricity prices,
//! propagates values along connections and pushes the resulting state to
//! devices, one locked cycle at a time.

pub mod cycle;
pub mod error;
pub mod live;
pub mod lock;
pub mod logic;
pub mod model;
pub mod prices;
pub mod propagation;
pub mod repository;
pub mod store;

pub use cycle::{CycleOutcome, CycleReport, CycleRunner, DeviceFailure};
pub use error::{EngineError, LockError, StoreError};
pub use live::LiveNode;
pub use lock::{CycleLock, FileLock, LockGuard, MemoryLock};
pub use logic::{validate_settings, Logic, LogicDescriptor, LogicKind, SettingsErrors};
pub use model::*;
pub use prices::PriceCache;
pub use propagation::{PropagationEngine, PropagationReport};
pub use repository::{ConnectionRepository, GraphRepository, NodeRepository};
pub use store::{JsonFileStore, MemoryStore, StateStore};
