//! Error types for the node engine

use crate::logic::SettingsErrors;
use crate::model::NodeId;
use thiserror::Error;

/// Errors that abort an engine operation
#[derive(Error, Debug)]
pub enum EngineError {
    /// Logic key not present in the registry
    #[error("Unknown logic: {0}")]
    UnknownLogic(String),

    /// Settings rejected by the logic's validation
    #[error("Invalid settings: {0:?}")]
    InvalidSettings(SettingsErrors),

    /// Node not found
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// Two nodes share an id
    #[error("Duplicate node id: {0}")]
    DuplicateNode(NodeId),

    /// A second connection drives an already driven input
    #[error("Input '{key}' of node {node} already has a connection")]
    DuplicateInput { node: NodeId, key: String },

    /// Price feed error that retrying would not fix
    #[error("Price feed error: {0}")]
    Price(#[from] price_feed::PriceError),

    /// State store failure
    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    /// Cycle lock failure
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    /// IO error (graph files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from a key-value state store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from a cycle lock backend
#[derive(Error, Debug)]
pub enum LockError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
