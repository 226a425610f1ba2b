//! Unified error type for grid observability operations
//!
//! [`GridError`] covers the genuinely exceptional conditions. Expected analysis
//! outcomes (a clean measurement set, a rejected switching action, a solver that
//! did not converge mid-session) are reported through result records instead, so
//! callers only see an `Err` when they passed something the engine cannot work with.
//!
//! # Example
//!
//! ```
//! use gridwatch_core::{GridError, GridResult};
//!
//! fn require_measurements(count: usize) -> GridResult<()> {
//!     if count == 0 {
//!         return Err(GridError::Configuration("measurement set is empty".into()));
//!     }
//!     Ok(())
//! }
//!
//! assert!(require_measurements(0).is_err());
//! ```

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GridError {
    /// Grid not initialized, empty measurement set, or invalid parameters
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The external solver failed to produce an estimate
    #[error("Solver did not converge: {0}")]
    SolverNonConvergence(String),

    /// A switching action would isolate buses and was rolled back
    #[error("Topology change rejected: would isolate bus(es) {buses:?}")]
    TopologyRejected { buses: Vec<usize> },

    /// Lookup of a bus/branch/switch/measurement that does not exist
    #[error("Unknown {kind} {id}")]
    UnknownElement { kind: &'static str, id: usize },

    /// Element id already present
    #[error("Duplicate {kind} id {id}")]
    DuplicateId { kind: &'static str, id: usize },

    /// An element references a bus that is not part of the grid
    #[error("{element} references missing bus {bus}")]
    InvalidReference { element: String, bus: usize },

    /// Solver returned an estimate lacking a quantity that is measured
    #[error("Estimate has no value for {0}")]
    IncompleteEstimate(String),

    /// I/O errors (configuration files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing/serialization errors
    #[error("Parse error: {0}")]
    Parse(String),
}

pub type GridResult<T> = Result<T, GridError>;

impl From<toml::de::Error> for GridError {
    fn from(err: toml::de::Error) -> Self {
        GridError::Parse(err.to_string())
    }
}

impl From<toml::ser::Error> for GridError {
    fn from(err: toml::ser::Error) -> Self {
        GridError::Parse(err.to_string())
    }
}

impl From<serde_json::Error> for GridError {
    fn from(err: serde_json::Error) -> Self {
        GridError::Parse(err.to_string())
    }
}
