//! Error types for Marrow

use thiserror::Error;

/// The main error type for Marrow operations
#[derive(Debug, Error)]
pub enum MarrowError {
    #[error("node pool exhausted (capacity {0})")]
    PoolExhausted(usize),

    #[error("bone mask supports at most {max} bones, skeleton has {got}")]
    MaskOverflow { max: usize, got: usize },

    #[error("state list full (capacity {0})")]
    StateListFull(usize),

    #[error("edge list full (capacity {0})")]
    EdgeListFull(usize),

    #[error("clip not found: {0}")]
    ClipNotFound(String),

    #[error("bone not found: {0}")]
    BoneNotFound(String),

    #[error("node kind {0} does not accept inputs")]
    NotAParent(&'static str),

    #[error("input index {index} out of range for {kind} node")]
    InputOutOfRange { kind: &'static str, index: usize },

    #[error("{kind} node input {input} is not connected")]
    UnconnectedInput { kind: &'static str, input: usize },

    #[error("handle kind mismatch: expected {expected}, got {got}")]
    KindMismatch {
        expected: &'static str,
        got: &'static str,
    },

    #[error("negative time delta: {0}")]
    NegativeDelta(f32),

    #[error("state machine cycle detected at state {0}")]
    StateMachineCycle(usize),

    #[error("node slot {0} is vacant or re-entered during traversal")]
    BrokenNode(usize),

    #[error("tree has no root node")]
    NoRoot,

    #[error("skeleton error: {0}")]
    InvalidSkeleton(String),

    #[error("clip error: {0}")]
    InvalidClip(String),

    #[error("state machine error: {0}")]
    StateMachine(String),
}

/// Result type alias for Marrow operations
pub type Result<T> = std::result::Result<T, MarrowError>;
