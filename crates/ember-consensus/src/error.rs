use ember_primitives::block::BlockError;
use thiserror::Error;

/// Errors surfaced by the Ember block-agreement engine.
///
/// Malformed or spoofed peer messages are not represented here: message
/// handlers recover from those locally (log + drop) and liveness is restored
/// by the timeout / view-change machinery, never by message-level retry.
#[derive(Debug, Error)]
pub enum ConsensusError {
    /// The operation was requested while the state machine was not in the
    /// expected state, or this node is not currently a validator. Non-fatal;
    /// callers treat it as "not applicable right now".
    #[error("skipped: {reason}")]
    Skipped { reason: &'static str },

    /// A locally authored block failed finalization or self-signing.
    #[error("invalid block: {0}")]
    InvalidBlock(#[from] BlockError),

    /// Genesis lookup failed during start-up. Fatal to the node.
    #[error("initialization failed: {0}")]
    Initialization(String),
}

impl ConsensusError {
    pub fn skipped(reason: &'static str) -> Self {
        Self::Skipped { reason }
    }
}

/// Result type for consensus operations.
pub type ConsensusResult<T> = Result<T, ConsensusError>;
