pub mod quorum;
mod context;
mod pacemaker;
mod state_machine;

pub use context::{ConsensusState, Context};
pub use pacemaker::{backoff_intervals, deadline_unix, Pacemaker};
pub use state_machine::{ConsensusNode, EngineOutput, Tip};
