mod messages;

pub use messages::{
    change_view_digest, ChangeView, ConsensusMessage, PrepareRequest, PrepareResponse, WireError,
    CHANGE_VIEW, COMMAND_END, PREPARE_REQUEST, PREPARE_RESPONSE,
};
