pub mod block;
pub mod codec;
pub mod consensus;
pub mod crypto;

pub use block::{Block, BlockHeader};
pub use consensus::{ChangeView, ConsensusMessage, PrepareRequest, PrepareResponse};
pub use crypto::{PublicKey, SecretKey, Signature};
