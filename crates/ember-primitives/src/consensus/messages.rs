use alloy_primitives::B256;
use thiserror::Error;

use crate::block::{Block, BlockError};
use crate::codec::{hash256, ByteReader, ByteWriter, CodecError};
use crate::crypto::{CryptoError, PublicKey, Signature, PUBLIC_KEY_LEN, SIGNATURE_LEN};

/// Command tags in the shared wire command-type space.
pub const PREPARE_REQUEST: u8 = 23;
pub const PREPARE_RESPONSE: u8 = 24;
pub const CHANGE_VIEW: u8 = 25;
/// Reserved sentinel closing the consensus command range. Never sent.
pub const COMMAND_END: u8 = 26;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("unknown command tag {0}")]
    UnknownCommand(u8),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Block(#[from] BlockError),
}

/// Leader's broadcast of its signed block proposal for the current view.
#[derive(Clone, Debug)]
pub struct PrepareRequest {
    pub block: Block,
}

/// A validator's signed endorsement of a specific block hash.
#[derive(Clone, Debug)]
pub struct PrepareResponse {
    /// Hash being voted for, carried out of band from the signature body.
    pub block_hash: B256,
    pub signer: PublicKey,
    pub signature: Signature,
}

/// A validator's signed vote to abandon the current view for a higher one.
#[derive(Clone, Debug)]
pub struct ChangeView {
    pub new_view: u64,
    pub signer: PublicKey,
    pub signature: Signature,
}

/// Envelope over the three consensus wire message kinds.
#[derive(Clone, Debug)]
pub enum ConsensusMessage {
    PrepareRequest(PrepareRequest),
    PrepareResponse(PrepareResponse),
    ChangeView(ChangeView),
}

impl ConsensusMessage {
    pub fn command(&self) -> u8 {
        match self {
            Self::PrepareRequest(_) => PREPARE_REQUEST,
            Self::PrepareResponse(_) => PREPARE_RESPONSE,
            Self::ChangeView(_) => CHANGE_VIEW,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(128);
        w.write_u8(self.command());
        match self {
            Self::PrepareRequest(req) => {
                w.write_bytes(&req.block.encode());
            }
            Self::PrepareResponse(resp) => {
                w.write_hash(&resp.block_hash);
                w.write_bytes(&resp.signer.to_bytes());
                w.write_bytes(&resp.signature.to_bytes());
            }
            Self::ChangeView(cv) => {
                w.write_var_u64(cv.new_view);
                w.write_bytes(&cv.signer.to_bytes());
                w.write_bytes(&cv.signature.to_bytes());
            }
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut r = ByteReader::new(bytes);
        let command = r.read_u8()?;
        let message = match command {
            PREPARE_REQUEST => {
                let block = Block::decode_from(&mut r)?;
                Self::PrepareRequest(PrepareRequest { block })
            }
            PREPARE_RESPONSE => {
                let block_hash = r.read_hash()?;
                let signer = read_public_key(&mut r)?;
                let signature = read_signature(&mut r)?;
                Self::PrepareResponse(PrepareResponse {
                    block_hash,
                    signer,
                    signature,
                })
            }
            CHANGE_VIEW => {
                let new_view = r.read_var_u64()?;
                let signer = read_public_key(&mut r)?;
                let signature = read_signature(&mut r)?;
                Self::ChangeView(ChangeView {
                    new_view,
                    signer,
                    signature,
                })
            }
            other => return Err(WireError::UnknownCommand(other)),
        };
        r.expect_end()?;
        Ok(message)
    }
}

fn read_public_key(r: &mut ByteReader<'_>) -> Result<PublicKey, WireError> {
    let mut bytes = [0u8; PUBLIC_KEY_LEN];
    bytes.copy_from_slice(r.read_exact(PUBLIC_KEY_LEN)?);
    Ok(PublicKey::from_bytes(&bytes)?)
}

fn read_signature(r: &mut ByteReader<'_>) -> Result<Signature, WireError> {
    let mut bytes = [0u8; SIGNATURE_LEN];
    bytes.copy_from_slice(r.read_exact(SIGNATURE_LEN)?);
    Ok(Signature::from_bytes(&bytes)?)
}

/// Digest signed by change-view votes: the tip hash followed by the
/// proposed view as 8 little-endian bytes.
pub fn change_view_digest(tip_hash: &B256, new_view: u64) -> B256 {
    let mut buf = [0u8; 40];
    buf[..32].copy_from_slice(tip_hash.as_slice());
    buf[32..].copy_from_slice(&new_view.to_le_bytes());
    hash256(&buf)
}
