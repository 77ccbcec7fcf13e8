use alloy_primitives::{Address, B256};
use thiserror::Error;

use crate::codec::{hash256, merkle_root, ByteReader, ByteWriter, CodecError};
use crate::crypto::{CryptoError, PublicKey, SecretKey, Signature, PUBLIC_KEY_LEN, SIGNATURE_LEN};

/// Current block header layout version.
pub const HEADER_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum BlockError {
    /// The header carries no signer key yet.
    #[error("header is unsigned")]
    Unsigned,

    /// Transaction root does not match the transaction list.
    #[error("transaction root mismatch")]
    TxRootMismatch,

    /// Transaction count does not match the transaction list.
    #[error("transaction count mismatch")]
    TxCountMismatch,

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Block header: chain-content fields plus the signer key and signature
/// stamped onto it by the producing validator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: u32,
    pub height: u64,
    pub prev_hash: B256,
    /// Unix seconds.
    pub timestamp: u64,
    /// Consensus round this block was proposed in.
    pub view: u64,
    pub tx_count: u32,
    pub tx_root: B256,
    pub signer: Option<PublicKey>,
    pub signature: Option<Signature>,
}

impl BlockHeader {
    /// Fresh unsigned header extending `prev_hash` with empty content fields.
    pub fn new(height: u64, prev_hash: B256, timestamp: u64, view: u64) -> Self {
        Self {
            version: HEADER_VERSION,
            height,
            prev_hash,
            timestamp,
            view,
            tx_count: 0,
            tx_root: B256::ZERO,
            signer: None,
            signature: None,
        }
    }

    fn encode_content(&self, w: &mut ByteWriter) {
        w.write_u32(self.version);
        w.write_u64(self.height);
        w.write_hash(&self.prev_hash);
        w.write_u64(self.timestamp);
        w.write_u64(self.view);
        w.write_u32(self.tx_count);
        w.write_hash(&self.tx_root);
    }

    /// Digest a producer signs: the content fields plus the signer key.
    pub fn sign_hash(&self) -> Result<B256, BlockError> {
        let signer = self.signer.as_ref().ok_or(BlockError::Unsigned)?;
        let mut w = ByteWriter::with_capacity(128);
        self.encode_content(&mut w);
        w.write_bytes(&signer.to_bytes());
        Ok(hash256(&w.into_bytes()))
    }

    /// Stamps the header with `key`'s public key and signature.
    pub fn sign(&mut self, key: &SecretKey) -> Result<(), BlockError> {
        self.signer = Some(key.public_key());
        let digest = self.sign_hash()?;
        self.signature = Some(key.sign(&digest));
        Ok(())
    }

    /// Verifies the embedded signature against the embedded signer key.
    pub fn verify_sign(&self) -> Result<(), BlockError> {
        let signer = self.signer.as_ref().ok_or(BlockError::Unsigned)?;
        let signature = self.signature.as_ref().ok_or(BlockError::Unsigned)?;
        let digest = self.sign_hash()?;
        signer.verify(&digest, signature)?;
        Ok(())
    }

    /// Block hash over the full encoding, signer and signature included.
    pub fn hash(&self) -> B256 {
        let mut w = ByteWriter::with_capacity(192);
        self.encode_into(&mut w);
        hash256(&w.into_bytes())
    }

    /// Address of the validator that produced this header.
    pub fn miner(&self) -> Option<Address> {
        self.signer.as_ref().map(|pk| pk.address())
    }

    pub fn encode_into(&self, w: &mut ByteWriter) {
        self.encode_content(w);
        match (&self.signer, &self.signature) {
            (Some(signer), Some(signature)) => {
                w.write_u8(1);
                w.write_bytes(&signer.to_bytes());
                w.write_bytes(&signature.to_bytes());
            }
            _ => w.write_u8(0),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(192);
        self.encode_into(&mut w);
        w.into_bytes()
    }

    pub fn decode_from(r: &mut ByteReader<'_>) -> Result<Self, BlockError> {
        let version = r.read_u32()?;
        let height = r.read_u64()?;
        let prev_hash = r.read_hash()?;
        let timestamp = r.read_u64()?;
        let view = r.read_u64()?;
        let tx_count = r.read_u32()?;
        let tx_root = r.read_hash()?;

        let (signer, signature) = match r.read_u8()? {
            0 => (None, None),
            _ => {
                let mut pk = [0u8; PUBLIC_KEY_LEN];
                pk.copy_from_slice(r.read_exact(PUBLIC_KEY_LEN)?);
                let mut sig = [0u8; SIGNATURE_LEN];
                sig.copy_from_slice(r.read_exact(SIGNATURE_LEN)?);
                (
                    Some(PublicKey::from_bytes(&pk)?),
                    Some(Signature::from_bytes(&sig)?),
                )
            }
        };

        Ok(Self {
            version,
            height,
            prev_hash,
            timestamp,
            view,
            tx_count,
            tx_root,
            signer,
            signature,
        })
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, BlockError> {
        let mut r = ByteReader::new(bytes);
        let header = Self::decode_from(&mut r)?;
        r.expect_end()?;
        Ok(header)
    }
}

/// A block as consensus sees it: a header plus the ids of the transactions
/// it carries. Transaction bodies live outside this layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<B256>,
}

impl Block {
    pub fn new(header: BlockHeader) -> Self {
        Self {
            header,
            transactions: Vec::new(),
        }
    }

    /// Recomputes the transaction-derived header fields from the id list.
    pub fn finalize(&mut self) {
        self.header.tx_count = self.transactions.len() as u32;
        self.header.tx_root = merkle_root(&self.transactions);
    }

    /// Checks the header's transaction-derived fields against the id list.
    pub fn verify_content(&self) -> Result<(), BlockError> {
        if self.header.tx_count as usize != self.transactions.len() {
            return Err(BlockError::TxCountMismatch);
        }
        if self.header.tx_root != merkle_root(&self.transactions) {
            return Err(BlockError::TxRootMismatch);
        }
        Ok(())
    }

    pub fn hash(&self) -> B256 {
        self.header.hash()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(192 + 32 * self.transactions.len());
        self.header.encode_into(&mut w);
        w.write_var_u64(self.transactions.len() as u64);
        for tx in &self.transactions {
            w.write_hash(tx);
        }
        w.into_bytes()
    }

    pub fn decode_from(r: &mut ByteReader<'_>) -> Result<Self, BlockError> {
        let header = BlockHeader::decode_from(r)?;
        let count = r.read_var_u64()?;
        // A count larger than the bytes behind it cannot be honest.
        if count > (r.remaining() / 32) as u64 {
            return Err(BlockError::Codec(CodecError::UnexpectedEof {
                offset: 0,
                needed: (count as usize).saturating_mul(32) - r.remaining(),
            }));
        }
        let mut transactions = Vec::with_capacity(count as usize);
        for _ in 0..count {
            transactions.push(r.read_hash()?);
        }
        Ok(Self {
            header,
            transactions,
        })
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, BlockError> {
        let mut r = ByteReader::new(bytes);
        let block = Self::decode_from(&mut r)?;
        r.expect_end()?;
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key(tag: u8) -> SecretKey {
        let mut bytes = [0u8; 32];
        bytes[31] = tag;
        SecretKey::from_bytes(&bytes).expect("small scalar should be valid")
    }

    fn sample_block(key: &SecretKey) -> Block {
        let header = BlockHeader::new(5, B256::repeat_byte(0x01), 1_700_000_000, 0);
        let mut block = Block::new(header);
        block.transactions = vec![B256::repeat_byte(0xA1), B256::repeat_byte(0xA2)];
        block.finalize();
        block.header.sign(key).expect("signing should succeed");
        block
    }

    #[test]
    fn test_sign_and_verify_roundtrip() {
        let key = test_key(1);
        let block = sample_block(&key);
        block.header.verify_sign().expect("signature should verify");
        assert_eq!(block.header.miner(), Some(key.public_key().address()));
    }

    #[test]
    fn test_unsigned_header_rejects_sign_hash() {
        let header = BlockHeader::new(1, B256::ZERO, 0, 0);
        assert!(matches!(header.sign_hash(), Err(BlockError::Unsigned)));
        assert!(matches!(header.verify_sign(), Err(BlockError::Unsigned)));
    }

    #[test]
    fn test_tampered_content_fails_verification() {
        let key = test_key(2);
        let mut block = sample_block(&key);
        block.header.timestamp += 1;
        assert!(block.header.verify_sign().is_err(), "tampered header must not verify");
    }

    #[test]
    fn test_wrong_signer_key_fails_verification() {
        let key = test_key(3);
        let mut block = sample_block(&key);
        // Swap in a different signer key while keeping the old signature.
        block.header.signer = Some(test_key(4).public_key());
        assert!(block.header.verify_sign().is_err());
    }

    #[test]
    fn test_hash_changes_with_signature() {
        let key = test_key(5);
        let mut block = sample_block(&key);
        let signed_hash = block.hash();
        block.header.signature = None;
        block.header.signer = None;
        assert_ne!(block.hash(), signed_hash, "hash covers signer and signature");
    }

    #[test]
    fn test_header_encode_decode_roundtrip() {
        let key = test_key(6);
        let block = sample_block(&key);
        let bytes = block.header.encode();
        let decoded = BlockHeader::decode(&bytes).expect("decode should succeed");
        assert_eq!(decoded, block.header);

        // Unsigned headers round-trip too (presence flag 0).
        let unsigned = BlockHeader::new(0, B256::ZERO, 1234, 0);
        let decoded = BlockHeader::decode(&unsigned.encode()).unwrap();
        assert_eq!(decoded, unsigned);
    }

    #[test]
    fn test_block_encode_decode_roundtrip() {
        let key = test_key(7);
        let block = sample_block(&key);
        let decoded = Block::decode(&block.encode()).expect("decode should succeed");
        assert_eq!(decoded, block);
        decoded.verify_content().expect("content should check out");
    }

    #[test]
    fn test_block_decode_rejects_truncation_and_trailing() {
        let key = test_key(8);
        let bytes = sample_block(&key).encode();

        assert!(Block::decode(&bytes[..bytes.len() - 1]).is_err(), "truncated input");

        let mut padded = bytes.clone();
        padded.push(0);
        assert!(Block::decode(&padded).is_err(), "trailing byte");
    }

    #[test]
    fn test_block_decode_rejects_oversized_count() {
        let header = BlockHeader::new(1, B256::ZERO, 0, 0);
        let mut w = ByteWriter::new();
        header.encode_into(&mut w);
        // Claim a million transactions with no bytes behind them.
        w.write_var_u64(1_000_000);
        assert!(Block::decode(&w.into_bytes()).is_err());
    }

    #[test]
    fn test_verify_content_mismatches() {
        let key = test_key(9);
        let mut block = sample_block(&key);
        block.transactions.push(B256::repeat_byte(0xA3));
        assert!(matches!(block.verify_content(), Err(BlockError::TxCountMismatch)));

        block.header.tx_count = block.transactions.len() as u32;
        assert!(matches!(block.verify_content(), Err(BlockError::TxRootMismatch)));

        block.finalize();
        block.verify_content().expect("finalize should restore consistency");
    }
}
