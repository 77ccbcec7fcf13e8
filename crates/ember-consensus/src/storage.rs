use ember_primitives::block::BlockHeader;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("header storage unavailable: {0}")]
    Unavailable(String),
}

/// Finalized-header lookup consumed by the consensus node.
///
/// The engine only ever reads through this seam; it never writes. Missing
/// heights are `Ok(None)`, infrastructure failures are `Err`.
pub trait HeaderStorage: Send + Sync {
    fn header_by_height(&self, height: u64) -> Result<Option<BlockHeader>, StorageError>;
}
