use ember_primitives::block::{Block, BlockHeader};
use ember_primitives::crypto::{PublicKey, Signature};
use std::sync::{Arc, Mutex};

/// The block-producing collaborator driven by engine notifications.
///
/// The consensus node fires `CreateBlock`, `VerifyBlock` and `MineBlock`
/// and keeps going; the driver routes those here and feeds the answers
/// back as `new_proposal` / `agree_proposal` calls.
pub trait BlockProducer: Send {
    /// Assembles a full block on the unsigned skeleton handed out when this
    /// node is due to propose.
    fn assemble(&mut self, skeleton: BlockHeader) -> Block;

    /// Verifies a remote proposal's state transition. Returning false
    /// withholds this node's endorsement.
    fn validate(&mut self, block: &Block) -> bool;

    /// Persists the finalized block together with its vote signatures.
    fn store(&mut self, block: Block, signatures: Vec<(PublicKey, Signature)>);
}

/// A finalized block as seen by `QueueProducer::store`.
#[derive(Clone, Debug)]
pub struct MinedBlock {
    pub block: Block,
    pub signatures: Vec<(PublicKey, Signature)>,
}

/// Minimal producer over a queue of pending transaction ids.
///
/// Proposals drain the queue; remote proposals are accepted whenever their
/// content fields check out. Mined blocks land in a shared list so tests
/// and callers can observe finalization.
#[derive(Clone, Debug, Default)]
pub struct QueueProducer {
    pending: Arc<Mutex<Vec<alloy_primitives::B256>>>,
    mined: Arc<Mutex<Vec<MinedBlock>>>,
}

impl QueueProducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a transaction id for inclusion in the next local proposal.
    pub fn push_transaction(&self, id: alloy_primitives::B256) {
        self.pending.lock().expect("pending lock poisoned").push(id);
    }

    /// Blocks finalized so far, in commit order.
    pub fn mined(&self) -> Vec<MinedBlock> {
        self.mined.lock().expect("mined lock poisoned").clone()
    }
}

impl BlockProducer for QueueProducer {
    fn assemble(&mut self, skeleton: BlockHeader) -> Block {
        let mut block = Block::new(skeleton);
        block.transactions = std::mem::take(&mut *self.pending.lock().expect("pending lock poisoned"));
        block
    }

    fn validate(&mut self, block: &Block) -> bool {
        block.verify_content().is_ok()
    }

    fn store(&mut self, block: Block, signatures: Vec<(PublicKey, Signature)>) {
        self.mined
            .lock()
            .expect("mined lock poisoned")
            .push(MinedBlock { block, signatures });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;

    #[test]
    fn test_assemble_drains_queue() {
        let mut producer = QueueProducer::new();
        producer.push_transaction(B256::repeat_byte(1));
        producer.push_transaction(B256::repeat_byte(2));

        let skeleton = BlockHeader::new(1, B256::ZERO, 0, 0);
        let block = producer.assemble(skeleton);
        assert_eq!(block.transactions.len(), 2);

        let next = producer.assemble(BlockHeader::new(2, B256::ZERO, 0, 0));
        assert!(next.transactions.is_empty(), "queue drained by the first build");
    }

    #[test]
    fn test_validate_checks_content() {
        let mut producer = QueueProducer::new();
        let mut block = Block::new(BlockHeader::new(1, B256::ZERO, 0, 0));
        block.transactions = vec![B256::repeat_byte(3)];
        assert!(!producer.validate(&block), "stale content fields fail");
        block.finalize();
        assert!(producer.validate(&block));
    }

    #[test]
    fn test_store_observable_through_clones() {
        let mut producer = QueueProducer::new();
        let observer = producer.clone();

        let mut block = Block::new(BlockHeader::new(1, B256::ZERO, 0, 0));
        block.finalize();
        producer.store(block, Vec::new());
        assert_eq!(observer.mined().len(), 1);
    }
}
