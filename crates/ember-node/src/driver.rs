use ember_consensus::{ConsensusNode, EngineOutput};
use ember_primitives::consensus::ConsensusMessage;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::network::ChannelNetwork;
use crate::producer::BlockProducer;

/// Drives one consensus node.
///
/// All state mutation funnels through this single loop — inbound packets,
/// producer callbacks and the timer never touch the engine concurrently,
/// which is the serialization the protocol requires. The loop multiplexes
/// three sources:
///
/// 1. **Inbound packets** — decoded and fed to the engine; junk is dropped.
/// 2. **Engine outputs** — dispatched to the network or the block producer.
/// 3. **Pacemaker deadline** — fires `on_timeout` when armed.
pub struct ConsensusDriver<P: BlockProducer> {
    node: ConsensusNode,
    producer: P,
    network: ChannelNetwork,
    inbound_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    output_rx: mpsc::UnboundedReceiver<EngineOutput>,
}

impl<P: BlockProducer> ConsensusDriver<P> {
    pub fn new(
        node: ConsensusNode,
        producer: P,
        network: ChannelNetwork,
        inbound_rx: mpsc::UnboundedReceiver<Vec<u8>>,
        output_rx: mpsc::UnboundedReceiver<EngineOutput>,
    ) -> Self {
        Self {
            node,
            producer,
            network,
            inbound_rx,
            output_rx,
        }
    }

    pub fn node(&self) -> &ConsensusNode {
        &self.node
    }

    pub fn node_mut(&mut self) -> &mut ConsensusNode {
        &mut self.node
    }

    /// Runs the event loop until every input channel closes.
    pub async fn run(&mut self) {
        loop {
            tokio::select! {
                packet = self.inbound_rx.recv() => {
                    match packet {
                        Some(bytes) => self.on_packet(&bytes),
                        None => break,
                    }
                }
                output = self.output_rx.recv() => {
                    match output {
                        Some(output) => self.on_output(output),
                        None => break,
                    }
                }
                _ = self.node.pacemaker().sleep() => {
                    // The sleep also wakes on an idle poll; only an armed
                    // deadline is a real timeout.
                    if self.node.pacemaker().is_armed() {
                        self.node.on_timeout();
                    }
                }
            }
        }
    }

    fn on_packet(&mut self, bytes: &[u8]) {
        match ConsensusMessage::decode(bytes) {
            Ok(message) => self.node.handle_message(message),
            Err(error) => {
                // Malformed traffic is dropped on the floor. Penalizing the
                // sending peer is a future hook.
                warn!(%error, len = bytes.len(), "dropping malformed consensus packet");
            }
        }
    }

    fn on_output(&mut self, output: EngineOutput) {
        match output {
            EngineOutput::Broadcast(message) => {
                self.network.broadcast(&message);
            }
            EngineOutput::CreateBlock(skeleton) => {
                let block = self.producer.assemble(skeleton);
                match self.node.new_proposal(block) {
                    // The proposer trusts its own build; endorse the signed
                    // block the engine now holds right away.
                    Ok(()) => {
                        if let Some(signed) = self.node.pending_proposal().cloned() {
                            if let Err(error) = self.node.agree_proposal(signed) {
                                debug!(%error, "self-endorsement skipped");
                            }
                        }
                    }
                    Err(error) => debug!(%error, "proposal skipped"),
                }
            }
            EngineOutput::VerifyBlock(block) => {
                if self.producer.validate(&block) {
                    if let Err(error) = self.node.agree_proposal(block) {
                        debug!(%error, "agreement skipped");
                    }
                } else {
                    warn!(block_hash = %block.hash(), "producer withheld endorsement");
                }
            }
            EngineOutput::MineBlock { block, signatures } => {
                let header = block.header.clone();
                // Each finalized block consumes its view count plus the one
                // interval it was produced in; the next height's deadlines
                // stay anchored to genesis through this running total.
                let (validators, total_view) = match self.node.tip() {
                    Some(tip) => (
                        tip.next_miners.addresses().to_vec(),
                        tip.total_view + self.node.cur_view() + 1,
                    ),
                    None => return,
                };
                self.producer.store(block, signatures);
                // Finalization drives the node to the next height. A richer
                // chain layer would also rotate the validator set here.
                self.node.update_tip(header, validators, total_view);
            }
            EngineOutput::SetValidators(addresses) => {
                self.network.set_validators(addresses);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::mesh;
    use crate::producer::QueueProducer;
    use crate::storage::MemoryHeaderStorage;
    use alloy_primitives::B256;
    use ember_chainspec::{genesis_header, ConsensusConfig};
    use ember_primitives::crypto::SecretKey;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    fn unix_now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    /// Four driver tasks on a channel mesh must finalize blocks unattended.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_four_nodes_finalize_blocks_end_to_end() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .try_init();

        let n = 4;
        let mut config = ConsensusConfig::dev_multi(n);
        // Tight interval so the run stays short in real time.
        config.block_interval_secs = 1;

        let genesis = genesis_header(unix_now());
        let (networks, receivers) = mesh(n);

        let mut producers = Vec::new();
        let mut tasks = Vec::new();
        for (i, (network, inbound_rx)) in networks.into_iter().zip(receivers).enumerate() {
            let key = SecretKey::from_bytes(&ConsensusConfig::deterministic_key_bytes(i))
                .expect("deterministic key should be valid");
            let (output_tx, output_rx) = mpsc::unbounded_channel();
            let mut node = ConsensusNode::new(config.clone(), key, output_tx);
            let storage = MemoryHeaderStorage::with_genesis(genesis.clone());
            node.init(&storage).expect("init should succeed");

            let producer = QueueProducer::new();
            producer.push_transaction(B256::repeat_byte(i as u8 + 1));
            producers.push(producer.clone());

            let mut driver = ConsensusDriver::new(node, producer, network, inbound_rx, output_rx);
            tasks.push(tokio::spawn(async move { driver.run().await }));
        }

        // Wait for at least one finalized block on every node.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
        loop {
            let all_mined = producers.iter().all(|p| !p.mined().is_empty());
            if all_mined {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "nodes should finalize a block within the deadline"
            );
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        // Everyone finalized the same block at height 1.
        let first_hashes: Vec<B256> = producers
            .iter()
            .map(|p| p.mined()[0].block.hash())
            .collect();
        assert!(
            first_hashes.windows(2).all(|w| w[0] == w[1]),
            "all nodes must finalize the identical block"
        );
        let first = producers[0].mined().remove(0);
        assert_eq!(first.block.header.height, 1);
        assert_eq!(first.signatures.len(), 3, "quorum is 3 of 4");

        for task in tasks {
            task.abort();
        }
    }
}
