use alloy_primitives::Address;
use ember_primitives::consensus::ConsensusMessage;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::debug;

/// In-process validator mesh.
///
/// Every handle broadcasts encoded packets to every other node's inbound
/// queue; a node never hears its own broadcasts back. Messages cross the
/// mesh as wire bytes so the full encode/decode path is exercised even
/// without a real transport.
#[derive(Clone, Debug)]
pub struct ChannelNetwork {
    local_index: usize,
    peers: Vec<mpsc::UnboundedSender<Vec<u8>>>,
    validators: Arc<RwLock<Vec<Address>>>,
}

impl ChannelNetwork {
    /// Broadcasts a consensus message to every other node on the mesh.
    pub fn broadcast(&self, message: &ConsensusMessage) {
        let bytes = message.encode();
        for (index, peer) in self.peers.iter().enumerate() {
            if index == self.local_index {
                continue;
            }
            if peer.send(bytes.clone()).is_err() {
                debug!(peer = index, "peer inbound queue closed");
            }
        }
    }

    /// Records the active validator set for this node's view of the mesh.
    pub fn set_validators(&self, addresses: Vec<Address>) {
        *self.validators.write().expect("validator lock poisoned") = addresses;
    }

    pub fn validators(&self) -> Vec<Address> {
        self.validators
            .read()
            .expect("validator lock poisoned")
            .clone()
    }
}

/// Builds an `n`-node mesh: one network handle and one inbound packet queue
/// per node.
pub fn mesh(n: usize) -> (Vec<ChannelNetwork>, Vec<mpsc::UnboundedReceiver<Vec<u8>>>) {
    let mut senders = Vec::with_capacity(n);
    let mut receivers = Vec::with_capacity(n);
    for _ in 0..n {
        let (tx, rx) = mpsc::unbounded_channel();
        senders.push(tx);
        receivers.push(rx);
    }

    let handles = (0..n)
        .map(|local_index| ChannelNetwork {
            local_index,
            peers: senders.clone(),
            validators: Arc::new(RwLock::new(Vec::new())),
        })
        .collect();

    (handles, receivers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;
    use ember_primitives::consensus::{ChangeView, PrepareResponse};
    use ember_primitives::crypto::SecretKey;

    fn test_message() -> ConsensusMessage {
        let key = SecretKey::from_bytes(&{
            let mut b = [0u8; 32];
            b[31] = 1;
            b
        })
        .unwrap();
        let hash = B256::repeat_byte(0x31);
        ConsensusMessage::PrepareResponse(PrepareResponse {
            block_hash: hash,
            signer: key.public_key(),
            signature: key.sign(&hash),
        })
    }

    #[tokio::test]
    async fn test_broadcast_reaches_everyone_but_sender() {
        let (handles, mut receivers) = mesh(3);
        handles[0].broadcast(&test_message());

        assert!(receivers[0].try_recv().is_err(), "no self-delivery");
        for rx in receivers.iter_mut().skip(1) {
            let bytes = rx.try_recv().expect("peers receive the broadcast");
            assert!(ConsensusMessage::decode(&bytes).is_ok());
        }
    }

    #[tokio::test]
    async fn test_messages_cross_as_wire_bytes() {
        let (handles, mut receivers) = mesh(2);
        let key = SecretKey::random();
        let digest = B256::repeat_byte(0x32);
        handles[1].broadcast(&ConsensusMessage::ChangeView(ChangeView {
            new_view: 3,
            signer: key.public_key(),
            signature: key.sign(&digest),
        }));

        let bytes = receivers[0].try_recv().unwrap();
        match ConsensusMessage::decode(&bytes).unwrap() {
            ConsensusMessage::ChangeView(cv) => assert_eq!(cv.new_view, 3),
            other => panic!("expected ChangeView, got {:?}", other),
        }
    }

    #[test]
    fn test_validator_set_shared_per_handle() {
        let (handles, _receivers) = mesh(2);
        let addrs = vec![Address::with_last_byte(1), Address::with_last_byte(2)];
        handles[0].set_validators(addrs.clone());
        assert_eq!(handles[0].validators(), addrs);
        assert!(handles[1].validators().is_empty(), "each node tracks its own view");
    }
}
