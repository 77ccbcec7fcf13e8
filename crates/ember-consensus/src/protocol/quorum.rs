use alloy_primitives::{Address, B256};
use ember_chainspec::ConsensusConfig;
use ember_primitives::crypto::{PublicKey, Signature};
use std::collections::BTreeMap;

/// Quorum test shared by prepare votes and view-change votes: at least
/// `2f + 1` of `validator_count` members, with `f` taken from the
/// configuration (or derived from the count when unconfigured).
///
/// Monotone in `vote_count`; false for an empty set.
pub fn agree_rate_reached(
    config: &ConsensusConfig,
    validator_count: usize,
    vote_count: usize,
) -> bool {
    if validator_count == 0 {
        return false;
    }
    let f = config.fault_tolerance_for(validator_count);
    vote_count >= 2 * f + 1
}

/// A prepare vote held before the local node has endorsed a proposal.
#[derive(Clone, Debug)]
pub struct PendingVote {
    pub block_hash: B256,
    pub signer: PublicKey,
    pub signature: Signature,
}

/// Early prepare votes, keyed by voter address.
///
/// Votes can outrun the proposal they endorse; this buffer holds them until
/// the local node reaches the agree phase, at which point the ones matching
/// the endorsed hash are replayed into the live tally.
#[derive(Clone, Debug, Default)]
pub struct PreVoteBuffer {
    votes: BTreeMap<Address, PendingVote>,
}

impl PreVoteBuffer {
    /// Stores a vote. The first vote per address wins; repeats are ignored.
    pub fn insert(&mut self, voter: Address, vote: PendingVote) -> bool {
        if self.votes.contains_key(&voter) {
            return false;
        }
        self.votes.insert(voter, vote);
        true
    }

    pub fn len(&self) -> usize {
        self.votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }

    /// Removes and returns the buffered votes endorsing `block_hash`.
    pub fn drain_for(&mut self, block_hash: &B256) -> Vec<(Address, PendingVote)> {
        let votes = std::mem::take(&mut self.votes);
        let mut matched = Vec::new();
        for (addr, vote) in votes {
            if vote.block_hash == *block_hash {
                matched.push((addr, vote));
            }
        }
        matched
    }
}

/// Prepare votes collected during the agree phase, keyed by voter address.
/// Address ordering makes the exported signature list deterministic.
#[derive(Clone, Debug, Default)]
pub struct VoteTally {
    votes: BTreeMap<Address, (PublicKey, Signature)>,
}

impl VoteTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, voter: &Address) -> bool {
        self.votes.contains_key(voter)
    }

    /// Records a vote. Returns false for a repeat voter.
    pub fn insert(&mut self, voter: Address, signer: PublicKey, signature: Signature) -> bool {
        if self.votes.contains_key(&voter) {
            return false;
        }
        self.votes.insert(voter, (signer, signature));
        true
    }

    pub fn len(&self) -> usize {
        self.votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }

    /// The collected signatures in voter-address order.
    pub fn signatures(&self) -> Vec<(PublicKey, Signature)> {
        self.votes.values().cloned().collect()
    }
}

/// View-change votes: one proposed view per validator address.
///
/// A repeat vote for the same view is a no-op; a vote for a different view
/// overwrites. Counting is cumulative — a vote for view 3 also counts
/// toward views 1 and 2.
#[derive(Clone, Debug, Default)]
pub struct ChangeViewTally {
    proposals: BTreeMap<Address, u64>,
}

impl ChangeViewTally {
    /// Records a proposed view. Returns false when the exact entry already
    /// exists.
    pub fn record(&mut self, voter: Address, proposed_view: u64) -> bool {
        match self.proposals.get(&voter) {
            Some(&existing) if existing == proposed_view => false,
            _ => {
                self.proposals.insert(voter, proposed_view);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.proposals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proposals.is_empty()
    }

    pub fn clear(&mut self) {
        self.proposals.clear();
    }

    /// The highest proposed view backed by a quorum, counting every vote
    /// for that view or a higher one.
    pub fn quorate_view(&self, config: &ConsensusConfig, validator_count: usize) -> Option<u64> {
        let mut views: Vec<u64> = self.proposals.values().copied().collect();
        views.sort_unstable();
        views.dedup();
        for &view in views.iter().rev() {
            let count = self.proposals.values().filter(|&&v| v >= view).count();
            if agree_rate_reached(config, validator_count, count) {
                return Some(view);
            }
        }
        None
    }
}
