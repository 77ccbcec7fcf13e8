use alloy_primitives::B256;
use ember_primitives::block::Block;

use super::quorum::{PreVoteBuffer, VoteTally};

/// The node's position within the agreement cycle for the current height.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsensusState {
    /// No round in progress.
    Idle,
    /// This node is due and is waiting for its proposal window.
    WaitingCreate,
    /// Waiting for the due leader's proposal.
    WaitingProposal,
    /// A proposal is with the block producer for state-transition checks.
    WaitingVerify,
    /// Proposal endorsed locally; collecting prepare votes.
    WaitingAgree,
    /// Vote quorum reached; the finalized block is being produced.
    WaitingBlock,
    /// This node has voted to abandon the current view.
    ChangeViewSent,
    /// A view change just succeeded; the next round starts immediately.
    ChangeViewDone,
}

/// Per-round context, one variant per state.
///
/// Each variant carries exactly the fields meaningful in that state, so a
/// field cannot be read across a transition without rebuilding the context.
/// Contexts are replaced wholesale on every transition, never patched.
#[derive(Clone, Debug)]
pub enum Context {
    Idle {
        cur_view: u64,
    },
    WaitingCreate {
        cur_view: u64,
    },
    WaitingProposal {
        cur_view: u64,
        /// Votes that arrived before the proposal did.
        pre_votes: PreVoteBuffer,
    },
    WaitingVerify {
        cur_view: u64,
        block: Block,
        block_hash: B256,
        pre_votes: PreVoteBuffer,
    },
    WaitingAgree {
        cur_view: u64,
        block: Block,
        block_hash: B256,
        votes: VoteTally,
    },
    WaitingBlock {
        cur_view: u64,
        block: Block,
        block_hash: B256,
        votes: VoteTally,
    },
    ChangeViewSent {
        cur_view: u64,
        /// The view this node has voted to move to.
        expect_view: u64,
    },
    ChangeViewDone {
        cur_view: u64,
    },
}

impl Context {
    pub fn state(&self) -> ConsensusState {
        match self {
            Self::Idle { .. } => ConsensusState::Idle,
            Self::WaitingCreate { .. } => ConsensusState::WaitingCreate,
            Self::WaitingProposal { .. } => ConsensusState::WaitingProposal,
            Self::WaitingVerify { .. } => ConsensusState::WaitingVerify,
            Self::WaitingAgree { .. } => ConsensusState::WaitingAgree,
            Self::WaitingBlock { .. } => ConsensusState::WaitingBlock,
            Self::ChangeViewSent { .. } => ConsensusState::ChangeViewSent,
            Self::ChangeViewDone { .. } => ConsensusState::ChangeViewDone,
        }
    }

    pub fn cur_view(&self) -> u64 {
        match self {
            Self::Idle { cur_view }
            | Self::WaitingCreate { cur_view }
            | Self::WaitingProposal { cur_view, .. }
            | Self::WaitingVerify { cur_view, .. }
            | Self::WaitingAgree { cur_view, .. }
            | Self::WaitingBlock { cur_view, .. }
            | Self::ChangeViewSent { cur_view, .. }
            | Self::ChangeViewDone { cur_view } => *cur_view,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_tags_match_variants() {
        assert_eq!(Context::Idle { cur_view: 0 }.state(), ConsensusState::Idle);
        assert_eq!(
            Context::WaitingCreate { cur_view: 1 }.state(),
            ConsensusState::WaitingCreate
        );
        assert_eq!(
            Context::WaitingProposal {
                cur_view: 2,
                pre_votes: PreVoteBuffer::default()
            }
            .state(),
            ConsensusState::WaitingProposal
        );
        assert_eq!(
            Context::ChangeViewSent {
                cur_view: 3,
                expect_view: 4
            }
            .state(),
            ConsensusState::ChangeViewSent
        );
        assert_eq!(
            Context::ChangeViewDone { cur_view: 5 }.state(),
            ConsensusState::ChangeViewDone
        );
    }

    #[test]
    fn test_cur_view_present_in_every_variant() {
        assert_eq!(Context::Idle { cur_view: 7 }.cur_view(), 7);
        assert_eq!(
            Context::ChangeViewSent {
                cur_view: 2,
                expect_view: 3
            }
            .cur_view(),
            2
        );
        assert_eq!(
            Context::WaitingProposal {
                cur_view: 9,
                pre_votes: PreVoteBuffer::default()
            }
            .cur_view(),
            9
        );
    }
}
