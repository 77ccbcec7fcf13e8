use alloy_primitives::{Address, B256};
use ember_chainspec::ConsensusConfig;
use ember_primitives::block::{Block, BlockHeader};
use ember_primitives::consensus::{
    change_view_digest, ChangeView, ConsensusMessage, PrepareRequest, PrepareResponse,
};
use ember_primitives::crypto::{PublicKey, SecretKey, Signature};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{ConsensusError, ConsensusResult};
use crate::storage::HeaderStorage;
use crate::validator::{due_next_miner, ValidatorSet};

use super::context::{ConsensusState, Context};
use super::pacemaker::{deadline_unix, Pacemaker};
use super::quorum::{agree_rate_reached, ChangeViewTally, PendingVote, PreVoteBuffer, VoteTally};

/// Upper bound on the catch-up loop in `reschedule`. The deadline arithmetic
/// terminates on its own; the cap guards against pathological clock skew.
const MAX_CATCHUP_VIEWS: u32 = 64;

/// Actions the consensus node requests from the outer driver.
///
/// The node never performs I/O itself: block production, verification,
/// persistence and the network all sit behind this channel.
#[derive(Debug)]
pub enum EngineOutput {
    /// Broadcast a consensus message to the validator mesh.
    Broadcast(ConsensusMessage),
    /// This node is due: the block producer should assemble a full block on
    /// this unsigned skeleton and hand it back via `new_proposal`.
    CreateBlock(BlockHeader),
    /// A remote proposal passed protocol checks: the producer should verify
    /// its state transition and hand it back via `agree_proposal`.
    VerifyBlock(Block),
    /// Vote quorum reached: produce and persist the finalized multi-signed
    /// block.
    MineBlock {
        block: Block,
        signatures: Vec<(PublicKey, Signature)>,
    },
    /// The validator set changed along with the tip.
    SetValidators(Vec<Address>),
}

/// The locally accepted chain head and the scheduling inputs derived from
/// it. Replaced wholesale on every tip update, never merged.
#[derive(Clone, Debug)]
pub struct Tip {
    pub header: BlockHeader,
    pub hash: B256,
    /// Validators eligible to produce the next block, in rotation order.
    pub next_miners: ValidatorSet,
    /// Cumulative view changes since genesis, the base of the timeout math.
    pub total_view: u64,
}

/// The dBFT block-agreement engine.
///
/// An event-driven state machine: wire messages, producer callbacks, tip
/// updates and timer expirations come in through methods; everything the
/// node wants done goes out through the `EngineOutput` channel. The engine
/// does not run its own event loop — the outer driver serializes all calls,
/// which is what keeps the state single-owner.
///
/// ## Round flow
///
/// 1. A new tip resets the round; `reschedule` picks this node's role for
///    view 0 (create when due, wait for a proposal otherwise).
/// 2. The due leader's timer fires → `CreateBlock` → `new_proposal` →
///    prepare request broadcast.
/// 3. Followers validate the proposal → `VerifyBlock` → `agree_proposal` →
///    prepare response broadcast.
/// 4. Prepare votes accumulate; at quorum every node emits `MineBlock`.
/// 5. A missed slot instead produces change-view votes; a quorum of those
///    rotates the view and restarts the cycle under the next leader.
pub struct ConsensusNode {
    config: ConsensusConfig,
    secret_key: SecretKey,
    public_key: PublicKey,
    address: Address,
    /// Genesis timestamp anchoring all deadline arithmetic. Set by `init`.
    genesis_time: Option<u64>,
    tip: Option<Tip>,
    context: Context,
    change_views: ChangeViewTally,
    pacemaker: Pacemaker,
    output_tx: mpsc::UnboundedSender<EngineOutput>,
}

impl ConsensusNode {
    pub fn new(
        config: ConsensusConfig,
        secret_key: SecretKey,
        output_tx: mpsc::UnboundedSender<EngineOutput>,
    ) -> Self {
        let public_key = secret_key.public_key();
        let address = public_key.address();
        Self {
            config,
            secret_key,
            public_key,
            address,
            genesis_time: None,
            tip: None,
            context: Context::Idle { cur_view: 0 },
            change_views: ChangeViewTally::default(),
            pacemaker: Pacemaker::new(),
            output_tx,
        }
    }

    // ── Accessors ──

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn state(&self) -> ConsensusState {
        self.context.state()
    }

    pub fn cur_view(&self) -> u64 {
        self.context.cur_view()
    }

    pub fn tip(&self) -> Option<&Tip> {
        self.tip.as_ref()
    }

    pub fn pacemaker(&self) -> &Pacemaker {
        &self.pacemaker
    }

    /// Number of distinct validators currently voting to change the view.
    pub fn change_view_votes(&self) -> usize {
        self.change_views.len()
    }

    /// The locally proposed block awaiting this node's own verification
    /// verdict. `Some` only between `new_proposal` / an accepted remote
    /// proposal and the matching `agree_proposal`.
    pub fn pending_proposal(&self) -> Option<&Block> {
        match &self.context {
            Context::WaitingVerify { block, .. } => Some(block),
            _ => None,
        }
    }

    fn emit(&self, output: EngineOutput) {
        if self.output_tx.send(output).is_err() {
            debug!("engine output dropped, receiver closed");
        }
    }

    // ── Lifecycle ──

    /// Loads the genesis header and seeds the initial tip from it. No
    /// network I/O happens here. A missing genesis is fatal.
    pub fn init(&mut self, storage: &dyn HeaderStorage) -> ConsensusResult<()> {
        let genesis = storage
            .header_by_height(0)
            .map_err(|e| ConsensusError::Initialization(e.to_string()))?
            .ok_or_else(|| {
                ConsensusError::Initialization("genesis header not found".to_string())
            })?;

        let genesis_time = genesis.timestamp;
        let hash = genesis.hash();
        let validators = self.config.validator_addresses();

        self.genesis_time = Some(genesis_time);
        self.tip = Some(Tip {
            header: genesis,
            hash,
            next_miners: ValidatorSet::new(validators.clone()),
            total_view: 0,
        });
        info!(%hash, genesis_time, validators = validators.len(), "genesis loaded");
        self.emit(EngineOutput::SetValidators(validators));
        self.reschedule();
        Ok(())
    }

    /// Adopts a newly finalized header as the chain head.
    ///
    /// This is the single entry point by which external block finalization
    /// moves the node forward in height. A duplicate notification for the
    /// current tip is a no-op; anything else is a hard reset: fresh idle
    /// context at view 0, cleared change-view tally, cancelled timer.
    pub fn update_tip(&mut self, header: BlockHeader, next_miners: Vec<Address>, total_view: u64) {
        let hash = header.hash();
        if self.tip.as_ref().is_some_and(|tip| tip.hash == hash) {
            debug!(%hash, "tip unchanged, ignoring duplicate notification");
            return;
        }

        let height = header.height;
        self.tip = Some(Tip {
            header,
            hash,
            next_miners: ValidatorSet::new(next_miners.clone()),
            total_view,
        });
        self.context = Context::Idle { cur_view: 0 };
        self.change_views.clear();
        self.pacemaker.cancel();
        self.emit(EngineOutput::SetValidators(next_miners));
        info!(height, %hash, total_view, "tip updated");
        self.reschedule();
    }

    // ── Scheduling ──

    /// Recomputes the single outstanding deadline.
    ///
    /// Walks forward one view at a time until the deadline lands in the
    /// future, entering the round for each view on the way (create when
    /// due, wait otherwise). Returns the armed delay, or `None` when the
    /// node has no tip, no genesis time, or is not a validator.
    pub fn reschedule(&mut self) -> Option<Duration> {
        self.pacemaker.cancel();
        let genesis_time = self.genesis_time?;
        let (tip_height, total_view, validators) = match &self.tip {
            Some(tip) => (tip.header.height, tip.total_view, tip.next_miners.clone()),
            None => return None,
        };
        if !validators.contains(&self.address) {
            debug!(address = %self.address, "not in the validator set, no deadline armed");
            return None;
        }

        let now = unix_now();
        for _ in 0..MAX_CATCHUP_VIEWS {
            let cur_view = self.context.cur_view();
            let due = due_next_miner(tip_height + 1, cur_view, &validators)?;
            let is_due = due == self.address;

            if matches!(
                self.context.state(),
                ConsensusState::Idle | ConsensusState::ChangeViewDone
            ) {
                self.context = if is_due {
                    Context::WaitingCreate { cur_view }
                } else {
                    Context::WaitingProposal {
                        cur_view,
                        pre_votes: PreVoteBuffer::default(),
                    }
                };
                debug!(view = cur_view, due = %due, is_due, "entered round");
            }

            let leading = is_due && self.context.state() == ConsensusState::WaitingCreate;
            let deadline = deadline_unix(
                genesis_time,
                total_view,
                cur_view,
                leading,
                self.config.block_interval_secs,
            );
            if deadline > now {
                let delay = Duration::from_secs(deadline - now);
                self.pacemaker.schedule(delay);
                debug!(view = cur_view, delay_secs = delay.as_secs(), "deadline armed");
                return Some(delay);
            }

            // That window has already closed; the view is lost.
            self.context = Context::Idle {
                cur_view: cur_view + 1,
            };
        }

        warn!("catch-up exhausted without finding a future deadline");
        None
    }

    /// Fires the armed deadline: open the proposal window when this node is
    /// the due leader, vote to rotate the view otherwise.
    pub fn on_timeout(&mut self) {
        self.pacemaker.cancel();
        let (tip_hash, tip_height) = match &self.tip {
            Some(tip) => (tip.hash, tip.header.height),
            None => return,
        };
        let cur_view = self.context.cur_view();

        match self.context.state() {
            ConsensusState::WaitingCreate => {
                let skeleton = BlockHeader::new(tip_height + 1, tip_hash, unix_now(), cur_view);
                info!(
                    height = skeleton.height,
                    view = cur_view,
                    "proposal window open, requesting a block"
                );
                self.context = Context::WaitingProposal {
                    cur_view,
                    pre_votes: PreVoteBuffer::default(),
                };
                self.emit(EngineOutput::CreateBlock(skeleton));
            }
            _ => {
                // The slot was missed. Vote to hand the next view to the
                // next leader; repeated misses push the target further out.
                let expect_view = match &self.context {
                    Context::ChangeViewSent { expect_view, .. } => expect_view + 1,
                    _ => cur_view + 1,
                };
                let digest = change_view_digest(&tip_hash, expect_view);
                let signature = self.secret_key.sign(&digest);
                warn!(view = cur_view, expect_view, "view timed out, voting to rotate");
                self.context = Context::ChangeViewSent {
                    cur_view,
                    expect_view,
                };
                self.emit(EngineOutput::Broadcast(ConsensusMessage::ChangeView(
                    ChangeView {
                        new_view: expect_view,
                        signer: self.public_key.clone(),
                        signature,
                    },
                )));
                // Our own vote counts toward quorum through the same path
                // remote votes take.
                self.record_change_view(self.address, expect_view);
            }
        }

        self.reschedule();
    }

    // ── Proposal path ──

    /// Accepts the block the producer assembled for our `CreateBlock`
    /// request, signs it and broadcasts the prepare request.
    pub fn new_proposal(&mut self, mut block: Block) -> ConsensusResult<()> {
        if self.context.state() != ConsensusState::WaitingProposal {
            return Err(ConsensusError::skipped("no proposal window open"));
        }
        let tip_hash = match &self.tip {
            Some(tip) => tip.hash,
            None => return Err(ConsensusError::skipped("no tip")),
        };
        if block.header.prev_hash != tip_hash {
            return Err(ConsensusError::skipped("proposal does not extend the tip"));
        }

        let cur_view = self.context.cur_view();
        block.finalize();
        block.header.sign(&self.secret_key)?;
        let block_hash = block.hash();

        info!(
            height = block.header.height,
            view = cur_view,
            %block_hash,
            "broadcasting proposal"
        );
        self.emit(EngineOutput::Broadcast(ConsensusMessage::PrepareRequest(
            PrepareRequest {
                block: block.clone(),
            },
        )));
        self.context = Context::WaitingVerify {
            cur_view,
            block,
            block_hash,
            pre_votes: PreVoteBuffer::default(),
        };
        Ok(())
    }

    /// Accepts the producer's verdict that a proposal's state transition is
    /// sound: endorse it, broadcast our vote, and start tallying.
    pub fn agree_proposal(&mut self, block: Block) -> ConsensusResult<()> {
        if self.context.state() != ConsensusState::WaitingVerify {
            return Err(ConsensusError::skipped("no proposal awaiting agreement"));
        }
        let tip_hash = match &self.tip {
            Some(tip) => tip.hash,
            None => return Err(ConsensusError::skipped("no tip")),
        };
        if block.header.prev_hash != tip_hash {
            return Err(ConsensusError::skipped("block does not extend the tip"));
        }

        let block_hash = block.hash();
        let cur_view = self.context.cur_view();
        let mut pre_votes =
            match std::mem::replace(&mut self.context, Context::Idle { cur_view }) {
                Context::WaitingVerify { pre_votes, .. } => pre_votes,
                other => {
                    self.context = other;
                    return Err(ConsensusError::skipped("no proposal awaiting agreement"));
                }
            };

        let signature = self.secret_key.sign(&block_hash);
        info!(view = cur_view, %block_hash, "endorsing proposal");
        self.emit(EngineOutput::Broadcast(ConsensusMessage::PrepareResponse(
            PrepareResponse {
                block_hash,
                signer: self.public_key.clone(),
                signature,
            },
        )));
        self.context = Context::WaitingAgree {
            cur_view,
            block,
            block_hash,
            votes: VoteTally::new(),
        };

        // Votes that outran the proposal are counted now, one by one
        // through the same path remote votes take, so quorum fires at
        // exactly the threshold. No re-delivery needed.
        let replay = pre_votes.drain_for(&block_hash);
        if !replay.is_empty() {
            debug!(replayed = replay.len(), %block_hash, "early votes replayed into the tally");
        }
        for (voter, vote) in replay {
            self.record_vote(voter, vote.signer, vote.signature, vote.block_hash);
        }
        self.record_vote(self.address, self.public_key.clone(), signature, block_hash);
        Ok(())
    }

    // ── Message handling ──

    /// Feeds a decoded wire message into the state machine. Failures here
    /// are strictly local: bad messages are logged and dropped, and
    /// liveness recovery is left to the timeout machinery.
    pub fn handle_message(&mut self, message: ConsensusMessage) {
        match message {
            ConsensusMessage::PrepareRequest(req) => self.on_prepare_request(req),
            ConsensusMessage::PrepareResponse(resp) => self.on_prepare_response(resp),
            ConsensusMessage::ChangeView(cv) => self.on_change_view(cv),
        }
    }

    fn on_prepare_request(&mut self, req: PrepareRequest) {
        if self.context.state() != ConsensusState::WaitingProposal {
            debug!(state = ?self.context.state(), "proposal ignored in current phase");
            return;
        }
        let Some(tip) = &self.tip else { return };
        let block = req.block;

        if let Err(error) = block.header.verify_sign() {
            warn!(%error, "proposal signature rejected");
            return;
        }
        if let Err(error) = block.verify_content() {
            warn!(%error, "proposal content rejected");
            return;
        }
        if block.header.prev_hash != tip.hash {
            debug!(
                prev_hash = %block.header.prev_hash,
                tip = %tip.hash,
                "proposal does not extend the local tip"
            );
            return;
        }
        let cur_view = self.context.cur_view();
        if block.header.view != cur_view {
            debug!(block_view = block.header.view, cur_view, "proposal view diverged");
            return;
        }
        let due = due_next_miner(tip.header.height + 1, cur_view, &tip.next_miners);
        if block.header.miner() != due {
            warn!(miner = ?block.header.miner(), due = ?due, "proposal from a non-due miner rejected");
            return;
        }

        let block_hash = block.hash();
        let pre_votes = match std::mem::replace(&mut self.context, Context::Idle { cur_view }) {
            Context::WaitingProposal { pre_votes, .. } => pre_votes,
            other => {
                self.context = other;
                return;
            }
        };

        info!(
            %block_hash,
            view = cur_view,
            height = block.header.height,
            "proposal accepted, handing off for verification"
        );
        self.context = Context::WaitingVerify {
            cur_view,
            block: block.clone(),
            block_hash,
            pre_votes,
        };
        self.emit(EngineOutput::VerifyBlock(block));
    }

    fn on_prepare_response(&mut self, resp: PrepareResponse) {
        let Some(tip) = &self.tip else {
            debug!("vote before any tip, ignoring");
            return;
        };
        let voter = resp.signer.address();
        if voter == self.address {
            debug!("vote carrying our own address ignored");
            return;
        }
        if let Err(error) = resp.signer.verify(&resp.block_hash, &resp.signature) {
            warn!(voter = %voter, %error, "vote signature rejected");
            return;
        }
        if !tip.next_miners.contains(&voter) {
            warn!(voter = %voter, "vote from outside the validator set rejected");
            return;
        }

        let block_hash = resp.block_hash;
        match self.context.state() {
            ConsensusState::WaitingProposal | ConsensusState::WaitingVerify => {
                // The vote outran the proposal; hold it for replay.
                let vote = PendingVote {
                    block_hash,
                    signer: resp.signer,
                    signature: resp.signature,
                };
                if let Context::WaitingProposal { pre_votes, .. }
                | Context::WaitingVerify { pre_votes, .. } = &mut self.context
                {
                    if pre_votes.insert(voter, vote) {
                        debug!(voter = %voter, %block_hash, "early vote buffered");
                    } else {
                        debug!(voter = %voter, "repeat early vote ignored");
                    }
                }
            }
            ConsensusState::WaitingAgree => {
                self.record_vote(voter, resp.signer, resp.signature, block_hash);
            }
            state => {
                debug!(?state, voter = %voter, "vote ignored in current phase");
            }
        }
    }

    fn on_change_view(&mut self, cv: ChangeView) {
        let Some(tip) = &self.tip else {
            debug!("change-view before any tip, ignoring");
            return;
        };
        let digest = change_view_digest(&tip.hash, cv.new_view);
        if let Err(error) = cv.signer.verify(&digest, &cv.signature) {
            warn!(%error, new_view = cv.new_view, "change-view signature rejected");
            return;
        }
        let voter = cv.signer.address();
        if !tip.next_miners.contains(&voter) {
            warn!(voter = %voter, "change-view from outside the validator set rejected");
            return;
        }
        self.record_change_view(voter, cv.new_view);
    }

    // ── Tally paths shared by local and remote votes ──

    /// Adds a prepare vote to the agree-phase tally and fires the quorum
    /// check. Signature and membership are the caller's responsibility.
    fn record_vote(
        &mut self,
        voter: Address,
        signer: PublicKey,
        signature: Signature,
        block_hash: B256,
    ) {
        let validator_count = match &self.tip {
            Some(tip) => tip.next_miners.len(),
            None => return,
        };

        let context = std::mem::replace(&mut self.context, Context::Idle { cur_view: 0 });
        match context {
            Context::WaitingAgree {
                cur_view,
                block,
                block_hash: expected,
                mut votes,
            } => {
                if expected != block_hash {
                    debug!(voter = %voter, got = %block_hash, want = %expected, "vote for a different block ignored");
                    self.context = Context::WaitingAgree {
                        cur_view,
                        block,
                        block_hash: expected,
                        votes,
                    };
                    return;
                }
                if !votes.insert(voter, signer, signature) {
                    debug!(voter = %voter, "duplicate vote ignored");
                    self.context = Context::WaitingAgree {
                        cur_view,
                        block,
                        block_hash: expected,
                        votes,
                    };
                    return;
                }
                debug!(voter = %voter, count = votes.len(), "vote recorded");

                if agree_rate_reached(&self.config, validator_count, votes.len()) {
                    info!(
                        view = cur_view,
                        block_hash = %expected,
                        votes = votes.len(),
                        "vote quorum reached"
                    );
                    let signatures = votes.signatures();
                    let mined = block.clone();
                    self.context = Context::WaitingBlock {
                        cur_view,
                        block,
                        block_hash: expected,
                        votes,
                    };
                    self.emit(EngineOutput::MineBlock {
                        block: mined,
                        signatures,
                    });
                } else {
                    self.context = Context::WaitingAgree {
                        cur_view,
                        block,
                        block_hash: expected,
                        votes,
                    };
                }
            }
            other => {
                debug!(state = ?other.state(), voter = %voter, "vote outside the agree phase ignored");
                self.context = other;
            }
        }
    }

    /// Records a change-view vote and rotates the view once a quorum backs
    /// one. Used for both remote votes and this node's own.
    fn record_change_view(&mut self, voter: Address, proposed_view: u64) {
        if !self.change_views.record(voter, proposed_view) {
            debug!(voter = %voter, proposed_view, "repeat change-view ignored");
            return;
        }
        debug!(
            voter = %voter,
            proposed_view,
            tally = self.change_views.len(),
            "change-view recorded"
        );

        let validator_count = match &self.tip {
            Some(tip) => tip.next_miners.len(),
            None => return,
        };
        if let Some(new_view) = self.change_views.quorate_view(&self.config, validator_count) {
            info!(new_view, "change-view quorum reached, rotating view");
            self.change_views.clear();
            self.context = Context::ChangeViewDone { cur_view: new_view };
            // Restart the scheduler now so the next leader cycle begins
            // immediately instead of waiting for the stale deadline.
            self.reschedule();
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
