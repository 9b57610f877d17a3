//! Safety rules for HotStuff voting.
//!
//! Implements the `safeNode` predicate: a replica may vote for a proposal if
//! the block extends its locked block, or if the proposal's justification
//! comes from a higher view than the lock (the liveness clause).

use crate::block_store::BlockStore;
use hotstuff_types::{Block, Phase, QuorumCertificate, ViewNumber};
use tracing::debug;

/// Pure voting-safety predicates, evaluated against a replica's block store.
#[derive(Debug, Clone)]
pub struct SafetyRules {
    quorum_size: usize,
}

impl SafetyRules {
    pub fn new(quorum_size: usize) -> Self {
        Self { quorum_size }
    }

    /// `safeNode(block, justify, locked)`.
    ///
    /// True when there is no lock, when `block` extends the locked block, or
    /// when `justify` is from a higher view than the lock.
    pub fn is_safe_node(
        &self,
        block: &Block,
        justify: &QuorumCertificate,
        locked: Option<&QuorumCertificate>,
        store: &BlockStore,
    ) -> bool {
        let Some(locked) = locked else {
            return true;
        };

        if block.parent_hash == locked.block_hash || store.extends(block, locked.block_hash) {
            return true;
        }

        if justify.view > locked.view {
            return true;
        }

        debug!(
            block = %block.hash,
            justify_view = %justify.view,
            locked_view = %locked.view,
            "unsafe proposal: does not extend lock and justify view not higher"
        );
        false
    }

    /// Structural QC validation: enough distinct signers, the expected phase,
    /// and a view no newer than the message that carried it.
    ///
    /// Genesis QCs pass: they justify the first real proposal.
    pub fn validate_qc(
        &self,
        qc: &QuorumCertificate,
        expected_phase: Phase,
        max_view: ViewNumber,
    ) -> bool {
        if qc.is_genesis() {
            return true;
        }
        qc.phase == expected_phase && qc.view <= max_view && qc.is_valid(self.quorum_size)
    }
}
