//! Vote collection and QC formation.
//!
//! Votes are collected per `(phase, view, block_hash)` key. When the number
//! of distinct voters reaches the quorum threshold, a QC is formed and the
//! key is retired — later votes for it are ignored.

use hotstuff_types::{BlockHash, Phase, QuorumCertificate, ReplicaId, ViewNumber};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

type VoteKey = (Phase, ViewNumber, BlockHash);

/// Per-replica vote aggregator, consulted only while that replica leads.
#[derive(Debug, Clone)]
pub struct VoteCollector {
    quorum_size: usize,
    votes: HashMap<VoteKey, BTreeSet<ReplicaId>>,
    formed: HashSet<VoteKey>,
}

impl VoteCollector {
    pub fn new(quorum_size: usize) -> Self {
        Self {
            quorum_size,
            votes: HashMap::new(),
            formed: HashSet::new(),
        }
    }

    pub fn quorum_size(&self) -> usize {
        self.quorum_size
    }

    /// Add a vote; returns the QC if quorum was newly reached.
    ///
    /// Duplicate voters and votes for already-certified keys are ignored.
    pub fn add_vote(
        &mut self,
        phase: Phase,
        view: ViewNumber,
        block_hash: BlockHash,
        voter: ReplicaId,
    ) -> Option<QuorumCertificate> {
        let key = (phase, view, block_hash);

        if self.formed.contains(&key) {
            return None;
        }

        let voters = self.votes.entry(key).or_default();
        if !voters.insert(voter) {
            debug!(%voter, phase = %phase, %view, "duplicate vote ignored");
            return None;
        }

        if voters.len() >= self.quorum_size {
            let signers = std::mem::take(voters);
            self.votes.remove(&key);
            self.formed.insert(key);
            return Some(QuorumCertificate {
                phase,
                view,
                block_hash,
                signers,
            });
        }

        None
    }

    /// Current vote count for a key.
    pub fn vote_count(&self, phase: Phase, view: ViewNumber, block_hash: BlockHash) -> usize {
        self.votes
            .get(&(phase, view, block_hash))
            .map_or(0, BTreeSet::len)
    }

    /// Drop all vote state for views below `view`. Called on view advance.
    pub fn clear_below(&mut self, view: ViewNumber) {
        self.votes.retain(|(_, v, _), _| *v >= view);
        self.formed.retain(|(_, v, _)| *v >= view);
    }
}
