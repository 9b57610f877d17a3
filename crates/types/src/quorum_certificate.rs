//! Quorum certificate for BFT consensus.

use crate::{BlockHash, Phase, ReplicaId, ViewNumber};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A quorum certificate proving that `quorum` replicas voted for a block in a
/// given phase and view.
///
/// Certificates are structural: the signer set is an ordered set of replica
/// ids, so two QCs built from the same votes in any order compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumCertificate {
    /// Phase of the votes this QC aggregates.
    pub phase: Phase,

    /// View in which the votes were cast.
    pub view: ViewNumber,

    /// Hash of the block this QC certifies.
    pub block_hash: BlockHash,

    /// Replicas whose votes formed this QC.
    pub signers: BTreeSet<ReplicaId>,
}

impl QuorumCertificate {
    /// Create the genesis QC (certifies the genesis block, no signers).
    ///
    /// Used as the justification of the first real proposal, before any QC
    /// has formed. Exempt from signer-count validation.
    pub fn genesis(genesis_hash: BlockHash) -> Self {
        Self {
            phase: Phase::Prepare,
            view: ViewNumber::GENESIS,
            block_hash: genesis_hash,
            signers: BTreeSet::new(),
        }
    }

    /// Check if this is a genesis QC.
    pub fn is_genesis(&self) -> bool {
        self.view == ViewNumber::GENESIS && self.signers.is_empty()
    }

    /// Get the number of distinct signers.
    pub fn signer_count(&self) -> usize {
        self.signers.len()
    }

    /// Check that this QC carries enough distinct signers.
    ///
    /// Genesis QCs are structurally valid despite having no signers.
    pub fn is_valid(&self, quorum_size: usize) -> bool {
        self.is_genesis() || self.signer_count() >= quorum_size
    }
}
