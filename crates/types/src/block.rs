//! Block type for consensus.

use crate::{BlockHash, ReplicaId, ViewNumber};
use serde::{Deserialize, Serialize};

/// A block in the simulated chain.
///
/// Blocks are immutable once created and shared by value; the chain is
/// traversed by `parent_hash` lookup in a content-addressed store, never by
/// pointer chasing. The payload stands in for client commands — the simulator
/// models agreement on opaque payloads, not execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Content hash, derived from all other fields.
    pub hash: BlockHash,

    /// Hash of the parent block. [`BlockHash::ZERO`] for genesis.
    pub parent_hash: BlockHash,

    /// View in which this block was proposed.
    pub view: ViewNumber,

    /// Chain height: `parent.height + 1`, genesis is 0.
    pub height: u64,

    /// Replica that proposed this block.
    pub proposer: ReplicaId,

    /// Opaque client payload.
    pub payload: String,
}

impl Block {
    /// Create the genesis block (height 0, zero parent).
    pub fn genesis() -> Self {
        Self::from_parent_hash(
            BlockHash::ZERO,
            0,
            ViewNumber::GENESIS,
            ReplicaId(0),
            "genesis".to_string(),
        )
    }

    /// Create a new block extending `parent`.
    pub fn new(parent: &Block, view: ViewNumber, proposer: ReplicaId, payload: String) -> Self {
        Self::from_parent_hash(parent.hash, parent.height + 1, view, proposer, payload)
    }

    fn from_parent_hash(
        parent_hash: BlockHash,
        height: u64,
        view: ViewNumber,
        proposer: ReplicaId,
        payload: String,
    ) -> Self {
        let hash = Self::compute_hash(&parent_hash, height, view, proposer, &payload);
        Self {
            hash,
            parent_hash,
            view,
            height,
            proposer,
            payload,
        }
    }

    /// Deterministic content hash over all identifying fields.
    pub fn compute_hash(
        parent_hash: &BlockHash,
        height: u64,
        view: ViewNumber,
        proposer: ReplicaId,
        payload: &str,
    ) -> BlockHash {
        BlockHash::from_parts(&[
            parent_hash.as_bytes(),
            &height.to_le_bytes(),
            &view.0.to_le_bytes(),
            &proposer.0.to_le_bytes(),
            payload.as_bytes(),
        ])
    }

    /// Check if this is the genesis block.
    pub fn is_genesis(&self) -> bool {
        self.height == 0
    }

    /// Verify that the stored hash matches the block contents.
    pub fn hash_is_consistent(&self) -> bool {
        self.hash
            == Self::compute_hash(
                &self.parent_hash,
                self.height,
                self.view,
                self.proposer,
                &self.payload,
            )
    }
}
