//! Content-addressed block storage.
//!
//! Blocks reference their parent by hash only; the chain is traversed by
//! lookup. Each replica owns its own store, seeded with the shared genesis
//! block.

use hotstuff_types::{Block, BlockHash};
use std::collections::HashMap;

/// Per-replica block storage keyed by content hash.
#[derive(Debug, Clone)]
pub struct BlockStore {
    blocks: HashMap<BlockHash, Block>,
    genesis_hash: BlockHash,
}

impl BlockStore {
    /// Create a store holding only the genesis block.
    pub fn new() -> Self {
        let genesis = Block::genesis();
        let genesis_hash = genesis.hash;
        let mut blocks = HashMap::new();
        blocks.insert(genesis_hash, genesis);
        Self {
            blocks,
            genesis_hash,
        }
    }

    /// Hash of the genesis block.
    pub fn genesis_hash(&self) -> BlockHash {
        self.genesis_hash
    }

    /// Register a block. Content addressing makes re-insertion a no-op.
    pub fn insert(&mut self, block: Block) {
        self.blocks.entry(block.hash).or_insert(block);
    }

    /// Look up a block by hash.
    pub fn get(&self, hash: &BlockHash) -> Option<&Block> {
        self.blocks.get(hash)
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.blocks.contains_key(hash)
    }

    /// Check whether `block` extends from the block with hash `ancestor`,
    /// following parent links. A block does not extend itself.
    pub fn extends(&self, block: &Block, ancestor: BlockHash) -> bool {
        let mut current = block.parent_hash;
        loop {
            if current == ancestor {
                return true;
            }
            match self.blocks.get(&current) {
                Some(parent) if !parent.is_genesis() => current = parent.parent_hash,
                _ => return false,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl Default for BlockStore {
    fn default() -> Self {
        Self::new()
    }
}
