// Merkle - incremental message trees and inclusion proofs for channel inboxes/outboxes
use super::primitives::{Hash, EMPTY_HASH};
use rs_merkle::{Hasher, MerkleTree};
use serde::{Deserialize, Serialize};

/// Blake3-based hasher for Merkle trees (consistent with the rest of the engine)
#[derive(Clone)]
pub struct Blake3Hasher;

impl Hasher for Blake3Hasher {
    type Hash = [u8; 32];

    fn hash(data: &[u8]) -> Self::Hash {
        blake3::hash(data).into()
    }
}

/// Hash of a message leaf
pub fn leaf_hash(data: &[u8]) -> Hash {
    Hash::hash(data)
}

/// Hash of an inner node from its two children
pub fn branch_hash(left: &Hash, right: &Hash) -> Hash {
    let mut combined = Vec::with_capacity(64);
    combined.extend_from_slice(left.as_bytes());
    combined.extend_from_slice(right.as_bytes());
    Hash::hash(&combined)
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MerkleError {
    #[error("leaf index {index} is outside a tree of size {size}")]
    IndexOutOfRange { index: u64, size: u64 },

    #[error("proof is missing sibling hashes")]
    MissingSibling,

    #[error("proof carries unused sibling hashes")]
    UnusedSibling,

    #[error("no leaves supplied for root recomputation")]
    NoLeaves,
}

/// Append-only Merkle tree state kept per channel direction.
///
/// Only the subtree roots of the binary decomposition of `size` are stored
/// (`append_path`, lowest subtree last), so appending is O(log n) and the
/// full leaf set never has to be materialized. The implied root is identical
/// to building an `rs_merkle` tree over the same leaves: inner nodes hash
/// `left || right` and an odd node is promoted to the next layer unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncrementalTree {
    pub root: Hash,
    pub append_path: Vec<Hash>,
    pub size: u64,
}

impl IncrementalTree {
    pub fn empty() -> Self {
        Self {
            root: EMPTY_HASH,
            append_path: Vec::new(),
            size: 0,
        }
    }

    /// Append one serialized message
    pub fn append(&mut self, data: &[u8]) {
        self.append_hash(leaf_hash(data));
    }

    pub fn append_hash(&mut self, leaf: Hash) {
        let mut node = leaf;
        let mut size = self.size;
        // binary-increment carry: merge full subtrees of equal height
        while size & 1 == 1 {
            match self.append_path.pop() {
                Some(peak) => node = branch_hash(&peak, &node),
                None => break,
            }
            size >>= 1;
        }
        self.append_path.push(node);
        self.size += 1;
        self.root = fold_peaks(&self.append_path);
    }
}

/// Root implied by the stored subtree roots (lowest subtree folded in last)
fn fold_peaks(peaks: &[Hash]) -> Hash {
    match peaks.split_last() {
        None => EMPTY_HASH,
        Some((last, rest)) => {
            let mut acc = *last;
            for peak in rest.iter().rev() {
                acc = branch_hash(peak, &acc);
            }
            acc
        }
    }
}

/// Root over a full leaf set, via rs_merkle
pub fn root_from_leaves(leaves: &[Vec<u8>]) -> Hash {
    if leaves.is_empty() {
        return EMPTY_HASH;
    }
    let leaf_hashes: Vec<[u8; 32]> = leaves
        .iter()
        .map(|leaf| Blake3Hasher::hash(leaf))
        .collect();
    let tree = MerkleTree::<Blake3Hasher>::from_leaves(&leaf_hashes);
    match tree.root() {
        Some(root) => Hash::from_bytes(root),
        None => EMPTY_HASH,
    }
}

/// Extend the implied root of `tree` with subtree roots sitting to its right.
///
/// Witness hashes are folded onto the current root left-to-right; an empty
/// witness degenerates to the plain root. Both ends of a channel use the same
/// fold, which is what makes the partner-outbox-root comparison meaningful.
pub fn root_from_right_witness(tree: &IncrementalTree, witness: &[Hash]) -> Hash {
    let mut iter = witness.iter();
    let mut acc = if tree.size == 0 {
        match iter.next() {
            Some(first) => *first,
            None => return EMPTY_HASH,
        }
    } else {
        tree.root
    };
    for w in iter {
        acc = branch_hash(&acc, w);
    }
    acc
}

/// Recompute the root of a tree of `size` leaves from the leaf hashes claimed
/// at the given positions plus the sibling hashes of everything else.
///
/// Positions must be strictly increasing and in range; sibling hashes are
/// consumed in the order the bottom-up walk encounters them and must be
/// exhausted exactly.
pub fn calculate_root_from_update_data(
    leaves: &[(u64, Hash)],
    size: u64,
    sibling_hashes: &[Hash],
) -> Result<Hash, MerkleError> {
    if leaves.is_empty() {
        return Err(MerkleError::NoLeaves);
    }
    for &(index, _) in leaves {
        if index >= size {
            return Err(MerkleError::IndexOutOfRange { index, size });
        }
    }

    let mut layer: Vec<(u64, Hash)> = leaves.to_vec();
    let mut width = size;
    let mut siblings = sibling_hashes.iter();

    while width > 1 {
        let mut next: Vec<(u64, Hash)> = Vec::with_capacity(layer.len());
        let mut i = 0;
        while i < layer.len() {
            let (pos, hash) = layer[i];
            if pos % 2 == 0 {
                if pos + 1 == width {
                    // odd node, promoted unchanged
                    next.push((pos / 2, hash));
                    i += 1;
                } else if i + 1 < layer.len() && layer[i + 1].0 == pos + 1 {
                    next.push((pos / 2, branch_hash(&hash, &layer[i + 1].1)));
                    i += 2;
                } else {
                    let sibling = siblings.next().ok_or(MerkleError::MissingSibling)?;
                    next.push((pos / 2, branch_hash(&hash, sibling)));
                    i += 1;
                }
            } else {
                let sibling = siblings.next().ok_or(MerkleError::MissingSibling)?;
                next.push((pos / 2, branch_hash(sibling, &hash)));
                i += 1;
            }
        }
        layer = next;
        width = width.div_ceil(2);
    }

    if siblings.next().is_some() {
        return Err(MerkleError::UnusedSibling);
    }
    Ok(layer[0].1)
}

/// Sibling hashes needed to prove the leaves at `idxs` (strictly increasing)
/// inside the tree over `leaf_hashes`. Counterpart of
/// [`calculate_root_from_update_data`], used by relayers and tests.
pub fn generate_proof(leaf_hashes: &[Hash], idxs: &[u64]) -> Result<Vec<Hash>, MerkleError> {
    let size = leaf_hashes.len() as u64;
    if idxs.is_empty() {
        return Err(MerkleError::NoLeaves);
    }
    for &index in idxs {
        if index >= size {
            return Err(MerkleError::IndexOutOfRange { index, size });
        }
    }

    // build all layers bottom-up, promoting odd nodes
    let mut layers: Vec<Vec<Hash>> = vec![leaf_hashes.to_vec()];
    while layers[layers.len() - 1].len() > 1 {
        let prev = &layers[layers.len() - 1];
        let mut next = Vec::with_capacity(prev.len().div_ceil(2));
        let mut i = 0;
        while i < prev.len() {
            if i + 1 < prev.len() {
                next.push(branch_hash(&prev[i], &prev[i + 1]));
            } else {
                next.push(prev[i]);
            }
            i += 2;
        }
        layers.push(next);
    }

    let mut proof = Vec::new();
    let mut known: Vec<u64> = idxs.to_vec();
    for layer in &layers[..layers.len().saturating_sub(1)] {
        let width = layer.len() as u64;
        let mut next_known = Vec::with_capacity(known.len());
        let mut i = 0;
        while i < known.len() {
            let pos = known[i];
            if pos % 2 == 0 {
                if pos + 1 == width {
                    // promoted, no sibling
                    i += 1;
                } else if i + 1 < known.len() && known[i + 1] == pos + 1 {
                    i += 2;
                } else {
                    proof.push(layer[(pos + 1) as usize]);
                    i += 1;
                }
            } else {
                proof.push(layer[(pos - 1) as usize]);
                i += 1;
            }
            if next_known.last() != Some(&(pos / 2)) {
                next_known.push(pos / 2);
            }
        }
        known = next_known;
    }
    Ok(proof)
}
