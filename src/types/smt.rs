// Sparse Merkle proofs - inclusion checks against partner chain state roots
use super::primitives::{Hash, EMPTY_HASH};
use serde::{Deserialize, Serialize};

const LEAF_PREFIX: u8 = 0x00;
const BRANCH_PREFIX: u8 = 0x01;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SmtError {
    #[error("sparse Merkle proof queries are not sorted ascending")]
    QueriesNotSorted,

    #[error("sparse Merkle proof has no queries")]
    NoQueries,

    #[error("sparse Merkle proof is missing sibling hashes")]
    MissingSibling,

    #[error("sparse Merkle proof carries unused sibling hashes")]
    UnusedSibling,

    #[error("sparse Merkle proof queries resolve to conflicting roots")]
    RootMismatch,

    #[error("sparse Merkle proof does not verify against the expected root")]
    InvalidProof,
}

/// One proven (key, value) pair together with the shape of its path.
///
/// The bitmap describes the path from the root down to the leaf: a set bit
/// means the sibling at that level is a real subtree whose hash is consumed
/// from the shared sibling list, a cleared bit means the sibling is the empty
/// subtree. An empty value marks an absent (or recovered) leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtQuery {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub bitmap: Vec<u8>,
}

fn smt_leaf_hash(key: &[u8], value: &[u8]) -> Hash {
    if value.is_empty() {
        return EMPTY_HASH;
    }
    let mut data = Vec::with_capacity(1 + key.len() + value.len());
    data.push(LEAF_PREFIX);
    data.extend_from_slice(key);
    data.extend_from_slice(value);
    Hash::hash(&data)
}

fn smt_branch_hash(left: &Hash, right: &Hash) -> Hash {
    let mut data = Vec::with_capacity(65);
    data.push(BRANCH_PREFIX);
    data.extend_from_slice(left.as_bytes());
    data.extend_from_slice(right.as_bytes());
    Hash::hash(&data)
}

/// Bitmap bits root-to-leaf with leading zero bits stripped
fn path_bits(bitmap: &[u8]) -> Vec<bool> {
    let mut bits: Vec<bool> = bitmap
        .iter()
        .flat_map(|&byte| (0..8).rev().map(move |i| (byte >> i) & 1 == 1))
        .collect();
    let first_set = bits.iter().position(|&b| b).unwrap_or(bits.len());
    bits.drain(..first_set);
    bits
}

/// Bit `depth` of the key, most significant first; keys shorter than the path
/// read as zero bits
fn key_bit(key: &[u8], depth: usize) -> bool {
    match key.get(depth / 8) {
        Some(byte) => (byte >> (7 - depth % 8)) & 1 == 1,
        None => false,
    }
}

/// Root implied by the queries and the shared sibling list.
///
/// Queries must be sorted ascending by key (duplicates allowed); every query
/// must resolve to the same root and the sibling list must be consumed
/// exactly.
pub fn calculate_root(queries: &[SmtQuery], sibling_hashes: &[Hash]) -> Result<Hash, SmtError> {
    if queries.is_empty() {
        return Err(SmtError::NoQueries);
    }
    if !queries.windows(2).all(|w| w[0].key <= w[1].key) {
        return Err(SmtError::QueriesNotSorted);
    }

    let mut siblings = sibling_hashes.iter();
    let mut root: Option<Hash> = None;
    for query in queries {
        let bits = path_bits(&query.bitmap);
        let mut node = smt_leaf_hash(&query.key, &query.value);
        for depth in (0..bits.len()).rev() {
            let sibling = if bits[depth] {
                *siblings.next().ok_or(SmtError::MissingSibling)?
            } else {
                EMPTY_HASH
            };
            node = if key_bit(&query.key, depth) {
                smt_branch_hash(&sibling, &node)
            } else {
                smt_branch_hash(&node, &sibling)
            };
        }
        match root {
            None => root = Some(node),
            Some(prev) if prev == node => {}
            Some(_) => return Err(SmtError::RootMismatch),
        }
    }
    if siblings.next().is_some() {
        return Err(SmtError::UnusedSibling);
    }
    // queries is non-empty, so root is set
    Ok(root.unwrap_or(EMPTY_HASH))
}

/// Inclusion check of all queries under `root`
pub fn verify(root: &Hash, queries: &[SmtQuery], sibling_hashes: &[Hash]) -> Result<(), SmtError> {
    let computed = calculate_root(queries, sibling_hashes)?;
    if computed != *root {
        return Err(SmtError::InvalidProof);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two-leaf tree: keys split on the first bit
    fn two_leaf_fixture() -> (Hash, SmtQuery, SmtQuery) {
        let left = SmtQuery {
            key: vec![0b0000_0000, 7],
            value: b"left-value".to_vec(),
            bitmap: vec![0b1],
        };
        let right = SmtQuery {
            key: vec![0b1000_0000, 9],
            value: b"right-value".to_vec(),
            bitmap: vec![0b1],
        };
        let root = smt_branch_hash(
            &smt_leaf_hash(&left.key, &left.value),
            &smt_leaf_hash(&right.key, &right.value),
        );
        (root, left, right)
    }

    #[test]
    fn test_single_query_inclusion() {
        let (root, left, right) = two_leaf_fixture();
        let right_leaf = smt_leaf_hash(&right.key, &right.value);
        assert_eq!(verify(&root, &[left.clone()], &[right_leaf]), Ok(()));

        let left_leaf = smt_leaf_hash(&left.key, &left.value);
        assert_eq!(verify(&root, &[right], &[left_leaf]), Ok(()));
    }

    #[test]
    fn test_tampered_value_fails() {
        let (root, mut left, right) = two_leaf_fixture();
        let right_leaf = smt_leaf_hash(&right.key, &right.value);
        left.value = b"forged".to_vec();
        assert_eq!(
            verify(&root, &[left], &[right_leaf]),
            Err(SmtError::InvalidProof)
        );
    }

    #[test]
    fn test_multi_query_shares_siblings() {
        let (root, left, right) = two_leaf_fixture();
        // both leaves known: each path consumes the other leaf as sibling
        let left_leaf = smt_leaf_hash(&left.key, &left.value);
        let right_leaf = smt_leaf_hash(&right.key, &right.value);
        assert_eq!(
            verify(&root, &[left, right], &[right_leaf, left_leaf]),
            Ok(())
        );
    }

    #[test]
    fn test_unsorted_queries_rejected() {
        let (_, left, right) = two_leaf_fixture();
        let err = calculate_root(&[right, left], &[]).unwrap_err();
        assert_eq!(err, SmtError::QueriesNotSorted);
        assert!(err.to_string().contains("not sorted ascending"));
    }

    #[test]
    fn test_duplicate_keys_allowed_by_ordering() {
        let (root, left, _) = two_leaf_fixture();
        let (_, _, right) = two_leaf_fixture();
        let right_leaf = smt_leaf_hash(&right.key, &right.value);
        assert_eq!(
            verify(
                &root,
                &[left.clone(), left],
                &[right_leaf, right_leaf]
            ),
            Ok(())
        );
    }

    #[test]
    fn test_deeper_path_with_empty_siblings() {
        // leaf at depth 2 under key bits 10..: sibling at depth 1 is empty,
        // sibling at depth 0 is a real subtree
        let query = SmtQuery {
            key: vec![0b1000_0000],
            value: b"deep".to_vec(),
            bitmap: vec![0b10],
        };
        let sibling = Hash::hash(b"left-subtree");
        let level1 = smt_branch_hash(&smt_leaf_hash(&query.key, &query.value), &EMPTY_HASH);
        let root = smt_branch_hash(&sibling, &level1);
        assert_eq!(verify(&root, &[query], &[sibling]), Ok(()));
    }

    #[test]
    fn test_sibling_count_enforced() {
        let (root, left, right) = two_leaf_fixture();
        let right_leaf = smt_leaf_hash(&right.key, &right.value);
        assert_eq!(
            verify(&root, &[left.clone()], &[]),
            Err(SmtError::MissingSibling)
        );
        assert_eq!(
            verify(&root, &[left], &[right_leaf, right_leaf]),
            Err(SmtError::UnusedSibling)
        );
    }

    #[test]
    fn test_empty_value_reads_as_absent_leaf() {
        let (_, left, right) = two_leaf_fixture();
        let absent = SmtQuery {
            key: left.key.clone(),
            value: Vec::new(),
            bitmap: left.bitmap.clone(),
        };
        let right_leaf = smt_leaf_hash(&right.key, &right.value);
        let expected = smt_branch_hash(&EMPTY_HASH, &right_leaf);
        assert_eq!(calculate_root(&[absent], &[right_leaf]), Ok(expected));
    }
}
