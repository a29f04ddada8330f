//! Merkle set commitments over 32-byte leaves.
//!
//! Leaves are sorted and de-duplicated before the tree is built. Leaf nodes hash as
//! `sha256(0x00 || leaf)` and inner nodes as `sha256(0x01 || left || right)`. A node without a
//! sibling on its level is promoted unchanged. The root commits to the leaf count as
//! `sha256(0x02 || count || top)`, so a proof also fixes the position of its leaf. The root of an
//! empty set is all zeroes.
//!
//! A leaf is proven absent by proving its two neighbours in sorted order, at adjacent positions.
//!
//! A block's additions root commits, for every puzzle hash that received coins, both the puzzle
//! hash and [`coin_list_hash`] of the coins created for it. The removals root commits the names
//! of the spent coins.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{sha256, Bytes32, Coin};

const LEAF_PREFIX: [u8; 1] = [0];
const NODE_PREFIX: [u8; 1] = [1];
const COUNT_PREFIX: [u8; 1] = [2];

// PROOFS
// ================================================================================================

/// Which side of the running hash a sibling sits on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

/// Inclusion proof: the sibling hashes from the leaf level up to the tree top, and the number of
/// leaves in the set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf_count: u32,
    pub siblings: Vec<(Side, Bytes32)>,
}

impl MerkleProof {
    /// Returns true if `leaf` hashes up to `root` along this proof.
    pub fn verify(&self, root: &Bytes32, leaf: &Bytes32) -> bool {
        if self.leaf_count == 0 {
            return false;
        }
        let top = self.siblings.iter().fold(leaf_hash(leaf), |acc, (side, sibling)| match side {
            Side::Left => node_hash(sibling, &acc),
            Side::Right => node_hash(&acc, sibling),
        });
        commit_count(self.leaf_count, &top) == *root
    }

    /// Like [`MerkleProof::verify`], and also checks that the proof places `leaf` at `index` in
    /// sorted order.
    pub fn verify_at(&self, root: &Bytes32, leaf: &Bytes32, index: u32) -> bool {
        if index >= self.leaf_count {
            return false;
        }
        let sides = path_sides(index, self.leaf_count);
        sides.len() == self.siblings.len()
            && sides.iter().zip(&self.siblings).all(|(side, (proof_side, _))| side == proof_side)
            && self.verify(root, leaf)
    }
}

/// A leaf of the set together with its position and inclusion proof.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Neighbor {
    pub index: u32,
    pub leaf: Bytes32,
    pub proof: MerkleProof,
}

/// Proof that a leaf is not in the set.
///
/// Carries the closest leaves below and above the absent one. A missing neighbour means the absent
/// leaf sorts before the first or after the last leaf.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionProof {
    pub leaf_count: u32,
    pub lower: Option<Neighbor>,
    pub upper: Option<Neighbor>,
}

impl ExclusionProof {
    /// Returns true if the proof shows `leaf` is absent from the set committed to by `root`.
    pub fn verify(&self, root: &Bytes32, leaf: &Bytes32) -> bool {
        if self.leaf_count == 0 {
            return *root == Bytes32::ZERO && self.lower.is_none() && self.upper.is_none();
        }

        let proven = |neighbor: &Neighbor| {
            neighbor.proof.leaf_count == self.leaf_count
                && neighbor.proof.verify_at(root, &neighbor.leaf, neighbor.index)
        };
        match (&self.lower, &self.upper) {
            (Some(lower), Some(upper)) => {
                lower.leaf < *leaf
                    && *leaf < upper.leaf
                    && lower.index.checked_add(1) == Some(upper.index)
                    && proven(lower)
                    && proven(upper)
            },
            (Some(lower), None) => {
                lower.leaf < *leaf && lower.index.checked_add(1) == Some(self.leaf_count) && proven(lower)
            },
            (None, Some(upper)) => *leaf < upper.leaf && upper.index == 0 && proven(upper),
            (None, None) => false,
        }
    }
}

/// Proof that a leaf is in or out of the set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MembershipProof {
    Included(MerkleProof),
    Excluded(ExclusionProof),
}

impl MembershipProof {
    /// Returns `Some(true)` if the proof shows `leaf` in the set committed to by `root`,
    /// `Some(false)` if it shows the leaf absent, and `None` if it does not check out.
    pub fn prove(&self, root: &Bytes32, leaf: &Bytes32) -> Option<bool> {
        match self {
            MembershipProof::Included(proof) => proof.verify(root, leaf).then_some(true),
            MembershipProof::Excluded(proof) => proof.verify(root, leaf).then_some(false),
        }
    }
}

// MERKLE SET
// ================================================================================================

/// A sorted set of leaves with its Merkle root.
pub struct MerkleSet {
    leaves: Vec<Bytes32>,
    levels: Vec<Vec<Bytes32>>,
}

impl MerkleSet {
    pub fn new(leaves: impl IntoIterator<Item = Bytes32>) -> Self {
        let leaves: Vec<Bytes32> = leaves.into_iter().collect::<BTreeSet<_>>().into_iter().collect();

        let mut levels = vec![leaves.iter().map(leaf_hash).collect::<Vec<_>>()];
        while levels.last().map(|level| level.len() > 1).unwrap_or(false) {
            let current = &levels[levels.len() - 1];
            let next = current
                .chunks(2)
                .map(|pair| if pair.len() == 2 { node_hash(&pair[0], &pair[1]) } else { pair[0] })
                .collect();
            levels.push(next);
        }

        Self { leaves, levels }
    }

    pub fn root(&self) -> Bytes32 {
        match self.levels.last().and_then(|level| level.first()) {
            Some(top) => commit_count(self.leaf_count(), top),
            None => Bytes32::ZERO,
        }
    }

    fn leaf_count(&self) -> u32 {
        u32::try_from(self.leaves.len()).unwrap_or(u32::MAX)
    }

    /// Builds an inclusion proof for `leaf`, or `None` if it is not in the set.
    pub fn proof(&self, leaf: &Bytes32) -> Option<MerkleProof> {
        let mut index = self.leaves.binary_search(leaf).ok()?;
        let mut siblings = Vec::new();

        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = index ^ 1;
            if sibling < level.len() {
                let side = if sibling < index { Side::Left } else { Side::Right };
                siblings.push((side, level[sibling]));
            }
            index /= 2;
        }

        Some(MerkleProof { leaf_count: self.leaf_count(), siblings })
    }

    /// Builds a proof that `leaf` is absent, or `None` if it is in the set.
    pub fn exclusion_proof(&self, leaf: &Bytes32) -> Option<ExclusionProof> {
        let position = match self.leaves.binary_search(leaf) {
            Ok(_) => return None,
            Err(position) => position,
        };
        let neighbor = |index: usize| -> Option<Neighbor> {
            let leaf = *self.leaves.get(index)?;
            Some(Neighbor { index: u32::try_from(index).ok()?, leaf, proof: self.proof(&leaf)? })
        };

        Some(ExclusionProof {
            leaf_count: self.leaf_count(),
            lower: position.checked_sub(1).and_then(neighbor),
            upper: neighbor(position),
        })
    }

    /// Builds an inclusion or exclusion proof for `leaf`, whichever holds.
    pub fn membership_proof(&self, leaf: &Bytes32) -> MembershipProof {
        match self.proof(leaf) {
            Some(proof) => MembershipProof::Included(proof),
            None => MembershipProof::Excluded(self.exclusion_proof(leaf).unwrap_or_default()),
        }
    }
}

// HELPERS
// ================================================================================================

fn leaf_hash(leaf: &Bytes32) -> Bytes32 {
    sha256(&[&LEAF_PREFIX, leaf.as_ref()])
}

fn node_hash(left: &Bytes32, right: &Bytes32) -> Bytes32 {
    sha256(&[&NODE_PREFIX, left.as_ref(), right.as_ref()])
}

fn commit_count(leaf_count: u32, top: &Bytes32) -> Bytes32 {
    sha256(&[&COUNT_PREFIX, &leaf_count.to_be_bytes(), top.as_ref()])
}

/// Sides of the siblings on the path of the leaf at `index` in a set of `leaf_count` leaves.
fn path_sides(index: u32, leaf_count: u32) -> Vec<Side> {
    let (mut index, mut len) = (index, leaf_count);
    let mut sides = Vec::new();
    while len > 1 {
        let sibling = index ^ 1;
        if sibling < len {
            sides.push(if sibling < index { Side::Left } else { Side::Right });
        }
        index /= 2;
        len = len.div_ceil(2);
    }
    sides
}

/// Hash committing to the coins created for one puzzle hash in one block.
pub fn coin_list_hash(coins: &[Coin]) -> Bytes32 {
    let mut names: Vec<Bytes32> = coins.iter().map(Coin::name).collect();
    names.sort();
    let parts: Vec<&[u8]> = names.iter().map(|name| name.as_ref()).collect();
    sha256(&parts)
}

/// Root of an additions set given every `(puzzle_hash, coins)` pair created by a block.
pub fn additions_root(additions: &[(Bytes32, Vec<Coin>)]) -> Bytes32 {
    MerkleSet::new(
        additions
            .iter()
            .filter(|(_, coins)| !coins.is_empty())
            .flat_map(|(puzzle_hash, coins)| [*puzzle_hash, coin_list_hash(coins)]),
    )
    .root()
}

/// Root of a removals set given the names of every coin spent in a block.
pub fn removals_root(removals: &[Bytes32]) -> Bytes32 {
    MerkleSet::new(removals.iter().copied()).root()
}

#[cfg(test)]
mod tests {
    use super::{ExclusionProof, MembershipProof, MerkleProof, MerkleSet, Side};
    use crate::objects::Bytes32;

    fn leaf(byte: u8) -> Bytes32 {
        Bytes32::new([byte; 32])
    }

    #[test]
    fn empty_set_has_zero_root() {
        assert_eq!(MerkleSet::new(Vec::new()).root(), Bytes32::ZERO);
    }

    #[test]
    fn every_leaf_proves_against_root() {
        for size in 1..=7u8 {
            let set = MerkleSet::new((0..size).map(leaf));
            let root = set.root();
            for byte in 0..size {
                let proof = set.proof(&leaf(byte)).unwrap();
                assert!(proof.verify(&root, &leaf(byte)), "leaf {byte} of {size}");
            }
        }
    }

    #[test]
    fn proof_fails_for_other_leaf_or_root() {
        let set = MerkleSet::new((0..5).map(leaf));
        let proof = set.proof(&leaf(3)).unwrap();

        assert!(!proof.verify(&set.root(), &leaf(4)));
        assert!(!proof.verify(&Bytes32::new([9; 32]), &leaf(3)));
        assert!(set.proof(&leaf(42)).is_none());
    }

    #[test]
    fn tampered_sibling_side_is_rejected() {
        let set = MerkleSet::new((0..4).map(leaf));
        let mut proof = set.proof(&leaf(0)).unwrap();
        proof.siblings[0].0 = Side::Left;
        assert!(!proof.verify(&set.root(), &leaf(0)));
        assert!(!MerkleProof::default().verify(&set.root(), &leaf(0)));
    }

    #[test]
    fn absent_leaves_have_exclusion_proofs() {
        // even leaves only, so every odd byte is absent and falls between two of them
        for size in 1..=6u8 {
            let set = MerkleSet::new((0..size).map(|byte| leaf(byte * 2 + 2)));
            let root = set.root();
            for byte in 0..=size * 2 + 2 {
                let candidate = leaf(byte);
                match set.membership_proof(&candidate) {
                    MembershipProof::Included(proof) => {
                        assert!(byte % 2 == 0 && byte > 0, "byte {byte} of {size}");
                        assert!(proof.verify(&root, &candidate));
                    },
                    MembershipProof::Excluded(proof) => {
                        assert!(proof.verify(&root, &candidate), "byte {byte} of {size}");
                    },
                }
            }
        }
    }

    #[test]
    fn exclusion_proof_does_not_hide_a_member() {
        let set = MerkleSet::new((1..=5).map(leaf));
        let root = set.root();
        assert!(set.exclusion_proof(&leaf(3)).is_none());

        // neighbours that are not adjacent skip the leaves between them
        let forged = ExclusionProof {
            leaf_count: 5,
            lower: set.exclusion_proof(&leaf(0)).unwrap().upper,
            upper: set.exclusion_proof(&leaf(9)).unwrap().lower,
        };
        assert!(!forged.verify(&root, &leaf(3)));

        let gap = MerkleSet::new([leaf(2), leaf(4)]).exclusion_proof(&leaf(3)).unwrap();
        assert!(!gap.verify(&root, &leaf(3)));
    }

    #[test]
    fn empty_set_excludes_everything() {
        let set = MerkleSet::new(Vec::new());
        let proof = set.exclusion_proof(&leaf(1)).unwrap();
        assert!(proof.verify(&Bytes32::ZERO, &leaf(1)));
        assert!(!proof.verify(&MerkleSet::new([leaf(1)]).root(), &leaf(1)));
    }
}
