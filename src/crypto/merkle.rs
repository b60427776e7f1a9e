// This file is part of TESSERA.
//
// Copyright (C) 2022 The Tessera Project.
//
// TESSERA is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the
// Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// TESSERA is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License
// for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with TESSERA. If not, see <https://www.gnu.org/licenses/>.

//! Binary Merkle tree root over a list of leaf hashes.
//!
//! Used to derive the per-chunk event root carried by every `Chunk` and
//! recomputed by verifiers. Leaves are combined pairwise left-to-right; an
//! unpaired node is promoted to the next level unchanged, so the tree shape
//! is a pure function of the leaf count.

use crate::crypto::hash::{Hash, HashAlgorithm};

/// Compute the Merkle root of the given leaf hashes.
///
/// The empty list maps to the SHA-256 of zero bytes, which doubles as the
/// canonical "no events" root.
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return Hash::from_data(HashAlgorithm::Sha256, &[]);
    }

    let mut level: Vec<Hash> = leaves.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity((level.len() + 1) / 2);
        let mut iter = level.chunks_exact(2);
        for pair in &mut iter {
            next.push(merge(&pair[0], &pair[1]));
        }
        if let [odd] = *iter.remainder() {
            next.push(odd);
        }
        level = next;
    }
    level[0]
}

fn merge(left: &Hash, right: &Hash) -> Hash {
    let mut buf = Vec::with_capacity(left.size() + right.size());
    buf.extend_from_slice(left.as_bytes());
    buf.extend_from_slice(right.as_bytes());
    Hash::from_data(HashAlgorithm::Sha256, &buf)
}
