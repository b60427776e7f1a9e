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

//! Per-block program cache.
//!
//! Programs loaded or installed by a transaction are staged first and only
//! promoted at the transaction boundary when the transaction succeeds, so a
//! reverted transaction can never leak a program to its successors. The
//! cache lives for one block computation and is dropped with it.

use crate::crypto::Hash;
use std::collections::HashMap;
use std::sync::Arc;

/// A prepared program artifact, keyed by the account that hosts it.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    /// Hash of the source the artifact was derived from.
    pub code_hash: Hash,
    /// Opaque prepared artifact, shared between transactions.
    pub artifact: Arc<Vec<u8>>,
}

/// Transaction-scoped staging cache for prepared programs.
#[derive(Default)]
pub struct ProgramCache {
    /// Programs set by committed transactions of this block.
    committed: HashMap<String, Program>,
    /// Programs set by the transaction in progress.
    staged: HashMap<String, Program>,
}

impl ProgramCache {
    pub fn new() -> Self {
        ProgramCache::default()
    }

    /// Look up a program, staged entries first.
    pub fn get(&self, account: &str) -> Option<&Program> {
        self.staged
            .get(account)
            .or_else(|| self.committed.get(account))
    }

    /// Stage a program for the transaction in progress.
    pub fn insert(&mut self, account: &str, program: Program) {
        self.staged.insert(account.to_string(), program);
    }

    /// Transaction boundary, success path: staged entries are retained.
    pub fn commit_tx(&mut self) {
        let staged = std::mem::take(&mut self.staged);
        self.committed.extend(staged);
    }

    /// Transaction boundary, failure path: staged entries are discarded.
    pub fn abort_tx(&mut self) {
        self.staged.clear();
    }

    pub fn len(&self) -> usize {
        self.committed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.committed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::HashAlgorithm;

    fn create_program(tag: &[u8]) -> Program {
        Program {
            code_hash: Hash::from_data(HashAlgorithm::Sha256, tag),
            artifact: Arc::new(tag.to_vec()),
        }
    }

    #[test]
    fn staged_entry_is_visible_within_tx() {
        let mut cache = ProgramCache::new();

        cache.insert("alice", create_program(b"p1"));

        assert!(cache.get("alice").is_some());
        assert!(cache.is_empty());
    }

    #[test]
    fn committed_tx_retains_programs() {
        let mut cache = ProgramCache::new();
        cache.insert("alice", create_program(b"p1"));

        cache.commit_tx();

        assert_eq!(cache.len(), 1);
        assert!(cache.get("alice").is_some());
    }

    #[test]
    fn aborted_tx_leaks_nothing() {
        let mut cache = ProgramCache::new();
        cache.insert("alice", create_program(b"p1"));

        cache.abort_tx();

        assert!(cache.get("alice").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn staged_entry_shadows_committed_until_aborted() {
        let mut cache = ProgramCache::new();
        let old = create_program(b"old");
        let new = create_program(b"new");
        cache.insert("alice", old.clone());
        cache.commit_tx();

        cache.insert("alice", new.clone());
        assert_eq!(cache.get("alice"), Some(&new));

        cache.abort_tx();
        assert_eq!(cache.get("alice"), Some(&old));
    }
}
