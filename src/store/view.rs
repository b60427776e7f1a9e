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

//! Writeable delta overlay on a read-only base snapshot.
//!
//! A view stacks three write layers on top of the snapshot:
//! - the block layer, holding writes of already committed chunks;
//! - the chunk layer, holding writes of flushed transactions of the chunk
//!   in progress;
//! - the staged layer, holding writes of the transaction in progress.
//!
//! A successful transaction is sealed into the chunk layer with [`flush`];
//! a failed one is discarded with [`rollback`]. At a chunk boundary
//! [`take_chunk_update`] drains the chunk layer into the block layer and
//! returns the delta to hand to the committer, so the next chunk reads
//! through everything the previous chunks wrote.
//!
//! [`flush`]: StateView::flush
//! [`rollback`]: StateView::rollback
//! [`take_chunk_update`]: StateView::take_chunk_update

use crate::{
    base::schema::{RegisterEntry, StateCommitment, TrieUpdate},
    error::*,
    store::Snapshot,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

type RegisterId = (String, String);

/// Register write-set overlay used by the block computer.
pub struct StateView {
    /// Read-only base the whole block executes against.
    base: Arc<dyn Snapshot>,
    /// Writes of chunks already handed to the committer.
    block: BTreeMap<RegisterId, Option<Vec<u8>>>,
    /// Writes of flushed transactions of the current chunk.
    chunk: BTreeMap<RegisterId, Option<Vec<u8>>>,
    /// Writes of the transaction in progress.
    staged: BTreeMap<RegisterId, Option<Vec<u8>>>,
    /// Distinct registers read or written by the current chunk.
    touched: HashSet<RegisterId>,
}

impl StateView {
    pub fn new(base: Arc<dyn Snapshot>) -> Self {
        StateView {
            base,
            block: BTreeMap::new(),
            chunk: BTreeMap::new(),
            staged: BTreeMap::new(),
            touched: HashSet::new(),
        }
    }

    /// Read a register through the overlay layers, newest first.
    pub fn get(&mut self, account: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let id = (account.to_string(), key.to_string());
        self.touched.insert(id.clone());

        for layer in [&self.staged, &self.chunk, &self.block] {
            if let Some(value) = layer.get(&id) {
                return Ok(value.clone());
            }
        }
        self.base.get_register(account, key)
    }

    /// Stage a register write for the transaction in progress.
    pub fn set(&mut self, account: &str, key: &str, value: Vec<u8>) {
        let id = (account.to_string(), key.to_string());
        self.touched.insert(id.clone());
        self.staged.insert(id, Some(value));
    }

    /// Stage a register deletion for the transaction in progress.
    pub fn delete(&mut self, account: &str, key: &str) {
        let id = (account.to_string(), key.to_string());
        self.touched.insert(id.clone());
        self.staged.insert(id, None);
    }

    /// Seal the staged writes into the chunk layer. Transaction boundary,
    /// success path.
    pub fn flush(&mut self) {
        let staged = std::mem::take(&mut self.staged);
        self.chunk.extend(staged);
    }

    /// Discard the staged writes. Transaction boundary, failure path.
    pub fn rollback(&mut self) {
        self.staged.clear();
    }

    /// Close the current chunk: drain its writes into the block layer and
    /// return the delta to commit, anchored at `start_state`.
    ///
    /// The writes come out sorted by register id, so the update encoding is
    /// deterministic.
    pub fn take_chunk_update(&mut self, start_state: StateCommitment) -> TrieUpdate {
        debug_assert!(self.staged.is_empty(), "open transaction at chunk boundary");

        let chunk = std::mem::take(&mut self.chunk);
        let writes = chunk
            .iter()
            .map(|((account, key), value)| RegisterEntry {
                account: account.clone(),
                key: key.clone(),
                value: value.clone().map(serde_bytes::ByteBuf::from),
            })
            .collect();
        self.block.extend(chunk);
        TrieUpdate {
            start_state,
            writes,
        }
    }

    /// Number of distinct registers touched by the current chunk so far;
    /// resets the counter.
    pub fn take_touched_count(&mut self) -> u64 {
        let count = self.touched.len() as u64;
        self.touched.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockSnapshot;

    fn create_view() -> StateView {
        let mut base = MockSnapshot::new();
        base.expect_get_register().returning(|account, key| {
            if account == "alice" && key == "balance" {
                Ok(Some(vec![100]))
            } else {
                Ok(None)
            }
        });
        StateView::new(Arc::new(base))
    }

    #[test]
    fn read_through_to_base() {
        let mut view = create_view();

        assert_eq!(view.get("alice", "balance").unwrap(), Some(vec![100]));
        assert_eq!(view.get("bob", "balance").unwrap(), None);
    }

    #[test]
    fn staged_write_shadows_base() {
        let mut view = create_view();

        view.set("alice", "balance", vec![42]);

        assert_eq!(view.get("alice", "balance").unwrap(), Some(vec![42]));
    }

    #[test]
    fn rollback_discards_staged_writes() {
        let mut view = create_view();

        view.set("alice", "balance", vec![42]);
        view.rollback();

        assert_eq!(view.get("alice", "balance").unwrap(), Some(vec![100]));
    }

    #[test]
    fn flush_survives_rollback() {
        let mut view = create_view();

        view.set("alice", "balance", vec![42]);
        view.flush();
        view.set("alice", "balance", vec![7]);
        view.rollback();

        assert_eq!(view.get("alice", "balance").unwrap(), Some(vec![42]));
    }

    #[test]
    fn delete_shadows_base_value() {
        let mut view = create_view();

        view.delete("alice", "balance");
        view.flush();

        assert_eq!(view.get("alice", "balance").unwrap(), None);
    }

    #[test]
    fn chunk_update_is_sorted_and_visible_to_next_chunk() {
        let mut view = create_view();
        let start = StateCommitment::default();

        view.set("bob", "balance", vec![1]);
        view.flush();
        view.set("alice", "balance", vec![2]);
        view.flush();

        let update = view.take_chunk_update(start);

        let ids: Vec<_> = update
            .writes
            .iter()
            .map(|w| (w.account.as_str(), w.key.as_str()))
            .collect();
        assert_eq!(ids, vec![("alice", "balance"), ("bob", "balance")]);

        // The next chunk still reads through the first chunk's writes.
        assert_eq!(view.get("bob", "balance").unwrap(), Some(vec![1]));

        // And a later chunk update only carries its own writes.
        view.set("carol", "balance", vec![3]);
        view.flush();
        let update = view.take_chunk_update(start);
        assert_eq!(update.writes.len(), 1);
        assert_eq!(update.writes[0].account, "carol");
    }

    #[test]
    fn touched_registers_are_counted_once() {
        let mut view = create_view();

        let _ = view.get("alice", "balance");
        view.set("alice", "balance", vec![1]);
        view.set("bob", "balance", vec![2]);
        view.flush();

        assert_eq!(view.take_touched_count(), 2);
        assert_eq!(view.take_touched_count(), 0);
    }
}
