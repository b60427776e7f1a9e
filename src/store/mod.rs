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

//! Persistent state access seams.
//!
//! The pipeline reads registers through [`Snapshot`] handles anchored at a
//! state commitment and writes exclusively through [`Store::commit`]. The
//! same store also keeps the execution artifacts (results, chunk data packs,
//! per-block commitments) the sealing and verification subsystems ask for.

use crate::{
    base::schema::{ChunkDataPack, ExecutionResult, StateCommitment, TrieUpdate},
    crypto::Hash,
    error::*,
};
#[cfg(test)]
use mockall::automock;

pub mod memory;
pub mod view;

pub use memory::{MemorySnapshot, MemoryStore};
pub use view::StateView;

/// Progress marker persisted after every block execution, read back on
/// startup to rehydrate the pipeline.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default)]
pub struct HighestExecuted {
    pub height: u64,
    pub block_id: Hash,
    pub state: StateCommitment,
}

/// Read-only view of the register space at one state commitment.
/// Snapshot reads never observe writes committed after the anchor.
#[cfg_attr(test, automock)]
pub trait Snapshot: Send + Sync + 'static {
    /// Load a register value. `None` if the register was never written.
    fn get_register(&self, account: &str, key: &str) -> Result<Option<Vec<u8>>>;
}

/// Trait providing access to the authenticated register store and to the
/// execution artifact key/value space.
#[cfg_attr(test, automock(type SnapshotType = MockSnapshot;))]
pub trait Store: Send + Sync + 'static {
    /// Type representing a read-only snapshot.
    type SnapshotType: Snapshot;

    /// Open a snapshot anchored at the given commitment.
    fn snapshot(&self, state: &StateCommitment) -> Result<Self::SnapshotType>;

    /// Apply a register delta on top of `update.start_state`.
    /// Returns the new state commitment and the update proof bytes.
    ///
    /// Content addressed: committing the same delta on the same start state
    /// yields identical outputs no matter how many times it runs.
    fn commit(&mut self, update: &TrieUpdate) -> Result<(StateCommitment, Vec<u8>)>;

    /// Store the execution result of a block.
    fn store_result(&mut self, result: &ExecutionResult) -> Result<()>;

    /// Load the execution result produced for a block.
    fn load_result(&self, block_id: &Hash) -> Option<ExecutionResult>;

    /// Store a chunk data pack for verifier requests.
    fn store_chunk_data_pack(&mut self, pack: &ChunkDataPack) -> Result<()>;

    /// Load a chunk data pack by chunk id.
    fn load_chunk_data_pack(&self, chunk_id: &Hash) -> Option<ChunkDataPack>;

    /// Index the final state commitment of an executed block.
    fn store_commitment(&mut self, block_id: &Hash, state: &StateCommitment) -> Result<()>;

    /// Load the final state commitment of an executed block.
    fn load_commitment(&self, block_id: &Hash) -> Option<StateCommitment>;

    /// Persist the highest executed block marker.
    fn store_highest_executed(&mut self, highest: &HighestExecuted) -> Result<()>;

    /// Load the highest executed block marker, if any block was executed.
    fn load_highest_executed(&self) -> Option<HighestExecuted>;
}
