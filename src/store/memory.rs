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

//! In-memory content-addressed reference store.
//!
//! Keeps every register-space version reachable by its commitment, so
//! concurrent block tasks on different forks can snapshot any executed
//! state. The commitment of a version is derived from the parent commitment
//! and the sorted delta encoding, which makes `commit` idempotent: replaying
//! the same delta lands on the same commitment.
//!
//! Meant for tests and for embedders running without a ledger daemon.

use crate::{
    base::{
        schema::{ChunkDataPack, ExecutionResult, StateCommitment, TrieUpdate},
        serialize::rmp_serialize,
    },
    crypto::{Hash, HashAlgorithm},
    error::*,
    store::{HighestExecuted, Snapshot, Store},
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

type Registers = BTreeMap<(String, String), Vec<u8>>;

/// Snapshot handle over one frozen register-space version.
#[derive(Clone, Debug)]
pub struct MemorySnapshot {
    registers: Arc<Registers>,
}

impl Snapshot for MemorySnapshot {
    fn get_register(&self, account: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let id = (account.to_string(), key.to_string());
        Ok(self.registers.get(&id).cloned())
    }
}

/// Content-addressed register store plus execution artifact space.
pub struct MemoryStore {
    /// Frozen register-space versions by commitment.
    states: HashMap<StateCommitment, Arc<Registers>>,
    results: HashMap<Hash, ExecutionResult>,
    chunk_data_packs: HashMap<Hash, ChunkDataPack>,
    commitments: HashMap<Hash, StateCommitment>,
    highest: Option<HighestExecuted>,
}

impl MemoryStore {
    /// Create a store holding only the empty register space.
    pub fn new() -> Self {
        let mut states = HashMap::new();
        states.insert(Self::empty_commitment(), Arc::new(Registers::new()));
        MemoryStore {
            states,
            results: HashMap::new(),
            chunk_data_packs: HashMap::new(),
            commitments: HashMap::new(),
            highest: None,
        }
    }

    /// Commitment of the empty register space, the genesis start state.
    pub fn empty_commitment() -> StateCommitment {
        Hash::from_data(HashAlgorithm::Sha256, b"register-space-empty")
    }

    fn derive_commitment(update: &TrieUpdate) -> Result<StateCommitment> {
        let delta = rmp_serialize(&update.writes)?;
        let mut buf = Vec::with_capacity(update.start_state.size() + delta.len());
        buf.extend_from_slice(update.start_state.as_bytes());
        buf.extend_from_slice(&delta);
        Ok(Hash::from_data(HashAlgorithm::Sha256, &buf))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    type SnapshotType = MemorySnapshot;

    fn snapshot(&self, state: &StateCommitment) -> Result<MemorySnapshot> {
        match self.states.get(state) {
            Some(registers) => Ok(MemorySnapshot {
                registers: registers.clone(),
            }),
            None => Err(Error::new_ext(
                ErrorKind::ResourceNotFound,
                format!("unknown state commitment {}", hex::encode(state.as_bytes())),
            )),
        }
    }

    fn commit(&mut self, update: &TrieUpdate) -> Result<(StateCommitment, Vec<u8>)> {
        // Empty delta: state unchanged, canonical empty proof.
        if update.is_empty() {
            if !self.states.contains_key(&update.start_state) {
                return Err(Error::new_ext(
                    ErrorKind::StorageFault,
                    "commit on unknown start state",
                ));
            }
            return Ok((update.start_state, Vec::new()));
        }

        let base = self
            .states
            .get(&update.start_state)
            .cloned()
            .ok_or_else(|| Error::new_ext(ErrorKind::StorageFault, "commit on unknown start state"))?;

        let end_state = Self::derive_commitment(update)?;
        if !self.states.contains_key(&end_state) {
            let mut registers = (*base).clone();
            for write in &update.writes {
                let id = (write.account.clone(), write.key.clone());
                match &write.value {
                    Some(value) => registers.insert(id, value.to_vec()),
                    None => registers.remove(&id),
                };
            }
            self.states.insert(end_state, Arc::new(registers));
        }

        // The update itself doubles as the proof for the reference store.
        let proof = rmp_serialize(update)?;
        Ok((end_state, proof))
    }

    fn store_result(&mut self, result: &ExecutionResult) -> Result<()> {
        self.results.insert(result.block_id, result.clone());
        Ok(())
    }

    fn load_result(&self, block_id: &Hash) -> Option<ExecutionResult> {
        self.results.get(block_id).cloned()
    }

    fn store_chunk_data_pack(&mut self, pack: &ChunkDataPack) -> Result<()> {
        self.chunk_data_packs.insert(pack.chunk_id, pack.clone());
        Ok(())
    }

    fn load_chunk_data_pack(&self, chunk_id: &Hash) -> Option<ChunkDataPack> {
        self.chunk_data_packs.get(chunk_id).cloned()
    }

    fn store_commitment(&mut self, block_id: &Hash, state: &StateCommitment) -> Result<()> {
        self.commitments.insert(*block_id, *state);
        Ok(())
    }

    fn load_commitment(&self, block_id: &Hash) -> Option<StateCommitment> {
        self.commitments.get(block_id).copied()
    }

    fn store_highest_executed(&mut self, highest: &HighestExecuted) -> Result<()> {
        // Monotone: forks may execute out of height order.
        match &self.highest {
            Some(prev) if prev.height >= highest.height => {}
            _ => self.highest = Some(highest.clone()),
        }
        Ok(())
    }

    fn load_highest_executed(&self) -> Option<HighestExecuted> {
        self.highest.clone()
    }
}
