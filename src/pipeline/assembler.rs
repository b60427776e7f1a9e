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

//! Chunk artifact binding.
//!
//! Collects the per-chunk outputs of the block computer and the committer
//! into `Chunk`, `ChunkDataPack` and `ChunkExecutionData` structures, and
//! closes over them into the block's `ComputationResult`. The event root of
//! a chunk is the Merkle root of its event hashes, in emission order.

use crate::{
    base::schema::{
        Chunk, ChunkDataPack, ChunkExecutionData, Collection, ComputationUsage, ContractEvent,
        ExecutionResult, ServiceEvent, StateCommitment, TransactionResult, TrieUpdate,
    },
    crypto::{merkle_root, Hash, Hashable},
    error::*,
};

/// The full per-block execution output, before persistence.
///
/// `ExecutionResult` is the lean slice of this that travels to the sealing
/// subsystem; the rest feeds the verifier and data-availability stores.
#[derive(Debug, Clone)]
pub struct ComputationResult {
    pub block_id: Hash,
    pub previous_result_id: Hash,
    /// Ordered chunks, system chunk last.
    pub chunks: Vec<Chunk>,
    pub chunk_data_packs: Vec<ChunkDataPack>,
    pub chunk_execution_datas: Vec<ChunkExecutionData>,
    /// Events per chunk, in emission order.
    pub events: Vec<Vec<ContractEvent>>,
    /// Transaction results for the whole block, dense across chunks.
    pub tx_results: Vec<TransactionResult>,
    /// Service events in emission order across chunks.
    pub service_events: Vec<ServiceEvent>,
    /// Per-chunk computation counters.
    pub usage: Vec<ComputationUsage>,
    /// End state of the system chunk.
    pub end_state: StateCommitment,
}

impl ComputationResult {
    /// The sealing-facing result structure.
    pub fn execution_result(&self) -> ExecutionResult {
        ExecutionResult {
            previous_result_id: self.previous_result_id,
            block_id: self.block_id,
            chunks: self.chunks.clone(),
            service_events: self.service_events.clone(),
        }
    }
}

/// Accumulates chunk artifacts for one block computation.
pub struct ChunkAssembler {
    block_id: Hash,
    previous_result_id: Hash,
    start_state: StateCommitment,
    chunks: Vec<Chunk>,
    chunk_data_packs: Vec<ChunkDataPack>,
    chunk_execution_datas: Vec<ChunkExecutionData>,
    events: Vec<Vec<ContractEvent>>,
    usage: Vec<ComputationUsage>,
}

impl ChunkAssembler {
    pub fn new(block_id: Hash, previous_result_id: Hash, start_state: StateCommitment) -> Self {
        ChunkAssembler {
            block_id,
            previous_result_id,
            start_state,
            chunks: Vec::new(),
            chunk_data_packs: Vec::new(),
            chunk_execution_datas: Vec::new(),
            events: Vec::new(),
            usage: Vec::new(),
        }
    }

    /// Number of chunks sealed so far.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// End state of the last sealed chunk, i.e. the start state of the next.
    pub fn current_state(&self) -> StateCommitment {
        self.chunks
            .last()
            .map(|chunk| chunk.end_state)
            .unwrap_or(self.start_state)
    }

    /// Seal one executed chunk.
    ///
    /// `collection` is `None` for the system chunk. The chunk indices are
    /// assigned densely in call order.
    #[allow(clippy::too_many_arguments)]
    pub fn add_chunk(
        &mut self,
        collection: Option<&Collection>,
        tx_count: u32,
        end_state: StateCommitment,
        proof: Vec<u8>,
        trie_update: TrieUpdate,
        events: Vec<ContractEvent>,
        usage: ComputationUsage,
    ) {
        let start_state = self.current_state();
        let index = self.chunks.len() as u64;

        let event_hashes: Vec<Hash> = events.iter().map(Hashable::primary_hash).collect();
        let chunk = Chunk {
            block_id: self.block_id,
            index,
            tx_count,
            start_state,
            end_state,
            event_root: merkle_root(&event_hashes),
        };

        self.chunk_data_packs.push(ChunkDataPack {
            chunk_id: chunk.id(),
            start_state,
            proof,
            collection: collection.cloned(),
        });
        self.chunk_execution_datas.push(ChunkExecutionData {
            collection: collection.cloned(),
            events: events.clone(),
            trie_update,
        });
        self.chunks.push(chunk);
        self.events.push(events);
        self.usage.push(usage);
    }

    /// Close the block: run the post-execution integrity checks and emit the
    /// computation result.
    pub fn finish(
        self,
        tx_results: Vec<TransactionResult>,
        service_events: Vec<ServiceEvent>,
    ) -> Result<ComputationResult> {
        self.verify_integrity()?;

        let end_state = self.current_state();
        Ok(ComputationResult {
            block_id: self.block_id,
            previous_result_id: self.previous_result_id,
            chunks: self.chunks,
            chunk_data_packs: self.chunk_data_packs,
            chunk_execution_datas: self.chunk_execution_datas,
            events: self.events,
            tx_results,
            service_events,
            usage: self.usage,
            end_state,
        })
    }

    /// Post-execution invariants: at least the system chunk, dense indices,
    /// state continuity across chunks, event roots matching the event lists.
    fn verify_integrity(&self) -> Result<()> {
        if self.chunks.is_empty() {
            return Err(Error::new_ext(
                ErrorKind::IntegrityFault,
                "block closed without a system chunk",
            ));
        }

        let mut expected_start = self.start_state;
        for (index, chunk) in self.chunks.iter().enumerate() {
            if chunk.index != index as u64 {
                return Err(Error::new_ext(
                    ErrorKind::IntegrityFault,
                    format!("chunk index {} at position {}", chunk.index, index),
                ));
            }
            if chunk.start_state != expected_start {
                return Err(Error::new_ext(
                    ErrorKind::IntegrityFault,
                    format!("state discontinuity entering chunk {}", index),
                ));
            }
            expected_start = chunk.end_state;

            let event_hashes: Vec<Hash> =
                self.events[index].iter().map(Hashable::primary_hash).collect();
            if chunk.event_root != merkle_root(&event_hashes) {
                return Err(Error::new_ext(
                    ErrorKind::IntegrityFault,
                    format!("event root mismatch in chunk {}", index),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::schema::tests::create_test_collection;
    use crate::crypto::HashAlgorithm;

    fn state(tag: &[u8]) -> StateCommitment {
        Hash::from_data(HashAlgorithm::Sha256, tag)
    }

    fn create_event(tx_index: u32, event_index: u32) -> ContractEvent {
        ContractEvent {
            tx_id: Hash::default(),
            tx_index,
            event_index,
            emitter: "alice".to_string(),
            name: "Transfer".to_string(),
            payload: vec![1, 2, 3],
        }
    }

    fn create_assembler() -> ChunkAssembler {
        ChunkAssembler::new(
            Hash::from_data(HashAlgorithm::Sha256, b"block"),
            Hash::from_data(HashAlgorithm::Sha256, b"prev-result"),
            state(b"c0"),
        )
    }

    #[test]
    fn chunks_chain_their_states() {
        let mut assembler = create_assembler();
        let collection = create_test_collection(&[1]);

        assembler.add_chunk(
            Some(&collection),
            1,
            state(b"c1"),
            vec![],
            TrieUpdate::default(),
            vec![],
            ComputationUsage::default(),
        );
        assembler.add_chunk(
            None,
            1,
            state(b"c2"),
            vec![],
            TrieUpdate::default(),
            vec![],
            ComputationUsage::default(),
        );

        let result = assembler.finish(vec![], vec![]).unwrap();

        assert_eq!(result.chunks.len(), 2);
        assert_eq!(result.chunks[0].start_state, state(b"c0"));
        assert_eq!(result.chunks[0].end_state, state(b"c1"));
        assert_eq!(result.chunks[1].start_state, state(b"c1"));
        assert_eq!(result.chunks[1].end_state, state(b"c2"));
        assert_eq!(result.end_state, state(b"c2"));
        assert_eq!(
            result.chunks.iter().map(|c| c.index).collect::<Vec<_>>(),
            vec![0, 1]
        );
    }

    #[test]
    fn system_chunk_pack_has_no_collection() {
        let mut assembler = create_assembler();
        let collection = create_test_collection(&[1]);

        assembler.add_chunk(
            Some(&collection),
            1,
            state(b"c1"),
            vec![0xaa],
            TrieUpdate::default(),
            vec![],
            ComputationUsage::default(),
        );
        assembler.add_chunk(
            None,
            1,
            state(b"c2"),
            vec![0xbb],
            TrieUpdate::default(),
            vec![],
            ComputationUsage::default(),
        );

        let result = assembler.finish(vec![], vec![]).unwrap();

        assert_eq!(
            result.chunk_data_packs[0].collection.as_ref().unwrap().id(),
            collection.id()
        );
        assert!(result.chunk_data_packs[1].collection.is_none());
        assert_eq!(result.chunk_data_packs[0].chunk_id, result.chunks[0].id());
    }

    #[test]
    fn event_root_covers_the_chunk_events() {
        let mut assembler = create_assembler();
        let events = vec![create_event(0, 0), create_event(0, 1)];
        let expected_root = merkle_root(&[
            events[0].primary_hash(),
            events[1].primary_hash(),
        ]);

        assembler.add_chunk(
            None,
            1,
            state(b"c1"),
            vec![],
            TrieUpdate::default(),
            events,
            ComputationUsage::default(),
        );

        let result = assembler.finish(vec![], vec![]).unwrap();

        assert_eq!(result.chunks[0].event_root, expected_root);
    }

    #[test]
    fn empty_chunk_gets_the_canonical_empty_root() {
        let mut assembler = create_assembler();

        assembler.add_chunk(
            None,
            1,
            state(b"c1"),
            vec![],
            TrieUpdate::default(),
            vec![],
            ComputationUsage::default(),
        );

        let result = assembler.finish(vec![], vec![]).unwrap();

        assert_eq!(result.chunks[0].event_root, merkle_root(&[]));
    }

    #[test]
    fn empty_block_is_rejected() {
        let assembler = create_assembler();

        let err = assembler.finish(vec![], vec![]).unwrap_err();

        assert_eq!(err.kind, ErrorKind::IntegrityFault);
    }

    #[test]
    fn execution_result_slice() {
        let mut assembler = create_assembler();
        assembler.add_chunk(
            None,
            1,
            state(b"c1"),
            vec![],
            TrieUpdate::default(),
            vec![],
            ComputationUsage::default(),
        );
        let result = assembler.finish(vec![], vec![]).unwrap();

        let execution_result = result.execution_result();

        assert_eq!(execution_result.block_id, result.block_id);
        assert_eq!(
            execution_result.previous_result_id,
            result.previous_result_id
        );
        assert_eq!(execution_result.final_state(), Some(state(b"c1")));
    }
}
