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

//! Core data model structures.
//!
//! Every identifier is the SHA-256 multihash of the MessagePack encoding of
//! the identified structure, so ids are a pure function of content.

use crate::crypto::{Hash, Hashable};
use std::collections::HashMap;
use std::sync::Arc;

/// Authenticated digest identifying a snapshot of the register store.
pub type StateCommitment = Hash;

/// Block header fields. The block identifier is the hash of this structure.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default)]
pub struct BlockHeader {
    /// Parent block identifier.
    pub parent_id: Hash,
    /// Height along the fork. Every block other than genesis sits at
    /// `parent.height + 1`.
    pub height: u64,
    /// Consensus view in which the block was proposed.
    pub view: u64,
    /// Proposer timestamp, milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// Commitment to a collection of transactions plus attestor metadata.
///
/// The attestation has been verified upstream by the consensus follower;
/// the pipeline treats the signer data as opaque.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default)]
pub struct CollectionGuarantee {
    /// Content-addressed collection identifier.
    pub collection_id: Hash,
    /// Attesting cluster member identifiers.
    pub signer_ids: Vec<Hash>,
    /// Aggregated attestation signature bytes.
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
}

/// Seal over a past execution result, carried in block payloads and
/// interpreted by higher layers only.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default)]
pub struct Seal {
    /// Sealed block identifier.
    pub block_id: Hash,
    /// Sealed execution result identifier.
    pub result_id: Hash,
    /// Final state commitment the seal attests to.
    pub final_state: StateCommitment,
}

/// Block payload: ordered collection guarantees plus seals.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default)]
pub struct BlockPayload {
    /// Guarantees, in the order their chunks execute.
    pub guarantees: Vec<CollectionGuarantee>,
    /// Seals for prior execution results.
    pub seals: Vec<Seal>,
}

/// A certified block.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default)]
pub struct Block {
    pub header: BlockHeader,
    pub payload: BlockPayload,
}

impl Block {
    /// Block identifier: hash of the header fields only.
    pub fn id(&self) -> Hash {
        self.header.primary_hash()
    }
}

/// A single transaction body. The pipeline never interprets the script;
/// that is the runner's job.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default)]
pub struct TransactionBody {
    /// Transaction script bytes.
    #[serde(with = "serde_bytes")]
    pub script: Vec<u8>,
    /// Script arguments, each an opaque encoded value.
    pub arguments: Vec<serde_bytes::ByteBuf>,
    /// Authorizing account identifiers.
    pub authorizers: Vec<String>,
    /// Fee-paying account identifier.
    pub payer: String,
    /// Nonce to differentiate transactions with the same payload.
    #[serde(with = "serde_bytes")]
    pub nonce: Vec<u8>,
}

impl TransactionBody {
    pub fn id(&self) -> Hash {
        self.primary_hash()
    }
}

/// An ordered list of transactions, content-addressed.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default)]
pub struct Collection {
    pub transactions: Vec<TransactionBody>,
}

impl Collection {
    /// Collection identifier, matching the guarantee commitment.
    pub fn id(&self) -> Hash {
        self.primary_hash()
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

/// A guarantee paired with its collection body, which may still be on the
/// wire. The body is shared between all blocks referencing the collection.
#[derive(Debug, Clone)]
pub struct CompleteCollection {
    pub guarantee: CollectionGuarantee,
    pub collection: Option<Arc<Collection>>,
}

impl CompleteCollection {
    /// True once the collection body has been received.
    pub fn is_completed(&self) -> bool {
        self.collection.is_some()
    }
}

/// A block paired with everything needed to execute it: the full collection
/// bodies for every guarantee in its payload and the parent final state
/// commitment. This is an in-memory entity, never serialized.
#[derive(Debug, Clone)]
pub struct ExecutableBlock {
    pub block: Arc<Block>,
    /// Collection bodies indexed by collection id.
    pub complete_collections: HashMap<Hash, CompleteCollection>,
    /// Parent final state commitment. `None` until the parent is executed.
    pub start_state: Option<StateCommitment>,
}

impl ExecutableBlock {
    pub fn id(&self) -> Hash {
        self.block.id()
    }

    pub fn height(&self) -> u64 {
        self.block.header.height
    }

    /// A block is complete once its start state is known and every
    /// referenced collection body is present.
    pub fn is_complete(&self) -> bool {
        self.start_state.is_some()
            && self
                .complete_collections
                .values()
                .all(CompleteCollection::is_completed)
    }

    /// Collection bodies in payload order.
    ///
    /// # Panics
    ///
    /// Panics if called on an incomplete block; the queue only emits
    /// complete ones.
    pub fn collections_in_order(&self) -> Vec<(CollectionGuarantee, Arc<Collection>)> {
        self.block
            .payload
            .guarantees
            .iter()
            .map(|guarantee| {
                let cc = self
                    .complete_collections
                    .get(&guarantee.collection_id)
                    .expect("guarantee without collection entry");
                (
                    guarantee.clone(),
                    cc.collection.clone().expect("incomplete collection"),
                )
            })
            .collect()
    }
}

/// Execution unit corresponding to one collection, or to the implicit
/// system collection for the block-closing chunk.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default)]
pub struct Chunk {
    /// Block the chunk belongs to.
    pub block_id: Hash,
    /// Dense index within the block, starting at 0.
    pub index: u64,
    /// Number of transactions executed by the chunk.
    pub tx_count: u32,
    /// State commitment the chunk execution started from.
    pub start_state: StateCommitment,
    /// State commitment after the chunk delta was committed.
    pub end_state: StateCommitment,
    /// Merkle root of the events emitted by the chunk.
    pub event_root: Hash,
}

impl Chunk {
    pub fn id(&self) -> Hash {
        self.primary_hash()
    }
}

/// Register write produced by a chunk, addressed by account and key.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct RegisterEntry {
    pub account: String,
    pub key: String,
    /// `None` encodes a deletion.
    pub value: Option<serde_bytes::ByteBuf>,
}

/// The ordered register writes turning a chunk's start state into its end
/// state; the structure verifiers replay against the authenticated trie.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default)]
pub struct TrieUpdate {
    pub start_state: StateCommitment,
    pub writes: Vec<RegisterEntry>,
}

impl TrieUpdate {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Everything a verifier needs to re-execute one chunk.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct ChunkDataPack {
    pub chunk_id: Hash,
    pub start_state: StateCommitment,
    /// Proof of the register reads against the start state.
    #[serde(with = "serde_bytes")]
    pub proof: Vec<u8>,
    /// The executed collection; `None` for the system chunk.
    pub collection: Option<Collection>,
}

/// Per-chunk execution observables, persisted for data-availability
/// consumers rather than verification.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct ChunkExecutionData {
    pub collection: Option<Collection>,
    pub events: Vec<ContractEvent>,
    pub trie_update: TrieUpdate,
}

/// Event emitted by a transaction.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default)]
pub struct ContractEvent {
    /// Emitting transaction identifier.
    pub tx_id: Hash,
    /// Transaction index within the block, dense across chunks.
    pub tx_index: u32,
    /// Event index within the transaction, dense from 0.
    pub event_index: u32,
    /// Emitting account identifier.
    pub emitter: String,
    /// Qualified event identifier.
    pub name: String,
    /// Opaque encoded event payload.
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

/// Classes of service events the chain-fixed system contracts emit.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum ServiceEventKind {
    EpochSetup,
    EpochCommit,
    VersionBeacon,
}

/// A typed event emitted by a system contract, driving higher-layer state
/// machines. Collected in emission order across all chunks of a block.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct ServiceEvent {
    pub kind: ServiceEventKind,
    pub event: ContractEvent,
}

/// Execution outcome of one transaction. An empty `error_message` means the
/// transaction succeeded and its writes were kept.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default)]
pub struct TransactionResult {
    pub tx_id: Hash,
    pub error_message: String,
}

impl TransactionResult {
    pub fn is_success(&self) -> bool {
        self.error_message.is_empty()
    }
}

/// Per-chunk computation summary counters.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Copy, Default)]
pub struct ComputationUsage {
    pub transactions: u32,
    pub failed: u32,
    pub events: u32,
    pub registers_touched: u64,
}

/// The per-block output made available to the sealing subsystem.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default)]
pub struct ExecutionResult {
    /// Result identifier of the parent block's execution.
    pub previous_result_id: Hash,
    /// Executed block identifier.
    pub block_id: Hash,
    /// Ordered chunks; the last one is always the system chunk.
    pub chunks: Vec<Chunk>,
    /// Service events in emission order across chunks.
    pub service_events: Vec<ServiceEvent>,
}

impl ExecutionResult {
    pub fn id(&self) -> Hash {
        self.primary_hash()
    }

    /// Final state commitment of the block, i.e. the end state of the
    /// system chunk.
    pub fn final_state(&self) -> Option<StateCommitment> {
        self.chunks.last().map(|chunk| chunk.end_state)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::base::serialize::{rmp_deserialize, rmp_serialize};
    use crate::crypto::HashAlgorithm;

    const HEADER_HEX: &str = "94c4020000010700";

    pub fn create_test_header(parent_id: Hash, height: u64) -> BlockHeader {
        BlockHeader {
            parent_id,
            height,
            view: height + 6,
            timestamp: 0,
        }
    }

    pub fn create_test_tx(tag: u8) -> TransactionBody {
        TransactionBody {
            script: b"ping".to_vec(),
            arguments: vec![],
            authorizers: vec!["alice".to_string()],
            payer: "alice".to_string(),
            nonce: vec![0, tag],
        }
    }

    pub fn create_test_collection(tags: &[u8]) -> Collection {
        Collection {
            transactions: tags.iter().map(|tag| create_test_tx(*tag)).collect(),
        }
    }

    pub fn create_test_guarantee(collection: &Collection) -> CollectionGuarantee {
        CollectionGuarantee {
            collection_id: collection.id(),
            signer_ids: vec![Hash::from_data(HashAlgorithm::Sha256, b"signer")],
            signature: vec![0xaa; 4],
        }
    }

    pub fn create_test_block(parent_id: Hash, height: u64, collections: &[Collection]) -> Block {
        Block {
            header: create_test_header(parent_id, height),
            payload: BlockPayload {
                guarantees: collections.iter().map(create_test_guarantee).collect(),
                seals: vec![],
            },
        }
    }

    #[test]
    fn header_serialize() {
        let header = BlockHeader {
            parent_id: Hash::default(),
            height: 1,
            view: 7,
            timestamp: 0,
        };

        let buf = rmp_serialize(&header).unwrap();

        assert_eq!(hex::encode(&buf), HEADER_HEX);
    }

    #[test]
    fn header_deserialize() {
        let buf = hex::decode(HEADER_HEX).unwrap();

        let header: BlockHeader = rmp_deserialize(&buf).unwrap();

        assert_eq!(header.height, 1);
        assert_eq!(header.view, 7);
        assert_eq!(header.parent_id, Hash::default());
    }

    #[test]
    fn block_id_covers_header_only() {
        let mut block = create_test_block(Hash::default(), 1, &[create_test_collection(&[1])]);
        let id = block.id();

        // Payload changes do not move the identifier.
        block.payload.seals.push(Seal::default());
        assert_eq!(block.id(), id);

        // Header changes do.
        block.header.height = 2;
        assert_ne!(block.id(), id);
    }

    #[test]
    fn collection_id_is_content_addressed() {
        let c1 = create_test_collection(&[1, 2]);
        let c2 = create_test_collection(&[1, 2]);
        let c3 = create_test_collection(&[2, 1]);

        assert_eq!(c1.id(), c2.id());
        assert_ne!(c1.id(), c3.id());
    }

    #[test]
    fn executable_block_completeness() {
        let collection = Arc::new(create_test_collection(&[1]));
        let block = Arc::new(create_test_block(Hash::default(), 1, &[(*collection).clone()]));
        let guarantee = block.payload.guarantees[0].clone();
        let col_id = guarantee.collection_id;

        let mut executable = ExecutableBlock {
            block,
            complete_collections: HashMap::new(),
            start_state: None,
        };
        executable.complete_collections.insert(
            col_id,
            CompleteCollection {
                guarantee,
                collection: None,
            },
        );

        assert!(!executable.is_complete());

        executable.start_state = Some(Hash::from_data(HashAlgorithm::Sha256, b"c0"));
        assert!(!executable.is_complete());

        executable
            .complete_collections
            .get_mut(&col_id)
            .unwrap()
            .collection = Some(collection);
        assert!(executable.is_complete());
    }

    #[test]
    fn execution_result_final_state() {
        let mut result = ExecutionResult::default();
        assert_eq!(result.final_state(), None);

        let end = Hash::from_data(HashAlgorithm::Sha256, b"end");
        result.chunks.push(Chunk {
            end_state: end,
            ..Default::default()
        });

        assert_eq!(result.final_state(), Some(end));
    }

    #[test]
    fn transaction_result_success_flag() {
        let ok = TransactionResult {
            tx_id: Hash::default(),
            error_message: String::new(),
        };
        let failed = TransactionResult {
            tx_id: Hash::default(),
            error_message: "execution reverted".to_string(),
        };

        assert!(ok.is_success());
        assert!(!failed.is_success());
    }
}
