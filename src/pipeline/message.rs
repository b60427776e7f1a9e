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

//! Messages used to interact with the pipeline service.
//! Message elements defined as "packed" are structures serialized in
//! "MessagePack" format.

use super::pubsub::Event;
use crate::{
    base::schema::{ChunkDataPack, Collection, ExecutionResult, ServiceEvent, StateCommitment},
    channel,
    crypto::Hash,
    Error,
};

/// Message types enumeration.
///
/// Enum variants are internally tagged as strings.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
#[allow(clippy::large_enum_variant)]
pub enum Message {
    /// Exception response used for the full set of messages.
    #[serde(rename = "0")]
    Exception(Error),
    /// Subscribe to a set of pipeline events.
    #[serde(rename = "1")]
    Subscribe {
        /// Subscriber identifier.
        id: String,
        /// Events set (bitflags).
        events: Event,
    },
    /// Unsubscribe from a set of pipeline events.
    #[serde(rename = "2")]
    Unsubscribe {
        /// Subscriber identifier.
        id: String,
        /// Events set (bitflags).
        events: Event,
    },
    /// Certified block submission from the consensus follower.
    #[serde(rename = "3")]
    PutBlockRequest {
        /// `Block` structure.
        block: crate::base::schema::Block,
        /// Parent final state, present when the parent is already executed.
        parent_final_state: Option<StateCommitment>,
    },
    /// Block submission acknowledge, listing the collections being fetched.
    #[serde(rename = "4")]
    PutBlockResponse {
        /// Accepted block identifier.
        block_id: Hash,
        /// Collection ids the block is waiting for.
        missing: Vec<Hash>,
    },
    /// Collection body delivery.
    #[serde(rename = "5")]
    PutCollectionRequest {
        /// `Collection` structure.
        collection: Collection,
    },
    /// Collection delivery acknowledge.
    #[serde(rename = "6")]
    PutCollectionResponse {
        /// Delivered collection identifier.
        collection_id: Hash,
    },
    /// Get execution result request.
    #[serde(rename = "7")]
    GetResultRequest {
        /// Executed block identifier.
        block_id: Hash,
    },
    /// Get execution result response. Also published to `BLOCK_EXECUTED`
    /// subscribers.
    #[serde(rename = "8")]
    GetResultResponse {
        /// `ExecutionResult` structure.
        result: ExecutionResult,
    },
    /// Get chunk data pack request.
    #[serde(rename = "9")]
    GetChunkDataPackRequest {
        /// Chunk identifier.
        chunk_id: Hash,
    },
    /// Get chunk data pack response. Also published to `CHUNK_DATA_PACK`
    /// subscribers.
    #[serde(rename = "10")]
    GetChunkDataPackResponse {
        /// `ChunkDataPack` structure.
        pack: ChunkDataPack,
    },
    /// Get block final state commitment request.
    #[serde(rename = "11")]
    GetCommitmentRequest {
        /// Executed block identifier.
        block_id: Hash,
    },
    /// Get block final state commitment response.
    #[serde(rename = "12")]
    GetCommitmentResponse {
        /// Final state commitment.
        state: StateCommitment,
    },
    /// Get core stats request.
    #[serde(rename = "13")]
    GetStatsRequest,
    /// Get core stats response.
    #[serde(rename = "14")]
    GetStatsResponse(CoreStats),
    /// Service event notification, published to `SERVICE_EVENT` subscribers.
    #[serde(rename = "15")]
    GetServiceEventResponse {
        /// `ServiceEvent` structure.
        event: ServiceEvent,
    },
    /// Stop pipeline service.
    #[serde(rename = "254")]
    Stop,
    /// Packed message serialized using MessagePack.
    #[serde(rename = "255")]
    Packed {
        /// Serialized message bytes.
        #[serde(with = "serde_bytes")]
        buf: Vec<u8>,
    },
}

/// Pipeline introspection counters.
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
pub struct CoreStats {
    /// Blocks known but not yet executed.
    pub pending_blocks: u64,
    /// Blocks currently executing.
    pub executing_blocks: u64,
    /// Collections currently on the wire.
    pub outstanding_collections: u64,
    /// Height of the highest executed block, zero if none.
    pub highest_executed_height: u64,
    /// Identifier of the highest executed block.
    pub highest_executed_id: Hash,
}

/// Pipeline request sender alias.
pub type PipelineRequestSender = channel::RequestSender<Message, Message>;

/// Pipeline request receiver alias.
pub type PipelineRequestReceiver = channel::RequestReceiver<Message, Message>;

/// Pipeline response sender alias.
pub type PipelineResponseSender = channel::Sender<Message>;

/// Pipeline response receiver alias.
pub type PipelineResponseReceiver = channel::Receiver<Message>;
