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

//! Common base types shared by the whole library.

pub mod queue_set;
pub mod schema;
pub mod serialize;

/// Lock types used all over the project.
pub type Mutex<T> = parking_lot::Mutex<T>;
pub type RwLock<T> = parking_lot::RwLock<T>;

pub use schema::{
    Block, BlockHeader, BlockPayload, Chunk, ChunkDataPack, Collection, CollectionGuarantee,
    ContractEvent, ExecutableBlock, ExecutionResult, StateCommitment, TransactionBody,
    TransactionResult,
};
