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

//! TESSERA execution node core library.
//!
//! The crate implements the block execution pipeline of a
//! Byzantine-fault-tolerant chain that separates consensus from execution:
//! certified blocks come in, their collection dependencies are resolved,
//! the transactions are executed in canonical order against the
//! authenticated state, and the chunked execution results come out for
//! verification and sealing.
//!
//! Consensus, networking and the transaction virtual machine are
//! collaborators behind capability traits, supplied at construction.

// External crates macros.
#[macro_use]
extern crate serde;
#[macro_use]
extern crate log;

// Public modules.
pub mod base;
pub mod channel;
pub mod crypto;
pub mod error;
pub mod pipeline;
pub mod runner;
pub mod store;

pub use base::{
    Block, BlockHeader, BlockPayload, Chunk, ChunkDataPack, Collection, CollectionGuarantee,
    ExecutableBlock, ExecutionResult, StateCommitment, TransactionBody, TransactionResult,
};
pub use crypto::{Hash, Hashable};
pub use error::{Error, ErrorKind, Result};
pub use pipeline::{
    ChainConfig, CollectionRequester, ComputationResult, Message, PipelineConfig, PipelineService,
};
pub use runner::Runner;
pub use store::{Snapshot, StateView, Store};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const VERSION_MAJOR: &str = env!("CARGO_PKG_VERSION_MAJOR");
pub const VERSION_MINOR: &str = env!("CARGO_PKG_VERSION_MINOR");
pub const VERSION_PATCH: &str = env!("CARGO_PKG_VERSION_PATCH");
pub const VERSION_PRE: &str = env!("CARGO_PKG_VERSION_PRE");
