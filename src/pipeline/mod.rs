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

//! Block execution pipeline components.
//!
//! This module contains the logic to execute certified blocks against the
//! authenticated state and to publish the resulting execution artifacts.
//!
//! The service exploits several sub-modules to perform specialized works,
//! in particular:
//! - queue: tracks pending blocks and their outstanding dependencies.
//! - resolver: deduplicates and issues collection requests.
//! - ordering: lays chunks out canonically and appends the system chunk.
//! - computer: runs the ordered transactions of one block.
//! - committer: turns chunk deltas into state commitments and proofs.
//! - assembler: binds per-chunk artifacts into the computation result.
//! - worker: drives everything with bounded parallelism.
//!
//! External components interact with the pipeline service via message
//! passing.

pub(crate) mod computer;
pub(crate) mod queue;
pub(crate) mod resolver;

pub mod assembler;
pub mod cadence;
pub mod committer;
pub mod message;
pub mod ordering;
pub mod pubsub;
pub mod service;
pub mod worker;

pub use assembler::ComputationResult;
pub use message::{
    CoreStats, Message, PipelineRequestReceiver, PipelineRequestSender, PipelineResponseReceiver,
    PipelineResponseSender,
};
pub use ordering::{ChainConfig, ServiceEventDescriptor};
pub use pubsub::Event;
pub use queue::{BlockQueue, MissingCollection};
pub use resolver::{CollectionRequester, CollectionResolver};
pub use service::{PipelineConfig, PipelineService};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag threaded into every execution task.
///
/// Once raised it never resets; the pipeline is shutting down.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        CancelFlag::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
