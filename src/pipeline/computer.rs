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

//! Deterministic block execution.
//!
//! Runs the ordered transactions of a complete executable block against a
//! view of state, chunk by chunk. Transactions within a chunk share the
//! view and see each other's writes; a failed transaction has its writes
//! and staged programs discarded but still produces a transaction result.
//! Each chunk delta is handed to the committer before the next chunk runs,
//! and the system chunk always closes the block.

use crate::{
    base::{
        schema::{ExecutableBlock, ServiceEvent, TransactionResult},
        Mutex, RwLock,
    },
    crypto::Hash,
    error::*,
    pipeline::{
        assembler::{ChunkAssembler, ComputationResult},
        committer::ViewCommitter,
        ordering::{order_block, ChainConfig},
        CancelFlag,
    },
    runner::{ProgramCache, Runner},
    store::{Snapshot, StateView, Store},
};
use std::sync::Arc;

/// Block computer context data.
pub struct BlockComputer<S: Store, R: Runner> {
    /// Instance of a type implementing the store trait.
    store: Arc<RwLock<S>>,
    /// Instance of a type implementing the transaction runner trait.
    runner: Arc<Mutex<R>>,
    /// Chain-fixed execution parameters.
    chain: Arc<ChainConfig>,
    /// Chunk delta committer.
    committer: ViewCommitter<S>,
}

impl<S: Store, R: Runner> Clone for BlockComputer<S, R> {
    fn clone(&self) -> Self {
        BlockComputer {
            store: self.store.clone(),
            runner: self.runner.clone(),
            chain: self.chain.clone(),
            committer: self.committer.clone(),
        }
    }
}

impl<S: Store, R: Runner> BlockComputer<S, R> {
    pub fn new(store: Arc<RwLock<S>>, runner: Arc<Mutex<R>>, chain: Arc<ChainConfig>) -> Self {
        let committer = ViewCommitter::new(store.clone());
        BlockComputer {
            store,
            runner,
            chain,
            committer,
        }
    }

    /// Execute a complete block.
    ///
    /// `previous_result_id` is the result id of the parent block's
    /// execution, threaded into the produced result. The program cache is
    /// per block, owned by the caller for the duration of this invocation.
    ///
    /// Cancellation is honored between chunks: nothing is persisted, the
    /// error is `Canceled` and the caller keeps the block pending.
    pub fn execute(
        &self,
        previous_result_id: Hash,
        executable: &ExecutableBlock,
        cache: &mut ProgramCache,
        cancel: &CancelFlag,
    ) -> Result<ComputationResult> {
        let block_id = executable.id();
        let height = executable.height();
        let start_state = executable.start_state.ok_or_else(|| {
            Error::new_ext(
                ErrorKind::Other,
                format!("executing block {} without start state", hex::encode(block_id)),
            )
        })?;

        debug!(
            "executing block {} at height {}",
            hex::encode(block_id),
            height
        );

        let snapshot = self.store.read().snapshot(&start_state)?;
        let mut view = StateView::new(Arc::new(snapshot) as Arc<dyn Snapshot>);
        let mut assembler = ChunkAssembler::new(block_id, previous_result_id, start_state);

        let mut tx_results: Vec<TransactionResult> = Vec::new();
        let mut service_events: Vec<ServiceEvent> = Vec::new();
        let mut tx_index: u32 = 0;

        for chunk in order_block(&self.chain, executable) {
            if cancel.is_canceled() {
                return Err(Error::new(ErrorKind::Canceled));
            }

            let mut chunk_events = Vec::new();
            let mut usage = crate::base::schema::ComputationUsage::default();

            for tx in chunk.transactions() {
                let tx_id = tx.id();
                let mut events = Vec::new();

                let outcome = self.runner.lock().run(
                    &mut view,
                    cache,
                    block_id,
                    height,
                    tx_index,
                    chunk.is_system(),
                    tx,
                    &mut events,
                );

                match outcome {
                    Ok(_returns) => {
                        view.flush();
                        cache.commit_tx();

                        for (event_index, event) in events.iter_mut().enumerate() {
                            event.tx_id = tx_id;
                            event.tx_index = tx_index;
                            event.event_index = event_index as u32;
                        }
                        for event in &events {
                            if let Some(kind) =
                                self.chain.service_event_kind(&event.emitter, &event.name)
                            {
                                service_events.push(ServiceEvent {
                                    kind,
                                    event: event.clone(),
                                });
                            }
                        }
                        usage.events += events.len() as u32;
                        chunk_events.append(&mut events);
                        tx_results.push(TransactionResult {
                            tx_id,
                            error_message: String::new(),
                        });
                    }
                    Err(err) => {
                        // The block-closing transaction is expected never to
                        // fail; if it does the whole block execution is
                        // poisoned.
                        if chunk.is_system() {
                            return Err(Error::new_ext(
                                ErrorKind::SystemChunkFailure,
                                err.to_string_full(),
                            ));
                        }
                        view.rollback();
                        cache.abort_tx();
                        debug!(
                            "transaction {} failed: {}",
                            hex::encode(tx_id),
                            err.to_string_full()
                        );
                        usage.failed += 1;
                        tx_results.push(TransactionResult {
                            tx_id,
                            error_message: err.to_string_full(),
                        });
                    }
                }
                usage.transactions += 1;
                tx_index += 1;
            }

            let chunk_start = assembler.current_state();
            let update = view.take_chunk_update(chunk_start);
            usage.registers_touched = view.take_touched_count();

            let (end_state, proof) = self.committer.commit(&update)?;
            assembler.add_chunk(
                chunk.collection.as_deref(),
                chunk.tx_count(),
                end_state,
                proof,
                update,
                chunk_events,
                usage,
            );
        }

        assembler.finish(tx_results, service_events)
    }
}
