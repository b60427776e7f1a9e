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

//! Pipeline orchestration worker.
//!
//! Reacts to block and collection deliveries, keeps the block queue fed,
//! and assigns every executable block to an execution task. Parallelism is
//! capped by `max_concurrent_blocks`; blocks past the cap wait in a ready
//! list drained on a scheduling tick and after every handled message.
//!
//! An execution task persists the block's artifacts before the queue learns
//! the block is executed, so no descendant can start executing ahead of its
//! parent's durable result. Fatal errors raise the shared cancel flag,
//! which drains in-flight tasks at the next chunk boundary and stops the
//! worker loop.

use super::{
    computer::BlockComputer,
    message::{CoreStats, Message, PipelineRequestReceiver, PipelineResponseSender},
    ordering::ChainConfig,
    pubsub::{Event, PubSub},
    queue::BlockQueue,
    resolver::{CollectionRequester, CollectionResolver},
    service::PipelineConfig,
    CancelFlag,
};
use crate::{
    base::{
        schema::{Block, ExecutableBlock, StateCommitment},
        serialize::rmp_deserialize,
        Mutex, RwLock,
    },
    crypto::Hash,
    error::*,
    runner::{ProgramCache, Runner},
    store::{HighestExecuted, Store},
};
use async_std::task::{self, Context, Poll};
use futures::future::FutureExt;
use futures::{future, prelude::*};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Ready-list scheduling period.
const SCHED_TICK: Duration = Duration::from_millis(50);

/// Everything an execution task needs, cloned into the task.
pub(crate) struct ExecutionContext<S: Store, R: Runner> {
    computer: BlockComputer<S, R>,
    store: Arc<RwLock<S>>,
    queue: Arc<Mutex<BlockQueue>>,
    /// Blocks ready to execute, waiting for a task slot.
    ready: Arc<Mutex<VecDeque<ExecutableBlock>>>,
    /// Number of blocks currently executing.
    executing: Arc<AtomicUsize>,
    pubsub: Arc<Mutex<PubSub>>,
    cancel: CancelFlag,
}

impl<S: Store, R: Runner> Clone for ExecutionContext<S, R> {
    fn clone(&self) -> Self {
        ExecutionContext {
            computer: self.computer.clone(),
            store: self.store.clone(),
            queue: self.queue.clone(),
            ready: self.ready.clone(),
            executing: self.executing.clone(),
            pubsub: self.pubsub.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<S: Store, R: Runner> ExecutionContext<S, R> {
    /// Execute one block to completion: compute, persist, notify the queue,
    /// publish, and stage the children that became executable.
    ///
    /// Cancellation leaves the queue entry untouched and persists nothing.
    pub(crate) fn execute_block(&self, executable: ExecutableBlock) {
        let block_id = executable.id();
        let parent_id = executable.block.header.parent_id;

        let previous_result_id = self
            .store
            .read()
            .load_result(&parent_id)
            .map(|result| result.id())
            .unwrap_or_default();

        let mut cache = ProgramCache::new();
        let result =
            match self
                .computer
                .execute(previous_result_id, &executable, &mut cache, &self.cancel)
            {
                Ok(result) => result,
                Err(err) if err.kind == ErrorKind::Canceled => {
                    debug!("execution of block {} canceled", hex::encode(block_id));
                    return;
                }
                Err(err) => {
                    error!("block {} execution: {}", hex::encode(block_id), err.to_string_full());
                    self.cancel.cancel();
                    return;
                }
            };

        // Persist everything before the queue hears about the execution, so
        // descendants only ever start on top of a durable result.
        let execution_result = result.execution_result();
        let persisted = (|| -> Result<()> {
            let mut store = self.store.write();
            store.store_result(&execution_result)?;
            for pack in &result.chunk_data_packs {
                store.store_chunk_data_pack(pack)?;
            }
            store.store_commitment(&block_id, &result.end_state)?;
            store.store_highest_executed(&HighestExecuted {
                height: executable.height(),
                block_id,
                state: result.end_state,
            })
        })();
        if let Err(err) = persisted {
            error!(
                "persisting result of block {}: {}",
                hex::encode(block_id),
                err.to_string_full()
            );
            self.cancel.cancel();
            return;
        }

        match self.queue.lock().on_block_executed(&block_id, result.end_state) {
            Ok(executables) => {
                let mut ready = self.ready.lock();
                for executable in executables {
                    ready.push_back(executable);
                }
            }
            Err(err) => {
                error!("queue poisoned: {}", err.to_string_full());
                self.cancel.cancel();
                return;
            }
        }

        let mut pubsub = self.pubsub.lock();
        if pubsub.has_subscribers(Event::BLOCK_EXECUTED) {
            pubsub.publish(
                Event::BLOCK_EXECUTED,
                Message::GetResultResponse {
                    result: execution_result,
                },
            );
        }
        if pubsub.has_subscribers(Event::CHUNK_DATA_PACK) {
            for pack in &result.chunk_data_packs {
                pubsub.publish(
                    Event::CHUNK_DATA_PACK,
                    Message::GetChunkDataPackResponse { pack: pack.clone() },
                );
            }
        }
        if pubsub.has_subscribers(Event::SERVICE_EVENT) {
            for event in &result.service_events {
                pubsub.publish(
                    Event::SERVICE_EVENT,
                    Message::GetServiceEventResponse {
                        event: event.clone(),
                    },
                );
            }
        }
    }
}

pub struct PipelineWorker<S: Store, R: Runner, Q: CollectionRequester> {
    /// Pipeline service configuration.
    config: Arc<PipelineConfig>,
    /// Store shared reference.
    store: Arc<RwLock<S>>,
    /// Pending blocks and their dependencies, under a single lock.
    queue: Arc<Mutex<BlockQueue>>,
    /// Outstanding collection requests.
    resolver: Arc<Mutex<CollectionResolver<Q>>>,
    /// Execution task context template.
    exec_ctx: ExecutionContext<S, R>,
    /// Blocks ready to execute, waiting for a task slot.
    ready: Arc<Mutex<VecDeque<ExecutableBlock>>>,
    /// Number of blocks currently executing.
    executing: Arc<AtomicUsize>,
    /// PubSub subsystem to publish pipeline events.
    pubsub: Arc<Mutex<PubSub>>,
    /// Pipeline requests receiver.
    rx_chan: PipelineRequestReceiver,
    /// Shared cancellation flag.
    cancel: CancelFlag,
}

impl<S: Store, R: Runner, Q: CollectionRequester> PipelineWorker<S, R, Q> {
    pub fn new(
        config: PipelineConfig,
        chain: ChainConfig,
        store: S,
        runner: R,
        requester: Q,
        rx_chan: PipelineRequestReceiver,
    ) -> Self {
        let config = Arc::new(config);
        let store = Arc::new(RwLock::new(store));
        let runner = Arc::new(Mutex::new(runner));
        let chain = Arc::new(chain);
        let queue = Arc::new(Mutex::new(BlockQueue::new()));
        let resolver = Arc::new(Mutex::new(CollectionResolver::new(requester)));
        let ready = Arc::new(Mutex::new(VecDeque::new()));
        let executing = Arc::new(AtomicUsize::new(0));
        let pubsub = Arc::new(Mutex::new(PubSub::new()));
        let cancel = CancelFlag::new();

        let computer = BlockComputer::new(store.clone(), runner, chain);
        let exec_ctx = ExecutionContext {
            computer,
            store: store.clone(),
            queue: queue.clone(),
            ready: ready.clone(),
            executing: executing.clone(),
            pubsub: pubsub.clone(),
            cancel: cancel.clone(),
        };

        PipelineWorker {
            config,
            store,
            queue,
            resolver,
            exec_ctx,
            ready,
            executing,
            pubsub,
            rx_chan,
            cancel,
        }
    }

    /// Read back the execution progress persisted by a previous run.
    /// The embedder resumes the certified block stream from here; pending
    /// blocks re-enter the queue through ordinary submissions, with the
    /// parent commitments recovered from the store.
    pub fn rehydrate(&self) -> Option<HighestExecuted> {
        let highest = self.store.read().load_highest_executed();
        match &highest {
            Some(executed) => info!(
                "resuming above executed block {} at height {}",
                hex::encode(executed.block_id),
                executed.height
            ),
            None => info!("starting from an empty execution state"),
        }
        highest
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Drain the ready list into execution tasks up to the concurrency cap.
    fn try_execute(&self) {
        loop {
            if self.executing.load(Ordering::Relaxed) >= self.config.max_concurrent_blocks {
                return;
            }
            let executable = match self.ready.lock().pop_front() {
                Some(executable) => executable,
                None => return,
            };

            self.executing.fetch_add(1, Ordering::Relaxed);
            let ctx = self.exec_ctx.clone();
            task::spawn(async move {
                ctx.execute_block(executable);
                ctx.executing.fetch_sub(1, Ordering::Relaxed);
            });
        }
    }

    fn handle_put_block(
        &self,
        block: Block,
        parent_final_state: Option<StateCommitment>,
    ) -> Message {
        let block_id = block.id();

        // Redelivery of an already executed block is acknowledged and
        // otherwise ignored.
        if self.store.read().load_commitment(&block_id).is_some() {
            return Message::PutBlockResponse {
                block_id,
                missing: vec![],
            };
        }

        // Recovery path: the parent may have been executed by a previous
        // run, in which case its commitment is in the store rather than in
        // the caller's hands.
        let parent_final_state = parent_final_state
            .or_else(|| self.store.read().load_commitment(&block.header.parent_id));

        match self.queue.lock().on_block(block, parent_final_state) {
            Ok((missing, executables)) => {
                let missing_ids: Vec<Hash> = missing.iter().map(|m| m.id()).collect();
                self.resolver.lock().request(&missing);
                let mut ready = self.ready.lock();
                for executable in executables {
                    ready.push_back(executable);
                }
                Message::PutBlockResponse {
                    block_id,
                    missing: missing_ids,
                }
            }
            Err(err) => {
                if err.is_fatal() {
                    error!("block submission: {}", err.to_string_full());
                    self.cancel.cancel();
                } else {
                    debug!("block submission: {}", err.to_string_full());
                }
                Message::Exception(err)
            }
        }
    }

    fn handle_put_collection(&self, collection: crate::base::schema::Collection) -> Message {
        let collection_id = collection.id();
        let executables = self.queue.lock().on_collection(collection);
        self.resolver.lock().on_delivery(&collection_id);
        let mut ready = self.ready.lock();
        for executable in executables {
            ready.push_back(executable);
        }
        drop(ready);
        Message::PutCollectionResponse { collection_id }
    }

    fn stats(&self) -> CoreStats {
        let highest = self.store.read().load_highest_executed().unwrap_or_default();
        CoreStats {
            pending_blocks: self.queue.lock().len() as u64,
            executing_blocks: self.executing.load(Ordering::Relaxed) as u64,
            outstanding_collections: self.resolver.lock().outstanding_len() as u64,
            highest_executed_height: highest.height,
            highest_executed_id: highest.block_id,
        }
    }

    /// Handle one request, producing the response to send back.
    /// `pack_level` tracks how many `Packed` envelopes wrapped the request.
    fn handle_message(
        &self,
        req: Message,
        res_chan: &PipelineResponseSender,
        pack_level: usize,
    ) -> Option<Message> {
        match req {
            Message::PutBlockRequest {
                block,
                parent_final_state,
            } => {
                let res = self.handle_put_block(block, parent_final_state);
                Some(res)
            }
            Message::PutCollectionRequest { collection } => {
                Some(self.handle_put_collection(collection))
            }
            Message::GetResultRequest { block_id } => {
                match self.store.read().load_result(&block_id) {
                    Some(result) => Some(Message::GetResultResponse { result }),
                    None => Some(Message::Exception(Error::new(ErrorKind::ResourceNotFound))),
                }
            }
            Message::GetChunkDataPackRequest { chunk_id } => {
                match self.store.read().load_chunk_data_pack(&chunk_id) {
                    Some(pack) => Some(Message::GetChunkDataPackResponse { pack }),
                    None => Some(Message::Exception(Error::new(ErrorKind::ResourceNotFound))),
                }
            }
            Message::GetCommitmentRequest { block_id } => {
                match self.store.read().load_commitment(&block_id) {
                    Some(state) => Some(Message::GetCommitmentResponse { state }),
                    None => Some(Message::Exception(Error::new(ErrorKind::ResourceNotFound))),
                }
            }
            Message::GetStatsRequest => Some(Message::GetStatsResponse(self.stats())),
            Message::Subscribe { id, events } => {
                self.pubsub
                    .lock()
                    .subscribe(id, events, pack_level, res_chan.clone());
                None
            }
            Message::Unsubscribe { id, events } => {
                self.pubsub.lock().unsubscribe(id, events);
                None
            }
            Message::Packed { buf } => match rmp_deserialize::<Message>(&buf) {
                Ok(inner) => self.handle_message(inner, res_chan, pack_level + 1),
                Err(err) => Some(Message::Exception(err)),
            },
            _ => Some(Message::Exception(Error::new(ErrorKind::NotImplemented))),
        }
    }

    fn dispatch(&self, req: Message, res_chan: PipelineResponseSender) {
        if let Some(res) = self.handle_message(req, &res_chan, 0) {
            task::spawn(async move {
                if let Err(_err) = res_chan.send(res).await {
                    warn!("pipeline response send error");
                }
            });
        }
    }

    /// Pipeline worker asynchronous task.
    /// This can be stopped by submitting a `Stop` message to its input
    /// channel or by raising the cancel flag.
    pub async fn run(&mut self) {
        let sweep_timeout = self.config.collection_request_timeout;
        let mut tick_sleep = Box::pin(task::sleep(SCHED_TICK));
        let mut sweep_sleep = Box::pin(task::sleep(sweep_timeout));

        let future = future::poll_fn(move |cx: &mut Context<'_>| -> Poll<()> {
            while tick_sleep.poll_unpin(cx).is_ready() {
                self.try_execute();
                tick_sleep = Box::pin(task::sleep(SCHED_TICK));
            }

            while sweep_sleep.poll_unpin(cx).is_ready() {
                self.resolver.lock().requeue_stale(sweep_timeout);
                sweep_sleep = Box::pin(task::sleep(sweep_timeout));
            }

            loop {
                if self.cancel.is_canceled() {
                    return Poll::Ready(());
                }
                match self.rx_chan.poll_next_unpin(cx) {
                    Poll::Ready(Some((Message::Stop, _))) => {
                        self.cancel.cancel();
                        return Poll::Ready(());
                    }
                    Poll::Ready(Some((req, res_chan))) => self.dispatch(req, res_chan),
                    Poll::Ready(None) => return Poll::Ready(()),
                    Poll::Pending => break,
                }

                self.try_execute();
            }
            Poll::Pending
        });

        future.await
    }

    /// Pipeline worker synchronous task.
    /// This can be stopped by submitting a `Stop` message to its input
    /// channel.
    pub fn run_sync(&mut self) {
        task::block_on(self.run());
    }

    // Get a shared reference to the store.
    pub fn store_arc(&mut self) -> Arc<RwLock<S>> {
        self.store.clone()
    }
}
