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

//! Thread-hosted pipeline service.
//!
//! Wraps the worker loop in a dedicated thread and exposes the message
//! channel everything else talks through. On startup the worker reads back
//! the progress persisted by a previous run, so the embedder can resume the
//! certified block stream from the right height.

use super::{
    message::{Message, PipelineRequestSender},
    ordering::ChainConfig,
    resolver::CollectionRequester,
    worker::PipelineWorker,
    CancelFlag,
};
use crate::{base::RwLock, channel::confirmed_channel, runner::Runner, store::Store};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Pipeline service configuration.
pub struct PipelineConfig {
    /// Max number of blocks executing concurrently.
    pub max_concurrent_blocks: usize,
    /// Outstanding collection requests older than this are re-issued.
    pub collection_request_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            max_concurrent_blocks: 4,
            collection_request_timeout: Duration::from_secs(10),
        }
    }
}

/// Pipeline service data.
pub struct PipelineService<S: Store, R: Runner, Q: CollectionRequester> {
    /// Worker object.
    worker: Option<PipelineWorker<S, R, Q>>,
    /// Threads data.
    handler: Option<JoinHandle<PipelineWorker<S, R, Q>>>,
    /// To send messages to the worker.
    tx_chan: PipelineRequestSender,
    /// Store shared reference.
    store: Arc<RwLock<S>>,
    /// Worker cancellation flag.
    cancel: CancelFlag,
    /// To check if the worker thread is still alive.
    canary: Arc<()>,
}

impl<S: Store, R: Runner, Q: CollectionRequester> PipelineService<S, R, Q> {
    /// Create a new pipeline service instance.
    pub fn new(config: PipelineConfig, chain: ChainConfig, store: S, runner: R, requester: Q) -> Self {
        let (tx_chan, rx_chan) = confirmed_channel::<Message, Message>();

        let mut worker = PipelineWorker::new(config, chain, store, runner, requester, rx_chan);
        let store = worker.store_arc();
        let cancel = worker.cancel_flag();

        PipelineService {
            worker: Some(worker),
            handler: None,
            tx_chan,
            store,
            cancel,
            canary: Arc::new(()),
        }
    }

    /// Start the pipeline service.
    pub fn start(&mut self) {
        debug!("starting pipeline service");
        let mut worker = match self.worker.take() {
            Some(worker) => worker,
            None => {
                warn!("service was already running");
                return;
            }
        };

        worker.rehydrate();

        let mut canary = Arc::clone(&self.canary);
        let handle = thread::spawn(move || {
            let _ = Arc::get_mut(&mut canary);
            worker.run_sync();
            worker
        });
        self.handler = Some(handle);
    }

    /// Stop the pipeline service. In-flight block executions are dropped at
    /// the next chunk boundary, with nothing persisted for them.
    pub fn stop(&mut self) {
        debug!("stopping pipeline service");
        match self.handler.take() {
            Some(handle) => {
                self.cancel.cancel();
                if let Err(err) = self.tx_chan.send_sync(Message::Stop) {
                    error!("error stopping pipeline service thread: {:?}", err);
                }
                let worker = handle.join().unwrap();
                self.worker = Some(worker);
            }
            None => {
                debug!("service was not running");
            }
        };
    }

    /// Check if the service is running.
    pub fn is_running(&self) -> bool {
        // Hack to intercept crashed subthreads.
        Arc::strong_count(&self.canary) == 2 && self.worker.is_none()
    }

    /// Get a clone of the pipeline input channel.
    pub fn request_channel(&self) -> PipelineRequestSender {
        self.tx_chan.clone()
    }

    /// Get a shared reference to the store.
    pub fn store_arc(&mut self) -> Arc<RwLock<S>> {
        self.store.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::schema::tests::create_test_block;
    use crate::crypto::Hash;
    use crate::pipeline::resolver::MockCollectionRequester;
    use crate::runner::MockRunner;
    use crate::store::MemoryStore;

    const RECV_TIMEOUT: Duration = Duration::from_secs(5);

    fn create_service(
        runner: MockRunner,
    ) -> PipelineService<MemoryStore, MockRunner, MockCollectionRequester> {
        let mut requester = MockCollectionRequester::new();
        requester.expect_request_collections().return_const(());

        PipelineService::new(
            PipelineConfig::default(),
            ChainConfig::for_chain("testnet"),
            MemoryStore::new(),
            runner,
            requester,
        )
    }

    #[test]
    fn start_stop() {
        let mut svc = create_service(MockRunner::new());

        svc.start();
        assert!(svc.is_running());

        svc.stop();
        assert!(!svc.is_running());
    }

    #[test]
    fn stopped_subthread() {
        let mut svc = create_service(MockRunner::new());

        svc.start();
        assert!(svc.is_running());

        svc.request_channel().send_sync(Message::Stop).unwrap();
        std::thread::sleep(std::time::Duration::from_secs(1));

        assert!(!svc.is_running());
        svc.stop();
    }

    #[test]
    fn execute_a_chain_end_to_end() {
        let mut runner = MockRunner::new();
        // Two empty blocks, one system transaction each.
        runner
            .expect_run()
            .times(2)
            .returning(|_, _, _, _, _, _, _, _| Ok(vec![]));
        let mut svc = create_service(runner);
        let chan = svc.request_channel();
        svc.start();

        let parent = create_test_block(Hash::default(), 1, &[]);
        let child = create_test_block(parent.id(), 2, &[]);
        let child_id = child.id();

        let res = chan
            .send_sync(Message::PutBlockRequest {
                block: parent,
                parent_final_state: Some(MemoryStore::empty_commitment()),
            })
            .unwrap()
            .recv_timeout_sync(RECV_TIMEOUT)
            .unwrap();
        assert!(matches!(res, Message::PutBlockResponse { .. }));

        let res = chan
            .send_sync(Message::PutBlockRequest {
                block: child,
                parent_final_state: None,
            })
            .unwrap()
            .recv_timeout_sync(RECV_TIMEOUT)
            .unwrap();
        assert!(matches!(res, Message::PutBlockResponse { .. }));

        // Poll until the child's result lands in the store.
        let deadline = std::time::Instant::now() + RECV_TIMEOUT;
        let result = loop {
            let res = chan
                .send_sync(Message::GetResultRequest { block_id: child_id })
                .unwrap()
                .recv_timeout_sync(RECV_TIMEOUT)
                .unwrap();
            match res {
                Message::GetResultResponse { result } => break result,
                Message::Exception(_) if std::time::Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(20));
                }
                other => panic!("unexpected response: {:?}", other),
            }
        };

        assert_eq!(result.block_id, child_id);
        assert_eq!(result.chunks.len(), 1);

        svc.stop();
    }

    #[test]
    fn block_executed_subscription() {
        let mut runner = MockRunner::new();
        runner
            .expect_run()
            .times(1)
            .returning(|_, _, _, _, _, _, _, _| Ok(vec![]));
        let mut svc = create_service(runner);
        let chan = svc.request_channel();
        svc.start();

        let sub_chan = chan
            .send_sync(Message::Subscribe {
                id: "test".to_string(),
                events: crate::pipeline::Event::BLOCK_EXECUTED,
            })
            .unwrap();

        let block = create_test_block(Hash::default(), 1, &[]);
        let block_id = block.id();
        chan.send_sync(Message::PutBlockRequest {
            block,
            parent_final_state: Some(MemoryStore::empty_commitment()),
        })
        .unwrap();

        let notification = sub_chan.recv_timeout_sync(RECV_TIMEOUT).unwrap();
        match notification {
            Message::GetResultResponse { result } => assert_eq!(result.block_id, block_id),
            other => panic!("unexpected notification: {:?}", other),
        }

        svc.stop();
    }
}
