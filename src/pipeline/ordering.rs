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

//! Canonical per-block transaction ordering.
//!
//! Chunks 0..n-1 map one-to-one onto the payload guarantees, in payload
//! order, with transactions in collection order. Chunk n is the system
//! chunk: a single synthetic transaction fixed by chain configuration and
//! derived purely from the block header, present for every block including
//! ones with no user collections.

use crate::{
    base::schema::{
        Block, BlockHeader, Collection, ExecutableBlock, ServiceEventKind, TransactionBody,
    },
    crypto::Hashable,
};
use std::sync::Arc;

/// Identifies service events by their emitter and qualified name.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceEventDescriptor {
    pub emitter: String,
    pub name: String,
    pub kind: ServiceEventKind,
}

/// Chain-fixed parameters the pipeline executes under.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Chain identifier, part of every system transaction.
    pub chain_id: String,
    /// Account authorizing and paying for system transactions.
    pub service_account: String,
    /// Script of the block-closing system transaction.
    pub system_script: Vec<u8>,
    /// Descriptors of the events the system contracts emit for higher
    /// layers.
    pub service_events: Vec<ServiceEventDescriptor>,
}

impl ChainConfig {
    /// Conventional configuration for the named chain: the service account
    /// hosts the system contracts and emits the epoch and version events.
    pub fn for_chain(chain_id: &str) -> Self {
        let service_account = "service".to_string();
        ChainConfig {
            chain_id: chain_id.to_string(),
            service_account: service_account.clone(),
            system_script: b"system.close_block()".to_vec(),
            service_events: vec![
                ServiceEventDescriptor {
                    emitter: service_account.clone(),
                    name: "epoch.Setup".to_string(),
                    kind: ServiceEventKind::EpochSetup,
                },
                ServiceEventDescriptor {
                    emitter: service_account.clone(),
                    name: "epoch.Commit".to_string(),
                    kind: ServiceEventKind::EpochCommit,
                },
                ServiceEventDescriptor {
                    emitter: service_account,
                    name: "version.Beacon".to_string(),
                    kind: ServiceEventKind::VersionBeacon,
                },
            ],
        }
    }

    /// Classify an event; `None` for ordinary contract events.
    pub fn service_event_kind(&self, emitter: &str, name: &str) -> Option<ServiceEventKind> {
        self.service_events
            .iter()
            .find(|descriptor| descriptor.emitter == emitter && descriptor.name == name)
            .map(|descriptor| descriptor.kind)
    }

    /// The synthetic transaction closing every block. A pure function of the
    /// chain configuration and the block header: no wallclock, no
    /// user-supplied fields.
    pub fn system_transaction(&self, header: &BlockHeader) -> TransactionBody {
        #[derive(Serialize)]
        struct SystemTxArgs<'a> {
            chain_id: &'a str,
            height: u64,
        }

        let args = SystemTxArgs {
            chain_id: &self.chain_id,
            height: header.height,
        };
        let args = crate::base::serialize::rmp_serialize(&args)
            .expect("args serialization"); // Safe for plain structs.
        TransactionBody {
            script: self.system_script.clone(),
            arguments: vec![serde_bytes::ByteBuf::from(args)],
            authorizers: vec![self.service_account.clone()],
            payer: self.service_account.clone(),
            nonce: header.primary_hash().to_bytes(),
        }
    }
}

/// One execution unit of a block in canonical order.
pub struct OrderedChunk {
    /// Dense chunk index within the block.
    pub index: u64,
    /// The user collection; `None` for the system chunk.
    pub collection: Option<Arc<Collection>>,
    /// The synthetic transaction; `Some` only for the system chunk.
    system_tx: Option<TransactionBody>,
}

impl OrderedChunk {
    pub fn is_system(&self) -> bool {
        self.collection.is_none()
    }

    pub fn tx_count(&self) -> u32 {
        match &self.collection {
            Some(collection) => collection.len() as u32,
            None => 1,
        }
    }

    /// Transactions of the chunk in execution order.
    pub fn transactions(&self) -> &[TransactionBody] {
        match &self.collection {
            Some(collection) => &collection.transactions,
            None => std::slice::from_ref(self.system_tx.as_ref().expect("system chunk body")),
        }
    }
}

/// Lay out the chunks of a complete executable block.
pub fn order_block(chain: &ChainConfig, executable: &ExecutableBlock) -> Vec<OrderedChunk> {
    let collections = executable.collections_in_order();
    let mut chunks = Vec::with_capacity(collections.len() + 1);
    for (index, (_, collection)) in collections.into_iter().enumerate() {
        chunks.push(OrderedChunk {
            index: index as u64,
            collection: Some(collection),
            system_tx: None,
        });
    }
    chunks.push(system_chunk(chain, &executable.block, chunks.len() as u64));
    chunks
}

fn system_chunk(chain: &ChainConfig, block: &Block, index: u64) -> OrderedChunk {
    OrderedChunk {
        index,
        collection: None,
        system_tx: Some(chain.system_transaction(&block.header)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::schema::tests::{create_test_block, create_test_collection};
    use crate::base::schema::CompleteCollection;
    use crate::crypto::Hash;
    use std::collections::HashMap;

    fn create_executable(collections: &[Collection]) -> ExecutableBlock {
        let block = create_test_block(Hash::default(), 1, collections);
        let mut complete_collections = HashMap::new();
        for (guarantee, collection) in block.payload.guarantees.iter().zip(collections) {
            complete_collections.insert(
                guarantee.collection_id,
                CompleteCollection {
                    guarantee: guarantee.clone(),
                    collection: Some(Arc::new(collection.clone())),
                },
            );
        }
        ExecutableBlock {
            block: Arc::new(block),
            complete_collections,
            start_state: Some(Hash::default()),
        }
    }

    #[test]
    fn empty_block_gets_only_the_system_chunk() {
        let chain = ChainConfig::for_chain("testnet");
        let executable = create_executable(&[]);

        let chunks = order_block(&chain, &executable);

        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_system());
        assert_eq!(chunks[0].tx_count(), 1);
        assert_eq!(chunks[0].index, 0);
    }

    #[test]
    fn chunks_follow_payload_order() {
        let chain = ChainConfig::for_chain("testnet");
        let c1 = create_test_collection(&[1, 2]);
        let c2 = create_test_collection(&[3]);
        let executable = create_executable(&[c1.clone(), c2.clone()]);

        let chunks = order_block(&chain, &executable);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].tx_count(), 2);
        assert_eq!(chunks[0].transactions(), &c1.transactions[..]);
        assert_eq!(chunks[1].tx_count(), 1);
        assert_eq!(chunks[1].transactions(), &c2.transactions[..]);
        assert!(chunks[2].is_system());
        assert_eq!(
            chunks.iter().map(|c| c.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn system_transaction_is_deterministic() {
        let chain = ChainConfig::for_chain("testnet");
        let executable = create_executable(&[]);

        let tx1 = chain.system_transaction(&executable.block.header);
        let tx2 = chain.system_transaction(&executable.block.header);

        assert_eq!(tx1, tx2);
        assert_eq!(tx1.authorizers, vec!["service".to_string()]);
        assert_eq!(tx1.payer, "service");
        assert_eq!(tx1.nonce, executable.block.id().to_bytes());
    }

    #[test]
    fn system_transaction_differs_per_block() {
        let chain = ChainConfig::for_chain("testnet");
        let b1 = create_test_block(Hash::default(), 1, &[]);
        let b2 = create_test_block(Hash::default(), 2, &[]);

        assert_ne!(
            chain.system_transaction(&b1.header),
            chain.system_transaction(&b2.header)
        );
    }

    #[test]
    fn service_event_classification() {
        let chain = ChainConfig::for_chain("testnet");

        assert_eq!(
            chain.service_event_kind("service", "epoch.Setup"),
            Some(ServiceEventKind::EpochSetup)
        );
        assert_eq!(
            chain.service_event_kind("service", "version.Beacon"),
            Some(ServiceEventKind::VersionBeacon)
        );
        assert_eq!(chain.service_event_kind("alice", "epoch.Setup"), None);
        assert_eq!(chain.service_event_kind("service", "Transfer"), None);
    }
}
