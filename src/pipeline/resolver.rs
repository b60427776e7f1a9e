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

//! Collection request table.
//!
//! Translates the missing-collection descriptors emitted by the block queue
//! into outstanding requests towards a [`CollectionRequester`], deduplicating
//! ids shared across blocks. The transport behind the requester is not this
//! crate's business; collection guarantors, gossip, whatever the embedder
//! wires in.
//!
//! Delivered bodies flow into the block queue by the pipeline worker, which
//! then clears the table entry here. A sweep re-issues requests that have
//! been outstanding for too long, oldest first.

use crate::{base::queue_set::QueueSet, crypto::Hash, pipeline::queue::MissingCollection};
#[cfg(test)]
use mockall::automock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Outbound side of collection fetching, supplied at construction.
#[cfg_attr(test, automock)]
pub trait CollectionRequester: Send + Sync + 'static {
    /// Ask the network layer for the given collections.
    fn request_collections(&self, missing: &[MissingCollection]);
}

struct PendingRequest {
    descriptor: MissingCollection,
    requested_at: Instant,
}

/// Deduplicating request table.
pub struct CollectionResolver<R: CollectionRequester> {
    requester: R,
    /// Outstanding collection ids, oldest request first.
    outstanding: QueueSet<Hash>,
    /// Request bookkeeping by collection id.
    requests: HashMap<Hash, PendingRequest>,
}

impl<R: CollectionRequester> CollectionResolver<R> {
    pub fn new(requester: R) -> Self {
        CollectionResolver {
            requester,
            outstanding: QueueSet::new(),
            requests: HashMap::new(),
        }
    }

    /// Number of collections currently on the wire.
    pub fn outstanding_len(&self) -> usize {
        self.outstanding.len()
    }

    /// Issue requests for the given descriptors.
    ///
    /// Ids already pending are skipped; re-requesting is a no-op. Only the
    /// genuinely new descriptors reach the requester.
    pub fn request(&mut self, missing: &[MissingCollection]) {
        let mut fresh = Vec::with_capacity(missing.len());
        for descriptor in missing {
            let col_id = descriptor.id();
            if !self.outstanding.push(col_id) {
                continue;
            }
            self.requests.insert(
                col_id,
                PendingRequest {
                    descriptor: descriptor.clone(),
                    requested_at: Instant::now(),
                },
            );
            fresh.push(descriptor.clone());
        }
        if !fresh.is_empty() {
            debug!("requesting {} collections", fresh.len());
            self.requester.request_collections(&fresh);
        }
    }

    /// Clear the table entry for a delivered collection.
    /// Unsolicited deliveries are ignored.
    pub fn on_delivery(&mut self, collection_id: &Hash) {
        if self.outstanding.remove(collection_id) {
            self.requests.remove(collection_id);
        }
    }

    /// Re-issue every request outstanding for longer than `older_than`,
    /// oldest first, refreshing its age.
    pub fn requeue_stale(&mut self, older_than: Duration) {
        let now = Instant::now();
        let mut stale = Vec::new();
        for col_id in self.outstanding.iter() {
            let request = self
                .requests
                .get(col_id)
                .expect("outstanding id without request entry");
            if now.duration_since(request.requested_at) >= older_than {
                stale.push(request.descriptor.clone());
            }
        }
        if stale.is_empty() {
            return;
        }

        warn!("re-requesting {} stale collections", stale.len());
        for descriptor in &stale {
            if let Some(request) = self.requests.get_mut(&descriptor.id()) {
                request.requested_at = now;
            }
        }
        self.requester.request_collections(&stale);
    }
}
