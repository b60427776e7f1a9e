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

//! Pending block queue.
//!
//! Keeps track of the blocks known but not yet executed and of the
//! collection bodies they are waiting for. A block becomes executable when
//! all the following conditions are met:
//! 1. the block has been certified upstream;
//! 2. the block's parent has been executed;
//! 3. all the collections included in the block have been received.
//!
//! The queue owns three indices, always mutated together under the caller's
//! single lock: blocks by id, collection bodies by collection id (with the
//! set of blocks including each collection), and block ids by height (for
//! finding children when a block is executed).

use crate::{
    base::schema::{
        Block, Collection, CollectionGuarantee, CompleteCollection, ExecutableBlock,
        StateCommitment,
    },
    crypto::Hash,
    error::*,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Descriptor of a collection body some pending block is waiting for.
/// Handed to the collection resolver; not an error.
#[derive(Debug, Clone, PartialEq)]
pub struct MissingCollection {
    /// Requesting block identifier.
    pub block_id: Hash,
    /// Requesting block height, a hint for request prioritization.
    pub height: u64,
    /// The guarantee naming the collection and its attestors.
    pub guarantee: CollectionGuarantee,
}

impl MissingCollection {
    pub fn id(&self) -> Hash {
        self.guarantee.collection_id
    }
}

/// State of one collection and the blocks that include it.
struct CollectionInfo {
    /// Body, `None` until delivered.
    collection: Option<Arc<Collection>>,
    /// Identifiers of the pending blocks whose payload includes the
    /// collection. Every entry refers to a block currently in `blocks`.
    included_in: HashSet<Hash>,
}

/// Index of pending blocks and their outstanding dependencies.
#[derive(Default)]
pub struct BlockQueue {
    /// Pending blocks by block id.
    blocks: HashMap<Hash, ExecutableBlock>,
    /// Collection state by collection id. An entry exists while at least one
    /// pending block includes the collection.
    collections: HashMap<Hash, CollectionInfo>,
    /// Pending block ids by height, for finding the children of an executed
    /// block at `height + 1`.
    blocks_by_height: BTreeMap<u64, HashSet<Hash>>,
}

impl BlockQueue {
    pub fn new() -> Self {
        BlockQueue::default()
    }

    /// Number of pending blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn contains(&self, block_id: &Hash) -> bool {
        self.blocks.contains_key(block_id)
    }

    /// Submit a certified block.
    ///
    /// If the parent has already been executed the caller passes the parent
    /// final state in `parent_final_state`; otherwise the parent must
    /// already be in the queue.
    ///
    /// Returns the descriptors of the collections to fetch and the blocks
    /// that became executable (at most the submitted one, or the pending
    /// children of an already-executed parent on the duplicate path).
    pub fn on_block(
        &mut self,
        block: Block,
        parent_final_state: Option<StateCommitment>,
    ) -> Result<(Vec<MissingCollection>, Vec<ExecutableBlock>)> {
        let block_id = block.id();

        // Handle the case where the block has been seen before.
        if let Some(existing) = self.blocks.get(&block_id) {
            return match (existing.start_state, parent_final_state) {
                // Still waiting for the parent on both sides.
                (None, None) => Ok((vec![], vec![])),
                // The caller knows the parent is executed while the parent
                // entry is still sitting in the queue unexecuted. Mark the
                // parent as executed on its behalf; the collections of this
                // block have already been requested when it was first seen.
                (None, Some(state)) => {
                    let parent_id = block.header.parent_id;
                    let executables = self.process_block_executed(&parent_id, state)?;
                    Ok((vec![], executables))
                }
                (Some(existing_state), Some(state)) => {
                    if existing_state != state {
                        Err(Error::new_ext(
                            ErrorKind::InconsistentParentState,
                            format!(
                                "block {} resubmitted with parent state {}, had {}",
                                hex::encode(block_id),
                                hex::encode(state),
                                hex::encode(existing_state),
                            ),
                        ))
                    } else {
                        Ok((vec![], vec![]))
                    }
                }
                (Some(_), None) => {
                    warn!(
                        "block {} resubmitted without parent state, but its parent is executed",
                        hex::encode(block_id)
                    );
                    Ok((vec![], vec![]))
                }
            };
        }

        // A block without a parent commitment needs its parent in the queue,
        // otherwise nothing will ever populate its start state.
        if parent_final_state.is_none() && !self.blocks.contains_key(&block.header.parent_id) {
            return Err(Error::new_ext(
                ErrorKind::UnknownParent,
                format!(
                    "parent {} of block {} is not in the queue",
                    hex::encode(block.header.parent_id),
                    hex::encode(block_id),
                ),
            ));
        }

        let height = block.header.height;
        let mut executable = ExecutableBlock {
            block: Arc::new(block),
            complete_collections: HashMap::new(),
            start_state: parent_final_state,
        };

        // Populate the collection entries, recording which bodies are still
        // on the wire. A collection already indexed for a sibling fork is
        // shared, body included.
        let mut missing = Vec::with_capacity(executable.block.payload.guarantees.len());
        for guarantee in &executable.block.payload.guarantees {
            let col_id = guarantee.collection_id;
            let info = self.collections.entry(col_id).or_insert_with(|| {
                missing.push(MissingCollection {
                    block_id,
                    height,
                    guarantee: guarantee.clone(),
                });
                CollectionInfo {
                    collection: None,
                    included_in: HashSet::new(),
                }
            });
            info.included_in.insert(block_id);
            executable.complete_collections.insert(
                col_id,
                CompleteCollection {
                    guarantee: guarantee.clone(),
                    collection: info.collection.clone(),
                },
            );
        }

        self.blocks_by_height
            .entry(height)
            .or_insert_with(HashSet::new)
            .insert(block_id);

        let executables = if executable.is_complete() {
            vec![executable.clone()]
        } else {
            vec![]
        };
        self.blocks.insert(block_id, executable);

        Ok((missing, executables))
    }

    /// Deliver a collection body.
    ///
    /// Returns every pending block that became complete with this delivery.
    /// Redelivering an already stored collection returns nothing: the
    /// executable side effect fires exactly once, when the body first lands.
    pub fn on_collection(&mut self, collection: Collection) -> Vec<ExecutableBlock> {
        let col_id = collection.id();

        let info = match self.collections.get_mut(&col_id) {
            Some(info) => info,
            // No pending block references the collection, e.g. every
            // including block has been executed through a sibling delivery.
            None => return vec![],
        };
        if info.collection.is_some() {
            return vec![];
        }

        let body = Arc::new(collection);
        info.collection = Some(body.clone());

        let included_in: Vec<Hash> = info.included_in.iter().copied().collect();
        let mut executables = Vec::new();
        for block_id in included_in {
            let block = self
                .blocks
                .get_mut(&block_id)
                .expect("collection index referencing unknown block");
            if let Some(cc) = block.complete_collections.get_mut(&col_id) {
                cc.collection = Some(body.clone());
            }
            if block.is_complete() {
                executables.push(block.clone());
            }
        }

        executables
    }

    /// Mark a block as executed with its final state commitment.
    ///
    /// The block leaves every index; its collections are dropped unless a
    /// sibling still references them. Children waiting at the next height
    /// get their start state populated; the complete ones are returned.
    pub fn on_block_executed(
        &mut self,
        block_id: &Hash,
        final_state: StateCommitment,
    ) -> Result<Vec<ExecutableBlock>> {
        self.process_block_executed(block_id, final_state)
    }

    fn process_block_executed(
        &mut self,
        block_id: &Hash,
        final_state: StateCommitment,
    ) -> Result<Vec<ExecutableBlock>> {
        let block = match self.blocks.remove(block_id) {
            Some(block) => block,
            None => return Ok(vec![]),
        };

        // Remove the height index entry.
        let height = block.height();
        if let Some(at_height) = self.blocks_by_height.get_mut(&height) {
            at_height.remove(block_id);
            if at_height.is_empty() {
                self.blocks_by_height.remove(&height);
            }
        }

        // Drop the collection entries nobody references anymore.
        for col_id in block.complete_collections.keys() {
            let info = self.collections.get_mut(col_id).ok_or_else(|| {
                Error::new_ext(
                    ErrorKind::IntegrityFault,
                    format!("collection {} not indexed", hex::encode(col_id.as_bytes())),
                )
            })?;
            info.included_in.remove(block_id);
            if info.included_in.is_empty() {
                self.collections.remove(col_id);
            }
        }

        Ok(self.wake_children(&block, final_state))
    }

    /// Populate the start state of the executed block's children and collect
    /// the ones that became complete.
    fn wake_children(
        &mut self,
        block: &ExecutableBlock,
        final_state: StateCommitment,
    ) -> Vec<ExecutableBlock> {
        let child_height = block.height() + 1;
        let at_height = match self.blocks_by_height.get(&child_height) {
            Some(ids) => ids.iter().copied().collect::<Vec<_>>(),
            None => return vec![],
        };

        let block_id = block.id();
        let mut executables = Vec::new();
        for child_id in at_height {
            let child = self
                .blocks
                .get_mut(&child_id)
                .expect("height index referencing unknown block");
            if child.block.header.parent_id != block_id {
                continue;
            }
            child.start_state = Some(final_state);
            if child.is_complete() {
                executables.push(child.clone());
            }
        }
        executables
    }

    /// Outstanding collection descriptors and the known start state of a
    /// pending block. Used to re-request dependencies after a restart.
    pub fn get_missing(
        &self,
        block_id: &Hash,
    ) -> Result<(Vec<MissingCollection>, Option<StateCommitment>)> {
        let block = self.blocks.get(block_id).ok_or_else(|| {
            Error::new_ext(
                ErrorKind::ResourceNotFound,
                format!("block {} not in the queue", hex::encode(block_id.as_bytes())),
            )
        })?;

        let missing = block
            .complete_collections
            .values()
            .filter(|cc| !cc.is_completed())
            .map(|cc| MissingCollection {
                block_id: *block_id,
                height: block.height(),
                guarantee: cc.guarantee.clone(),
            })
            .collect();

        Ok((missing, block.start_state))
    }
}
