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

//! Chunk delta committer.
//!
//! Turns a per-chunk register delta into a new state commitment and an
//! update proof by writing through the authenticated store. Transient store
//! failures are retried with a linear backoff; a delta that keeps failing
//! past the retry budget is a `CommitFailure` and takes the pipeline down.
//!
//! The store's content addressing makes the operation idempotent: a retry
//! after a half-applied write lands on the same commitment.

use crate::{
    base::{
        schema::{StateCommitment, TrieUpdate},
        RwLock,
    },
    error::*,
    store::Store,
};
use std::sync::Arc;
use std::time::Duration;

/// Store write retry budget.
const COMMIT_ATTEMPTS: u32 = 3;

/// Base backoff between commit attempts; grows linearly per attempt.
const COMMIT_BACKOFF: Duration = Duration::from_millis(50);

/// Commits chunk deltas for the block computer.
pub struct ViewCommitter<S: Store> {
    store: Arc<RwLock<S>>,
}

impl<S: Store> Clone for ViewCommitter<S> {
    fn clone(&self) -> Self {
        ViewCommitter {
            store: self.store.clone(),
        }
    }
}

impl<S: Store> ViewCommitter<S> {
    pub fn new(store: Arc<RwLock<S>>) -> Self {
        ViewCommitter { store }
    }

    /// Commit a chunk delta.
    ///
    /// Pure function of the update: for an empty write set the state is
    /// unchanged and the proof is the canonical empty proof; otherwise the
    /// outputs come from the store, which converges identical deltas to
    /// identical commitments.
    pub fn commit(&self, update: &TrieUpdate) -> Result<(StateCommitment, Vec<u8>)> {
        if update.is_empty() {
            return Ok((update.start_state, Vec::new()));
        }

        let mut last_err = None;
        for attempt in 0..COMMIT_ATTEMPTS {
            if attempt > 0 {
                std::thread::sleep(COMMIT_BACKOFF * attempt);
            }
            match self.store.write().commit(update) {
                Ok(committed) => return Ok(committed),
                Err(err) if err.kind == ErrorKind::StorageFault => {
                    warn!(
                        "chunk commit attempt {} failed: {}",
                        attempt + 1,
                        err.to_string_full()
                    );
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        let source = last_err.map(|err| err.to_string_full()).unwrap_or_default();
        Err(Error::new_ext(ErrorKind::CommitFailure, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::schema::RegisterEntry;
    use crate::crypto::{Hash, HashAlgorithm};
    use crate::store::MockStore;

    fn create_update() -> TrieUpdate {
        TrieUpdate {
            start_state: Hash::from_data(HashAlgorithm::Sha256, b"c0"),
            writes: vec![RegisterEntry {
                account: "alice".to_string(),
                key: "balance".to_string(),
                value: Some(serde_bytes::ByteBuf::from(vec![1u8])),
            }],
        }
    }

    fn create_committer(store: MockStore) -> ViewCommitter<MockStore> {
        ViewCommitter::new(Arc::new(RwLock::new(store)))
    }

    #[test]
    fn empty_delta_short_circuits() {
        // The store must not even be consulted.
        let store = MockStore::new();
        let committer = create_committer(store);
        let start = Hash::from_data(HashAlgorithm::Sha256, b"c0");

        let (end, proof) = committer
            .commit(&TrieUpdate {
                start_state: start,
                writes: vec![],
            })
            .unwrap();

        assert_eq!(end, start);
        assert!(proof.is_empty());
    }

    #[test]
    fn successful_commit_passes_through() {
        let end_state = Hash::from_data(HashAlgorithm::Sha256, b"c1");
        let mut store = MockStore::new();
        store
            .expect_commit()
            .times(1)
            .returning(move |_| Ok((end_state, vec![0xbe, 0xef])));
        let committer = create_committer(store);

        let (end, proof) = committer.commit(&create_update()).unwrap();

        assert_eq!(end, end_state);
        assert_eq!(proof, vec![0xbe, 0xef]);
    }

    #[test]
    fn transient_fault_is_retried() {
        let end_state = Hash::from_data(HashAlgorithm::Sha256, b"c1");
        let mut attempts = 0;
        let mut store = MockStore::new();
        store.expect_commit().times(2).returning(move |_| {
            attempts += 1;
            if attempts == 1 {
                Err(Error::new_ext(ErrorKind::StorageFault, "disk hiccup"))
            } else {
                Ok((end_state, vec![]))
            }
        });
        let committer = create_committer(store);

        let (end, _) = committer.commit(&create_update()).unwrap();

        assert_eq!(end, end_state);
    }

    #[test]
    fn exhausted_budget_is_a_commit_failure() {
        let mut store = MockStore::new();
        store
            .expect_commit()
            .times(COMMIT_ATTEMPTS as usize)
            .returning(|_| Err(Error::new_ext(ErrorKind::StorageFault, "disk gone")));
        let committer = create_committer(store);

        let err = committer.commit(&create_update()).unwrap_err();

        assert_eq!(err.kind, ErrorKind::CommitFailure);
        assert!(err.is_fatal());
    }

    #[test]
    fn non_storage_error_is_not_retried() {
        let mut store = MockStore::new();
        store
            .expect_commit()
            .times(1)
            .returning(|_| Err(Error::new(ErrorKind::MalformedData)));
        let committer = create_committer(store);

        let err = committer.commit(&create_update()).unwrap_err();

        assert_eq!(err.kind, ErrorKind::MalformedData);
    }
}
