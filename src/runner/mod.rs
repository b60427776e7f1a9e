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

//! Transaction virtual machine seam.
//!
//! The pipeline never interprets transaction scripts. A [`Runner`]
//! implementation is supplied at construction and invoked once per
//! transaction with the state view and the per-block program cache.

use crate::{
    base::schema::{ContractEvent, TransactionBody},
    crypto::Hash,
    error::*,
    store::StateView,
};
#[cfg(test)]
use mockall::automock;

pub mod cache;

pub use cache::{Program, ProgramCache};

/// Trait implemented by the transaction virtual machine.
#[cfg_attr(test, automock)]
pub trait Runner: Send + 'static {
    /// Execute a single transaction against the view.
    ///
    /// Emitted events are appended to `events` with `emitter`, `name` and
    /// `payload` set; the caller assigns indices and the transaction id,
    /// and discards the events if the execution fails.
    ///
    /// Writes performed through the view and programs staged in the cache
    /// are kept or discarded by the caller according to the outcome; the
    /// runner itself never rolls anything back.
    ///
    /// # Errors
    ///
    /// An error is the transaction failure report. For user transactions it
    /// becomes `TransactionResult::error_message`; for the system
    /// transaction it is fatal.
    #[allow(clippy::too_many_arguments)]
    fn run(
        &mut self,
        view: &mut StateView,
        cache: &mut ProgramCache,
        block_id: Hash,
        height: u64,
        tx_index: u32,
        system: bool,
        tx: &TransactionBody,
        events: &mut Vec<ContractEvent>,
    ) -> Result<Vec<u8>>;
}
