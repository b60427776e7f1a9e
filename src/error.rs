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

//! Library error codes and results.

use serde::{de::Visitor, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};

/// Project-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Max string length when the error is converted to string using `to_string_full`.
const MAX_ERROR_SOURCE_STRING_LENGTH: usize = 128;

/// Error kind to better contextualize the returned error.
///
/// Per-transaction execution failures are deliberately not represented here.
/// They are data carried by `TransactionResult` and never interrupt block
/// execution.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum ErrorKind {
    /// Serialization or framing error.
    MalformedData,
    /// Block submitted without a parent commitment while the parent is not in
    /// the queue. The caller is expected to retry once the parent shows up.
    UnknownParent,
    /// The same block was submitted twice with different parent commitments.
    /// Protocol invariant violation, not recoverable.
    InconsistentParentState,
    /// The synthetic transaction closing a block has failed.
    SystemChunkFailure,
    /// The authenticated store rejected a chunk delta past the retry budget.
    CommitFailure,
    /// A post-execution invariant did not hold (e.g. event root mismatch).
    IntegrityFault,
    /// The backing store failed a read or write.
    StorageFault,
    /// Requested entity is not known to the queue or the store.
    ResourceNotFound,
    /// Work was abandoned because the pipeline has been canceled.
    Canceled,
    NotImplemented,
    Other,
}

/// Error kind strings.
pub(super) mod error_kind_str {
    pub const MALFORMED_DATA: &str = "malformed data";
    pub const UNKNOWN_PARENT: &str = "unknown parent";
    pub const INCONSISTENT_PARENT_STATE: &str = "inconsistent parent state";
    pub const SYSTEM_CHUNK_FAILURE: &str = "system chunk failure";
    pub const COMMIT_FAILURE: &str = "commit failure";
    pub const INTEGRITY_FAULT: &str = "integrity fault";
    pub const STORAGE_FAULT: &str = "storage fault";
    pub const RESOURCE_NOT_FOUND: &str = "resource not found";
    pub const CANCELED: &str = "canceled";
    pub const NOT_IMPLEMENTED: &str = "not implemented";
    pub const OTHER: &str = "other";
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        use ErrorKind::*;
        let kind_str = match self {
            MalformedData => error_kind_str::MALFORMED_DATA,
            UnknownParent => error_kind_str::UNKNOWN_PARENT,
            InconsistentParentState => error_kind_str::INCONSISTENT_PARENT_STATE,
            SystemChunkFailure => error_kind_str::SYSTEM_CHUNK_FAILURE,
            CommitFailure => error_kind_str::COMMIT_FAILURE,
            IntegrityFault => error_kind_str::INTEGRITY_FAULT,
            StorageFault => error_kind_str::STORAGE_FAULT,
            ResourceNotFound => error_kind_str::RESOURCE_NOT_FOUND,
            Canceled => error_kind_str::CANCELED,
            NotImplemented => error_kind_str::NOT_IMPLEMENTED,
            Other => error_kind_str::OTHER,
        };
        write!(f, "{}", kind_str)
    }
}

impl Serialize for ErrorKind {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let msg = self.to_string();
        serializer.serialize_str(&msg)
    }
}

impl<'de> Deserialize<'de> for ErrorKind {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ErrorKindVisitor;

        impl<'de> Visitor<'de> for ErrorKindVisitor {
            type Value = String;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a string")
            }

            fn visit_str<R>(self, value: &str) -> std::result::Result<String, R> {
                Ok(value.to_string())
            }
        }

        let kind = match deserializer.deserialize_str(ErrorKindVisitor)?.as_str() {
            error_kind_str::MALFORMED_DATA => ErrorKind::MalformedData,
            error_kind_str::UNKNOWN_PARENT => ErrorKind::UnknownParent,
            error_kind_str::INCONSISTENT_PARENT_STATE => ErrorKind::InconsistentParentState,
            error_kind_str::SYSTEM_CHUNK_FAILURE => ErrorKind::SystemChunkFailure,
            error_kind_str::COMMIT_FAILURE => ErrorKind::CommitFailure,
            error_kind_str::INTEGRITY_FAULT => ErrorKind::IntegrityFault,
            error_kind_str::STORAGE_FAULT => ErrorKind::StorageFault,
            error_kind_str::RESOURCE_NOT_FOUND => ErrorKind::ResourceNotFound,
            error_kind_str::CANCELED => ErrorKind::Canceled,
            error_kind_str::NOT_IMPLEMENTED => ErrorKind::NotImplemented,
            _ => ErrorKind::Other,
        };
        Ok(kind)
    }
}

/// Project-wide error type.
/// Contains a kind enumerate and a `source` to identify the subsystem that may
/// have propagated the error.
#[derive(Debug, Serialize, Deserialize)]
pub struct Error {
    /// Error kind.
    pub kind: ErrorKind,
    /// Not propagated by pipeline messages.
    #[serde(serialize_with = "source_se", deserialize_with = "source_de")]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

fn source_se<S: Serializer>(
    source: &Option<Box<dyn std::error::Error + Send + Sync>>,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    match source {
        Some(b) => s.serialize_str(&b.to_string()),
        None => s.serialize_unit(),
    }
}

fn source_de<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<Option<Box<dyn std::error::Error + Send + Sync>>, D::Error> {
    struct ErrorVisitor;

    impl<'de> Visitor<'de> for ErrorVisitor {
        type Value = String;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a string")
        }

        fn visit_str<R>(self, value: &str) -> std::result::Result<String, R> {
            Ok(value.to_string())
        }
    }

    match d.deserialize_str(ErrorVisitor) {
        Ok(s) => Ok(Some(s.into())),
        Err(_err) => Ok(None),
    }
}

impl Clone for Error {
    fn clone(&self) -> Self {
        Error {
            kind: self.kind,
            source: None,
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::new_ext(ErrorKind::Other, s)
    }
}

impl<T> From<ErrorKind> for Result<T> {
    fn from(kind: ErrorKind) -> Self {
        Err(kind.into())
    }
}

impl Error {
    pub fn new_ext<E>(kind: ErrorKind, error: E) -> Error
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let source = error.into();
        Error {
            kind,
            source: Some(source),
        }
    }

    pub fn new(kind: ErrorKind) -> Error {
        Error { kind, source: None }
    }

    /// True for the error kinds that must take the whole pipeline down.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::InconsistentParentState
                | ErrorKind::SystemChunkFailure
                | ErrorKind::CommitFailure
                | ErrorKind::IntegrityFault
        )
    }

    pub fn to_string_full(&self) -> String {
        let mut err_string = self.to_string();
        if let Some(ref source) = self.source {
            let detail = format!(": {}", source);
            let max_len = std::cmp::min(detail.len(), MAX_ERROR_SOURCE_STRING_LENGTH);
            err_string.push_str(&detail[..max_len]);
        }
        err_string
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Error) -> bool {
        if self.kind != other.kind {
            return false;
        }
        if self.source.is_none() && other.source.is_none() {
            true
        } else if self.source.is_some() && other.source.is_some() {
            format!("{:?}", self.source) == format!("{:?}", other.source)
        } else {
            false
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self.source {
            None => None,
            Some(ref source) => Some(source.as_ref()),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &format!("{}", self.kind))
    }
}
