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

//! Deterministic binary serialization helpers.
//!
//! Everything the pipeline hashes or persists goes through MessagePack
//! without field names, so an encoding is a pure function of the structure
//! content.

use crate::{Error, ErrorKind, Result};
use serde::{Deserialize, Serialize};

/// Serialize using MessagePack format (without field names).
///
/// # Error
///
/// If the data cannot be serialized a `MalformedData` error kind is returned.
pub fn rmp_serialize<T>(val: &T) -> Result<Vec<u8>>
where
    T: Serialize,
{
    rmp_serde::to_vec(val).map_err(|err| Error::new_ext(ErrorKind::MalformedData, err))
}

/// Deserialize using MessagePack format.
///
/// # Error
///
/// If the data cannot be deserialized a `MalformedData` error kind is returned.
pub fn rmp_deserialize<'a, T>(buf: &'a [u8]) -> Result<T>
where
    T: Deserialize<'a>,
{
    rmp_serde::from_slice(buf).map_err(|err| Error::new_ext(ErrorKind::MalformedData, err))
}

/// Trait implemented by all types that can be serialized with MessagePack format.
pub trait MessagePack<'a>: Sized + Serialize + Deserialize<'a> {
    /// Serialize using MessagePack format.
    ///
    /// # Panics
    ///
    /// Panics if the concrete type cannot be serialized using message pack.
    fn serialize(&self) -> Vec<u8> {
        rmp_serialize(self).unwrap() // Safe for core structs.
    }

    /// Deserialize using MessagePack format.
    ///
    /// # Errors
    ///
    /// Propagates the message pack decoder error.
    fn deserialize(buf: &'a [u8]) -> Result<Self> {
        rmp_deserialize(buf)
    }
}

/// Blanket implementation for types implementing `Serialize` and `Deserialize`.
impl<'a, T: Serialize + Deserialize<'a>> MessagePack<'a> for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default)]
    struct Inner<'a> {
        height: u64,
        tag: &'a str,
    }

    #[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default)]
    struct Outer<'a> {
        index: u32,
        #[serde(borrow)]
        inner: Inner<'a>,
    }

    fn fixture() -> Outer<'static> {
        Outer {
            index: 3,
            inner: Inner {
                height: 42,
                tag: "tessera",
            },
        }
    }

    // Field names must not leak into the encoding.
    const OUTER_HEX: &str = "9203922aa774657373657261";

    #[test]
    fn nested_struct_serialize() {
        let val = fixture();

        let buf = rmp_serialize(&val).unwrap();

        assert_eq!(hex::encode(&buf), OUTER_HEX);
    }

    #[test]
    fn nested_struct_deserialize() {
        let buf = hex::decode(OUTER_HEX).unwrap();

        let val: Outer = rmp_deserialize(&buf).unwrap();

        assert_eq!(val, fixture());
    }

    #[test]
    fn deserialize_garbage() {
        let buf = vec![0xc1, 0xff, 0x00];

        let err = rmp_deserialize::<Outer>(&buf).unwrap_err();

        assert_eq!(err.kind, ErrorKind::MalformedData);
    }
}
