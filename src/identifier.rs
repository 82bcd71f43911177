// Copyright 2017 qpdb Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fmt;

use uuid::Uuid;

use crate::common::*;
use crate::debug::DebugRecord;

/// Length of a canonical GUID string.
pub const GUID_STRING_LEN: usize = 32;

/// Render the 16 raw GUID bytes of a CodeView record as 32 uppercase hex digits.
///
/// The bytes are a `GUID` as stored on disk: a little-endian `u32`, two little-endian `u16`s and
/// an 8-byte block. The three integers are printed most significant digit first and zero-padded
/// to 8, 4 and 4 digits, then the block is printed byte by byte. The symbol service keys PDBs by
/// exactly this string.
///
/// ```
/// let bytes = [
///     0x78, 0x56, 0x34, 0x12, 0xBC, 0x9A, 0xF0, 0xDE,
///     0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88,
/// ];
/// assert_eq!(qpdb::format_guid(&bytes), "123456789ABCDEF01122334455667788");
/// ```
pub fn format_guid(bytes: &[u8; 16]) -> String {
    format_uuid(&Uuid::from_bytes_le(*bytes))
}

/// Render a GUID given by its fields, as in [`format_guid`].
pub(crate) fn format_uuid(guid: &Uuid) -> String {
    format!("{:X}", guid.simple())
}

/// Recover the raw on-disk GUID bytes from a canonical string produced by [`format_guid`].
///
/// # Errors
///
/// * `Error::InvalidGuid` unless `guid` is exactly 32 characters from `[0-9A-F]`
pub fn parse_guid(guid: &str) -> Result<[u8; 16]> {
    if !is_canonical_guid(guid) {
        return Err(Error::InvalidGuid(guid.to_owned()));
    }

    let uuid = Uuid::parse_str(guid).map_err(|_| Error::InvalidGuid(guid.to_owned()))?;
    Ok(uuid.to_bytes_le())
}

fn is_canonical_guid(guid: &str) -> bool {
    guid.len() == GUID_STRING_LEN
        && guid
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b))
}

/// The `(name, guid, age)` triple a symbol service uses to find the PDB of an image.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier {
    name: String,
    guid: String,
    age: u32,
}

impl Identifier {
    /// Build an identifier from its parts.
    ///
    /// # Errors
    ///
    /// * `Error::InvalidGuid` if `guid` is not in canonical form
    pub fn new(name: impl Into<String>, guid: impl Into<String>, age: u32) -> Result<Self> {
        let guid = guid.into();
        if !is_canonical_guid(&guid) {
            return Err(Error::InvalidGuid(guid));
        }

        Ok(Identifier {
            name: name.into(),
            guid,
            age,
        })
    }

    /// Canonicalize a decoded CodeView record.
    pub fn from_record(record: &DebugRecord) -> Self {
        Identifier {
            name: record.name.clone(),
            guid: format_uuid(&record.guid),
            age: record.age,
        }
    }

    /// The PDB file name recorded in the image.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The canonical 32-digit GUID string.
    #[inline]
    pub fn guid(&self) -> &str {
        &self.guid
    }

    #[inline]
    pub fn age(&self) -> u32 {
        self.age
    }

    /// Both the name and the GUID are present.
    pub fn is_complete(&self) -> bool {
        !self.name.is_empty() && !self.guid.is_empty()
    }
}

impl From<&DebugRecord> for Identifier {
    fn from(record: &DebugRecord) -> Self {
        Identifier::from_record(record)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.name, self.guid, self.age)
    }
}
