// Copyright 2017 qpdb Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Locating and decoding the CodeView record of a PE image.

use std::fmt;

use uuid::Uuid;

use crate::common::*;
use crate::identifier::Identifier;
use crate::pe::{self, ImageDebugDirectory, PeHeaders};

/// CodeView signature of PDB 7.0 records.
pub const CV_SIGNATURE_RSDS: [u8; 4] = *b"RSDS";

/// How virtual addresses found in the headers are turned into file offsets.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum AddressMapping {
    /// Virtual addresses are used as file offsets, as if the image were mapped flat. The debug
    /// record is found through `AddressOfRawData`.
    Flat,

    /// Virtual addresses are translated through the section table. The debug record is found
    /// through `PointerToRawData`.
    Sections,
}

impl Default for AddressMapping {
    fn default() -> Self {
        AddressMapping::Flat
    }
}

/// A CodeView debug record as stored in an image.
///
/// Reference: <https://github.com/dotnet/runtime/blob/main/docs/design/specs/PE-COFF.md#codeview-debug-directory-entry-type-2>
#[derive(Clone, PartialEq, Eq)]
pub struct DebugRecord {
    pub signature: [u8; 4],
    pub guid: Uuid,
    pub age: u32,
    /// The PDB path recorded by the linker, decoded as lossy UTF-8.
    pub name: String,
}

impl DebugRecord {
    /// Decode a record at the current position of `buf`.
    ///
    /// The name must be NUL-terminated before the end of the underlying buffer.
    pub(crate) fn parse(buf: &mut ParseBuffer<'_>) -> Result<Self> {
        let mut signature = [0u8; 4];
        signature.copy_from_slice(buf.take(4)?);

        let data1 = buf.parse_u32()?;
        let data2 = buf.parse_u16()?;
        let data3 = buf.parse_u16()?;
        let mut data4 = [0u8; 8];
        data4.copy_from_slice(buf.take(8)?);

        Ok(DebugRecord {
            signature,
            guid: Uuid::from_fields(data1, data2, data3, &data4),
            age: buf.parse_u32()?,
            name: buf.parse_cstring()?.to_string().into_owned(),
        })
    }

    /// Find and decode the debug record of `image`.
    ///
    /// Only the first entry of the debug directory is consulted. Images that carry several
    /// entries always yield the record of the first one.
    ///
    /// # Errors
    ///
    /// * `Error::UnrecognizedFileFormat`, `Error::UnsupportedOptionalHeader` if the headers are
    ///   not those of a PE image
    /// * `Error::MissingDebugDirectory` if the image declares no debug directory, or its first
    ///   entry has no raw data location
    /// * `Error::AddressNotMapped` if `mapping` is `Sections` and no section covers the
    ///   debug directory
    /// * `Error::UnexpectedEof` if any offset points outside `image`, or the name is not
    ///   terminated
    pub fn locate(image: &[u8], mapping: AddressMapping) -> Result<Self> {
        let headers = PeHeaders::parse(image)?;
        let directory = headers
            .debug_directory()
            .ok_or(Error::MissingDebugDirectory)?;

        let entry_offset = match mapping {
            AddressMapping::Flat => directory.virtual_address as usize,
            AddressMapping::Sections => {
                let sections = headers.sections(image)?;
                pe::rva_to_file_offset(&sections, directory.virtual_address)?
            }
        };
        tracing::trace!(entry_offset, ?mapping, "reading debug directory");

        let entry = ImageDebugDirectory::parse(&mut ParseBuffer::at(image, entry_offset)?)?;
        if !entry.is_codeview() {
            tracing::warn!(
                debug_type = entry.debug_type,
                "first debug directory entry is not a CodeView entry"
            );
        }

        let record_offset = match mapping {
            AddressMapping::Flat => entry.address_of_raw_data as usize,
            AddressMapping::Sections => entry.pointer_to_raw_data as usize,
        };
        // zero means the entry has no data in the file
        if record_offset == 0 {
            return Err(Error::MissingDebugDirectory);
        }

        let record = DebugRecord::parse(&mut ParseBuffer::at(image, record_offset)?)?;
        if record.signature != CV_SIGNATURE_RSDS {
            tracing::warn!(
                signature = ?record.signature,
                "debug record does not carry an RSDS signature"
            );
        }

        Ok(record)
    }
}

impl fmt::Debug for DebugRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugRecord")
            .field(
                "signature",
                &String::from_utf8_lossy(&self.signature),
            )
            .field("guid", &format_args!("{:X}", self.guid.simple()))
            .field("age", &self.age)
            .field("name", &self.name)
            .finish()
    }
}

/// Extract the identifier of a PE image, treating it as flat-mapped.
///
/// ```
/// let err = qpdb::extract(b"MZ").unwrap_err();
/// assert_eq!(err.kind(), qpdb::ErrorKind::Format);
/// ```
pub fn extract(image: &[u8]) -> Result<Identifier> {
    extract_with(image, AddressMapping::Flat)
}

/// Extract the identifier of a PE image with an explicit address mapping.
pub fn extract_with(image: &[u8], mapping: AddressMapping) -> Result<Identifier> {
    DebugRecord::locate(image, mapping).map(|record| Identifier::from_record(&record))
}
