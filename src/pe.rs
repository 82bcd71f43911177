// Copyright 2018 qpdb Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Definitions for the PE headers needed to reach the debug directory.
//!
//! Only the path from the DOS header to the debug data directory is parsed. Every offset taken
//! from the image is untrusted and goes through [`ParseBuffer`], which refuses reads past the end
//! of the buffer.

use std::fmt;

use crate::common::*;

/// `MZ`, read as a little-endian `u16`.
pub const IMAGE_DOS_SIGNATURE: u16 = 0x5A4D;

/// `PE\0\0`, read as a little-endian `u32`.
pub const IMAGE_NT_SIGNATURE: u32 = 0x0000_4550;

/// Offset of `e_lfanew` within the DOS header.
pub const DOS_PE_OFFSET_FIELD: usize = 0x3C;

/// Size of the DOS header.
pub const IMAGE_DOS_HEADER_SIZE: usize = 64;

/// Size of `IMAGE_FILE_HEADER`.
pub const IMAGE_FILE_HEADER_SIZE: usize = 20;

pub const IMAGE_NT_OPTIONAL_HDR32_MAGIC: u16 = 0x10B;
pub const IMAGE_NT_OPTIONAL_HDR64_MAGIC: u16 = 0x20B;

/// Index of the debug directory in the data directory table.
pub const IMAGE_DIRECTORY_ENTRY_DEBUG: usize = 6;

/// Upper bound on `NumberOfRvaAndSizes` honored by the loader.
pub const IMAGE_NUMBEROF_DIRECTORY_ENTRIES: usize = 16;

/// The debug data is a CodeView record.
pub const IMAGE_DEBUG_TYPE_CODEVIEW: u32 = 2;

/// A PE `IMAGE_FILE_HEADER` (the COFF header).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImageFileHeader {
    pub machine: u16,
    pub number_of_sections: u16,
    pub time_date_stamp: u32,
    pub pointer_to_symbol_table: u32,
    pub number_of_symbols: u32,
    pub size_of_optional_header: u16,
    pub characteristics: u16,
}

impl ImageFileHeader {
    pub(crate) fn parse(parse_buffer: &mut ParseBuffer<'_>) -> Result<Self> {
        Ok(Self {
            machine: parse_buffer.parse_u16()?,
            number_of_sections: parse_buffer.parse_u16()?,
            time_date_stamp: parse_buffer.parse_u32()?,
            pointer_to_symbol_table: parse_buffer.parse_u32()?,
            number_of_symbols: parse_buffer.parse_u32()?,
            size_of_optional_header: parse_buffer.parse_u16()?,
            characteristics: parse_buffer.parse_u16()?,
        })
    }
}

/// An `IMAGE_DATA_DIRECTORY` descriptor.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageDataDirectory {
    pub virtual_address: u32,
    pub size: u32,
}

impl ImageDataDirectory {
    pub(crate) fn parse(parse_buffer: &mut ParseBuffer<'_>) -> Result<Self> {
        Ok(Self {
            virtual_address: parse_buffer.parse_u32()?,
            size: parse_buffer.parse_u32()?,
        })
    }

    /// The descriptor names no data.
    pub fn is_empty(&self) -> bool {
        self.virtual_address == 0
    }
}

impl fmt::Debug for ImageDataDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageDataDirectory")
            .field(
                "virtual_address",
                &format_args!("{:#x}", self.virtual_address),
            )
            .field("size", &format_args!("{:#x}", self.size))
            .finish()
    }
}

/// A PE `IMAGE_DEBUG_DIRECTORY` entry, as described in [the Microsoft documentation](https://docs.microsoft.com/en-us/windows/win32/api/winnt/ns-winnt-image_debug_directory).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImageDebugDirectory {
    pub characteristics: u32,
    pub time_date_stamp: u32,
    pub major_version: u16,
    pub minor_version: u16,
    /// One of the `IMAGE_DEBUG_TYPE_*` values.
    pub debug_type: u32,
    pub size_of_data: u32,
    /// Address of the debug data when the image is loaded.
    pub address_of_raw_data: u32,
    /// File offset of the debug data.
    pub pointer_to_raw_data: u32,
}

impl ImageDebugDirectory {
    pub(crate) fn parse(parse_buffer: &mut ParseBuffer<'_>) -> Result<Self> {
        Ok(Self {
            characteristics: parse_buffer.parse_u32()?,
            time_date_stamp: parse_buffer.parse_u32()?,
            major_version: parse_buffer.parse_u16()?,
            minor_version: parse_buffer.parse_u16()?,
            debug_type: parse_buffer.parse_u32()?,
            size_of_data: parse_buffer.parse_u32()?,
            address_of_raw_data: parse_buffer.parse_u32()?,
            pointer_to_raw_data: parse_buffer.parse_u32()?,
        })
    }

    /// The entry describes a CodeView record.
    pub fn is_codeview(&self) -> bool {
        self.debug_type == IMAGE_DEBUG_TYPE_CODEVIEW
    }
}

/// A PE `IMAGE_SECTION_HEADER`, as described in [the Microsoft documentation](https://msdn.microsoft.com/en-us/library/windows/desktop/ms680341(v=vs.85).aspx).
///
/// Only used to translate virtual addresses into file offsets.
#[derive(Copy, Clone, Default, PartialEq, Eq)]
pub struct ImageSectionHeader {
    /// An 8-byte, null-padded UTF-8 string. There is no terminating null character if the string is
    /// exactly eight characters long.
    pub name: [u8; 8],

    /// The total size of the section when loaded into memory, in bytes. If this value is greater
    /// than the [`size_of_raw_data`](Self::size_of_raw_data) member, the section is filled with
    /// zeroes.
    pub virtual_size: u32,

    /// The address of the first byte of the section when loaded into memory, relative to the image
    /// base.
    pub virtual_address: u32,

    /// The size of the initialized data on disk, in bytes.
    pub size_of_raw_data: u32,

    /// A file pointer to the first page of the section.
    pub pointer_to_raw_data: u32,

    pub pointer_to_relocations: u32,
    pub pointer_to_line_numbers: u32,
    pub number_of_relocations: u16,
    pub number_of_line_numbers: u16,
    pub characteristics: u32,
}

impl ImageSectionHeader {
    pub(crate) fn parse(parse_buffer: &mut ParseBuffer<'_>) -> Result<Self> {
        let mut name = [0u8; 8];
        name.copy_from_slice(parse_buffer.take(8)?);

        Ok(Self {
            name,
            virtual_size: parse_buffer.parse_u32()?,
            virtual_address: parse_buffer.parse_u32()?,
            size_of_raw_data: parse_buffer.parse_u32()?,
            pointer_to_raw_data: parse_buffer.parse_u32()?,
            pointer_to_relocations: parse_buffer.parse_u32()?,
            pointer_to_line_numbers: parse_buffer.parse_u32()?,
            number_of_relocations: parse_buffer.parse_u16()?,
            number_of_line_numbers: parse_buffer.parse_u16()?,
            characteristics: parse_buffer.parse_u32()?,
        })
    }

    /// Returns the name of the section.
    pub fn name(&self) -> &str {
        let end = self
            .name
            .iter()
            .position(|ch| *ch == 0)
            .unwrap_or(self.name.len());

        std::str::from_utf8(&self.name[0..end]).unwrap_or("")
    }

    /// Translate `rva` into a file offset if this section covers it.
    ///
    /// Addresses in the zero-filled tail past `size_of_raw_data` have no file backing and are
    /// not translated.
    pub fn file_offset(&self, rva: u32) -> Option<usize> {
        let delta = rva.checked_sub(self.virtual_address)?;
        let extent = match self.virtual_size {
            0 => self.size_of_raw_data,
            size => size.min(self.size_of_raw_data),
        };
        if delta >= extent {
            return None;
        }
        (self.pointer_to_raw_data as usize).checked_add(delta as usize)
    }
}

impl fmt::Debug for ImageSectionHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageSectionHeader")
            .field("name()", &self.name())
            .field("virtual_size", &format_args!("{:#x}", self.virtual_size))
            .field(
                "virtual_address",
                &format_args!("{:#x}", self.virtual_address),
            )
            .field("size_of_raw_data", &self.size_of_raw_data)
            .field(
                "pointer_to_raw_data",
                &format_args!("{:#x}", self.pointer_to_raw_data),
            )
            .field("characteristics", &format_args!("{:#x}", self.characteristics))
            .finish()
    }
}

/// The headers of a PE image, from the NT signature up to the section table.
#[derive(Clone, Debug)]
pub struct PeHeaders {
    /// File offset of the `PE\0\0` signature, as found in `e_lfanew`.
    pub nt_offset: usize,
    pub file_header: ImageFileHeader,
    /// `IMAGE_NT_OPTIONAL_HDR32_MAGIC` or `IMAGE_NT_OPTIONAL_HDR64_MAGIC`.
    pub optional_magic: u16,
    pub data_directories: Vec<ImageDataDirectory>,
    section_table_offset: usize,
}

impl PeHeaders {
    /// Walk the DOS and NT headers of `data`.
    ///
    /// # Errors
    ///
    /// * `Error::UnexpectedEof` if any header, or the location `e_lfanew` names, lies outside
    ///   `data`
    /// * `Error::UnrecognizedFileFormat` if the DOS or NT signature does not match
    /// * `Error::UnsupportedOptionalHeader` for anything but PE32 and PE32+
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < IMAGE_DOS_HEADER_SIZE {
            return Err(Error::UnexpectedEof);
        }

        let mut buf = ParseBuffer::from(data);
        if buf.parse_u16()? != IMAGE_DOS_SIGNATURE {
            return Err(Error::UnrecognizedFileFormat);
        }

        buf.seek(DOS_PE_OFFSET_FIELD)?;
        let nt_offset = buf.parse_u32()? as usize;
        tracing::trace!(nt_offset, "located NT headers");

        let mut buf = ParseBuffer::at(data, nt_offset)?;
        if buf.parse_u32()? != IMAGE_NT_SIGNATURE {
            return Err(Error::UnrecognizedFileFormat);
        }

        let file_header = ImageFileHeader::parse(&mut buf)?;
        let optional_offset = buf.pos();
        debug_assert_eq!(optional_offset, nt_offset + 4 + IMAGE_FILE_HEADER_SIZE);

        let optional_magic = buf.peek_u16()?;
        let (count_offset, directories_offset) = match optional_magic {
            IMAGE_NT_OPTIONAL_HDR32_MAGIC => (92, 96),
            IMAGE_NT_OPTIONAL_HDR64_MAGIC => (108, 112),
            other => return Err(Error::UnsupportedOptionalHeader(other)),
        };

        buf.skip(count_offset)?;
        let count = (buf.parse_u32()? as usize).min(IMAGE_NUMBEROF_DIRECTORY_ENTRIES);
        debug_assert_eq!(buf.pos(), optional_offset + directories_offset);

        let data_directories = (0..count)
            .map(|_| ImageDataDirectory::parse(&mut buf))
            .collect::<Result<Vec<_>>>()?;

        Ok(PeHeaders {
            nt_offset,
            file_header,
            optional_magic,
            data_directories,
            section_table_offset: optional_offset
                + file_header.size_of_optional_header as usize,
        })
    }

    /// Whether the optional header is the 64-bit (PE32+) variant.
    pub fn is_pe32_plus(&self) -> bool {
        self.optional_magic == IMAGE_NT_OPTIONAL_HDR64_MAGIC
    }

    /// The debug data directory descriptor, if the image declares one.
    pub fn debug_directory(&self) -> Option<ImageDataDirectory> {
        self.data_directories
            .get(IMAGE_DIRECTORY_ENTRY_DEBUG)
            .copied()
            .filter(|dir| !dir.is_empty())
    }

    /// Parse the section table that follows the optional header.
    pub fn sections(&self, data: &[u8]) -> Result<Vec<ImageSectionHeader>> {
        let mut buf = ParseBuffer::at(data, self.section_table_offset)?;
        (0..self.file_header.number_of_sections)
            .map(|_| ImageSectionHeader::parse(&mut buf))
            .collect()
    }
}

/// Translate a virtual address through a section table.
pub fn rva_to_file_offset(sections: &[ImageSectionHeader], rva: u32) -> Result<usize> {
    sections
        .iter()
        .find_map(|section| section.file_offset(rva))
        .ok_or(Error::AddressNotMapped(rva))
}
