// Copyright 2017 qpdb Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fmt;
use std::path::Path;

use crate::common::*;
use crate::debug::{self, AddressMapping, DebugRecord};
use crate::identifier::Identifier;

/// The raw bytes of an executable image, loaded once and never modified.
#[derive(Clone, PartialEq, Eq)]
pub struct Image {
    data: Vec<u8>,
}

impl Image {
    /// Read the entire file at `path`.
    ///
    /// # Errors
    ///
    /// * `Error::IoError` if the file cannot be opened or read
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Image {
            data: std::fs::read(path)?,
        })
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        Image { data }
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Decode the CodeView record of this image.
    pub fn debug_record(&self, mapping: AddressMapping) -> Result<DebugRecord> {
        DebugRecord::locate(&self.data, mapping)
    }

    /// Extract the debug identifier of this image.
    pub fn identifier(&self, mapping: AddressMapping) -> Result<Identifier> {
        debug::extract_with(&self.data, mapping)
    }
}

impl From<Vec<u8>> for Image {
    fn from(data: Vec<u8>) -> Self {
        Image::from_bytes(data)
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image").field("len", &self.data.len()).finish()
    }
}
