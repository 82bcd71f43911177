// Copyright 2017 qpdb Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The `qpdb` crate resolves symbol offsets of Windows executables through a remote symbol
//! service. It reads the CodeView record from the debug directory of a PE image, builds the
//! `(name, guid, age)` identifier of the matching PDB, and asks the service where the requested
//! symbols live.
//!
//! # Usage
//!
//! Lookups go through the [`QueryPdb` object](struct.QueryPdb.html).
//!
//! # Example
//!
//! ```no_run
//! # use std::collections::BTreeSet;
//! # fn test() -> qpdb::Result<()> {
//! qpdb::set_default_server("http://localhost:8080");
//!
//! let qpdb = qpdb::QueryPdb::open("app.exe");
//! if qpdb.is_valid() {
//!     let names: BTreeSet<String> = vec!["main".to_string()].into_iter().collect();
//!     for (name, offset) in qpdb.get_symbols(&names)? {
//!         println!("{} is at {:#x}", name, offset);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! The identifier can also be extracted without any service:
//!
//! ```no_run
//! # fn test() -> qpdb::Result<()> {
//! let data = std::fs::read("app.exe")?;
//! let identifier = qpdb::extract(&data)?;
//! println!("{} {} {}", identifier.name(), identifier.guid(), identifier.age());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

// modules
mod client;
mod common;
mod config;
mod debug;
mod identifier;
mod image;
mod pe;
mod qpdb;

// exports
pub use crate::client::{
    CancelToken, HttpTransport, SymbolClient, SymbolMap, Transport, TransportResponse,
    SYMBOL_PATH,
};
pub use crate::common::{Error, ErrorKind, Result};
pub use crate::config::{
    clear_default_server, default_server, set_default_server, ClientConfig, DEFAULT_TIMEOUT,
};
pub use crate::debug::{extract, extract_with, AddressMapping, DebugRecord, CV_SIGNATURE_RSDS};
pub use crate::identifier::{format_guid, parse_guid, Identifier, GUID_STRING_LEN};
pub use crate::image::Image;
pub use crate::pe::{
    ImageDataDirectory, ImageDebugDirectory, ImageFileHeader, ImageSectionHeader, PeHeaders,
};
pub use crate::qpdb::{InvalidReason, QueryPdb};
