// Copyright 2017 qpdb Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::client::{CancelToken, SymbolClient, SymbolMap, Transport};
use crate::common::*;
use crate::config::ClientConfig;
use crate::identifier::Identifier;
use crate::image::Image;

/// Why a [`QueryPdb`] ended up invalid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InvalidReason {
    /// Neither the instance nor the process names a symbol server. The image was not read.
    NoServer,
    /// The image file could not be opened or read.
    FileUnreadable,
    /// The image has no decodable debug record.
    MalformedImage,
    /// The debug record has an empty name or GUID.
    EmptyIdentifier,
    /// The HTTP client could not be set up.
    TransportUnavailable,
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match *self {
            InvalidReason::NoServer => "no symbol server configured",
            InvalidReason::FileUnreadable => "image file could not be read",
            InvalidReason::MalformedImage => "image has no readable debug record",
            InvalidReason::EmptyIdentifier => "debug record has an empty name or GUID",
            InvalidReason::TransportUnavailable => "HTTP client could not be initialized",
        };
        f.write_str(reason)
    }
}

enum State {
    Valid {
        identifier: Identifier,
        client: SymbolClient,
    },
    Invalid(InvalidReason),
}

/// Resolves symbol offsets for one executable image.
///
/// A `QueryPdb` reads the image once, at construction, and extracts the identifier of its PDB.
/// Construction never fails: a missing server, an unreadable file or a malformed image leave
/// the instance *invalid*, and every query on it fails with `Error::InvalidState` without
/// touching the network. Leaving the server unset is therefore the way to disable lookups, and
/// callers that need to tell "disabled" from "broken" must check [`is_valid`](Self::is_valid)
/// or [`invalid_reason`](Self::invalid_reason).
///
/// ```
/// # use std::collections::BTreeSet;
/// let qpdb = qpdb::QueryPdb::open_with_server("/no/such/app.exe", "http://localhost:8080");
/// assert!(!qpdb.is_valid());
/// assert_eq!(qpdb.invalid_reason(), Some(qpdb::InvalidReason::FileUnreadable));
///
/// let err = qpdb.get_symbols(&BTreeSet::new()).unwrap_err();
/// assert_eq!(err.kind(), qpdb::ErrorKind::InvalidState);
/// ```
pub struct QueryPdb {
    state: State,
}

impl QueryPdb {
    /// Open the image at `path`, using the process-wide default server.
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        Self::with_config(path, &ClientConfig::new())
    }

    /// Open the image at `path` and query `server`.
    pub fn open_with_server<P: AsRef<Path>>(path: P, server: impl Into<String>) -> Self {
        Self::with_config(path, &ClientConfig::new().server(server))
    }

    /// Open the image at `path` with explicit settings.
    ///
    /// The server is checked before the file is read; without one the file is never opened.
    pub fn with_config<P: AsRef<Path>>(path: P, config: &ClientConfig) -> Self {
        let path = path.as_ref();
        let client = match SymbolClient::new(config) {
            Ok(client) => client,
            Err(e) => return Self::invalid(Self::client_failure(e)),
        };

        match Image::open(path) {
            Ok(image) => Self::build(&image, config, client),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "cannot read image");
                Self::invalid(InvalidReason::FileUnreadable)
            }
        }
    }

    /// Build from an image already in memory.
    pub fn from_image(image: &Image, config: &ClientConfig) -> Self {
        match SymbolClient::new(config) {
            Ok(client) => Self::build(image, config, client),
            Err(e) => Self::invalid(Self::client_failure(e)),
        }
    }

    /// Build from an image already in memory, sending queries to `server` through `transport`.
    pub fn from_image_with_transport(
        image: &Image,
        config: &ClientConfig,
        server: &str,
        transport: Arc<dyn Transport>,
    ) -> Self {
        if server.trim().is_empty() {
            return Self::invalid(InvalidReason::NoServer);
        }
        Self::build(image, config, SymbolClient::with_transport(server, transport))
    }

    fn client_failure(error: Error) -> InvalidReason {
        match error {
            Error::InvalidState(reason) => {
                tracing::debug!("no symbol server configured, symbol lookups disabled");
                reason
            }
            e => {
                tracing::warn!(error = %e, "cannot create symbol client");
                InvalidReason::TransportUnavailable
            }
        }
    }

    fn build(image: &Image, config: &ClientConfig, client: SymbolClient) -> Self {
        let identifier = match image.identifier(config.address_mapping()) {
            Ok(identifier) => identifier,
            Err(e) => {
                tracing::warn!(error = %e, "cannot extract debug identifier");
                return Self::invalid(InvalidReason::MalformedImage);
            }
        };

        if !identifier.is_complete() {
            tracing::warn!(%identifier, "debug identifier is incomplete");
            return Self::invalid(InvalidReason::EmptyIdentifier);
        }

        tracing::debug!(%identifier, url = client.url(), "symbol lookups enabled");
        QueryPdb {
            state: State::Valid { identifier, client },
        }
    }

    fn invalid(reason: InvalidReason) -> Self {
        QueryPdb {
            state: State::Invalid(reason),
        }
    }

    /// Whether queries can be issued.
    pub fn is_valid(&self) -> bool {
        matches!(self.state, State::Valid { .. })
    }

    /// Why this instance is invalid, or `None` if it is valid.
    pub fn invalid_reason(&self) -> Option<InvalidReason> {
        match self.state {
            State::Valid { .. } => None,
            State::Invalid(reason) => Some(reason),
        }
    }

    /// The identifier extracted from the image, if this instance is valid.
    pub fn identifier(&self) -> Option<&Identifier> {
        match self.state {
            State::Valid { ref identifier, .. } => Some(identifier),
            State::Invalid(_) => None,
        }
    }

    fn valid(&self) -> Result<(&Identifier, &SymbolClient)> {
        match self.state {
            State::Valid {
                ref identifier,
                ref client,
            } => Ok((identifier, client)),
            State::Invalid(reason) => Err(Error::InvalidState(reason)),
        }
    }

    /// Resolve a set of symbols.
    ///
    /// # Errors
    ///
    /// * `Error::InvalidState` if this instance is invalid
    /// * anything [`SymbolClient::query`] returns
    pub fn get_symbols(&self, names: &BTreeSet<String>) -> Result<SymbolMap> {
        let (identifier, client) = self.valid()?;
        client.query(identifier, names)
    }

    /// Resolve a set of symbols, giving up once `cancel` fires.
    pub fn get_symbols_cancellable(
        &self,
        names: &BTreeSet<String>,
        cancel: &CancelToken,
    ) -> Result<SymbolMap> {
        let (identifier, client) = self.valid()?;
        client.query_cancellable(identifier, names, cancel)
    }

    /// Resolve a single symbol.
    ///
    /// # Errors
    ///
    /// * `Error::InvalidState` if this instance is invalid
    /// * `Error::SymbolNotFound` if the service did not resolve `name`
    /// * anything [`SymbolClient::query`] returns
    pub fn get_symbol(&self, name: &str) -> Result<i64> {
        let (identifier, client) = self.valid()?;
        client.query_one(identifier, name)
    }
}

impl fmt::Debug for QueryPdb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state {
            State::Valid {
                ref identifier,
                ref client,
            } => f
                .debug_struct("QueryPdb")
                .field("identifier", identifier)
                .field("url", &client.url())
                .finish(),
            State::Invalid(reason) => f
                .debug_struct("QueryPdb")
                .field("invalid", &reason)
                .finish(),
        }
    }
}
