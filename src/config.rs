// Copyright 2017 qpdb Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Client configuration and the process-wide default symbol server.

use std::time::Duration;

use parking_lot::RwLock;

use crate::debug::AddressMapping;

/// Requests that take longer than this fail with a transport error.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

static DEFAULT_SERVER: RwLock<Option<String>> = parking_lot::const_rwlock(None);

/// Set the symbol server used by clients that do not name one.
///
/// Clients read the default once, when they are constructed. Set it before building them;
/// later changes do not reach existing instances.
pub fn set_default_server(server: impl Into<String>) {
    let server = server.into();
    tracing::debug!(%server, "setting default symbol server");
    *DEFAULT_SERVER.write() = Some(server);
}

/// Forget the process-wide default, disabling clients that do not name a server.
pub fn clear_default_server() {
    *DEFAULT_SERVER.write() = None;
}

/// The current process-wide default server, if one is set.
pub fn default_server() -> Option<String> {
    DEFAULT_SERVER.read().clone()
}

/// Settings for a symbol client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    server: Option<String>,
    timeout: Duration,
    mapping: AddressMapping,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            server: None,
            timeout: DEFAULT_TIMEOUT,
            mapping: AddressMapping::default(),
        }
    }
}

impl ClientConfig {
    /// A configuration that falls back to the process-wide default server.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `server` instead of the process-wide default.
    pub fn server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// How the image's virtual addresses are mapped to file offsets.
    pub fn mapping(mut self, mapping: AddressMapping) -> Self {
        self.mapping = mapping;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        self.timeout
    }

    pub fn address_mapping(&self) -> AddressMapping {
        self.mapping
    }

    /// The endpoint to use: the instance server, else the process default.
    ///
    /// Empty or blank strings count as unset.
    pub fn resolve_server(&self) -> Option<String> {
        fn usable(server: Option<String>) -> Option<String> {
            server
                .map(|server| server.trim().to_owned())
                .filter(|server| !server.is_empty())
        }

        usable(self.server.clone()).or_else(|| usable(default_server()))
    }
}
