// Copyright 2017 qpdb Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The symbol service protocol.
//!
//! A query is a single `POST /symbol` whose JSON body names the PDB and the requested symbols:
//!
//! ```json
//! {"name": "app.pdb", "guid": "123456789ABCDEF01122334455667788", "age": 1, "query": ["main"]}
//! ```
//!
//! The service answers with a JSON object mapping each resolved name to its offset.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::common::*;
use crate::config::ClientConfig;
use crate::identifier::Identifier;
use crate::qpdb::InvalidReason;

/// Resource path of the symbol query, relative to the server endpoint.
pub const SYMBOL_PATH: &str = "/symbol";

/// Resolved symbol offsets, keyed by symbol name.
pub type SymbolMap = BTreeMap<String, i64>;

/// A response as seen by a [`Transport`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Sends a JSON request and returns the raw response.
///
/// Implementations must be safe to call concurrently from several threads; `SymbolClient` shares
/// one transport between all of its queries.
pub trait Transport: Send + Sync {
    /// POST `body` to `url` with `Content-Type: application/json`.
    ///
    /// Only failures to exchange the request belong in the error; a non-success status is a
    /// valid `TransportResponse`.
    fn post_json(&self, url: &str, body: Vec<u8>) -> Result<TransportResponse>;
}

/// A blocking HTTP transport built on `reqwest`.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    /// Build a transport whose requests fail after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(HttpTransport { client })
    }

    /// Wrap an existing client.
    pub fn with_client(client: reqwest::blocking::Client) -> Self {
        HttpTransport { client }
    }
}

impl Transport for HttpTransport {
    fn post_json(&self, url: &str, body: Vec<u8>) -> Result<TransportResponse> {
        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()?;

        let status = response.status().as_u16();
        let body = response.bytes()?.to_vec();
        Ok(TransportResponse { status, body })
    }
}

/// Cancels queries that have not completed yet.
///
/// Clones share the same flag. A query checks the token before it sends the request and again
/// before it decodes the response; a request already in flight is bounded by the client timeout.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[derive(Serialize)]
struct SymbolRequest<'a> {
    name: &'a str,
    guid: &'a str,
    age: u32,
    query: &'a BTreeSet<String>,
}

/// Queries a symbol service for the offsets of named symbols.
#[derive(Clone)]
pub struct SymbolClient {
    url: String,
    transport: Arc<dyn Transport>,
}

impl SymbolClient {
    /// Build a client for the server `config` resolves to, using an [`HttpTransport`].
    ///
    /// # Errors
    ///
    /// * `Error::InvalidState` if neither the config nor the process default names a server
    /// * `Error::Transport` if the HTTP client cannot be initialized
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let server = config
            .resolve_server()
            .ok_or(Error::InvalidState(InvalidReason::NoServer))?;
        let transport = HttpTransport::new(config.request_timeout())?;
        Ok(Self::with_transport(&server, Arc::new(transport)))
    }

    /// Build a client that sends its requests through `transport`.
    pub fn with_transport(server: &str, transport: Arc<dyn Transport>) -> Self {
        SymbolClient {
            url: format!("{}{}", normalize_server(server), SYMBOL_PATH),
            transport,
        }
    }

    /// The full URL queries are posted to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Resolve `names` for the PDB identified by `identifier`.
    ///
    /// The decoded response is returned as is. Names the service did not resolve are simply
    /// absent. An empty `names` set returns an empty map without contacting the service.
    ///
    /// # Errors
    ///
    /// * `Error::EmptySymbolName` if `names` contains an empty string
    /// * `Error::Transport` if the request could not be exchanged
    /// * `Error::HttpStatus` if the service answered with anything but 200
    /// * `Error::Protocol` if the body is not a JSON object of names to 64-bit integers
    pub fn query(&self, identifier: &Identifier, names: &BTreeSet<String>) -> Result<SymbolMap> {
        self.query_cancellable(identifier, names, &CancelToken::new())
    }

    /// Like [`query`](Self::query), but gives up with `Error::Cancelled` once `cancel` fires.
    pub fn query_cancellable(
        &self,
        identifier: &Identifier,
        names: &BTreeSet<String>,
        cancel: &CancelToken,
    ) -> Result<SymbolMap> {
        if names.iter().any(String::is_empty) {
            return Err(Error::EmptySymbolName);
        }
        if names.is_empty() {
            return Ok(SymbolMap::new());
        }

        let request = SymbolRequest {
            name: identifier.name(),
            guid: identifier.guid(),
            age: identifier.age(),
            query: names,
        };
        let body = serde_json::to_vec(&request).map_err(Error::Protocol)?;

        cancel.check()?;
        tracing::debug!(url = %self.url, pdb = %identifier, count = names.len(), "querying symbols");
        let response = self.transport.post_json(&self.url, body)?;
        cancel.check()?;

        if response.status != 200 {
            tracing::debug!(status = response.status, "symbol service rejected query");
            return Err(Error::HttpStatus(response.status));
        }

        let symbols: SymbolMap = serde_json::from_slice(&response.body).map_err(Error::Protocol)?;
        tracing::debug!(resolved = symbols.len(), "symbol query complete");
        Ok(symbols)
    }

    /// Resolve a single symbol.
    ///
    /// # Errors
    ///
    /// Everything [`query`](Self::query) returns, plus `Error::SymbolNotFound` if the service
    /// did not resolve `name`.
    pub fn query_one(&self, identifier: &Identifier, name: &str) -> Result<i64> {
        let mut names = BTreeSet::new();
        names.insert(name.to_owned());

        self.query(identifier, &names)?
            .get(name)
            .copied()
            .ok_or_else(|| Error::SymbolNotFound(name.to_owned()))
    }
}

impl fmt::Debug for SymbolClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymbolClient").field("url", &self.url).finish()
    }
}

/// Turn a configured server into a base URL: add `http://` when no scheme is given and drop
/// trailing slashes.
fn normalize_server(server: &str) -> String {
    let server = server.trim().trim_end_matches('/');
    if server.contains("://") {
        server.to_owned()
    } else {
        format!("http://{}", server)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;

    /// Answers every request with a canned response and records what it was sent.
    ///
    /// Without a response every request fails as if the connection was refused.
    struct FakeTransport {
        response: Option<TransportResponse>,
        requests: Mutex<Vec<(String, serde_json::Value)>>,
    }

    impl FakeTransport {
        fn answering(status: u16, body: &str) -> Arc<Self> {
            Arc::new(FakeTransport {
                response: Some(TransportResponse {
                    status,
                    body: body.as_bytes().to_vec(),
                }),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(FakeTransport {
                response: None,
                requests: Mutex::new(Vec::new()),
            })
        }

        fn request_count(&self) -> usize {
            self.requests.lock().len()
        }
    }

    impl Transport for FakeTransport {
        fn post_json(&self, url: &str, body: Vec<u8>) -> Result<TransportResponse> {
            let json = serde_json::from_slice(&body).expect("request is JSON");
            self.requests.lock().push((url.to_owned(), json));
            self.response
                .clone()
                .ok_or_else(|| Error::Transport("connection refused".into()))
        }
    }

    fn identifier() -> Identifier {
        Identifier::new("app.pdb", "123456789ABCDEF01122334455667788", 3).unwrap()
    }

    fn names(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn test_request_shape() {
        let transport = FakeTransport::answering(200, r#"{"main": 4096, "init": -16}"#);
        let client = SymbolClient::with_transport("symbols.local:8080/", transport.clone());
        assert_eq!(client.url(), "http://symbols.local:8080/symbol");

        let symbols = client
            .query(&identifier(), &names(&["main", "init"]))
            .expect("query");
        assert_eq!(symbols.get("main"), Some(&4096));
        assert_eq!(symbols.get("init"), Some(&-16));

        let requests = transport.requests.lock();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, "http://symbols.local:8080/symbol");
        assert_eq!(
            requests[0].1,
            serde_json::json!({
                "name": "app.pdb",
                "guid": "123456789ABCDEF01122334455667788",
                "age": 3,
                "query": ["init", "main"],
            })
        );
    }

    #[test]
    fn test_response_returned_verbatim() {
        // the service may answer with names nobody asked for
        let transport = FakeTransport::answering(200, r#"{"other": 1}"#);
        let client = SymbolClient::with_transport("http://s", transport);

        let symbols = client.query(&identifier(), &names(&["main"])).unwrap();
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols.get("other"), Some(&1));
    }

    #[test]
    fn test_empty_query_skips_network() {
        let transport = FakeTransport::failing();
        let client = SymbolClient::with_transport("http://s", transport.clone());

        let symbols = client.query(&identifier(), &BTreeSet::new()).unwrap();
        assert!(symbols.is_empty());
        assert_eq!(transport.request_count(), 0);
    }

    #[test]
    fn test_empty_name_rejected() {
        let transport = FakeTransport::answering(200, "{}");
        let client = SymbolClient::with_transport("http://s", transport.clone());

        let err = client.query(&identifier(), &names(&["main", ""])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(transport.request_count(), 0);
    }

    #[test]
    fn test_non_success_status() {
        let transport = FakeTransport::answering(404, r#"{"main": 1}"#);
        let client = SymbolClient::with_transport("http://s", transport);

        let err = client.query(&identifier(), &names(&["main"])).unwrap_err();
        assert!(matches!(err, Error::HttpStatus(404)));
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[test]
    fn test_transport_failure() {
        let client = SymbolClient::with_transport("http://s", FakeTransport::failing());
        let err = client.query(&identifier(), &names(&["main"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[test]
    fn test_malformed_bodies() {
        for body in &[
            "",
            "not json",
            "[1, 2]",
            r#"{"main": "0x10"}"#,
            r#"{"main": 1.5}"#,
            r#"{"main": 18446744073709551615}"#,
        ] {
            let client =
                SymbolClient::with_transport("http://s", FakeTransport::answering(200, body));
            let err = client.query(&identifier(), &names(&["main"])).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Protocol, "body {:?}", body);
        }
    }

    #[test]
    fn test_query_one() {
        let transport = FakeTransport::answering(200, r#"{"main": 4096}"#);
        let client = SymbolClient::with_transport("http://s", transport);

        assert_eq!(client.query_one(&identifier(), "main").unwrap(), 4096);

        match client.query_one(&identifier(), "missing") {
            Err(Error::SymbolNotFound(name)) => assert_eq!(name, "missing"),
            other => panic!("expected SymbolNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_cancelled_before_send() {
        let transport = FakeTransport::answering(200, r#"{"main": 1}"#);
        let client = SymbolClient::with_transport("http://s", transport.clone());

        let cancel = CancelToken::new();
        cancel.clone().cancel();
        assert!(cancel.is_cancelled());

        let err = client
            .query_cancellable(&identifier(), &names(&["main"]), &cancel)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(transport.request_count(), 0);
    }

    #[test]
    fn test_normalize_server() {
        assert_eq!(normalize_server("localhost:8080"), "http://localhost:8080");
        assert_eq!(normalize_server("https://sym.example/"), "https://sym.example");
        assert_eq!(normalize_server(" http://a//"), "http://a");
    }

    #[test]
    fn test_client_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SymbolClient>();
        assert_send_sync::<HttpTransport>();
    }
}
