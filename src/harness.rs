//! # Test Harness
//!
//! Runs the dispatch pipeline in-process, without a socket or a worker pool.
//!
//! The request goes through the same path a live connection takes after
//! decoding: ingest, normalize, dispatch, error reporting. Output is captured
//! as a [`SimulatedResponse`] instead of being framed and written, so no
//! `Content-Length` is computed.
//!
//! ```rust,ignore
//! use scgi_appserver::dispatcher::handler_fn;
//! use scgi_appserver::harness::{TestHarness, TestRequest};
//!
//! let harness = TestHarness::new(handler_fn(|_, _, params, ex| {
//!     ex.set_body(params.get("name").unwrap_or("nobody"));
//!     Ok(())
//! }));
//! let res = harness.run(&TestRequest::get("/hello?name=ada"));
//! assert_eq!(res.status, 200);
//! assert_eq!(res.body_text(), "ada");
//! ```

use crate::codec::{HeaderMap, RequestFrame};
use crate::config::DebugCriteria;
use crate::dispatcher::{Dispatcher, Handler};
use crate::request::{RequestState, SimulatedResponse};
use tracing::error;

/// A request described the way a proxy would describe it
#[derive(Debug, Clone, Default)]
pub struct TestRequest {
    pub method: String,
    /// Path plus optional `?query`
    pub uri: String,
    /// Extra protocol variables, e.g. `HTTP_ACCEPT_LANGUAGE`
    pub headers: Vec<(String, String)>,
    pub cookies: Vec<(String, String)>,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl TestRequest {
    pub fn new(method: &str, uri: &str) -> Self {
        Self {
            method: method.to_string(),
            uri: uri.to_string(),
            ..Self::default()
        }
    }

    pub fn get(uri: &str) -> Self {
        Self::new("GET", uri)
    }

    pub fn post(uri: &str) -> Self {
        Self::new("POST", uri)
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn cookie(mut self, name: &str, value: &str) -> Self {
        self.cookies.push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        self.content_type = Some(content_type.to_string());
        self.body = body.into();
        self
    }

    /// Form-encoded body
    pub fn form(self, pairs: &[(&str, &str)]) -> Self {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        self.body(crate::negotiate::FORM_URLENCODED, encoded)
    }

    /// The header block a proxy would send for this request
    pub fn to_frame(&self) -> RequestFrame {
        let (path, query) = match self.uri.split_once('?') {
            Some((p, q)) => (p, q),
            None => (self.uri.as_str(), ""),
        };
        let mut headers = HeaderMap::new();
        headers.insert("CONTENT_LENGTH", self.body.len().to_string());
        headers.insert("SCGI", "1");
        headers.insert("REQUEST_METHOD", self.method.to_ascii_uppercase());
        headers.insert("REQUEST_URI", self.uri.clone());
        headers.insert("SCRIPT_NAME", path);
        headers.insert("PATH_INFO", "");
        headers.insert("QUERY_STRING", query);
        if let Some(ct) = &self.content_type {
            headers.insert("CONTENT_TYPE", ct.clone());
        }
        if !self.cookies.is_empty() {
            let joined = self
                .cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; ");
            headers.insert("HTTP_COOKIE", joined);
        }
        for (k, v) in &self.headers {
            headers.insert(k.clone(), v.clone());
        }
        RequestFrame {
            headers,
            body: self.body.clone(),
        }
    }
}

/// In-process driver for one handler
pub struct TestHarness {
    dispatcher: Dispatcher,
}

impl TestHarness {
    pub fn new<H: Handler + 'static>(handler: H) -> Self {
        Self::with_debug(handler, DebugCriteria::default())
    }

    pub fn with_debug<H: Handler + 'static>(handler: H, debug: DebugCriteria) -> Self {
        Self {
            dispatcher: Dispatcher::new(Box::new(handler), debug),
        }
    }

    /// Ingest and dispatch, leaving output to the caller
    pub fn execute(&self, req: &TestRequest) -> RequestState {
        let mut state = RequestState::detached(self.dispatcher.debug().clone());
        if let Err(e) = state.ingest(req.to_frame()) {
            error!(error = %e, "Simulated request could not be ingested");
        }
        self.dispatcher.dispatch(&mut state);
        state
    }

    /// Execute and shape the response
    pub fn run(&self, req: &TestRequest) -> SimulatedResponse {
        let mut state = self.execute(req);
        state.finalize_simulated().unwrap_or_default()
    }
}
