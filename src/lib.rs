//! # scgi-appserver
//!
//! An SCGI application server built on the `may` coroutine runtime. A front
//! proxy forwards each HTTP request over SCGI; the server decodes it, hands
//! it to a user-supplied handler, and writes a CGI-style response back.
//!
//! ## Architecture
//!
//! - **[`codec`]** - SCGI netstring request decoding and response encoding
//! - **[`cookie`]** / **[`negotiate`]** - Cookie parsing and serialization,
//!   content-type parsing and Accept-Language resolution
//! - **[`request`]** - Per-connection [`request::RequestState`] and its
//!   forward-only lifecycle, the handler-facing [`request::Exchange`], and
//!   response finalization
//! - **[`dispatcher`]** - Request normalization, handler invocation and
//!   problem+json error reporting
//! - **[`worker_pool`]** - Elastic pool of worker coroutines with idle eviction
//! - **[`server`]** - Listener and acceptor coroutine
//! - **[`harness`]** - In-process driver for handler tests
//! - **[`config`]** / **[`logging`]** - Startup configuration and tracing setup
//!
//! ## Request Flow
//!
//! ```text
//! accept -> handoff to worker -> decode netstring -> ingest headers
//!        -> params + cookies -> handler -> (error report) -> finalize -> close
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use scgi_appserver::config::ServerConfig;
//! use scgi_appserver::dispatcher::{handler_fn, raise};
//! use scgi_appserver::server::Server;
//!
//! let server = Server::with_factory(ServerConfig::default(), |_ctx| {
//!     Ok(handler_fn(|path, _method, params, ex| {
//!         if path != "/hello" {
//!             return Err(raise(404, "missing"));
//!         }
//!         ex.set_body(format!("hello {}", params.get("name").unwrap_or("world")));
//!         Ok(())
//!     }))
//! })?;
//! let handle = server.start()?;
//! handle.join().ok();
//! ```

pub mod cli;
pub mod codec;
pub mod config;
pub mod cookie;
pub mod dispatcher;
pub mod echo;
pub mod harness;
pub mod ids;
pub mod logging;
pub mod negotiate;
pub mod request;
pub mod server;
pub mod worker_pool;

pub use config::{DebugCriteria, ServerConfig};
pub use dispatcher::{handler_fn, raise, Handler, HandlerError, HandlerResult};
pub use request::{Exchange, Params, RequestState};
pub use server::{Server, ServerHandle};
