//! # Dispatcher Module
//!
//! Turns a decoded request into a handler call and settles the outcome.
//!
//! ## Request Flow
//!
//! 1. Path is derived from `SCRIPT_NAME` + `PATH_INFO` with `/` runs collapsed
//! 2. Method is lowercased
//! 3. Params merge the query string and, for form-encoded bodies only, the body
//! 4. Cookies are parsed from `HTTP_COOKIE`
//! 5. The handler resolved at worker start is invoked once
//!
//! ## Error Handling
//!
//! - `raise(status, message)` answers with that status and message verbatim
//! - Any other error or a panic becomes `500 Internal server error`
//! - Failures are rendered as `application/problem+json`; the underlying
//!   detail is only exposed when the `error` debug criterion is enabled
//!
//! ```rust,ignore
//! use scgi_appserver::dispatcher::{handler_fn, raise};
//!
//! let handler = handler_fn(|path, method, params, ex| {
//!     if path != "/hosts" {
//!         return Err(raise(404, "missing"));
//!     }
//!     ex.set_body(format!("{method} {:?}", params.get("name")));
//!     Ok(())
//! });
//! ```

mod core;
mod error;
mod report;

pub use core::{handler_fn, normalize_path, Dispatcher, FnHandler, Handler, DEBUG_REQUEST};
pub use error::{raise, HandlerError, HandlerResult};
pub use report::{report, Failure, Problem, DEBUG_ERROR, PROBLEM_CONTENT_TYPE};
