//! # Request Module
//!
//! Per-request state and the handler-facing API.
//!
//! A [`RequestState`] is created for every accepted connection and walks a
//! strict forward-only lifecycle:
//!
//! ```text
//! Init -> HeadersParsed -> ParamsParsed -> CookiesParsed -> Dispatched
//!      -> HandlerOk | HandlerError -> OutputSent -> Closed
//! ```
//!
//! Handlers never see the state itself. They get an [`Exchange`]: the
//! read-only [`Incoming`] half plus the mutable [`Outgoing`] response.
//! The HTTP status is not part of `Outgoing`; it only changes through the
//! error-raise contract or successful completion.

mod exchange;
mod output;
mod params;
mod state;

pub use exchange::{Body, Exchange, Incoming, Outgoing, TypedBody, DEFAULT_CONTENT_TYPE};
pub use output::SimulatedResponse;
pub use params::{Params, MAX_INLINE_PARAMS};
pub use state::{
    Connection, Phase, RequestState, StateError, INITIAL_STATUS, INTERNAL_ERROR_MESSAGE,
};
