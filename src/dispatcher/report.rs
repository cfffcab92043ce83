//! Error reporting: turns a failed dispatch into an RFC 7807 problem body.

use crate::request::{RequestState, INTERNAL_ERROR_MESSAGE};
use serde::Serialize;

pub const PROBLEM_CONTENT_TYPE: &str = "application/problem+json";

/// Debug tag that exposes fault detail in problem bodies
pub const DEBUG_ERROR: &str = "error";

/// RFC 7807 problem details
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Problem {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    pub instance: String,
}

/// A dispatch failure after classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// Explicitly raised by the handler
    Raised { status: u16, message: String },
    /// Anything else; `detail` is the trace or message, never shown unless
    /// the `error` debug criterion is on
    Unexpected { detail: String },
}

impl Failure {
    fn problem(&self, expose_detail: bool) -> Problem {
        let (status, title, detail) = match self {
            Failure::Raised { status, message } => (*status, message.clone(), message.clone()),
            Failure::Unexpected { detail } => {
                let detail = if expose_detail {
                    detail.clone()
                } else {
                    INTERNAL_ERROR_MESSAGE.to_string()
                };
                (500, INTERNAL_ERROR_MESSAGE.to_string(), detail)
            }
        };
        Problem {
            kind: "error".to_string(),
            title,
            status,
            detail,
            instance: String::new(),
        }
    }
}

/// Set the error status and replace the body with a problem document.
///
/// Headers and cookies queued by the handler are kept.
pub fn report(state: &mut RequestState, failure: &Failure) {
    let expose = state.incoming.debug.is_enabled(DEBUG_ERROR);
    let problem = failure.problem(expose);
    state.set_status(problem.status, problem.title.clone());
    // Only strings and integers: serialization cannot fail
    let body = serde_json::to_string(&problem).unwrap_or_default();
    state.outgoing.set_content_type(PROBLEM_CONTENT_TYPE, "utf-8");
    state.outgoing.set_body(body);
}
