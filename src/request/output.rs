//! Response finalization shared by the success and error paths.
//!
//! Both entry points are gated on [`RequestState::is_completed`]: the first
//! call produces output, every later call is a no-op.

use super::state::{Phase, RequestState};
use crate::codec;
use std::io;
use tracing::{debug, warn};

/// Response captured by the in-process path instead of a socket
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatedResponse {
    pub status: u16,
    pub message: String,
    pub content_type: String,
    pub body: Vec<u8>,
    /// Handler headers followed by one `Set-Cookie` per queued cookie
    pub headers: Vec<(String, String)>,
}

impl SimulatedResponse {
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// First header named `name`, case-insensitive
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn set_cookies(&self) -> impl Iterator<Item = &str> {
        self.headers
            .iter()
            .filter(|(k, _)| k == "Set-Cookie")
            .map(|(_, v)| v.as_str())
    }

    /// Parsed problem+json body, if that is what was returned
    #[must_use]
    pub fn problem(&self) -> Option<serde_json::Value> {
        if self.content_type != crate::dispatcher::PROBLEM_CONTENT_TYPE {
            return None;
        }
        serde_json::from_slice(&self.body).ok()
    }
}

impl RequestState {
    fn status_line(&self) -> String {
        format!("{} {}", self.status, self.message)
    }

    fn extra_headers(&self) -> Vec<(String, String)> {
        let mut headers = self.outgoing.headers.clone();
        headers.extend(
            self.outgoing
                .cookies
                .iter()
                .map(|c| ("Set-Cookie".to_string(), c.to_header_value())),
        );
        headers
    }

    fn mark_output_sent(&mut self) {
        self.completed = true;
        if self.advance(Phase::OutputSent).is_err() {
            // Output before dispatch finished (e.g. early error); jump ahead
            self.skip_to(Phase::OutputSent);
        }
    }

    /// Write the response to the connection and close it.
    ///
    /// Headers are flushed before the body. Content-Length counts the
    /// encoded body bytes, so it is exact for text and binary bodies alike.
    ///
    /// # Errors
    ///
    /// Write or close failures; the state is completed either way.
    pub fn finalize(&mut self) -> io::Result<()> {
        if self.completed {
            debug!(request_id = %self.incoming.request_id, "Output already sent");
            return Ok(());
        }
        let body = self.outgoing.body_bytes();
        let mut head = vec![
            ("Status".to_string(), self.status_line()),
            ("Content-Type".to_string(), self.outgoing.content_type_header()),
            ("Content-Length".to_string(), body.len().to_string()),
        ];
        head.extend(self.extra_headers());
        self.mark_output_sent();

        let written = match self.conn.as_mut() {
            Some(conn) => codec::write_response(conn, &head, &body),
            None => Ok(()),
        };
        if let Err(e) = &written {
            warn!(request_id = %self.incoming.request_id, error = %e, "Response write failed");
        }
        let closed = self.close_connection();
        written.and(closed)
    }

    /// Shape the response without framing it.
    ///
    /// Returns `None` when output was already produced.
    pub fn finalize_simulated(&mut self) -> Option<SimulatedResponse> {
        if self.completed {
            return None;
        }
        let response = SimulatedResponse {
            status: self.status,
            message: self.message.clone(),
            content_type: self.outgoing.content_type_header(),
            body: self.outgoing.body_bytes(),
            headers: self.extra_headers(),
        };
        self.mark_output_sent();
        // No connection is bound, this only records the transition
        let _ = self.close_connection();
        Some(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DebugCriteria;
    use crate::cookie::Cookie;

    #[test]
    fn simulated_output_once() {
        let mut st = RequestState::detached(DebugCriteria::default());
        st.outgoing.set_body("hi");
        st.outgoing.set_cookie(Cookie::new("a", "1"));
        st.outgoing.set_cookie(Cookie::new("b", "2"));
        let first = st.finalize_simulated().expect("first output");
        assert_eq!(first.status, 500);
        assert_eq!(first.set_cookies().collect::<Vec<_>>(), ["a=1", "b=2"]);
        assert!(first.header("Content-Length").is_none());
        assert!(st.finalize_simulated().is_none());
        assert_eq!(st.phase(), Phase::Closed);
    }
}
