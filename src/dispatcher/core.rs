//! Dispatcher core: request normalization and handler invocation.

use super::error::{HandlerError, HandlerResult};
use super::report::{report, Failure};
use crate::codec::HeaderMap;
use crate::config::DebugCriteria;
use crate::cookie::parse_cookie_header;
use crate::negotiate::ContentType;
use crate::request::{Exchange, Params, Phase, RequestState, StateError, TypedBody};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;
use tracing::{debug, error, info};

/// Debug tag that logs every decoded header block
pub const DEBUG_REQUEST: &str = "request";

/// Application entry point, resolved once per worker.
///
/// Invoked exactly once per request with the normalized path, the
/// lowercased method and the merged parameter multimap.
pub trait Handler: Send {
    fn handle(
        &self,
        path: &str,
        method: &str,
        params: &Params,
        ex: &mut Exchange<'_>,
    ) -> HandlerResult;
}

impl<H: Handler + ?Sized> Handler for Box<H> {
    fn handle(&self, path: &str, method: &str, params: &Params, ex: &mut Exchange<'_>) -> HandlerResult {
        (**self).handle(path, method, params, ex)
    }
}

/// Closure adapter, see [`handler_fn`]
pub struct FnHandler<F>(F);

impl<F> Handler for FnHandler<F>
where
    F: Fn(&str, &str, &Params, &mut Exchange<'_>) -> HandlerResult + Send,
{
    fn handle(&self, path: &str, method: &str, params: &Params, ex: &mut Exchange<'_>) -> HandlerResult {
        (self.0)(path, method, params, ex)
    }
}

/// Wrap a closure as a [`Handler`]
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&str, &str, &Params, &mut Exchange<'_>) -> HandlerResult + Send,
{
    FnHandler(f)
}

/// Collapse every run of `/` into one; an empty path becomes `/`
#[must_use]
pub fn normalize_path(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut prev_slash = false;
    for c in raw.chars() {
        if c == '/' {
            if !prev_slash {
                out.push(c);
            }
            prev_slash = true;
        } else {
            out.push(c);
            prev_slash = false;
        }
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// `SCRIPT_NAME` + `PATH_INFO`, falling back to the path of `REQUEST_URI`
fn request_path(headers: &HeaderMap) -> String {
    let script = headers.get("SCRIPT_NAME").unwrap_or("");
    let info = headers.get("PATH_INFO").unwrap_or("");
    let joined = format!("{script}{info}");
    if !joined.is_empty() {
        return normalize_path(&joined);
    }
    let uri = headers
        .get("DOCUMENT_URI")
        .or_else(|| headers.get("REQUEST_URI"))
        .unwrap_or("/");
    normalize_path(uri.split('?').next().unwrap_or("/"))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Runs the normalize -> dispatch -> error-report pipeline for one worker.
///
/// Holds the handler capability resolved at worker initialization; there is
/// no per-request lookup.
pub struct Dispatcher {
    handler: Box<dyn Handler>,
    debug: DebugCriteria,
}

impl Dispatcher {
    #[must_use]
    pub fn new(handler: Box<dyn Handler>, debug: DebugCriteria) -> Self {
        Self { handler, debug }
    }

    #[must_use]
    pub fn debug(&self) -> &DebugCriteria {
        &self.debug
    }

    /// Derive path, method, params and cookies: `HeadersParsed -> CookiesParsed`
    ///
    /// Query-string values come first; form-body values are appended after
    /// them. Non-form bodies are kept as a [`TypedBody`].
    ///
    /// # Errors
    ///
    /// The state was not freshly ingested.
    pub fn prepare(&self, state: &mut RequestState) -> Result<(), StateError> {
        let headers = &state.incoming.headers;
        if self.debug.is_enabled(DEBUG_REQUEST) {
            debug!(
                request_id = %state.incoming.request_id,
                headers = ?headers,
                "Request headers decoded"
            );
        }

        let path = request_path(headers);
        let method = headers
            .get("REQUEST_METHOD")
            .unwrap_or("GET")
            .to_ascii_lowercase();
        let content_type = headers
            .get("CONTENT_TYPE")
            .filter(|v| !v.trim().is_empty())
            .map(ContentType::parse);

        let mut params = Params::new();
        params.extend_urlencoded(headers.get("QUERY_STRING").unwrap_or("").as_bytes());
        let mut typed_body = None;
        match &content_type {
            Some(ct) if ct.is_form() => params.extend_urlencoded(&state.incoming.body),
            _ if state.incoming.body.is_empty() => {}
            ct => {
                typed_body = Some(TypedBody {
                    mime: ct
                        .as_ref()
                        .map_or_else(|| "application/octet-stream".to_string(), |c| c.mime.clone()),
                    data: state.incoming.body.clone(),
                });
            }
        }

        state.advance(Phase::ParamsParsed)?;
        let incoming = &mut state.incoming;
        incoming.path = path;
        incoming.method = method;
        incoming.content_type = content_type;
        incoming.params = params;
        incoming.typed_body = typed_body;

        let cookies = incoming
            .headers
            .get("HTTP_COOKIE")
            .map(parse_cookie_header)
            .unwrap_or_default();
        state.advance(Phase::CookiesParsed)?;
        state.incoming.cookies = cookies;
        Ok(())
    }

    /// Prepare, invoke the handler once, and settle status/body.
    ///
    /// Leaves the state in `HandlerOk` or `HandlerError`; output is the
    /// caller's job.
    pub fn dispatch(&self, state: &mut RequestState) {
        let request_id = state.incoming.request_id;
        if let Err(e) = self.prepare(state).and_then(|()| state.advance(Phase::Dispatched)) {
            error!(request_id = %request_id, error = %e, "Request not dispatchable");
            state.skip_to(Phase::HandlerError);
            report(
                state,
                &Failure::Unexpected {
                    detail: e.to_string(),
                },
            );
            return;
        }

        info!(
            request_id = %request_id,
            method = %state.incoming.method,
            path = %state.incoming.path,
            params = state.incoming.params.len(),
            "Request dispatched to handler"
        );
        let start = Instant::now();

        let outcome = {
            let RequestState {
                incoming, outgoing, ..
            } = &mut *state;
            let incoming: &_ = incoming;
            let mut ex = Exchange { incoming, outgoing };
            catch_unwind(AssertUnwindSafe(|| {
                self.handler
                    .handle(&incoming.path, &incoming.method, &incoming.params, &mut ex)
            }))
        };
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let failure = match outcome {
            Ok(Ok(())) => {
                // Dispatched -> HandlerOk cannot fail here
                let _ = state.advance(Phase::HandlerOk);
                state.set_status(200, "OK");
                info!(request_id = %request_id, elapsed_ms, "Handler execution complete");
                return;
            }
            Ok(Err(HandlerError::Raised { status, message })) => {
                if http::StatusCode::from_u16(status).is_ok() {
                    info!(request_id = %request_id, status, message = %message, elapsed_ms, "Handler raised error");
                    Failure::Raised { status, message }
                } else {
                    Failure::Unexpected {
                        detail: format!("handler raised invalid status {status}: {message}"),
                    }
                }
            }
            Ok(Err(HandlerError::Fault(e))) => Failure::Unexpected {
                detail: format!("{e:?}"),
            },
            Err(panic) => Failure::Unexpected {
                detail: format!("handler panicked: {}", panic_message(panic.as_ref())),
            },
        };
        if let Failure::Unexpected { detail } = &failure {
            error!(request_id = %request_id, detail = %detail, elapsed_ms, "Handler failed");
        }
        let _ = state.advance(Phase::HandlerError);
        report(state, &failure);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_slashes() {
        assert_eq!(normalize_path("//a///b"), "/a/b");
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("a//"), "a/");
    }

    #[test]
    fn path_from_script_and_info() {
        let headers: HeaderMap = [("SCRIPT_NAME", "/app/"), ("PATH_INFO", "/hosts")]
            .into_iter()
            .collect();
        assert_eq!(request_path(&headers), "/app/hosts");
    }

    #[test]
    fn path_from_request_uri() {
        let headers: HeaderMap = [("REQUEST_URI", "//x//y?z=1")].into_iter().collect();
        assert_eq!(request_path(&headers), "/x/y");
    }
}
