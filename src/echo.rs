use crate::dispatcher::{raise, Handler, HandlerResult};
use crate::request::{Exchange, Params};
use crate::worker_pool::WorkerContext;
use serde_json::json;

/// Locales the echo handler can answer in
pub const ECHO_LOCALES: &[&str] = &["en", "en-US", "fr", "de"];

/// Demo handler: echoes back what it was given as JSON.
///
/// `/echo/fail` raises a 418 and `/echo/panic` panics, so both error paths
/// can be exercised end-to-end.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler {
    worker_id: usize,
}

impl EchoHandler {
    /// Initializer-compatible constructor
    pub fn for_worker(ctx: &WorkerContext) -> anyhow::Result<Self> {
        Ok(Self { worker_id: ctx.id })
    }
}

impl Handler for EchoHandler {
    #[allow(clippy::panic)]
    fn handle(&self, path: &str, method: &str, params: &Params, ex: &mut Exchange<'_>) -> HandlerResult {
        match path {
            "/echo/fail" => return Err(raise(418, "I'm a teapot")),
            "/echo/panic" => panic!("echo handler asked to panic"),
            _ => {}
        }

        let params: serde_json::Map<String, serde_json::Value> = params
            .iter()
            .map(|(k, vs)| (k.to_string(), json!(vs)))
            .collect();
        let cookies: serde_json::Map<String, serde_json::Value> = ex
            .cookies()
            .iter()
            .map(|(k, v)| (k.clone(), json!(v)))
            .collect();
        let locale = ex.locale(ECHO_LOCALES);

        let body = json!({
            "path": path,
            "method": method,
            "params": params,
            "cookies": cookies,
            "locale": locale,
            "content_type": ex.content_type(),
            "body_bytes": ex.body().len(),
            "request_id": ex.request_id().to_string(),
            "worker_id": self.worker_id,
        });
        ex.set_json(&body)
    }
}
