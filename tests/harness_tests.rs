#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Dispatch pipeline tests driven through the in-process harness

use scgi_appserver::config::DebugCriteria;
use scgi_appserver::cookie::Cookie;
use scgi_appserver::dispatcher::{handler_fn, raise, HandlerError, DEBUG_ERROR, PROBLEM_CONTENT_TYPE};
use scgi_appserver::harness::{TestHarness, TestRequest};
use scgi_appserver::request::{Phase, INTERNAL_ERROR_MESSAGE};
use serde::Deserialize;

fn hosts_only() -> TestHarness {
    TestHarness::new(handler_fn(|path, _, _, ex| {
        if path != "/hosts" {
            return Err(raise(404, "missing"));
        }
        ex.set_body("hosts");
        Ok(())
    }))
}

#[test]
fn test_success_sets_200_ok() {
    let res = hosts_only().run(&TestRequest::get("/hosts"));
    assert_eq!(res.status, 200);
    assert_eq!(res.message, "OK");
    assert_eq!(res.content_type, "text/html; charset=utf-8");
    assert_eq!(res.body_text(), "hosts");
}

#[test]
fn test_raised_error_keeps_status_and_message() {
    let res = hosts_only().run(&TestRequest::get("/nope"));
    assert_eq!(res.status, 404);
    assert_eq!(res.message, "missing");
    assert_eq!(res.content_type, PROBLEM_CONTENT_TYPE);
    let problem = res.problem().unwrap();
    assert_eq!(problem["type"], "error");
    assert_eq!(problem["title"], "missing");
    assert_eq!(problem["status"], 404);
    assert_eq!(problem["detail"], "missing");
    assert_eq!(problem["instance"], "");
}

fn failing_handler() -> impl scgi_appserver::Handler {
    handler_fn(|_, _, _, ex| {
        ex.set_body("partial output");
        Err(HandlerError::from(anyhow::anyhow!("database exploded at shard 7")))
    })
}

#[test]
fn test_unexpected_fault_is_masked() {
    let res = TestHarness::new(failing_handler()).run(&TestRequest::get("/"));
    assert_eq!(res.status, 500);
    assert_eq!(res.message, INTERNAL_ERROR_MESSAGE);
    let problem = res.problem().unwrap();
    assert_eq!(problem["title"], INTERNAL_ERROR_MESSAGE);
    assert_eq!(problem["detail"], INTERNAL_ERROR_MESSAGE);
    assert!(!res.body_text().contains("shard 7"));
}

#[test]
fn test_error_debug_criterion_exposes_detail_only_in_body() {
    let harness = TestHarness::with_debug(failing_handler(), DebugCriteria::new([DEBUG_ERROR]));
    let res = harness.run(&TestRequest::get("/"));
    assert_eq!(res.status, 500);
    assert_eq!(res.message, INTERNAL_ERROR_MESSAGE);
    let problem = res.problem().unwrap();
    assert_eq!(problem["title"], INTERNAL_ERROR_MESSAGE);
    assert!(problem["detail"].as_str().unwrap().contains("shard 7"));
}

#[test]
fn test_panic_becomes_500() {
    let harness = TestHarness::with_debug(
        handler_fn(|_, _, _, _| panic!("kaboom")),
        DebugCriteria::new([DEBUG_ERROR]),
    );
    let res = harness.run(&TestRequest::get("/"));
    assert_eq!(res.status, 500);
    assert!(res.problem().unwrap()["detail"]
        .as_str()
        .unwrap()
        .contains("kaboom"));
}

#[test]
fn test_invalid_raised_status_is_a_fault() {
    let res = TestHarness::new(handler_fn(|_, _, _, _| Err(raise(42, "odd"))))
        .run(&TestRequest::get("/"));
    assert_eq!(res.status, 500);
    assert_eq!(res.message, INTERNAL_ERROR_MESSAGE);
}

#[test]
fn test_cookie_round_trip_and_deletion() {
    let harness = TestHarness::new(handler_fn(|_, _, _, ex| {
        let sid = ex.cookie("sid").unwrap_or("none").to_string();
        ex.set_body(sid);
        ex.set_cookie(Cookie::new("seen", "1").path("/"));
        ex.delete_cookie("sid", Some("/"), None);
        Ok(())
    }));
    let res = harness.run(&TestRequest::get("/").cookie("sid", "abc"));
    assert_eq!(res.body_text(), "abc");

    let cookies: Vec<&str> = res.set_cookies().collect();
    assert_eq!(cookies.len(), 2);
    assert_eq!(cookies[0], "seen=1; Path=/");
    assert!(cookies[1].starts_with("sid=; Expires=Thu, 01 Jan 1970 00:00:01 GMT"));
    assert!(cookies[1].ends_with("Path=/"));
}

#[test]
fn test_headers_and_cookies_survive_error() {
    let harness = TestHarness::new(handler_fn(|_, _, _, ex| {
        ex.set_header("X-Trace", "t-1");
        ex.set_cookie(Cookie::new("a", "b"));
        Err(raise(403, "forbidden"))
    }));
    let res = harness.run(&TestRequest::get("/"));
    assert_eq!(res.status, 403);
    assert_eq!(res.header("X-Trace"), Some("t-1"));
    assert_eq!(res.set_cookies().collect::<Vec<_>>(), ["a=b"]);
    assert_eq!(res.content_type, PROBLEM_CONTENT_TYPE);
}

#[test]
fn test_query_values_precede_form_values() {
    let harness = TestHarness::new(handler_fn(|_, _, params, ex| {
        let all = params.get_all("tag").join(",");
        ex.set_body(format!("{all}|{}", params.get("tag").unwrap_or("")));
        Ok(())
    }));
    let req = TestRequest::post("/t?tag=q1&tag=q2").form(&[("tag", "f1"), ("other", "x y")]);
    assert_eq!(harness.run(&req).body_text(), "q1,q2,f1|q1");
}

#[test]
fn test_non_form_body_not_merged_into_params() {
    let harness = TestHarness::new(handler_fn(|_, _, params, ex| {
        ex.set_body(format!("{}", params.len()));
        Ok(())
    }));
    let req = TestRequest::post("/t").body("text/plain", "a=1&b=2");
    assert_eq!(harness.run(&req).body_text(), "0");
}

#[derive(Deserialize)]
struct Host {
    name: String,
}

#[test]
fn test_typed_body_accessor() {
    let harness = TestHarness::new(handler_fn(|_, _, _, ex| {
        let host: Host = ex.body_json()?;
        ex.set_body(host.name);
        Ok(())
    }));

    let ok = harness.run(&TestRequest::post("/").body("application/json; charset=utf-8", r#"{"name":"db1"}"#));
    assert_eq!(ok.body_text(), "db1");

    let mismatch = harness.run(&TestRequest::post("/").body("text/xml", "<host/>"));
    assert_eq!(mismatch.status, 404);
    assert_eq!(mismatch.message, "Expected application/json body, received text/xml");

    let bad = harness.run(&TestRequest::post("/").body("application/json", "{"));
    assert_eq!(bad.status, 400);
}

#[test]
fn test_path_normalized_and_method_lowercased() {
    let harness = TestHarness::new(handler_fn(|path, method, _, ex| {
        ex.set_body(format!("{method} {path}"));
        Ok(())
    }));
    let res = harness.run(&TestRequest::new("DELETE", "//a///b?x=1"));
    assert_eq!(res.body_text(), "delete /a/b");
}

#[test]
fn test_binary_body_has_no_charset() {
    let harness = TestHarness::new(handler_fn(|_, _, _, ex| {
        ex.set_content_type("image/png", "utf-8");
        ex.set_binary_body(vec![0x89, b'P', b'N', b'G', 0xFF]);
        Ok(())
    }));
    let res = harness.run(&TestRequest::get("/logo.png"));
    assert_eq!(res.content_type, "image/png");
    assert_eq!(res.body, vec![0x89, b'P', b'N', b'G', 0xFF]);
}

#[test]
fn test_output_happens_once() {
    let harness = hosts_only();
    let mut state = harness.execute(&TestRequest::get("/hosts"));
    assert_eq!(state.phase(), Phase::HandlerOk);
    assert!(!state.is_completed());

    let first = state.finalize_simulated();
    assert!(first.is_some());
    assert!(state.is_completed());
    assert_eq!(state.phase(), Phase::Closed);
    assert!(state.finalize_simulated().is_none());
}

#[test]
fn test_handler_invoked_exactly_once() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let harness = TestHarness::new(handler_fn(move |_, _, _, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(raise(409, "conflict"))
    }));
    let mut state = harness.execute(&TestRequest::get("/"));
    assert_eq!(state.phase(), Phase::HandlerError);
    state.finalize_simulated();
    state.finalize_simulated();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
