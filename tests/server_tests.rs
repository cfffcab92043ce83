#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end tests over a real socket
//!
//! Each test starts the server on an ephemeral port with the echo handler
//! and talks to it the way a front proxy would: one framed request per
//! connection, read until the server closes.

mod common;

use common::runtime::setup_may_runtime;
use common::scgi::{parse_response, request_bytes, send};
use scgi_appserver::config::ServerConfig;
use scgi_appserver::dispatcher::PROBLEM_CONTENT_TYPE;
use scgi_appserver::echo::EchoHandler;
use scgi_appserver::request::INTERNAL_ERROR_MESSAGE;
use scgi_appserver::{Server, ServerHandle};
use std::io::Write;
use std::net::TcpStream;
use std::thread;

/// Running echo server, stopped on drop
struct EchoServer {
    handle: Option<ServerHandle>,
}

impl EchoServer {
    fn start(min_workers: usize, max_workers: usize) -> Self {
        setup_may_runtime();
        let config = ServerConfig {
            port: 0,
            min_workers,
            max_workers,
            ..ServerConfig::default()
        };
        let handle = Server::with_factory(config, EchoHandler::for_worker)
            .unwrap()
            .start()
            .unwrap();
        handle.wait_ready().unwrap();
        Self {
            handle: Some(handle),
        }
    }

    fn addr(&self) -> std::net::SocketAddr {
        self.handle.as_ref().unwrap().local_addr()
    }
}

impl Drop for EchoServer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.stop();
        }
    }
}

#[test]
fn test_echo_round_trip() {
    let server = EchoServer::start(1, 2);
    let frame = request_bytes(
        "POST",
        "/echo//hosts",
        "name=db1",
        &[
            ("CONTENT_TYPE", "application/x-www-form-urlencoded"),
            ("HTTP_COOKIE", "sid=abc"),
            ("HTTP_ACCEPT_LANGUAGE", "fr;q=0.9, en;q=0.5"),
        ],
        b"name=db2&tag=x",
    );
    let res = parse_response(&send(server.addr(), &frame));

    assert_eq!(res.status, 200);
    assert_eq!(res.header("Status"), Some("200 OK"));
    assert_eq!(res.header("Content-Type"), Some("application/json"));
    let body = res.body_json();
    assert_eq!(body["path"], "/echo/hosts");
    assert_eq!(body["method"], "post");
    assert_eq!(body["params"]["name"], serde_json::json!(["db1", "db2"]));
    assert_eq!(body["params"]["tag"], serde_json::json!(["x"]));
    assert_eq!(body["cookies"]["sid"], "abc");
    assert_eq!(body["locale"], "fr");
    assert_eq!(body["body_bytes"], 14);
}

#[test]
fn test_concurrent_clients_get_their_own_response() {
    let server = EchoServer::start(1, 4);
    let addr = server.addr();

    let clients: Vec<_> = (0..8)
        .map(|n| {
            thread::spawn(move || {
                let frame = request_bytes("GET", &format!("/client/{n}"), &format!("n={n}"), &[], b"");
                (n, parse_response(&send(addr, &frame)))
            })
        })
        .collect();

    for client in clients {
        let (n, res) = client.join().unwrap();
        assert_eq!(res.status, 200);
        let body = res.body_json();
        assert_eq!(body["path"], format!("/client/{n}"));
        assert_eq!(body["params"]["n"], serde_json::json!([n.to_string()]));
    }

    let stats = server.handle.as_ref().unwrap().stats();
    assert!(stats.spawned <= 4);
    assert!(stats.live <= 4);
}

#[test]
fn test_raised_error_over_the_wire() {
    let server = EchoServer::start(1, 1);
    let res = parse_response(&send(server.addr(), &request_bytes("GET", "/echo/fail", "", &[], b"")));
    assert_eq!(res.status, 418);
    assert_eq!(res.header("Status"), Some("418 I'm a teapot"));
    assert_eq!(res.header("Content-Type"), Some(PROBLEM_CONTENT_TYPE));
    assert_eq!(res.body_json()["title"], "I'm a teapot");
}

#[test]
fn test_handler_panic_keeps_worker_alive() {
    let server = EchoServer::start(1, 1);
    let res = parse_response(&send(server.addr(), &request_bytes("GET", "/echo/panic", "", &[], b"")));
    assert_eq!(res.status, 500);
    assert_eq!(res.body_json()["title"], INTERNAL_ERROR_MESSAGE);
    assert!(!String::from_utf8_lossy(&res.body).contains("asked to panic"));

    // Same single worker answers the next request
    let res = parse_response(&send(server.addr(), &request_bytes("GET", "/after", "", &[], b"")));
    assert_eq!(res.status, 200);
}

#[test]
fn test_garbage_is_dropped_without_response() {
    let server = EchoServer::start(1, 1);
    let mut stream = TcpStream::connect(server.addr()).unwrap();
    stream
        .set_read_timeout(Some(std::time::Duration::from_secs(5)))
        .unwrap();
    stream.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
    let mut out = Vec::new();
    let _ = std::io::Read::read_to_end(&mut stream, &mut out);
    assert!(out.is_empty());

    let res = parse_response(&send(server.addr(), &request_bytes("GET", "/", "", &[], b"")));
    assert_eq!(res.status, 200);
}

#[test]
fn test_wait_ready_does_not_consume_a_worker() {
    let server = EchoServer::start(1, 2);
    let stats = server.handle.as_ref().unwrap().stats();
    assert_eq!(stats.dispatched, 0);
    assert_eq!(stats.completed, 0);
}
