#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

pub mod runtime {
    use std::sync::Once;

    /// Ensures May coroutines are configured only once
    static MAY_INIT: Once = Once::new();

    pub fn setup_may_runtime() {
        MAY_INIT.call_once(|| {
            may::config().set_stack_size(0x8000);
            may::config().set_workers(2);
        });
    }
}

pub mod mock {
    use scgi_appserver::request::Connection;
    use std::io::{self, Cursor, Read, Write};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// What a [`MockConnection`] saw, readable after the connection is gone
    #[derive(Clone, Default)]
    pub struct Transcript {
        written: Arc<Mutex<Vec<u8>>>,
        closes: Arc<AtomicUsize>,
    }

    impl Transcript {
        pub fn written(&self) -> Vec<u8> {
            self.written.lock().unwrap().clone()
        }

        pub fn written_text(&self) -> String {
            String::from_utf8_lossy(&self.written()).into_owned()
        }

        pub fn closes(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }
    }

    /// In-memory connection: reads a canned request, records the response
    pub struct MockConnection {
        input: Cursor<Vec<u8>>,
        transcript: Transcript,
    }

    impl MockConnection {
        pub fn new(input: impl Into<Vec<u8>>) -> (Self, Transcript) {
            let transcript = Transcript::default();
            (
                Self {
                    input: Cursor::new(input.into()),
                    transcript: transcript.clone(),
                },
                transcript,
            )
        }
    }

    impl Read for MockConnection {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for MockConnection {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.transcript.written.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Connection for MockConnection {
        fn close(&mut self) -> io::Result<()> {
            self.transcript.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}

pub mod scgi {
    use scgi_appserver::codec::{encode_request, HeaderMap};
    use std::io::{Read, Write};
    use std::net::{SocketAddr, TcpStream};
    use std::time::Duration;

    /// Frame a request the way a front proxy would
    pub fn request_bytes(method: &str, path: &str, query: &str, extra: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
        let mut headers = HeaderMap::new();
        headers.insert("CONTENT_LENGTH", body.len().to_string());
        headers.insert("SCGI", "1");
        headers.insert("REQUEST_METHOD", method);
        headers.insert("SCRIPT_NAME", path);
        headers.insert("QUERY_STRING", query);
        for (k, v) in extra {
            headers.insert(*k, *v);
        }
        encode_request(&headers, body)
    }

    /// Parsed CGI-style response
    #[derive(Debug)]
    pub struct RawResponse {
        pub status: u16,
        pub headers: Vec<(String, String)>,
        pub body: Vec<u8>,
    }

    impl RawResponse {
        pub fn header(&self, name: &str) -> Option<&str> {
            self.headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        }

        pub fn body_json(&self) -> serde_json::Value {
            serde_json::from_slice(&self.body).unwrap()
        }
    }

    pub fn parse_response(raw: &[u8]) -> RawResponse {
        let split = raw
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("response head terminator");
        let head = String::from_utf8_lossy(&raw[..split]).into_owned();
        let body = raw[split + 4..].to_vec();
        let headers: Vec<(String, String)> = head
            .split("\r\n")
            .filter_map(|line| line.split_once(": "))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let status = headers
            .iter()
            .find(|(k, _)| k == "Status")
            .and_then(|(_, v)| v.split(' ').next())
            .and_then(|code| code.parse().ok())
            .expect("Status header");
        RawResponse {
            status,
            headers,
            body,
        }
    }

    /// Send one framed request and read until the server closes
    pub fn send(addr: SocketAddr, frame: &[u8]) -> Vec<u8> {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream.write_all(frame).unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        out
    }
}
