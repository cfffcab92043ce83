use super::exchange::{Incoming, Outgoing};
use crate::codec::{self, FrameLimits, ProtocolError, RequestFrame};
use crate::config::DebugCriteria;
use crate::ids::RequestId;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::Shutdown;
use tracing::debug;

/// Status every request starts with until it completes or an error is raised
pub const INITIAL_STATUS: u16 = 500;
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Lifecycle of one request. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Init,
    HeadersParsed,
    ParamsParsed,
    CookiesParsed,
    Dispatched,
    HandlerOk,
    HandlerError,
    OutputSent,
    Closed,
}

impl Phase {
    /// Direct successors allowed by the state machine
    #[must_use]
    pub fn can_advance_to(self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Init, HeadersParsed)
                | (HeadersParsed, ParamsParsed)
                | (ParamsParsed, CookiesParsed)
                | (CookiesParsed, Dispatched)
                | (Dispatched, HandlerOk)
                | (Dispatched, HandlerError)
                | (HandlerOk, OutputSent)
                | (HandlerError, OutputSent)
                | (OutputSent, Closed)
        )
    }
}

/// Illegal transition attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateError {
    pub from: Phase,
    pub to: Phase,
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "illegal request transition {:?} -> {:?}", self.from, self.to)
    }
}

impl std::error::Error for StateError {}

/// Byte stream a request arrives on and its response leaves by
pub trait Connection: Read + Write + Send {
    /// Tear down both directions. Called at most once per request.
    fn close(&mut self) -> io::Result<()>;
}

fn ignore_not_connected(res: io::Result<()>) -> io::Result<()> {
    match res {
        Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
        other => other,
    }
}

impl Connection for may::net::TcpStream {
    fn close(&mut self) -> io::Result<()> {
        ignore_not_connected(self.shutdown(Shutdown::Both))
    }
}

impl Connection for std::net::TcpStream {
    fn close(&mut self) -> io::Result<()> {
        ignore_not_connected(self.shutdown(Shutdown::Both))
    }
}

/// Per-connection request record.
///
/// Created at accept, owned by the worker serving it, dropped after the
/// response is flushed. Nothing in here is shared with other requests.
pub struct RequestState {
    pub(crate) phase: Phase,
    pub(crate) incoming: Incoming,
    pub(crate) outgoing: Outgoing,
    pub(crate) status: u16,
    pub(crate) message: String,
    pub(crate) completed: bool,
    pub(crate) conn: Option<Box<dyn Connection>>,
}

impl fmt::Debug for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestState")
            .field("phase", &self.phase)
            .field("request_id", &self.incoming.request_id)
            .field("status", &self.status)
            .field("message", &self.message)
            .field("completed", &self.completed)
            .field("connected", &self.conn.is_some())
            .finish()
    }
}

impl RequestState {
    /// State bound to a live connection
    #[must_use]
    pub fn with_connection(conn: Box<dyn Connection>, debug: DebugCriteria) -> Self {
        let mut state = Self::detached(debug);
        state.conn = Some(conn);
        state
    }

    /// State with no connection, for in-process simulation
    #[must_use]
    pub fn detached(debug: DebugCriteria) -> Self {
        Self {
            phase: Phase::Init,
            incoming: Incoming {
                debug,
                ..Incoming::default()
            },
            outgoing: Outgoing::default(),
            status: INITIAL_STATUS,
            message: INTERNAL_ERROR_MESSAGE.to_string(),
            completed: false,
            conn: None,
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    #[must_use]
    pub fn status_message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    #[must_use]
    pub fn incoming(&self) -> &Incoming {
        &self.incoming
    }

    #[must_use]
    pub fn outgoing(&self) -> &Outgoing {
        &self.outgoing
    }

    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.incoming.request_id
    }

    /// Move to the next phase
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] when `next` is not a direct successor.
    pub fn advance(&mut self, next: Phase) -> Result<(), StateError> {
        if !self.phase.can_advance_to(next) {
            return Err(StateError {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        Ok(())
    }

    /// Jump forward past skipped phases (early output, aborts)
    pub(crate) fn skip_to(&mut self, next: Phase) {
        if next > self.phase {
            self.phase = next;
        }
    }

    /// The message lands on the `Status` line, so line breaks are replaced
    pub(crate) fn set_status(&mut self, status: u16, message: impl Into<String>) {
        self.status = status;
        self.message = codec::header_safe(&message.into()).into_owned();
    }

    /// Store a decoded frame: `Init -> HeadersParsed`
    ///
    /// # Errors
    ///
    /// Fails if headers were already ingested.
    pub fn ingest(&mut self, frame: RequestFrame) -> Result<(), StateError> {
        self.advance(Phase::HeadersParsed)?;
        self.incoming.request_id =
            RequestId::from_header_or_new(frame.headers.get("HTTP_X_REQUEST_ID"));
        self.incoming.headers = frame.headers;
        self.incoming.body = frame.body;
        Ok(())
    }

    /// Decode the request frame from the bound connection
    ///
    /// # Errors
    ///
    /// Any framing or read failure. A detached state reads nothing and
    /// reports a truncated frame.
    pub fn read_frame(&mut self, limits: &FrameLimits) -> Result<(), ProtocolError> {
        let frame = match self.conn.as_mut() {
            Some(conn) => codec::decode(conn, limits)?,
            None => {
                return Err(ProtocolError::Truncated {
                    stage: "netstring length",
                })
            }
        };
        // Phase was Init since the state is fresh per connection
        if let Err(e) = self.ingest(frame) {
            return Err(ProtocolError::Io(io::Error::other(e)));
        }
        Ok(())
    }

    /// Drop the connection without writing anything
    pub fn abort(&mut self) {
        self.completed = true;
        if let Err(e) = self.close_connection() {
            debug!(request_id = %self.incoming.request_id, error = %e, "Close after abort failed");
        }
    }

    pub(crate) fn close_connection(&mut self) -> io::Result<()> {
        self.skip_to(Phase::Closed);
        match self.conn.take() {
            Some(mut conn) => conn.close(),
            None => Ok(()),
        }
    }
}
