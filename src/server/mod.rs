//! # Server Module
//!
//! TCP front end. The acceptor coroutine takes connections off the listening
//! socket and transfers each one to the worker pool; it never reads from or
//! writes to a connection itself.

mod listener;

pub use listener::{Server, ServerHandle};
