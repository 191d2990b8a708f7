//! A multi-threaded FastCGI 1.0 responder/authorizer/filter server core.
//!
//! This crate owns the hard part of serving FastCGI: decoding the record stream off an accepted
//! connection, multiplexing however many requests the peer interleaves on it, coordinating the
//! reader with one handler thread per request, and serializing writes back across them. It does
//! not know anything about HTTP; the request handler you supply is an opaque callback invoked
//! with a [`Request`] whose environment and byte streams are already assembled.
//!
//! ```no_run
//! use fcgi_core::{Endpoint, Record, Role, ServerSpec};
//! use std::io::{Read, Write};
//!
//! ServerSpec::new(Role::Responder)
//!     .start(Endpoint::tcp("127.0.0.1:9000").unwrap(), |request| {
//!         let mut body = Vec::new();
//!         request.stdin().reader().unwrap().read_to_end(&mut body).unwrap();
//!         let _ = request.stdout().write(&body);
//!     })
//!     .unwrap()
//!     .join();
//! ```

#![allow(dead_code)]

mod buffered_reader;
mod connection;
mod connection_handler;
mod error;
mod listener;
mod record;
mod request;
mod server;
mod stream;

pub use error::{Error, Result};
pub use record::{Pairs, Role};
pub use request::Request;
pub use server::{Endpoint, ServerExitReason, ServerHandle, ServerSpec};
pub use stream::{InputStream, OutputStream};

/// Re-exported so callers can pattern-match on the variant a `fn(Request)` handler never touches
/// directly but that shows up in logs and tests.
pub use record::Record;
