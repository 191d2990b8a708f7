use crate::error::Error;
use std::io::{self, Write};

/// A FastCGI `FCGI_STDERR` record.
///
/// Used to send error data from the FastCGI server to the client. An empty `Stderr` record
/// marks end of stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stderr(Vec<u8>);

impl Stderr {
    /// Creates a new `FCGI_STDERR` record
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn content(&self) -> &[u8] {
        &self.0
    }

    pub fn from_record_bytes(bytes: Vec<u8>) -> Result<Self, Error> {
        Ok(Self(bytes))
    }

    pub fn to_record_bytes<W: Write>(&self, writer: &mut W) -> Result<(), io::Error> {
        writer.write_all(&self.0)
    }
}
