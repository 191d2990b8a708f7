use crate::error::Error;
use std::io::{self, Write};

/// A FastCGI `FCGI_STDIN` record.
///
/// Carries a fragment of the request body from the web server. An empty `Stdin` record marks
/// end of stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stdin(Vec<u8>);

impl Stdin {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn content(&self) -> &[u8] {
        &self.0
    }

    pub fn into_content(self) -> Vec<u8> {
        self.0
    }

    pub fn from_record_bytes(bytes: Vec<u8>) -> Result<Self, Error> {
        Ok(Self(bytes))
    }

    pub fn to_record_bytes<W: Write>(&self, writer: &mut W) -> Result<(), io::Error> {
        writer.write_all(&self.0)
    }
}
