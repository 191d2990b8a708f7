use crate::error::Error;
use std::io::{self, Write};

/// A FastCGI `FCGI_DATA` record.
///
/// Similar to `FCGI_STDIN`, but only used by the `FILTER` role's secondary input stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Data(Vec<u8>);

impl Data {
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
