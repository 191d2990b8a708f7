use super::pairs::{self, Pairs};
use crate::error::Error;
use std::io::{self, Write};

/// A `FCGI_PARAMS` record.
///
/// A single PARAMS record only ever carries a *fragment* of the request's environment — the
/// packed name/value pair encoding for a large environment can span many records, and a field
/// boundary need not line up with a record boundary. So a `Params` record is just the bytes of
/// that fragment; decoding into pairs only happens once every fragment up to the empty
/// (end-of-stream) record has been concatenated, via [`Params::decode`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<u8>);

impl Params {
    pub fn content(&self) -> &[u8] {
        &self.0
    }

    pub fn into_content(self) -> Vec<u8> {
        self.0
    }

    /// Decodes a complete, concatenated PARAMS byte stream (everything received for a request up
    /// to, but not including, the terminating empty record) into its name/value pairs.
    pub fn decode(bytes: Vec<u8>) -> Result<Pairs, Error> {
        pairs::from_record_bytes(bytes)
    }

    pub fn from_record_bytes(bytes: Vec<u8>) -> Result<Self, Error> {
        Ok(Self(bytes))
    }

    pub fn to_record_bytes<W: Write>(&self, writer: &mut W) -> Result<(), io::Error> {
        writer.write_all(&self.0)
    }

    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    #[cfg(test)]
    pub fn from_pairs(pairs: &Pairs) -> Self {
        let mut bytes = vec![];
        pairs::to_record_bytes(pairs, &mut bytes).unwrap();
        Self(bytes)
    }
}
