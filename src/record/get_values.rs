use super::pairs::{self, Pairs};
use crate::error::Error;
use std::io::{self, Write};

/// A `FCGI_GET_VALUES` record.
///
/// A FastCGI client queries the server for the value of one or more management variables by
/// sending a set of name-value pairs with empty values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetValues {
    names: Pairs,
}

impl GetValues {
    pub fn names(&self) -> impl Iterator<Item = &[u8]> {
        self.names.keys().map(Vec::as_slice)
    }

    pub fn from_record_bytes(bytes: Vec<u8>) -> Result<Self, Error> {
        Ok(Self {
            names: pairs::from_record_bytes(bytes)?,
        })
    }

    pub fn to_record_bytes<W: Write>(&self, writer: &mut W) -> Result<(), io::Error> {
        pairs::to_record_bytes(&self.names, writer)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
    }

    #[cfg(test)]
    pub fn add(mut self, name: &str) -> Self {
        self.names.insert(name.as_bytes().to_vec(), vec![]);
        self
    }
}
