use super::pairs::{self, Pairs};
use crate::error::Error;
use std::io::{self, Write};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetValuesResult {
    values: Pairs,
}

impl GetValuesResult {
    pub fn new(values: Pairs) -> Self {
        Self { values }
    }

    pub fn from_record_bytes(bytes: Vec<u8>) -> Result<Self, Error> {
        Ok(Self {
            values: pairs::from_record_bytes(bytes)?,
        })
    }

    pub fn to_record_bytes<W: Write>(&self, writer: &mut W) -> Result<(), io::Error> {
        pairs::to_record_bytes(&self.values, writer)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
    }

    #[cfg(test)]
    pub fn add(mut self, name: &str, value: &str) -> Self {
        self.values
            .insert(name.as_bytes().to_vec(), value.as_bytes().to_vec());
        self
    }
}
