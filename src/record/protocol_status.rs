use crate::error::Error;
use std::io::{self, Write};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProtocolStatus {
    /// Normal end of request.
    RequestComplete,
    /// The web server sent concurrent requests over a connection whose peer does not
    /// support multiplexing.
    CantMpxConn,
    /// The application ran out of some resource, e.g. database connections.
    Overloaded,
    /// The web server specified a role the application does not support.
    UnknownRole,
}

impl ProtocolStatus {
    pub fn id(&self) -> u8 {
        match self {
            Self::RequestComplete => 0,
            Self::CantMpxConn => 1,
            Self::Overloaded => 2,
            Self::UnknownRole => 3,
        }
    }

    pub fn from_record_byte(byte: u8) -> Result<Self, Error> {
        let status = match byte {
            0 => Self::RequestComplete,
            1 => Self::CantMpxConn,
            2 => Self::Overloaded,
            3 => Self::UnknownRole,
            _ => return Err(Error::UnsupportedProtocolStatus(byte)),
        };

        Ok(status)
    }

    pub fn to_record_byte<W: Write>(&self, writer: &mut W) -> Result<(), io::Error> {
        let id = self.id();
        writer.write_all(&[id])
    }
}
