use super::protocol_status::ProtocolStatus;
use crate::error::Error;
use std::io::{self, Write};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EndRequest {
    app_status: u32,
    protocol_status: ProtocolStatus,
}

impl EndRequest {
    pub fn new(app_status: u32, protocol_status: ProtocolStatus) -> Self {
        Self {
            app_status,
            protocol_status,
        }
    }

    pub fn from_record_bytes(bytes: Vec<u8>) -> Result<Self, Error> {
        let buffer: [u8; 8] = bytes
            .try_into()
            .map_err(|_| Error::MalformedRecordPayload("EndRequest"))?;

        let app_status = u32::from_be_bytes(buffer[..4].try_into().unwrap());
        let protocol_status = ProtocolStatus::from_record_byte(buffer[4])?;
        Ok(Self {
            app_status,
            protocol_status,
        })
    }

    pub fn to_record_bytes<W: Write>(&self, writer: &mut W) -> Result<(), io::Error> {
        writer.write_all(&self.app_status.to_be_bytes())?;
        writer.write_all(&[self.protocol_status.id(), 0, 0, 0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        for record in [
            EndRequest::new(0, ProtocolStatus::RequestComplete),
            EndRequest::new(1, ProtocolStatus::UnknownRole),
        ] {
            let mut bytes = vec![];
            record.to_record_bytes(&mut bytes).unwrap();
            let decoded = EndRequest::from_record_bytes(bytes).unwrap();
            assert_eq!(decoded, record);
        }
    }
}
