use super::ParseError;
use super::enums::{DNSResourceClass, DNSResourceType};
use super::wire::{WireReader, write_name};

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DNSQuestion {
    pub labels: Vec<String>,
    pub qtype: DNSResourceType,
    pub qclass: DNSResourceClass,
    /// Numeric QTYPE as received; private-use type codes map to
    /// `DNSResourceType::Unknown` and are resolved through the record
    /// registry instead.
    pub raw_qtype: u16,
}

impl DNSQuestion {
    pub fn new(labels: Vec<String>, qtype: DNSResourceType, qclass: DNSResourceClass) -> Self {
        let raw_qtype = qtype.into();
        DNSQuestion {
            labels,
            qtype,
            qclass,
            raw_qtype,
        }
    }

    pub fn with_raw_qtype(labels: Vec<String>, raw_qtype: u16) -> Self {
        DNSQuestion {
            labels,
            qtype: raw_qtype.into(),
            qclass: DNSResourceClass::IN,
            raw_qtype,
        }
    }

    fn wire_qtype(&self) -> u16 {
        if self.qtype == DNSResourceType::Unknown {
            self.raw_qtype
        } else {
            self.qtype.into()
        }
    }

    pub fn read(reader: &mut WireReader) -> Result<Self, ParseError> {
        let labels = reader.read_name()?;
        let raw_qtype = reader.read_u16()?;
        let qclass = reader.read_u16()?.into();
        Ok(DNSQuestion {
            labels,
            qtype: raw_qtype.into(),
            qclass,
            raw_qtype,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) -> Result<(), ParseError> {
        write_name(out, &self.labels)?;
        out.extend_from_slice(&self.wire_qtype().to_be_bytes());
        out.extend_from_slice(&u16::from(self.qclass).to_be_bytes());
        Ok(())
    }
}
