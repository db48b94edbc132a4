use super::ParseError;
use super::enums::{DNSResourceClass, DNSResourceType};
use super::wire::{WireReader, labels_to_name, name_to_labels, parse_name_at, write_name};

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DNSResource {
    pub labels: Vec<String>,
    pub rtype: DNSResourceType,
    pub rclass: DNSResourceClass,
    pub ttl: u32,
    pub rdlength: u16,
    pub rdata: Vec<u8>,
    /// Numeric RR type as received or to be emitted; carries private-use
    /// type codes that have no `DNSResourceType` variant.
    pub raw_rtype: Option<u16>,
}

impl DNSResource {
    /// Build a record carrying a private-use type code.
    pub fn private(name: &str, type_code: u16, ttl: u32, rdata: Vec<u8>) -> Self {
        DNSResource {
            labels: name_to_labels(name),
            rtype: DNSResourceType::Unknown,
            rclass: DNSResourceClass::IN,
            ttl,
            rdlength: rdata.len() as u16,
            rdata,
            raw_rtype: Some(type_code),
        }
    }

    /// Build an SOA record with uncompressed names in the RDATA.
    pub fn soa(
        zone: &str,
        mname: &str,
        rname: &str,
        serial: u32,
        refresh: u32,
        retry: u32,
        expire: u32,
        minimum: u32,
    ) -> Result<Self, ParseError> {
        let mut rdata = Vec::new();
        write_name(&mut rdata, &name_to_labels(mname))?;
        write_name(&mut rdata, &name_to_labels(rname))?;
        for v in [serial, refresh, retry, expire, minimum] {
            rdata.extend_from_slice(&v.to_be_bytes());
        }
        Ok(DNSResource {
            labels: name_to_labels(zone),
            rtype: DNSResourceType::SOA,
            rclass: DNSResourceClass::IN,
            ttl: 3600,
            rdlength: rdata.len() as u16,
            rdata,
            raw_rtype: None,
        })
    }

    pub fn name(&self) -> String {
        labels_to_name(&self.labels)
    }

    fn wire_rtype(&self) -> u16 {
        match self.raw_rtype {
            Some(code) if self.rtype == DNSResourceType::Unknown => code,
            _ => self.rtype.into(),
        }
    }

    /// Extract the signer name from a SIG record's RDATA. Returns None for
    /// non-SIG records or malformed RDATA.
    pub fn sig_signer_name(&self) -> Option<String> {
        if self.rtype != DNSResourceType::SIG {
            return None;
        }
        // type covered (2), algorithm (1), labels (1), original TTL (4),
        // expiration (4), inception (4), key tag (2), then the signer name
        if self.rdata.len() < 18 {
            return None;
        }
        let (labels, _) = parse_name_at(&self.rdata, 18).ok()?;
        Some(format!("{}.", labels.join(".")))
    }

    pub fn read(reader: &mut WireReader) -> Result<Self, ParseError> {
        let labels = reader.read_name()?;
        let raw_rtype = reader.read_u16()?;
        let rclass = reader.read_u16()?.into();
        let ttl = reader.read_u32()?;
        let rdlength = reader.read_u16()?;
        let rdata = reader.read_bytes(rdlength as usize)?.to_vec();
        Ok(DNSResource {
            labels,
            rtype: raw_rtype.into(),
            rclass,
            ttl,
            rdlength,
            rdata,
            raw_rtype: Some(raw_rtype),
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) -> Result<(), ParseError> {
        write_name(out, &self.labels)?;
        out.extend_from_slice(&self.wire_rtype().to_be_bytes());
        out.extend_from_slice(&u16::from(self.rclass).to_be_bytes());
        out.extend_from_slice(&self.ttl.to_be_bytes());
        out.extend_from_slice(&(self.rdata.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.rdata);
        Ok(())
    }
}
