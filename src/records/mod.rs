pub mod chunk;
pub mod kmctrl;
pub mod kmpkg;
pub mod kmreq;
pub mod manifest;
pub mod qname;

pub use chunk::KmChunk;
pub use kmctrl::KmCtrl;
pub use kmpkg::KmPkg;
pub use kmreq::KmReq;
pub use manifest::KmManifest;

use crate::error::{KdcError, Result};

/// TTL for all KDC private record types.
pub const KDC_RECORD_TTL: u32 = 300;

/// Experimental type-code range the private records may occupy.
pub const TYPE_CODE_MIN: u16 = 65000;
pub const TYPE_CODE_MAX: u16 = 65100;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum KdcRecordType {
    Ctrl,
    Req,
    Pkg,
    Manifest,
    Chunk,
}

impl KdcRecordType {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            KdcRecordType::Ctrl => "KMCTRL",
            KdcRecordType::Req => "KMREQ",
            KdcRecordType::Pkg => "KMPKG",
            KdcRecordType::Manifest => "KMMANIFEST",
            KdcRecordType::Chunk => "KMCHUNK",
        }
    }
}

/// Type-code registry for the private record types. Built once at startup
/// from configuration and owned by the DNS query plane.
#[derive(Clone, Debug)]
pub struct RecordCodes {
    pub kmctrl: u16,
    pub kmreq: u16,
    pub kmpkg: u16,
    pub manifest: u16,
    pub chunk: u16,
}

impl Default for RecordCodes {
    fn default() -> Self {
        RecordCodes {
            kmctrl: 65030,
            kmreq: 65031,
            kmpkg: 65032,
            manifest: 65033,
            chunk: 65034,
        }
    }
}

impl RecordCodes {
    pub fn validate(&self) -> Result<()> {
        let codes = [self.kmctrl, self.kmreq, self.kmpkg, self.manifest, self.chunk];
        for code in codes {
            if !(TYPE_CODE_MIN..=TYPE_CODE_MAX).contains(&code) {
                return Err(KdcError::InvalidRecordTypeCode(code));
            }
        }
        for i in 0..codes.len() {
            for j in (i + 1)..codes.len() {
                if codes[i] == codes[j] {
                    return Err(KdcError::InvalidRecordTypeCode(codes[i]));
                }
            }
        }
        Ok(())
    }

    pub fn classify(&self, code: u16) -> Option<KdcRecordType> {
        if code == self.kmctrl {
            Some(KdcRecordType::Ctrl)
        } else if code == self.kmreq {
            Some(KdcRecordType::Req)
        } else if code == self.kmpkg {
            Some(KdcRecordType::Pkg)
        } else if code == self.manifest {
            Some(KdcRecordType::Manifest)
        } else if code == self.chunk {
            Some(KdcRecordType::Chunk)
        } else {
            None
        }
    }

    pub fn code(&self, rtype: KdcRecordType) -> u16 {
        match rtype {
            KdcRecordType::Ctrl => self.kmctrl,
            KdcRecordType::Req => self.kmreq,
            KdcRecordType::Pkg => self.kmpkg,
            KdcRecordType::Manifest => self.manifest,
            KdcRecordType::Chunk => self.chunk,
        }
    }
}

/// Tagged union over the five private record types with a uniform
/// pack/unpack/parse/format surface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KdcRecord {
    Ctrl(KmCtrl),
    Req(KmReq),
    Pkg(KmPkg),
    Manifest(KmManifest),
    Chunk(KmChunk),
}

impl KdcRecord {
    pub fn rtype(&self) -> KdcRecordType {
        match self {
            KdcRecord::Ctrl(_) => KdcRecordType::Ctrl,
            KdcRecord::Req(_) => KdcRecordType::Req,
            KdcRecord::Pkg(_) => KdcRecordType::Pkg,
            KdcRecord::Manifest(_) => KdcRecordType::Manifest,
            KdcRecord::Chunk(_) => KdcRecordType::Chunk,
        }
    }

    pub fn pack(&self) -> Result<Vec<u8>> {
        match self {
            KdcRecord::Ctrl(r) => r.pack(),
            KdcRecord::Req(r) => Ok(r.pack()),
            KdcRecord::Pkg(r) => r.pack(),
            KdcRecord::Manifest(r) => r.pack(),
            KdcRecord::Chunk(r) => r.pack(),
        }
    }

    pub fn unpack(rtype: KdcRecordType, buf: &[u8]) -> Result<Self> {
        Ok(match rtype {
            KdcRecordType::Ctrl => KdcRecord::Ctrl(KmCtrl::unpack(buf)?),
            KdcRecordType::Req => KdcRecord::Req(KmReq::unpack(buf)?),
            KdcRecordType::Pkg => KdcRecord::Pkg(KmPkg::unpack(buf)?),
            KdcRecordType::Manifest => KdcRecord::Manifest(KmManifest::unpack(buf)?),
            KdcRecordType::Chunk => KdcRecord::Chunk(KmChunk::unpack(buf)?),
        })
    }

    pub fn format(&self) -> String {
        match self {
            KdcRecord::Ctrl(r) => r.format(),
            KdcRecord::Req(r) => r.format(),
            KdcRecord::Pkg(r) => r.format(),
            KdcRecord::Manifest(r) => r.format(),
            KdcRecord::Chunk(r) => r.format(),
        }
    }

    pub fn parse(rtype: KdcRecordType, text: &str) -> Result<Self> {
        Ok(match rtype {
            KdcRecordType::Ctrl => KdcRecord::Ctrl(KmCtrl::parse(text)?),
            KdcRecordType::Req => KdcRecord::Req(KmReq::parse(text)?),
            KdcRecordType::Pkg => KdcRecord::Pkg(KmPkg::parse(text)?),
            KdcRecordType::Manifest => KdcRecord::Manifest(KmManifest::parse(text)?),
            KdcRecordType::Chunk => KdcRecord::Chunk(KmChunk::parse(text)?),
        })
    }
}

pub(crate) fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit())
}

pub(crate) fn read_u16(buf: &[u8], pos: &mut usize) -> Result<u16> {
    let bytes = buf
        .get(*pos..*pos + 2)
        .ok_or_else(|| KdcError::RecordParse("truncated u16".to_string()))?;
    *pos += 2;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

pub(crate) fn read_u32(buf: &[u8], pos: &mut usize) -> Result<u32> {
    let bytes = buf
        .get(*pos..*pos + 4)
        .ok_or_else(|| KdcError::RecordParse("truncated u32".to_string()))?;
    *pos += 4;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub(crate) fn read_u64(buf: &[u8], pos: &mut usize) -> Result<u64> {
    let bytes = buf
        .get(*pos..*pos + 8)
        .ok_or_else(|| KdcError::RecordParse("truncated u64".to_string()))?;
    *pos += 8;
    let mut arr = [0u8; 8];
    arr.copy_from_slice(bytes);
    Ok(u64::from_be_bytes(arr))
}

/// Read a one-byte length-prefixed string (DNS character-string layout).
pub(crate) fn read_string(buf: &[u8], pos: &mut usize) -> Result<String> {
    let len = *buf
        .get(*pos)
        .ok_or_else(|| KdcError::RecordParse("truncated string length".to_string()))?
        as usize;
    *pos += 1;
    let bytes = buf
        .get(*pos..*pos + len)
        .ok_or_else(|| KdcError::RecordParse("truncated string".to_string()))?;
    *pos += len;
    String::from_utf8(bytes.to_vec())
        .map_err(|_| KdcError::RecordParse("non-UTF8 string".to_string()))
}

pub(crate) fn write_string(out: &mut Vec<u8>, s: &str) -> Result<()> {
    if s.len() > 255 {
        return Err(KdcError::RecordParse(format!(
            "string too long for wire form: {} bytes",
            s.len()
        )));
    }
    out.push(s.len() as u8);
    out.extend_from_slice(s.as_bytes());
    Ok(())
}
