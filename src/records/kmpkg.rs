use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::error::{KdcError, Result};

use super::read_u16;

/// Encrypted key package. Large packages are split across several records;
/// `seq`/`total` order them (1-based).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KmPkg {
    pub seq: u16,
    pub total: u16,
    pub data: Vec<u8>,
}

impl KmPkg {
    pub fn single(data: Vec<u8>) -> Self {
        KmPkg {
            seq: 1,
            total: 1,
            data,
        }
    }

    pub fn pack(&self) -> Result<Vec<u8>> {
        if self.data.len() > u16::MAX as usize {
            return Err(KdcError::RecordParse(format!(
                "KMPKG data too large: {} bytes",
                self.data.len()
            )));
        }
        let mut out = Vec::with_capacity(6 + self.data.len());
        out.extend_from_slice(&self.seq.to_be_bytes());
        out.extend_from_slice(&self.total.to_be_bytes());
        out.extend_from_slice(&(self.data.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.data);
        Ok(out)
    }

    pub fn unpack(buf: &[u8]) -> Result<Self> {
        let mut pos = 0;
        let seq = read_u16(buf, &mut pos)?;
        let total = read_u16(buf, &mut pos)?;
        let len = read_u16(buf, &mut pos)? as usize;
        let data = buf
            .get(pos..pos + len)
            .ok_or_else(|| KdcError::RecordParse("truncated KMPKG data".to_string()))?
            .to_vec();
        Ok(KmPkg { seq, total, data })
    }

    pub fn format(&self) -> String {
        let payload = BASE64.encode(&self.data);
        if self.total > 1 {
            format!("{} {} {}", payload, self.seq, self.total)
        } else {
            payload
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        let fields: Vec<&str> = text.split_whitespace().collect();
        let (payload, seq, total) = match fields.as_slice() {
            [payload] => (*payload, 1u16, 1u16),
            [payload, seq, total] => {
                let seq = seq
                    .parse::<u16>()
                    .map_err(|_| KdcError::RecordParse(format!("bad KMPKG seq: {}", seq)))?;
                let total = total
                    .parse::<u16>()
                    .map_err(|_| KdcError::RecordParse(format!("bad KMPKG total: {}", total)))?;
                (*payload, seq, total)
            }
            _ => {
                return Err(KdcError::RecordParse(format!(
                    "KMPKG expects 1 or 3 fields, got {}",
                    fields.len()
                )));
            }
        };
        let data = BASE64
            .decode(payload)
            .map_err(|e| KdcError::RecordParse(format!("bad KMPKG base64: {}", e)))?;
        Ok(KmPkg { seq, total, data })
    }
}
