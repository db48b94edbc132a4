use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::error::{KdcError, Result};

use super::read_u16;

/// One chunk of a chunked JSON payload. `seq` is 0-based; `total` is the
/// chunk count from the manifest.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KmChunk {
    pub seq: u16,
    pub total: u16,
    pub data: Vec<u8>,
}

impl KmChunk {
    pub fn pack(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(4 + self.data.len());
        out.extend_from_slice(&self.seq.to_be_bytes());
        out.extend_from_slice(&self.total.to_be_bytes());
        out.extend_from_slice(&self.data);
        Ok(out)
    }

    pub fn unpack(buf: &[u8]) -> Result<Self> {
        let mut pos = 0;
        let seq = read_u16(buf, &mut pos)?;
        let total = read_u16(buf, &mut pos)?;
        let data = buf[pos..].to_vec();
        Ok(KmChunk { seq, total, data })
    }

    pub fn format(&self) -> String {
        let payload = if self.data.is_empty() {
            "-".to_string()
        } else {
            BASE64.encode(&self.data)
        };
        format!("{} {} {}", self.seq, self.total, payload)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let fields: Vec<&str> = text.split_whitespace().collect();
        if fields.len() != 3 {
            return Err(KdcError::RecordParse(format!(
                "chunk expects 3 fields, got {}",
                fields.len()
            )));
        }
        let seq = fields[0]
            .parse::<u16>()
            .map_err(|_| KdcError::RecordParse(format!("bad chunk seq: {}", fields[0])))?;
        let total = fields[1]
            .parse::<u16>()
            .map_err(|_| KdcError::RecordParse(format!("bad chunk total: {}", fields[1])))?;
        let data = if fields[2] == "-" {
            Vec::new()
        } else {
            BASE64
                .decode(fields[2])
                .map_err(|e| KdcError::RecordParse(format!("bad chunk base64: {}", e)))?
        };
        Ok(KmChunk { seq, total, data })
    }
}

/// Split a byte string into chunks of at most `size` bytes. An empty input
/// yields a single empty chunk so a manifest always has at least one chunk.
pub fn split_chunks(data: &[u8], size: usize) -> Vec<KmChunk> {
    let pieces: Vec<&[u8]> = if data.is_empty() {
        vec![&[]]
    } else {
        data.chunks(size).collect()
    };
    let total = pieces.len() as u16;
    pieces
        .into_iter()
        .enumerate()
        .map(|(i, piece)| KmChunk {
            seq: i as u16,
            total,
            data: piece.to_vec(),
        })
        .collect()
}
