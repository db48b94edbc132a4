use std::collections::BTreeMap;

use crate::error::{KdcError, Result};

use super::{read_string, read_u16, read_u32, write_string};

/// Option keys a manifest may carry.
const KNOWN_OPTIONS: [&str; 5] = [
    "content",
    "distribution_id",
    "node_id",
    "zone_count",
    "text_length",
];

const KNOWN_CONTENTS: [&str; 2] = ["zonelist", "test_text"];

/// Manifest describing a chunked JSON payload: how many chunks, how large,
/// and a checksum over the base64 form of the whole payload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KmManifest {
    pub chunk_count: u16,
    pub chunk_size: u32,
    /// `sha256:<hex>` over the base64-encoded payload
    pub checksum: String,
    pub options: BTreeMap<String, String>,
}

impl KmManifest {
    pub fn validate(&self) -> Result<()> {
        let hex_part = self
            .checksum
            .strip_prefix("sha256:")
            .ok_or_else(|| {
                KdcError::ValidationError(format!(
                    "manifest checksum lacks sha256: prefix: {:?}",
                    self.checksum
                ))
            })?;
        if hex_part.is_empty() || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(KdcError::ValidationError(format!(
                "manifest checksum is not hex: {:?}",
                self.checksum
            )));
        }
        for key in self.options.keys() {
            if !KNOWN_OPTIONS.contains(&key.as_str()) {
                return Err(KdcError::ValidationError(format!(
                    "unknown manifest option: {}",
                    key
                )));
            }
        }
        if let Some(content) = self.options.get("content") {
            if !KNOWN_CONTENTS.contains(&content.as_str()) {
                return Err(KdcError::ValidationError(format!(
                    "unknown manifest content: {}",
                    content
                )));
            }
        }
        Ok(())
    }

    pub fn pack(&self) -> Result<Vec<u8>> {
        self.validate()?;
        let mut out = Vec::new();
        out.extend_from_slice(&self.chunk_count.to_be_bytes());
        out.extend_from_slice(&self.chunk_size.to_be_bytes());
        write_string(&mut out, &self.checksum)?;
        out.push(self.options.len() as u8);
        for (key, value) in &self.options {
            write_string(&mut out, key)?;
            write_string(&mut out, value)?;
        }
        Ok(out)
    }

    pub fn unpack(buf: &[u8]) -> Result<Self> {
        let mut pos = 0;
        let chunk_count = read_u16(buf, &mut pos)?;
        let chunk_size = read_u32(buf, &mut pos)?;
        let checksum = read_string(buf, &mut pos)?;
        let option_count = *buf
            .get(pos)
            .ok_or_else(|| KdcError::RecordParse("truncated manifest options".to_string()))?;
        pos += 1;
        let mut options = BTreeMap::new();
        for _ in 0..option_count {
            let key = read_string(buf, &mut pos)?;
            let value = read_string(buf, &mut pos)?;
            options.insert(key, value);
        }
        let record = KmManifest {
            chunk_count,
            chunk_size,
            checksum,
            options,
        };
        record.validate()?;
        Ok(record)
    }

    pub fn format(&self) -> String {
        let options = if self.options.is_empty() {
            "-".to_string()
        } else {
            self.options
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(",")
        };
        format!(
            "{} {} {} {}",
            self.chunk_count, self.chunk_size, self.checksum, options
        )
    }

    pub fn parse(text: &str) -> Result<Self> {
        let fields: Vec<&str> = text.split_whitespace().collect();
        if fields.len() != 4 {
            return Err(KdcError::RecordParse(format!(
                "manifest expects 4 fields, got {}",
                fields.len()
            )));
        }
        let chunk_count = fields[0]
            .parse::<u16>()
            .map_err(|_| KdcError::RecordParse(format!("bad chunk count: {}", fields[0])))?;
        let chunk_size = fields[1]
            .parse::<u32>()
            .map_err(|_| KdcError::RecordParse(format!("bad chunk size: {}", fields[1])))?;
        let mut options = BTreeMap::new();
        if fields[3] != "-" {
            for pair in fields[3].split(',') {
                let (key, value) = pair.split_once('=').ok_or_else(|| {
                    KdcError::RecordParse(format!("bad manifest option: {}", pair))
                })?;
                options.insert(key.to_string(), value.to_string());
            }
        }
        let record = KmManifest {
            chunk_count,
            chunk_size,
            checksum: fields[2].to_string(),
            options,
        };
        record.validate()?;
        Ok(record)
    }
}
