//! Byte-level primitives for the DNS wire format. Everything here is
//! byte-aligned; names may be compression pointers into the full message.

use super::ParseError;

/// Cursor over a received message. Reads advance; names are resolved
/// against the whole buffer so pointers can jump backwards.
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        WireReader { buf, pos: 0 }
    }

    pub fn read_u8(&mut self) -> Result<u8, ParseError> {
        let byte = *self.buf.get(self.pos).ok_or(ParseError::Truncated)?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_u16(&mut self) -> Result<u16, ParseError> {
        let bytes = self
            .buf
            .get(self.pos..self.pos + 2)
            .ok_or(ParseError::Truncated)?;
        self.pos += 2;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, ParseError> {
        let bytes = self
            .buf
            .get(self.pos..self.pos + 4)
            .ok_or(ParseError::Truncated)?;
        self.pos += 4;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ParseError> {
        let bytes = self
            .buf
            .get(self.pos..self.pos + len)
            .ok_or(ParseError::Truncated)?;
        self.pos += len;
        Ok(bytes)
    }

    /// Read a name at the cursor, following compression pointers. The
    /// cursor ends up after the name's in-place bytes, wherever the
    /// pointers led.
    pub fn read_name(&mut self) -> Result<Vec<String>, ParseError> {
        let (mut labels, consumed) = parse_name_at(self.buf, self.pos)?;
        self.pos += consumed;
        // Trailing empty label represents the root
        labels.push(String::new());
        Ok(labels)
    }
}

/// Follow a domain name starting at `offset` in the full message buffer.
/// Returns the labels (without the terminating empty label) and the number
/// of bytes the name occupies in place, up to and including the first
/// compression pointer or the terminator.
pub fn parse_name_at(buf: &[u8], offset: usize) -> Result<(Vec<String>, usize), ParseError> {
    let mut labels = Vec::new();
    let mut pos = offset;
    let mut jumps = 0;
    let mut consumed = None;

    loop {
        let first = *buf.get(pos).ok_or(ParseError::Truncated)?;

        if first == 0 {
            if consumed.is_none() {
                consumed = Some(pos + 1 - offset);
            }
            break;
        }

        if (first & 0xC0) == 0xC0 {
            let second = *buf.get(pos + 1).ok_or(ParseError::Truncated)?;
            if consumed.is_none() {
                consumed = Some(pos + 2 - offset);
            }
            pos = (((first as u16 & 0x3F) << 8) | second as u16) as usize;
            jumps += 1;
            if jumps > 100 {
                return Err(ParseError::InvalidLabel);
            }
            continue;
        }

        if first > 63 {
            return Err(ParseError::InvalidLabel);
        }

        let start = pos + 1;
        let end = start + first as usize;
        let bytes = buf.get(start..end).ok_or(ParseError::Truncated)?;
        let label = String::from_utf8(bytes.to_vec()).map_err(|_| ParseError::InvalidLabel)?;
        labels.push(label);
        pos = end;
    }

    Ok((labels, consumed.unwrap_or(0)))
}

/// Append a name in uncompressed wire form. Empty labels are skipped, so
/// both the bare and trailing-root-label conventions serialize the same.
pub fn write_name(out: &mut Vec<u8>, labels: &[String]) -> Result<(), ParseError> {
    let mut total = 0;
    for label in labels {
        if label.is_empty() {
            continue;
        }
        if label.len() > 63 {
            return Err(ParseError::InvalidLabel);
        }
        total += label.len() + 1;
        if total > 255 {
            return Err(ParseError::NameTooLong);
        }
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
    Ok(())
}

/// Join DNS labels into the canonical dotted form with a trailing dot.
pub fn labels_to_name(labels: &[String]) -> String {
    let trimmed: Vec<&str> = labels
        .iter()
        .map(|l| l.as_str())
        .filter(|l| !l.is_empty())
        .collect();
    if trimmed.is_empty() {
        ".".to_string()
    } else {
        format!("{}.", trimmed.join("."))
    }
}

/// Split a dotted name into DNS labels with a trailing empty root label.
pub fn name_to_labels(name: &str) -> Vec<String> {
    let trimmed = name.trim_end_matches('.');
    if trimmed.is_empty() {
        return vec![String::new()];
    }
    let mut labels: Vec<String> = trimmed.split('.').map(|s| s.to_string()).collect();
    labels.push(String::new());
    labels
}
