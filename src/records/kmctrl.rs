use crate::error::{KdcError, Result};

use super::{is_hex, read_string, read_u16, read_u64, write_string};

/// Key states a KMCTRL advertisement may carry on the wire.
const WIRE_STATES: [&str; 4] = ["published", "active", "standby", "distributed"];

/// Control advertisement: tells a node that key material under the given
/// distribution identifier is available for pickup.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KmCtrl {
    pub dist_id: String,
    pub key_id: u16,
    pub state: String,
    pub timestamp: u64,
    pub zone: String,
}

impl KmCtrl {
    pub fn validate(&self) -> Result<()> {
        if !is_hex(&self.dist_id) {
            return Err(KdcError::ValidationError(format!(
                "KMCTRL distribution id is not hex: {:?}",
                self.dist_id
            )));
        }
        if !WIRE_STATES.contains(&self.state.as_str()) {
            return Err(KdcError::UnknownKeyState(self.state.clone()));
        }
        if self.zone.is_empty() {
            return Err(KdcError::ValidationError("KMCTRL zone is empty".to_string()));
        }
        Ok(())
    }

    pub fn pack(&self) -> Result<Vec<u8>> {
        self.validate()?;
        let mut out = Vec::new();
        write_string(&mut out, &self.dist_id)?;
        out.extend_from_slice(&self.key_id.to_be_bytes());
        write_string(&mut out, &self.state)?;
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        write_string(&mut out, &self.zone)?;
        Ok(out)
    }

    pub fn unpack(buf: &[u8]) -> Result<Self> {
        let mut pos = 0;
        let dist_id = read_string(buf, &mut pos)?;
        let key_id = read_u16(buf, &mut pos)?;
        let state = read_string(buf, &mut pos)?;
        let timestamp = read_u64(buf, &mut pos)?;
        let zone = read_string(buf, &mut pos)?;
        let record = KmCtrl {
            dist_id,
            key_id,
            state,
            timestamp,
            zone,
        };
        record.validate()?;
        Ok(record)
    }

    pub fn format(&self) -> String {
        format!(
            "{} {} {} {} {}",
            self.dist_id, self.key_id, self.state, self.timestamp, self.zone
        )
    }

    pub fn parse(text: &str) -> Result<Self> {
        let fields: Vec<&str> = text.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(KdcError::RecordParse(format!(
                "KMCTRL expects 5 fields, got {}",
                fields.len()
            )));
        }
        let key_id = fields[1]
            .parse::<u16>()
            .map_err(|_| KdcError::RecordParse(format!("bad KMCTRL key id: {}", fields[1])))?;
        let timestamp = fields[3]
            .parse::<u64>()
            .map_err(|_| KdcError::RecordParse(format!("bad KMCTRL timestamp: {}", fields[3])))?;
        let record = KmCtrl {
            dist_id: fields[0].to_string(),
            key_id,
            state: fields[2].to_string(),
            timestamp,
            zone: fields[4].to_string(),
        };
        record.validate()?;
        Ok(record)
    }
}
