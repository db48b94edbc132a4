use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::error::{KdcError, Result};

/// Request record sent by a node: exactly its 32-byte ephemeral X25519
/// public key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KmReq {
    pub ephemeral_key: [u8; 32],
}

impl Default for KmReq {
    fn default() -> Self {
        KmReq {
            ephemeral_key: [0u8; 32],
        }
    }
}

impl KmReq {
    pub fn pack(&self) -> Vec<u8> {
        self.ephemeral_key.to_vec()
    }

    pub fn unpack(buf: &[u8]) -> Result<Self> {
        if buf.len() != 32 {
            return Err(KdcError::InvalidPublicKeyLength(buf.len()));
        }
        let mut ephemeral_key = [0u8; 32];
        ephemeral_key.copy_from_slice(buf);
        Ok(KmReq { ephemeral_key })
    }

    pub fn format(&self) -> String {
        BASE64.encode(self.ephemeral_key)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(text.trim())
            .map_err(|e| KdcError::RecordParse(format!("bad KMREQ base64: {}", e)))?;
        Self::unpack(&bytes)
    }
}
