//! DNSSEC key lifecycle: state machine, signing-mode vocabulary and key
//! generation.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;

use crate::error::{KdcError, Result};

/// Component identifiers with this prefix carry a zone-signing mode.
pub const SIGNING_COMPONENT_PREFIX: &str = "sign_";

/// System components created on first boot, one per signing mode.
pub const SYSTEM_COMPONENTS: [&str; 6] = [
    "sign_kdc",
    "sign_upstream",
    "sign_unsigned",
    "sign_edge_dyn",
    "sign_edge_zsk",
    "sign_edge_full",
];

/// Pre-rename spelling of `sign_edge_full`; assignments are migrated on boot.
pub const LEGACY_EDGE_FULL_COMPONENT: &str = "sign_edge_all";

pub const DNSSEC_ALGORITHM_ED25519: u8 = 15;
pub const DNSKEY_FLAGS_ZSK: u16 = 256;
pub const DNSKEY_FLAGS_KSK: u16 = 257;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KeyType {
    Ksk,
    Zsk,
    Csk,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Ksk => "KSK",
            KeyType::Zsk => "ZSK",
            KeyType::Csk => "CSK",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "KSK" => Ok(KeyType::Ksk),
            "ZSK" => Ok(KeyType::Zsk),
            "CSK" => Ok(KeyType::Csk),
            _ => Err(KdcError::ValidationError(format!("unknown key type: {}", s))),
        }
    }

    pub fn default_flags(&self) -> u16 {
        match self {
            KeyType::Zsk => DNSKEY_FLAGS_ZSK,
            KeyType::Ksk | KeyType::Csk => DNSKEY_FLAGS_KSK,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyState {
    Created,
    Published,
    Standby,
    Active,
    ActiveDist,
    Distributed,
    EdgeSigner,
    Retired,
    Removed,
    Revoked,
}

impl KeyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyState::Created => "created",
            KeyState::Published => "published",
            KeyState::Standby => "standby",
            KeyState::Active => "active",
            KeyState::ActiveDist => "active_dist",
            KeyState::Distributed => "distributed",
            KeyState::EdgeSigner => "edge_signer",
            KeyState::Retired => "retired",
            KeyState::Removed => "removed",
            KeyState::Revoked => "revoked",
        }
    }

    /// Parse the storage string form. Unknown strings are a storage
    /// integrity error, not a validation error.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "created" => Ok(KeyState::Created),
            "published" => Ok(KeyState::Published),
            "standby" => Ok(KeyState::Standby),
            "active" => Ok(KeyState::Active),
            "active_dist" => Ok(KeyState::ActiveDist),
            "distributed" => Ok(KeyState::Distributed),
            "edge_signer" => Ok(KeyState::EdgeSigner),
            "retired" => Ok(KeyState::Retired),
            "removed" => Ok(KeyState::Removed),
            "revoked" => Ok(KeyState::Revoked),
            _ => Err(KdcError::UnknownKeyState(s.to_string())),
        }
    }

    /// States in which a key is the live signer for its zone and type.
    pub fn is_edge_live(&self) -> bool {
        matches!(self, KeyState::EdgeSigner | KeyState::ActiveDist)
    }
}

/// Legal state transitions. Revocation is reachable from every state.
pub fn can_transition(from: KeyState, to: KeyState) -> bool {
    use KeyState::*;
    if to == Revoked {
        return true;
    }
    matches!(
        (from, to),
        (Created, Published)
            | (Published, Standby)
            | (Standby, Active)
            | (Standby, Distributed)
            | (Distributed, EdgeSigner)
            | (Active, ActiveDist)
            | (ActiveDist, EdgeSigner)
            | (Active, Retired)
            | (ActiveDist, Retired)
            | (Distributed, Retired)
            | (EdgeSigner, Retired)
            | (Retired, Removed)
    )
}

pub fn check_transition(from: KeyState, to: KeyState) -> Result<()> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(KdcError::IllegalTransition(
            from.as_str().to_string(),
            to.as_str().to_string(),
        ))
    }
}

/// Operator `transition` command rule: advance along the fixed path.
pub fn fixed_transition(from: KeyState) -> Option<KeyState> {
    match from {
        KeyState::Created => Some(KeyState::Published),
        KeyState::Standby => Some(KeyState::Active),
        _ => None,
    }
}

/// Zone signing mode, derived from the signing component of the zone's
/// service; never stored on the zone itself.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningMode {
    Upstream,
    Central,
    Unsigned,
    EdgeDyn,
    EdgeZsk,
    EdgeFull,
}

impl SigningMode {
    pub fn from_component(component_id: &str) -> Option<Self> {
        match component_id.strip_prefix(SIGNING_COMPONENT_PREFIX)? {
            "kdc" => Some(SigningMode::Central),
            "upstream" => Some(SigningMode::Upstream),
            "unsigned" => Some(SigningMode::Unsigned),
            "edge_dyn" => Some(SigningMode::EdgeDyn),
            "edge_zsk" => Some(SigningMode::EdgeZsk),
            "edge_full" => Some(SigningMode::EdgeFull),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SigningMode::Upstream => "upstream",
            SigningMode::Central => "central",
            SigningMode::Unsigned => "unsigned",
            SigningMode::EdgeDyn => "edge_dyn",
            SigningMode::EdgeZsk => "edge_zsk",
            SigningMode::EdgeFull => "edge_full",
        }
    }

    /// Key distribution is only meaningful for edge-signed zones.
    pub fn allows_distribution(&self) -> bool {
        matches!(
            self,
            SigningMode::EdgeDyn | SigningMode::EdgeZsk | SigningMode::EdgeFull
        )
    }

    /// KSK distribution additionally requires the full edge mode.
    pub fn allows_ksk_distribution(&self) -> bool {
        matches!(self, SigningMode::EdgeFull)
    }

    /// Whether a compromised node serving this mode forces a KSK rollover
    /// on top of the ZSK rollover.
    pub fn compromise_rolls_ksk(&self) -> bool {
        matches!(self, SigningMode::EdgeFull)
    }
}

/// The distribution identifier is the hex-formatted key tag: stable for a
/// key and shared by all per-node records of one distribution.
pub fn distribution_id_for_tag(key_tag: u16) -> String {
    format!("{:04x}", key_tag)
}

/// A freshly generated DNSSEC key before it is persisted.
#[derive(Clone, Debug)]
pub struct GeneratedKey {
    pub key_tag: u16,
    pub algorithm: u8,
    pub flags: u16,
    pub public_key: String,
    pub private_key: Vec<u8>,
    pub dnskey_rr: String,
}

/// Generate a DNSSEC key for a zone. Only ED25519 (algorithm 15) is
/// supported for generation; other algorithm numbers are rejected.
pub fn generate_key(zone: &str, key_type: KeyType, algorithm: u8) -> Result<GeneratedKey> {
    if algorithm != DNSSEC_ALGORITHM_ED25519 {
        return Err(KdcError::ValidationError(format!(
            "unsupported DNSSEC algorithm for generation: {}",
            algorithm
        )));
    }

    let signing_key = SigningKey::generate(&mut OsRng);
    let public_bytes = signing_key.verifying_key().to_bytes();
    let private_key = signing_key.to_bytes().to_vec();

    let flags = key_type.default_flags();
    let rdata = dnskey_rdata(flags, algorithm, &public_bytes);
    let key_tag = key_tag(&rdata);
    let public_key = BASE64.encode(public_bytes);
    let dnskey_rr = format!(
        "{} 3600 IN DNSKEY {} 3 {} {}",
        zone, flags, algorithm, public_key
    );

    Ok(GeneratedKey {
        key_tag,
        algorithm,
        flags,
        public_key,
        private_key,
        dnskey_rr,
    })
}

/// DNSKEY RDATA: flags, protocol (always 3), algorithm, public key.
pub fn dnskey_rdata(flags: u16, algorithm: u8, public_key: &[u8]) -> Vec<u8> {
    let mut rdata = Vec::with_capacity(4 + public_key.len());
    rdata.extend_from_slice(&flags.to_be_bytes());
    rdata.push(3);
    rdata.push(algorithm);
    rdata.extend_from_slice(public_key);
    rdata
}

/// RFC 4034 appendix B key tag over the DNSKEY RDATA.
pub fn key_tag(rdata: &[u8]) -> u16 {
    let mut acc: u32 = 0;
    for (i, byte) in rdata.iter().enumerate() {
        if i & 1 == 0 {
            acc += (*byte as u32) << 8;
        } else {
            acc += *byte as u32;
        }
    }
    acc += (acc >> 16) & 0xFFFF;
    (acc & 0xFFFF) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_transition_path() {
        assert_eq!(fixed_transition(KeyState::Created), Some(KeyState::Published));
        assert_eq!(fixed_transition(KeyState::Standby), Some(KeyState::Active));
        assert_eq!(fixed_transition(KeyState::Active), None);
    }

    #[test]
    fn test_revoke_always_legal() {
        for state in [
            KeyState::Created,
            KeyState::Published,
            KeyState::Standby,
            KeyState::Active,
            KeyState::ActiveDist,
            KeyState::Distributed,
            KeyState::EdgeSigner,
            KeyState::Retired,
            KeyState::Removed,
        ] {
            assert!(can_transition(state, KeyState::Revoked));
        }
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        assert!(!can_transition(KeyState::Created, KeyState::Active));
        assert!(!can_transition(KeyState::Published, KeyState::Distributed));
        assert!(!can_transition(KeyState::Removed, KeyState::Active));
        assert!(check_transition(KeyState::Created, KeyState::Active).is_err());
    }

    #[test]
    fn test_distribution_id_is_hex_of_tag() {
        assert_eq!(distribution_id_for_tag(0xBEEF), "beef");
        assert_eq!(distribution_id_for_tag(7), "0007");
    }

    #[test]
    fn test_generate_key_ed25519() {
        let key = generate_key("example.com.", KeyType::Zsk, 15).expect("generate");
        assert_eq!(key.algorithm, 15);
        assert_eq!(key.flags, 256);
        assert_eq!(key.private_key.len(), 32);
        assert!(key.dnskey_rr.contains("DNSKEY 256 3 15"));
    }

    #[test]
    fn test_generate_key_rejects_unknown_algorithm() {
        assert!(generate_key("example.com.", KeyType::Zsk, 8).is_err());
    }

    #[test]
    fn test_signing_mode_from_component() {
        assert_eq!(
            SigningMode::from_component("sign_edge_zsk"),
            Some(SigningMode::EdgeZsk)
        );
        assert_eq!(SigningMode::from_component("sign_kdc"), Some(SigningMode::Central));
        assert_eq!(SigningMode::from_component("other"), None);
    }
}
