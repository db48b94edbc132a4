//! HPKE sealing of key material for individual nodes.
//!
//! The suite is fixed: KEM X25519-HKDF-SHA256, KDF HKDF-SHA256, AEAD
//! AES-256-GCM, Base mode. Every seal uses a fresh ephemeral keypair.

use hpke::aead::AesGcm256;
use hpke::kdf::HkdfSha256;
use hpke::kem::X25519HkdfSha256;
use hpke::{Deserializable, HpkeError, Kem as KemTrait, OpModeR, OpModeS, Serializable};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::{KdcError, Result};

type Kem = X25519HkdfSha256;
type Kdf = HkdfSha256;
type Aead = AesGcm256;

/// X25519 public keys and encapsulated keys are both 32 bytes; the
/// container is split at this fixed offset with no length prefix.
pub const ENCAPPED_KEY_SIZE: usize = 32;
pub const PUBLIC_KEY_SIZE: usize = 32;

const INFO: &[u8] = b"keymaster key distribution";

/// An HPKE-sealed payload: the opaque container plus the sender's
/// ephemeral (encapsulated) public key, also exposed separately because
/// distribution records store it alongside the package.
#[derive(Clone, Debug)]
pub struct SealedPackage {
    /// `encapsulated_key || sealed_ciphertext`
    pub container: Vec<u8>,
    pub ephemeral_key: [u8; ENCAPPED_KEY_SIZE],
}

/// Encrypt `plaintext` for the holder of `recipient_key` (a 32-byte X25519
/// public key).
pub fn seal(recipient_key: &[u8], plaintext: &[u8]) -> Result<SealedPackage> {
    if recipient_key.len() != PUBLIC_KEY_SIZE {
        return Err(KdcError::InvalidRecipientKey(recipient_key.len()));
    }
    let pk = <Kem as KemTrait>::PublicKey::from_bytes(recipient_key)
        .map_err(|e| KdcError::KemFailure(e.to_string()))?;

    let mut csprng = StdRng::from_entropy();
    let (encapped, ciphertext) = hpke::single_shot_seal::<Aead, Kdf, Kem, _>(
        &OpModeS::Base,
        &pk,
        INFO,
        plaintext,
        b"",
        &mut csprng,
    )
    .map_err(map_hpke_error)?;

    let mut ephemeral_key = [0u8; ENCAPPED_KEY_SIZE];
    ephemeral_key.copy_from_slice(&encapped.to_bytes());

    let mut container = Vec::with_capacity(ENCAPPED_KEY_SIZE + ciphertext.len());
    container.extend_from_slice(&ephemeral_key);
    container.extend_from_slice(&ciphertext);

    Ok(SealedPackage {
        container,
        ephemeral_key,
    })
}

/// Decrypt a container produced by [`seal`] with the recipient's 32-byte
/// X25519 private key.
pub fn open(recipient_secret: &[u8], container: &[u8]) -> Result<Vec<u8>> {
    if recipient_secret.len() != PUBLIC_KEY_SIZE {
        return Err(KdcError::InvalidRecipientKey(recipient_secret.len()));
    }
    if container.len() < ENCAPPED_KEY_SIZE {
        return Err(KdcError::AeadFailure(format!(
            "container too short: {} bytes",
            container.len()
        )));
    }
    let (encapped_bytes, ciphertext) = container.split_at(ENCAPPED_KEY_SIZE);

    let sk = <Kem as KemTrait>::PrivateKey::from_bytes(recipient_secret)
        .map_err(|e| KdcError::KemFailure(e.to_string()))?;
    let encapped = <Kem as KemTrait>::EncappedKey::from_bytes(encapped_bytes)
        .map_err(|e| KdcError::KemFailure(e.to_string()))?;

    hpke::single_shot_open::<Aead, Kdf, Kem>(
        &OpModeR::Base,
        &sk,
        &encapped,
        INFO,
        ciphertext,
        b"",
    )
    .map_err(map_hpke_error)
}

/// Generate an X25519 keypair as `(secret, public)` byte arrays. Used by
/// node provisioning tooling and tests; the daemon itself only ever sees
/// node public keys.
pub fn generate_keypair() -> ([u8; 32], [u8; 32]) {
    let mut csprng = StdRng::from_entropy();
    let (sk, pk) = Kem::gen_keypair(&mut csprng);
    let mut secret = [0u8; 32];
    secret.copy_from_slice(&sk.to_bytes());
    let mut public = [0u8; 32];
    public.copy_from_slice(&pk.to_bytes());
    (secret, public)
}

fn map_hpke_error(err: HpkeError) -> KdcError {
    match err {
        HpkeError::OpenError | HpkeError::SealError => KdcError::AeadFailure(err.to_string()),
        _ => KdcError::KemFailure(err.to_string()),
    }
}
