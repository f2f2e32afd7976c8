use std::path::{Path, PathBuf};

use rsa::pss::BlindedSigningKey;
use rsa::signature::{RandomizedSigner, SignatureEncoding};
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use super::{AuthError, ChallengeSigner};

pub const SERIAL_SIZE: usize = 0x10;
pub const KEY_INT_SIZE: usize = 0x100;
pub const FACTOR_SIZE: usize = 0x80;
/// Serial, modulus and public exponent.
pub const IDENTITY_SIZE: usize = SERIAL_SIZE + 2 * KEY_INT_SIZE;
/// Identity block followed by its signature.
pub const SIGNED_IDENTITY_SIZE: usize = IDENTITY_SIZE + KEY_INT_SIZE;
pub const KEY_FILE_SIZE: usize = SIGNED_IDENTITY_SIZE + 5 * FACTOR_SIZE;
/// Challenge signature followed by the signed identity.
pub const RESPONSE_SIZE: usize = KEY_INT_SIZE + SIGNED_IDENTITY_SIZE;

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("Failed to read key file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Key file too short: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Invalid RSA key: {0}")]
    Rsa(#[from] rsa::Error),

    #[error("Bad key block: {0} is inconsistent with p and q")]
    Inconsistent(&'static str),
}

// Big-endian integer fields of the key file, in order
struct KeyFields<'a> {
    serial: &'a [u8],
    modulus: &'a [u8],
    exponent: &'a [u8],
    p: &'a [u8],
    q: &'a [u8],
    dp1: &'a [u8],
    dq1: &'a [u8],
    qinv: &'a [u8],
}

impl<'a> KeyFields<'a> {
    fn split(bytes: &'a [u8]) -> Self {
        let (serial, rest) = bytes.split_at(SERIAL_SIZE);
        let (modulus, rest) = rest.split_at(KEY_INT_SIZE);
        let (exponent, rest) = rest.split_at(KEY_INT_SIZE);
        let (_identity_sig, rest) = rest.split_at(KEY_INT_SIZE);
        let (p, rest) = rest.split_at(FACTOR_SIZE);
        let (q, rest) = rest.split_at(FACTOR_SIZE);
        let (dp1, rest) = rest.split_at(FACTOR_SIZE);
        let (dq1, rest) = rest.split_at(FACTOR_SIZE);
        let qinv = &rest[..FACTOR_SIZE];
        Self {
            serial,
            modulus,
            exponent,
            p,
            q,
            dp1,
            dq1,
            qinv,
        }
    }
}

/// A controller identity and the private key that signs challenges for it.
pub struct KeyMaterial {
    signing_key: BlindedSigningKey<Sha256>,
    public_key: RsaPublicKey,
    signed_identity: Vec<u8>,
    serial: [u8; SERIAL_SIZE],
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("serial", &hex::encode(self.serial))
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

impl KeyMaterial {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, KeyError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| KeyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(&bytes)
    }

    /// Parse a key blob and check the CRT factors against p and q.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() < KEY_FILE_SIZE {
            return Err(KeyError::Truncated {
                expected: KEY_FILE_SIZE,
                actual: bytes.len(),
            });
        }
        if bytes.len() > KEY_FILE_SIZE {
            warn!(
                extra = bytes.len() - KEY_FILE_SIZE,
                "Ignoring trailing bytes after key block"
            );
        }

        let fields = KeyFields::split(&bytes[..KEY_FILE_SIZE]);
        let n = BigUint::from_bytes_be(fields.modulus);
        let e = BigUint::from_bytes_be(fields.exponent);
        let p = BigUint::from_bytes_be(fields.p);
        let q = BigUint::from_bytes_be(fields.q);
        let dp1 = BigUint::from_bytes_be(fields.dp1);
        let dq1 = BigUint::from_bytes_be(fields.dq1);
        let qinv = BigUint::from_bytes_be(fields.qinv);

        let mut private_key = RsaPrivateKey::from_p_q(p.clone(), q.clone(), e)?;
        private_key.precompute()?;

        let one = BigUint::from(1u8);
        let d = private_key.d();
        if d % (&p - &one) != dp1 {
            return Err(KeyError::Inconsistent("dp1"));
        }
        if d % (&q - &one) != dq1 {
            return Err(KeyError::Inconsistent("dq1"));
        }
        if qinv >= p || (&qinv * &q) % &p != one {
            return Err(KeyError::Inconsistent("qInv"));
        }
        if private_key.n() != &n {
            return Err(KeyError::Inconsistent("modulus"));
        }
        private_key.validate()?;

        let mut serial = [0u8; SERIAL_SIZE];
        serial.copy_from_slice(fields.serial);
        let public_key = private_key.to_public_key();
        let key = Self {
            signing_key: BlindedSigningKey::<Sha256>::new(private_key),
            public_key,
            signed_identity: bytes[..SIGNED_IDENTITY_SIZE].to_vec(),
            serial,
        };
        info!(
            serial = %hex::encode(key.serial),
            fingerprint = %key.fingerprint(),
            "Key material loaded"
        );
        Ok(key)
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    pub fn serial(&self) -> &[u8; SERIAL_SIZE] {
        &self.serial
    }

    /// The identity block and its signature, as sent after every challenge signature.
    pub fn signed_identity(&self) -> &[u8] {
        &self.signed_identity
    }

    /// SHA-256 over the public identity block.
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(&self.signed_identity[..IDENTITY_SIZE]))
    }
}

impl ChallengeSigner for KeyMaterial {
    fn sign_challenge(&self, nonce: &[u8]) -> Result<Vec<u8>, AuthError> {
        let mut rng = rand::thread_rng();
        let signature = self
            .signing_key
            .try_sign_with_rng(&mut rng, nonce)
            .map_err(|e| AuthError::Signing(e.to_string()))?;

        let mut response = Vec::with_capacity(RESPONSE_SIZE);
        response.extend_from_slice(&signature.to_bytes());
        response.extend_from_slice(&self.signed_identity);
        if response.len() != RESPONSE_SIZE {
            return Err(AuthError::Signing(format!(
                "response is {} bytes, expected {}",
                response.len(),
                RESPONSE_SIZE
            )));
        }
        Ok(response)
    }
}
