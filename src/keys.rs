//! Asymmetric keypair loading — the signing/verification primitives behind
//! every token this broker issues.
//!
//! The private key is read once at startup and is immutable afterwards, so a
//! single [`KeyStore`] is safely shared across all concurrent issuance calls.
//! The public PEM is kept verbatim for the unauthenticated
//! `/auth/public-key` endpoint: downstream systems verify tokens locally and
//! never call back here per request.

use std::fs;
use std::path::Path;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};

use crate::{Error, Result};

/// Loaded keypair plus the fixed system-wide signing algorithm.
pub struct KeyStore {
    algorithm: Algorithm,
    encoding: EncodingKey,
    decoding: DecodingKey,
    public_pem: String,
}

impl KeyStore {
    /// Load a keypair from PEM files.
    ///
    /// `algorithm` must match the key type: `RS256` for RSA keys, `ES256`
    /// for P-256 keys. Anything else is a configuration error.
    pub fn load(private_key_path: &str, public_key_path: &str, algorithm: &str) -> Result<Self> {
        let private_pem = read_pem(private_key_path)?;
        let public_pem = read_pem(public_key_path)?;
        Self::from_pem(&private_pem, &public_pem, algorithm)
    }

    /// Build a key store from in-memory PEM strings.
    pub fn from_pem(private_pem: &str, public_pem: &str, algorithm: &str) -> Result<Self> {
        let (algorithm, encoding, decoding) = match algorithm {
            "RS256" => (
                Algorithm::RS256,
                EncodingKey::from_rsa_pem(private_pem.as_bytes())
                    .map_err(|e| Error::Config(format!("invalid RSA private key: {e}")))?,
                DecodingKey::from_rsa_pem(public_pem.as_bytes())
                    .map_err(|e| Error::Config(format!("invalid RSA public key: {e}")))?,
            ),
            "ES256" => (
                Algorithm::ES256,
                EncodingKey::from_ec_pem(private_pem.as_bytes())
                    .map_err(|e| Error::Config(format!("invalid EC private key: {e}")))?,
                DecodingKey::from_ec_pem(public_pem.as_bytes())
                    .map_err(|e| Error::Config(format!("invalid EC public key: {e}")))?,
            ),
            other => {
                return Err(Error::Config(format!(
                    "unsupported signing algorithm: {other} (expected RS256 or ES256)"
                )));
            }
        };

        Ok(Self {
            algorithm,
            encoding,
            decoding,
            public_pem: public_pem.to_string(),
        })
    }

    /// Generate a fresh P-256 keypair, returning `(private_pem, public_pem)`.
    ///
    /// Used by the `keygen` CLI command and by tests. RSA generation is
    /// intentionally absent: the rsa crate carries RUSTSEC-2023-0071, so RSA
    /// keys are provisioned externally as PEM files.
    pub fn generate_p256() -> Result<(String, String)> {
        let key_pair = rcgen::KeyPair::generate()
            .map_err(|e| Error::Internal(format!("key generation failed: {e}")))?;
        Ok((key_pair.serialize_pem(), key_pair.public_key_pem()))
    }

    /// The fixed signing algorithm.
    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Algorithm name as published to downstream verifiers.
    #[must_use]
    pub fn algorithm_name(&self) -> &'static str {
        match self.algorithm {
            Algorithm::ES256 => "ES256",
            _ => "RS256",
        }
    }

    /// Signing key (private). Only the token service should touch this.
    #[must_use]
    pub fn encoding(&self) -> &EncodingKey {
        &self.encoding
    }

    /// Verification key (public).
    #[must_use]
    pub fn decoding(&self) -> &DecodingKey {
        &self.decoding
    }

    /// Public key PEM, retrievable by any downstream system without auth.
    #[must_use]
    pub fn public_pem(&self) -> &str {
        &self.public_pem
    }
}

fn read_pem(path: &str) -> Result<String> {
    if !Path::new(path).exists() {
        return Err(Error::Config(format!("key file not found: {path}")));
    }
    Ok(fs::read_to_string(path)?)
}
