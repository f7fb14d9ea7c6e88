//! Account keys and the values derived from them.

use crate::acme::AcmeError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// A P-256 ECDSA account key, used to sign requests with ES256.
pub struct AccountKey {
    pair: EcdsaKeyPair,
    rng: SystemRandom,
}

/// The public half of an [`AccountKey`] as a JSON Web Key.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Jwk {
    pub crv: &'static str,
    pub kty: &'static str,
    pub x: String,
    pub y: String,
}

impl AccountKey {
    /// Generate a fresh key.
    ///
    /// # Errors
    ///
    /// Returns [`AcmeError::Key`] if the system RNG fails.
    pub fn generate() -> Result<Self, AcmeError> {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
            .map_err(|err| AcmeError::Key(err.to_string()))?;
        let pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8.as_ref(), &rng)
            .map_err(|err| AcmeError::Key(err.to_string()))?;
        Ok(AccountKey { pair, rng })
    }

    #[must_use]
    pub fn jwk(&self) -> Jwk {
        // Uncompressed point: 0x04 || x || y.
        let point = self.pair.public_key().as_ref();
        Jwk {
            crv: "P-256",
            kty: "EC",
            x: URL_SAFE_NO_PAD.encode(&point[1..33]),
            y: URL_SAFE_NO_PAD.encode(&point[33..65]),
        }
    }

    /// The [RFC-7638](https://www.rfc-editor.org/rfc/rfc7638) thumbprint of the public key.
    #[must_use]
    pub fn thumbprint(&self) -> String {
        let jwk = self.jwk();
        // Members in lexicographic order, no whitespace.
        let canonical = format!(
            r#"{{"crv":"{}","kty":"{}","x":"{}","y":"{}"}}"#,
            jwk.crv, jwk.kty, jwk.x, jwk.y
        );
        URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()))
    }

    /// The key authorization for a challenge `token`.
    #[must_use]
    pub fn key_authorization(&self, token: &str) -> String {
        format!("{token}.{}", self.thumbprint())
    }

    /// Sign `message`, returning the fixed-width `r || s` signature used by ES256.
    ///
    /// # Errors
    ///
    /// Returns [`AcmeError::Key`] if signing fails.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, AcmeError> {
        self.pair
            .sign(&self.rng, message)
            .map(|sig| sig.as_ref().to_vec())
            .map_err(|err| AcmeError::Key(err.to_string()))
    }
}

/// The `TXT` record value that proves control of a domain for the DNS-01 challenge: the
/// base64url encoded SHA-256 digest of the key authorization.
#[must_use]
pub fn dns01_value(key_authorization: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(key_authorization.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring::signature::{UnparsedPublicKey, ECDSA_P256_SHA256_FIXED};

    #[test]
    fn jwk_coordinates_are_32_bytes() {
        let key = AccountKey::generate().unwrap();
        let jwk = key.jwk();
        assert_eq!(URL_SAFE_NO_PAD.decode(&jwk.x).unwrap().len(), 32);
        assert_eq!(URL_SAFE_NO_PAD.decode(&jwk.y).unwrap().len(), 32);
    }

    #[test]
    fn thumbprint_is_stable_and_distinct() {
        let key = AccountKey::generate().unwrap();
        assert_eq!(key.thumbprint(), key.thumbprint());
        assert_ne!(key.thumbprint(), AccountKey::generate().unwrap().thumbprint());
        assert!(key.key_authorization("tok").starts_with("tok."));
    }

    #[test]
    fn signatures_verify() {
        let key = AccountKey::generate().unwrap();
        let sig = key.sign(b"protected.payload").unwrap();
        assert_eq!(sig.len(), 64);
        UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, key.pair.public_key().as_ref())
            .verify(b"protected.payload", &sig)
            .unwrap();
    }

    #[test]
    fn dns01_value_matches_known_digest() {
        // SHA-256("abc"), base64url without padding.
        assert_eq!(
            dns01_value("abc"),
            "ungWv48Bz-pBQUDeXa4iI7ADYaOWF3qctBD_YfIAFa0"
        );
    }
}
