//! DKIM signing keys for managed domains.
//!
//! Records created without a DKIM key get a fresh RSA key pair. The public key is published
//! as base64 PKIX DER under `mail._domainkey`, and the private key is kept on the record as
//! base64 PKCS#1 DER for the mail server that signs with it.

use crate::error::Error;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::pkcs8::EncodePublicKey;
use rsa::rand_core::OsRng;
use rsa::RsaPrivateKey;

pub const DKIM_KEY_BITS: usize = 2_048;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DkimKeys {
    pub public_key: String,
    pub private_key: String,
}

impl DkimKeys {
    /// Generate a `bits` sized RSA key pair. This is CPU bound and takes a while at
    /// [`DKIM_KEY_BITS`]; async callers should use [`DkimKeys::generate_blocking`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::DkimKey`] if generation or encoding fails.
    pub fn generate(bits: usize) -> Result<Self, Error> {
        let private = RsaPrivateKey::new(&mut OsRng, bits).map_err(key_error)?;
        let public_der = private
            .to_public_key()
            .to_public_key_der()
            .map_err(key_error)?;
        let private_der = private.to_pkcs1_der().map_err(key_error)?;
        Ok(DkimKeys {
            public_key: STANDARD.encode(public_der.as_bytes()),
            private_key: STANDARD.encode(private_der.as_bytes()),
        })
    }

    /// Generate a [`DKIM_KEY_BITS`] key pair on the blocking thread pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DkimKey`] if generation fails or the blocking task is lost.
    pub async fn generate_blocking() -> Result<Self, Error> {
        tokio::task::spawn_blocking(|| DkimKeys::generate(DKIM_KEY_BITS))
            .await
            .map_err(key_error)?
    }
}

fn key_error(err: impl std::fmt::Display) -> Error {
    Error::DkimKey(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::synth::{dkim_payload, split_txt_payload};
    use rsa::pkcs1::DecodeRsaPrivateKey;
    use rsa::pkcs8::DecodePublicKey;
    use rsa::RsaPublicKey;

    #[tokio::test]
    async fn generated_keys_decode_as_a_pair() {
        let keys = DkimKeys::generate_blocking().await.unwrap();

        let public =
            RsaPublicKey::from_public_key_der(&STANDARD.decode(&keys.public_key).unwrap()).unwrap();
        let private =
            RsaPrivateKey::from_pkcs1_der(&STANDARD.decode(&keys.private_key).unwrap()).unwrap();
        assert_eq!(private.to_public_key(), public);

        // Too long for one TXT string, short enough for two.
        let strings = split_txt_payload(&dkim_payload(&keys.public_key)).unwrap();
        assert_eq!(strings.len(), 2);
    }
}
