//! ES256 signing keys for tests.
//!
//! Keys are generated fresh with `ring`, so two keys with the same `kid`
//! still have different key material. That is how tests model an attacker
//! reusing a trusted key ID.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING};
use serde::Serialize;

/// A P-256 key pair that signs ES256 tokens.
pub struct TestSigningKey {
    kid: String,
    private_key_pkcs8: Vec<u8>,
    /// Uncompressed SEC1 point: 0x04 || x || y.
    public_key: Vec<u8>,
}

impl TestSigningKey {
    /// Generate a new P-256 key pair identified by `kid`.
    pub fn generate(kid: &str) -> Self {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
            .expect("Failed to generate test keypair");
        let key_pair =
            EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8.as_ref(), &rng)
                .expect("Failed to parse generated keypair");

        Self {
            kid: kid.to_string(),
            private_key_pkcs8: pkcs8.as_ref().to_vec(),
            public_key: key_pair.public_key().as_ref().to_vec(),
        }
    }

    /// The key ID placed in token headers and the JWK.
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Sign `claims` as an ES256 JWT with this key's `kid`.
    pub fn sign<T: Serialize>(&self, claims: &T) -> String {
        let mut header = Header::new(Algorithm::ES256);
        header.typ = Some("JWT".to_string());
        header.kid = Some(self.kid.clone());
        self.sign_with_header(&header, claims)
    }

    /// Sign `claims` with a caller-supplied header.
    ///
    /// The signature is always ES256; the header may claim otherwise.
    pub fn sign_with_header<T: Serialize>(&self, header: &Header, claims: &T) -> String {
        let encoding_key = EncodingKey::from_ec_der(&self.private_key_pkcs8);
        let token = encode(
            &Header {
                alg: Algorithm::ES256,
                ..header.clone()
            },
            claims,
            &encoding_key,
        )
        .expect("Failed to sign token");

        if header.alg == Algorithm::ES256 {
            return token;
        }

        // Re-encode the header with the declared alg, keeping the ES256 signature
        let header_json = serde_json::to_vec(header).expect("Failed to encode header");
        let (_, rest) = token.split_once('.').expect("JWT has three segments");
        format!("{}.{}", URL_SAFE_NO_PAD.encode(header_json), rest)
    }

    /// This key in JWK form, as the key server publishes it.
    pub fn jwk_json(&self) -> serde_json::Value {
        let (x, y) = self
            .public_key
            .get(1..)
            .expect("public key is an uncompressed point")
            .split_at(32);

        serde_json::json!({
            "kty": "EC",
            "kid": self.kid,
            "alg": "ES256",
            "use": "sig",
            "crv": "P-256",
            "x": URL_SAFE_NO_PAD.encode(x),
            "y": URL_SAFE_NO_PAD.encode(y),
        })
    }
}
