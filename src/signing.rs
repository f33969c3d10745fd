//! Message signing and verification.
//!
//! Adapted from the parent protocol's `crypto.rs` signing surface: same
//! Dilithium3/SHA3 primitives, trimmed to the signing/verification calls
//! `validation.rs` needs. The consensus-specific helpers (merkle roots,
//! lottery selection) have no counterpart here and were not carried over.

use pqcrypto_dilithium::dilithium3 as dilithium;
use pqcrypto_traits::sign::{DetachedSignature, PublicKey as PkTrait, SecretKey as SkTrait};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use thiserror::Error;

use crate::message::Message;
use crate::types::PeerId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SigningError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid public key")]
    InvalidPublicKey,
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicKey(pub Vec<u8>);

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({}...)", hex::encode(&self.0[..8.min(self.0.len())]))
    }
}

pub struct Keypair {
    pub public: PublicKey,
    secret: dilithium::SecretKey,
}

impl Keypair {
    pub fn generate() -> Self {
        let (pk, sk) = dilithium::keypair();
        Self {
            public: PublicKey(pk.as_bytes().to_vec()),
            secret: sk,
        }
    }

    /// Reconstruct a keypair from previously persisted key bytes, as saved
    /// by `demos/keygen.rs`.
    pub fn from_bytes(public: Vec<u8>, secret: &[u8]) -> Result<Self, SigningError> {
        let secret = dilithium::SecretKey::from_bytes(secret).map_err(|_| SigningError::InvalidPublicKey)?;
        Ok(Self {
            public: PublicKey(public),
            secret,
        })
    }

    pub fn secret_bytes(&self) -> Vec<u8> {
        self.secret.as_bytes().to_vec()
    }

    /// Sign the canonical bytes of a message (everything but the signature
    /// field itself). See [`signable_bytes`].
    pub fn sign(&self, message: &Message) -> Vec<u8> {
        let digest = signable_digest(message);
        let sig = dilithium::detached_sign(&digest, &self.secret);
        sig.as_bytes().to_vec()
    }
}

/// The exact bytes a signature covers: from, seqno, topic, data. Computing a
/// digest first keeps the signed payload size constant regardless of the
/// application data size.
fn signable_digest(message: &Message) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    hasher.update(&message.from.0);
    hasher.update(message.seqno.to_le_bytes());
    hasher.update(message.topic.0.as_bytes());
    hasher.update(&message.data);
    hasher.finalize().into()
}

pub fn verify(pubkey: &PublicKey, message: &Message, signature: &[u8]) -> Result<(), SigningError> {
    let pk = dilithium::PublicKey::from_bytes(&pubkey.0).map_err(|_| SigningError::InvalidPublicKey)?;
    let sig = dilithium::DetachedSignature::from_bytes(signature)
        .map_err(|_| SigningError::InvalidSignature)?;
    let digest = signable_digest(message);
    dilithium::verify_detached_signature(&sig, &digest, &pk).map_err(|_| SigningError::InvalidSignature)
}

/// Derive the canonical PeerId from a public key: a peer's identity on the
/// wire is the raw key bytes, so there is nothing to look up out-of-band to
/// verify a self-signed message.
pub fn peer_id_for(pubkey: &PublicKey) -> PeerId {
    PeerId(pubkey.0.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Topic;

    fn msg(data: &[u8]) -> Message {
        Message {
            from: PeerId(vec![1, 2, 3]),
            seqno: 7,
            data: data.to_vec(),
            topic: Topic::new("t"),
            signature: None,
            key: None,
        }
    }

    #[test]
    fn sign_then_verify_roundtrip() {
        let kp = Keypair::generate();
        let m = msg(b"hello");
        let sig = kp.sign(&m);
        assert!(verify(&kp.public, &m, &sig).is_ok());
    }

    #[test]
    fn verify_rejects_tampered_payload() {
        let kp = Keypair::generate();
        let m = msg(b"hello");
        let sig = kp.sign(&m);
        let mut tampered = m.clone();
        tampered.data = b"goodbye".to_vec();
        assert!(verify(&kp.public, &tampered, &sig).is_err());
    }

    #[test]
    fn verify_rejects_wrong_key() {
        let kp = Keypair::generate();
        let other = Keypair::generate();
        let m = msg(b"hello");
        let sig = kp.sign(&m);
        assert!(verify(&other.public, &m, &sig).is_err());
    }
}
