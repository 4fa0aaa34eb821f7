use blake3::Hasher;
use pqcrypto_dilithium::dilithium3::{
    self, DetachedSignature, PublicKey, SecretKey,
};
use pqcrypto_traits::sign::{DetachedSignature as _, PublicKey as _};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-byte address, derived from a BLAKE3 hash of a public key.
pub type Address = [u8; 32];

/// Byte length of an encoded Dilithium3 public key.
pub fn dilithium3_pk_bytes() -> usize {
    dilithium3::public_key_bytes()
}

/// Byte length of a detached Dilithium3 signature.
pub fn dilithium3_sig_bytes() -> usize {
    dilithium3::signature_bytes()
}

/// Identity of a peer on the sync network.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub [u8; 32]);

impl NodeId {
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Node identities are keyed off the node's signing key, like addresses.
    pub fn from_pk(pk: &PublicKey) -> Self {
        Self(*Hasher::new_derive_key("txsync-node-id")
            .update(pk.as_bytes())
            .finalize()
            .as_bytes())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short form used in log lines.
    pub fn abridged(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.abridged())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.abridged())
    }
}

/// Content hash of an encoded transaction.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxHash(pub [u8; 32]);

impl TxHash {
    pub fn of(encoded: &[u8]) -> Self {
        Self(blake3_hash(encoded))
    }

    pub fn abridged(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.abridged())
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({})", self.abridged())
    }
}

pub fn address_from_pk(pk: &PublicKey) -> Address {
    *Hasher::new_derive_key("txsync-address")
        .update(pk.as_bytes())
        .finalize()
        .as_bytes()
}

/// Hashes arbitrary data with a domain-specific key for internal consistency.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *Hasher::new_derive_key("txsync-v1").update(data).finalize().as_bytes()
}

pub fn dilithium3_keypair() -> (PublicKey, SecretKey) {
    dilithium3::keypair()
}

pub fn sign(message: &[u8], sk: &SecretKey) -> DetachedSignature {
    dilithium3::detached_sign(message, sk)
}

pub fn verify(message: &[u8], sig: &DetachedSignature, pk: &PublicKey) -> bool {
    dilithium3::verify_detached_signature(sig, message, pk).is_ok()
}
