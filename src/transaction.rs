use crate::crypto::{self, Address, TxHash};
use crate::error::TxError;
use bincode::Options;
use once_cell::sync::OnceCell;
use pqcrypto_dilithium::dilithium3::{DetachedSignature, PublicKey, SecretKey};
use pqcrypto_traits::sign::{DetachedSignature as _, PublicKey as _};
use serde::{Deserialize, Serialize};

/// The signed wire form of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxBody {
    pub nonce: u64,
    pub to: Address,
    pub value: u64,
    pub payload: Vec<u8>,
    pub sender_pk: Vec<u8>, // Dilithium3 public key
    pub sig: Vec<u8>,       // Dilithium3 detached signature
}

impl TxBody {
    /// Builds a body and signs it with `sk`.
    pub fn signed(
        nonce: u64,
        to: Address,
        value: u64,
        payload: Vec<u8>,
        pk: &PublicKey,
        sk: &SecretKey,
    ) -> Self {
        let mut body = TxBody {
            nonce,
            to,
            value,
            payload,
            sender_pk: pk.as_bytes().to_vec(),
            sig: Vec::new(),
        };
        body.sig = crypto::sign(&body.signing_bytes(), sk).as_bytes().to_vec();
        body
    }

    /// Returns the message that was signed
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(8 + 32 + 8 + 8 + self.payload.len() + self.sender_pk.len());
        data.extend_from_slice(&self.nonce.to_le_bytes());
        data.extend_from_slice(&self.to);
        data.extend_from_slice(&self.value.to_le_bytes());
        data.extend_from_slice(&(self.payload.len() as u64).to_le_bytes());
        data.extend_from_slice(&self.payload);
        data.extend_from_slice(&self.sender_pk);
        data
    }

    /// Length checks only, no signature math.
    pub fn check_format(&self) -> Result<(), TxError> {
        let expected = crypto::dilithium3_pk_bytes();
        if self.sender_pk.len() != expected {
            return Err(TxError::PublicKeyLength { expected, actual: self.sender_pk.len() });
        }
        let expected = crypto::dilithium3_sig_bytes();
        if self.sig.len() != expected {
            return Err(TxError::SignatureLength { expected, actual: self.sig.len() });
        }
        Ok(())
    }

    fn recover_sender(&self) -> Option<Address> {
        let pk = PublicKey::from_bytes(&self.sender_pk).ok()?;
        let sig = DetachedSignature::from_bytes(&self.sig).ok()?;
        crypto::verify(&self.signing_bytes(), &sig, &pk).then(|| crypto::address_from_pk(&pk))
    }
}

/// A decoded transaction together with its raw encoding.
///
/// The sender address is recovered lazily and cached; the cell is written at
/// most once, so concurrent callers on distinct transactions never contend.
#[derive(Debug, Clone)]
pub struct Transaction {
    body: TxBody,
    encoded: Vec<u8>,
    hash: TxHash,
    sender: OnceCell<Option<Address>>,
}

impl Transaction {
    /// Decodes one canonical encoding. Trailing bytes are rejected, so a
    /// transaction has exactly one encoding and therefore one hash.
    pub fn decode(encoded: &[u8]) -> Result<Self, TxError> {
        let body: TxBody = bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .reject_trailing_bytes()
            .deserialize(encoded)?;
        Ok(Self {
            body,
            hash: TxHash::of(encoded),
            encoded: encoded.to_vec(),
            sender: OnceCell::new(),
        })
    }

    pub fn from_body(body: TxBody) -> Result<Self, TxError> {
        let encoded = bincode::serialize(&body)?;
        Ok(Self {
            hash: TxHash::of(&encoded),
            body,
            encoded,
            sender: OnceCell::new(),
        })
    }

    pub fn hash(&self) -> TxHash {
        self.hash
    }

    pub fn body(&self) -> &TxBody {
        &self.body
    }

    pub fn encoded(&self) -> &[u8] {
        &self.encoded
    }

    /// Verifies the signature and returns the sender address, caching the
    /// outcome (including failure) for later callers.
    pub fn sender(&self) -> Result<Address, TxError> {
        self.sender
            .get_or_init(|| self.body.recover_sender())
            .ok_or(TxError::InvalidSignature)
    }

    /// True once `sender()` has run for this transaction.
    pub fn is_sender_recovered(&self) -> bool {
        self.sender.get().is_some()
    }
}
