//! Content-addressed event identity: canonical serialization, hashing,
//! signature creation and verification.
//!
//! This is the only place that computes or checks an event's `id` and
//! `sig`. Anything parsed from the wire must pass [`Event::validate`]
//! before it is treated as trusted input.

use bitcoin::key::Secp256k1;
use bitcoin::secp256k1::schnorr::Signature;
use bitcoin::secp256k1::{Message, XOnlyPublicKey};
use sha2::{Digest, Sha256};

use crate::error::{Result, ValidationError};
use crate::event::Event;
use crate::keys::Keys;

/// Serialize the signable fields as the canonical JSON array
/// `[0, pubkey, created_at, kind, tags, content]`.
///
/// The output feeds a hash that doubles as the event's primary key, so it
/// must be byte-for-byte deterministic: compact separators, UTF-8, field
/// order fixed by position.
pub fn canonical_form(
    pubkey: &str,
    created_at: u64,
    kind: u32,
    tags: &[Vec<String>],
    content: &str,
) -> Result<Vec<u8>> {
    let array = serde_json::json!([0, pubkey, created_at, kind, tags, content]);
    Ok(serde_json::to_vec(&array)?)
}

/// SHA-256 digest of the canonical form.
pub fn compute_id(canonical: &[u8]) -> [u8; 32] {
    Sha256::digest(canonical).into()
}

/// BIP-340 Schnorr signature over an event id.
pub fn sign_id(id: &[u8; 32], keys: &Keys) -> Signature {
    let secp = Secp256k1::new();
    let message = Message::from_digest(*id);
    secp.sign_schnorr_no_aux_rand(&message, keys.keypair())
}

/// Verify a Schnorr signature over an event id.
pub fn verify_id_signature(id: &[u8; 32], sig: &Signature, pubkey: &XOnlyPublicKey) -> bool {
    let secp = Secp256k1::verification_only();
    let message = Message::from_digest(*id);
    secp.verify_schnorr(sig, &message, pubkey).is_ok()
}

impl Event {
    /// Create a fully-formed, self-consistent event: computes the canonical
    /// form, derives `id`, and signs it.
    pub fn create(
        keys: &Keys,
        created_at: u64,
        kind: u32,
        tags: Vec<Vec<String>>,
        content: impl Into<String>,
    ) -> Result<Event> {
        let content = content.into();
        let pubkey = keys.public_key_hex();
        let canonical = canonical_form(&pubkey, created_at, kind, &tags, &content)?;
        let id = compute_id(&canonical);
        let sig = sign_id(&id, keys);

        Ok(Event {
            id: hex::encode(id),
            pubkey,
            created_at,
            kind,
            tags,
            content,
            sig: hex::encode(sig.serialize()),
        })
    }

    /// Recompute the canonical form and compare its digest to the stored id.
    pub fn verify_id(&self) -> std::result::Result<[u8; 32], ValidationError> {
        let canonical = canonical_form(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )
        .map_err(|error| ValidationError::Malformed(error.to_string()))?;
        let computed = compute_id(&canonical);
        let computed_hex = hex::encode(computed);

        if computed_hex != self.id {
            return Err(ValidationError::IdMismatch {
                stored: self.id.clone(),
                computed: computed_hex,
            });
        }
        Ok(computed)
    }

    /// Verify the signature against a (trusted) id digest and the author key.
    pub fn verify_signature(&self, id: &[u8; 32]) -> std::result::Result<(), ValidationError> {
        let sig_bytes = hex::decode(&self.sig)
            .map_err(|error| ValidationError::Malformed(format!("sig is not hex: {error}")))?;
        let sig = Signature::from_slice(&sig_bytes)
            .map_err(|error| ValidationError::Malformed(format!("sig: {error}")))?;

        let pubkey_bytes = hex::decode(&self.pubkey)
            .map_err(|error| ValidationError::Malformed(format!("pubkey is not hex: {error}")))?;
        let pubkey = XOnlyPublicKey::from_slice(&pubkey_bytes)
            .map_err(|error| ValidationError::Malformed(format!("pubkey: {error}")))?;

        if !verify_id_signature(id, &sig, &pubkey) {
            return Err(ValidationError::BadSignature(format!(
                "schnorr verification failed for event {}",
                self.id
            )));
        }
        Ok(())
    }

    /// Full identity check: id recomputation plus signature verification.
    ///
    /// An event is valid iff both hold; anything else is rejected before it
    /// reaches storage.
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        let id = self.verify_id()?;
        self.verify_signature(&id)
    }
}
