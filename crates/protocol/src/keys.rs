//! Signing identities.

use bech32::{Bech32, Hrp};
use bitcoin::key::Secp256k1;
use bitcoin::secp256k1::{Keypair, SecretKey, XOnlyPublicKey};

use crate::error::{ProtocolError, Result};

const NSEC_HRP: &str = "nsec";
const NPUB_HRP: &str = "npub";

/// A secp256k1 keypair plus the x-only public key the protocol uses to
/// attribute events.
#[derive(Clone)]
pub struct Keys {
    secret_key: SecretKey,
    keypair: Keypair,
    public_key: XOnlyPublicKey,
}

impl Keys {
    /// Generate a fresh keypair from OS entropy.
    pub fn generate() -> Self {
        // Rejection-sample until the scalar is in range; failure odds per
        // draw are below 2^-127.
        loop {
            let candidate: [u8; 32] = rand::random();
            if let Ok(secret_key) = SecretKey::from_slice(&candidate) {
                return Self::from_secret_key(secret_key);
            }
        }
    }

    /// Build from a 32-byte secret key in lowercase hex.
    pub fn from_secret_hex(secret_hex: &str) -> Result<Self> {
        let bytes = hex::decode(secret_hex)
            .map_err(|error| ProtocolError::Key(format!("secret key is not hex: {error}")))?;
        let secret_key = SecretKey::from_slice(&bytes)
            .map_err(|error| ProtocolError::Key(format!("invalid secret key: {error}")))?;
        Ok(Self::from_secret_key(secret_key))
    }

    fn from_secret_key(secret_key: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let keypair = Keypair::from_secret_key(&secp, &secret_key);
        let (public_key, _parity) = keypair.x_only_public_key();
        Self {
            secret_key,
            keypair,
            public_key,
        }
    }

    pub(crate) fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    pub fn public_key(&self) -> &XOnlyPublicKey {
        &self.public_key
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key.serialize())
    }

    pub fn secret_key_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    /// Bech32 rendering of the public key.
    pub fn npub(&self) -> Result<String> {
        encode_bech32(NPUB_HRP, &self.public_key.serialize())
    }

    /// Bech32 rendering of the secret key.
    pub fn nsec(&self) -> Result<String> {
        encode_bech32(NSEC_HRP, &self.secret_key.secret_bytes())
    }
}

fn encode_bech32(hrp: &str, data: &[u8; 32]) -> Result<String> {
    let parsed_hrp =
        Hrp::parse(hrp).map_err(|error| ProtocolError::Key(format!("invalid bech32 hrp: {error}")))?;
    bech32::encode::<Bech32>(parsed_hrp, data)
        .map_err(|error| ProtocolError::Key(format!("bech32 encoding failed: {error}")))
}
