// Wallet signing module
// Ed25519 signing of wallet messages and the wallet provider contract the
// coordinator reads seqno, balances and signatures from

use crate::errors::AggrError;
use crate::model::{AssetId, TxHash};
use crate::router::builder::{OfferHolding, UnsignedMessage};
use crate::transport::jsonrpc::Toncenter;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hex::FromHex;
use std::sync::Arc;
use tracing::debug;

type Blake2b256 = Blake2b<U32>;

/// Signed external message ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedMessage {
    /// Canonical bytes of the unsigned message.
    pub body: Vec<u8>,
    pub signature: [u8; 64],
    pub public_key: [u8; 32],
    /// Hash of the envelope; the ledger tracks the message by it.
    pub hash: TxHash,
}

impl SignedMessage {
    /// `signature || body`, the bytes that go on the wire.
    pub fn envelope(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.body.len());
        out.extend_from_slice(&self.signature);
        out.extend_from_slice(&self.body);
        out
    }

    pub fn envelope_b64(&self) -> String {
        B64.encode(self.envelope())
    }

    pub fn verify(&self) -> Result<(), AggrError> {
        let key = VerifyingKey::from_bytes(&self.public_key)
            .map_err(|e| AggrError::Signing(format!("bad public key: {e}")))?;
        key.verify(&digest(&self.body), &Signature::from_bytes(&self.signature))
            .map_err(|e| AggrError::Signing(format!("signature mismatch: {e}")))
    }
}

fn digest(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Wallet state and signing capability.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    fn address(&self) -> &str;

    fn subwallet_id(&self) -> u32;

    /// Current seqno as seen by the chain.
    async fn sequence_number(&self) -> Result<u32, AggrError>;

    /// Balance of `asset`. For jettons the holding names the wallet's own
    /// jetton wallet contract; a wallet that never held the jetton reports zero.
    async fn holding(&self, asset: &AssetId) -> Result<OfferHolding, AggrError>;

    fn sign(&self, message: &UnsignedMessage) -> Result<SignedMessage, AggrError>;
}

/// Ed25519 key over a hex-encoded 32-byte secret.
#[derive(Clone)]
pub struct Ed25519Signer {
    key: SigningKey,
}

impl std::fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("public_key", &hex::encode(self.public_key()))
            .finish()
    }
}

impl Ed25519Signer {
    pub fn from_hex(secret_hex: &str) -> Result<Self, AggrError> {
        let bytes = <[u8; 32]>::from_hex(secret_hex.trim())
            .map_err(|e| AggrError::Signing(format!("bad hex key: {e}")))?;
        Ok(Self {
            key: SigningKey::from_bytes(&bytes),
        })
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.key.verifying_key().to_bytes()
    }

    /// Sign the blake2b-256 digest of the message's canonical bytes.
    pub fn sign(&self, message: &UnsignedMessage) -> Result<SignedMessage, AggrError> {
        let body = message.signing_bytes()?;
        let signature = self.key.sign(&digest(&body)).to_bytes();
        let mut signed = SignedMessage {
            body,
            signature,
            public_key: self.public_key(),
            hash: TxHash(String::new()),
        };
        signed.hash = TxHash(hex::encode(digest(&signed.envelope())));
        Ok(signed)
    }
}

/// Wallet backed by a local key and toncenter for chain state.
#[derive(Debug, Clone)]
pub struct TonWallet {
    address: String,
    subwallet_id: u32,
    signer: Ed25519Signer,
    chain: Arc<Toncenter>,
}

impl TonWallet {
    pub fn new(address: String, subwallet_id: u32, signer: Ed25519Signer, chain: Arc<Toncenter>) -> Self {
        Self {
            address,
            subwallet_id,
            signer,
            chain,
        }
    }
}

#[async_trait]
impl WalletProvider for TonWallet {
    fn address(&self) -> &str {
        &self.address
    }

    fn subwallet_id(&self) -> u32 {
        self.subwallet_id
    }

    async fn sequence_number(&self) -> Result<u32, AggrError> {
        self.chain.seqno(&self.address).await
    }

    async fn holding(&self, asset: &AssetId) -> Result<OfferHolding, AggrError> {
        match asset {
            AssetId::Native => Ok(OfferHolding {
                balance: self.chain.balance(&self.address).await?,
                wallet_address: self.address.clone(),
            }),
            AssetId::Jetton(master) => {
                let holding = self.chain.jetton_wallet(&self.address, master).await?;
                debug!(master = %master, found = holding.is_some(), "jetton wallet lookup");
                Ok(holding.unwrap_or(OfferHolding {
                    balance: 0,
                    wallet_address: String::new(),
                }))
            }
        }
    }

    fn sign(&self, message: &UnsignedMessage) -> Result<SignedMessage, AggrError> {
        self.signer.sign(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::builder::OutMessage;

    const SECRET: &str = "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60";

    fn message(seqno: u32) -> UnsignedMessage {
        UnsignedMessage {
            wallet: "EQwallet".into(),
            subwallet_id: 698_983_191,
            seqno,
            valid_until: 1_700_000_060,
            messages: vec![OutMessage {
                destination: "EQvault".into(),
                value: 100_300_000_000,
                body: vec![1, 2, 3],
            }],
        }
    }

    #[test]
    fn signature_verifies_against_public_key() {
        let signer = Ed25519Signer::from_hex(SECRET).unwrap();
        let signed = signer.sign(&message(1)).unwrap();
        assert_eq!(signed.public_key, signer.public_key());
        signed.verify().unwrap();

        let mut tampered = signed.clone();
        tampered.body[0] ^= 0xff;
        assert!(tampered.verify().is_err());
    }

    #[test]
    fn hash_is_stable_and_seqno_sensitive() {
        let signer = Ed25519Signer::from_hex(SECRET).unwrap();
        let a = signer.sign(&message(1)).unwrap();
        let b = signer.sign(&message(1)).unwrap();
        let c = signer.sign(&message(2)).unwrap();
        assert_eq!(a.hash, b.hash);
        assert_ne!(a.hash, c.hash);
        assert_eq!(a.hash.0.len(), 64);
        assert_eq!(a.envelope().len(), 64 + a.body.len());
    }

    #[test]
    fn rejects_malformed_secret() {
        assert!(matches!(
            Ed25519Signer::from_hex("abcd"),
            Err(AggrError::Signing(_))
        ));
    }
}
