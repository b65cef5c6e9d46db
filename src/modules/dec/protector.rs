use async_trait::async_trait;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::RngCore;
use ring::signature::Ed25519KeyPair;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::modules::dec::base32e;
use crate::modules::dec::route;
use crate::modules::error::kind::ErrorKind;
use crate::modules::error::MailVaultResult;
use crate::raise_error;

const ENC_DERIVE_DOMAIN: &str = "mailvault.dec.enc.v1";
const SIG_DERIVE_DOMAIN: &str = "mailvault.dec.sig.v1";
const NONCE_LEN: usize = 12;

/// Per-message cryptography of the decentralized transport.
///
/// The OpenPGP engine stays an external collaborator behind this trait;
/// [`DecProtector`] is the in-crate sealed-envelope implementation.
#[async_trait]
pub trait MessageProtector: Send + Sync {
    /// Encrypt `plaintext` to the holder of a Base32E public key.
    async fn encrypt_for(
        &self,
        recipient_public_key: &str,
        plaintext: &[u8],
    ) -> MailVaultResult<Vec<u8>>;

    /// Decrypt an envelope addressed to this protector's key.
    async fn decrypt(&self, envelope: &[u8]) -> MailVaultResult<Vec<u8>>;

    /// Detached signature for name claims.
    async fn sign(&self, data: &[u8]) -> MailVaultResult<Vec<u8>>;

    /// Base32E of the encryption public key; the local part of the
    /// account's address.
    fn public_key(&self) -> String;
}

/// Sealed-envelope protector with keys derived from the master key and the
/// account's derivation index. Envelope layout:
/// `ephemeral pub (32) || nonce (12) || ciphertext`.
pub struct DecProtector {
    secret: StaticSecret,
    signing_seed: [u8; 32],
}

fn derive_seed(domain: &str, master_key: &[u8], account_index: u32) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(domain.as_bytes());
    hasher.update(b"|");
    hasher.update(account_index.to_be_bytes());
    hasher.update(b"|");
    hasher.update(master_key);
    hasher.finalize().into()
}

fn symmetric_key(shared_secret: &[u8]) -> Key {
    let mut hasher = Sha256::new();
    hasher.update(shared_secret);
    hasher.finalize()
}

impl DecProtector {
    /// Derive the account keypair from the master key and derivation index.
    pub fn derive(master_key: &[u8], account_index: u32) -> MailVaultResult<Self> {
        if master_key.len() < 16 {
            return Err(raise_error!(
                "Master key is too short for key derivation".into(),
                ErrorKind::InvalidArgument
            ));
        }
        let secret = StaticSecret::from(derive_seed(ENC_DERIVE_DOMAIN, master_key, account_index));
        let signing_seed = derive_seed(SIG_DERIVE_DOMAIN, master_key, account_index);
        Ok(DecProtector {
            secret,
            signing_seed,
        })
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        *PublicKey::from(&self.secret).as_bytes()
    }

    fn parse_public_key(key_bytes: &[u8]) -> MailVaultResult<PublicKey> {
        let key_array: [u8; 32] = key_bytes.try_into().map_err(|_| {
            raise_error!(
                "Public key must be 32 bytes".into(),
                ErrorKind::InvalidArgument
            )
        })?;
        Ok(PublicKey::from(key_array))
    }
}

#[async_trait]
impl MessageProtector for DecProtector {
    async fn encrypt_for(
        &self,
        recipient_public_key: &str,
        plaintext: &[u8],
    ) -> MailVaultResult<Vec<u8>> {
        route::validate_public_key(recipient_public_key)?;
        let recipient = Self::parse_public_key(&base32e::decode(recipient_public_key)?)?;

        let mut ephemeral_seed = [0u8; 32];
        rand::rng().fill_bytes(&mut ephemeral_seed);
        let ephemeral = StaticSecret::from(ephemeral_seed);
        let shared = ephemeral.diffie_hellman(&recipient);

        let cipher = ChaCha20Poly1305::new(&symmetric_key(shared.as_bytes()));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from(nonce_bytes);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| raise_error!(format!("Encryption failed: {}", e), ErrorKind::Database))?;

        let mut envelope =
            Vec::with_capacity(32 + NONCE_LEN + ciphertext.len());
        envelope.extend_from_slice(PublicKey::from(&ephemeral).as_bytes());
        envelope.extend_from_slice(&nonce_bytes);
        envelope.extend_from_slice(&ciphertext);
        Ok(envelope)
    }

    async fn decrypt(&self, envelope: &[u8]) -> MailVaultResult<Vec<u8>> {
        if envelope.len() < 32 + NONCE_LEN {
            return Err(raise_error!(
                "Envelope is too short".into(),
                ErrorKind::InvalidArgument
            ));
        }
        let (ephemeral_bytes, rest) = envelope.split_at(32);
        let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);
        let ephemeral = Self::parse_public_key(ephemeral_bytes)?;
        let shared = self.secret.diffie_hellman(&ephemeral);
        let cipher = ChaCha20Poly1305::new(&symmetric_key(shared.as_bytes()));
        let nonce = Nonce::from_slice(nonce_bytes);
        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| raise_error!(format!("Decryption failed: {}", e), ErrorKind::Database))
    }

    async fn sign(&self, data: &[u8]) -> MailVaultResult<Vec<u8>> {
        let keypair = Ed25519KeyPair::from_seed_unchecked(&self.signing_seed)
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
        Ok(keypair.sign(data).as_ref().to_vec())
    }

    fn public_key(&self) -> String {
        base32e::encode(&self.public_key_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn envelope_roundtrip_between_derived_keys() {
        let master = [42u8; 32];
        let sender = DecProtector::derive(&master, 0).unwrap();
        let recipient = DecProtector::derive(&master, 1).unwrap();

        let envelope = sender
            .encrypt_for(&recipient.public_key(), b"hello over the mesh")
            .await
            .unwrap();
        let plaintext = recipient.decrypt(&envelope).await.unwrap();
        assert_eq!(plaintext, b"hello over the mesh");

        // The wrong recipient cannot open it.
        assert!(sender.decrypt(&envelope).await.is_err());
    }

    #[test]
    fn derivation_is_deterministic_per_index() {
        let master = [7u8; 32];
        let a = DecProtector::derive(&master, 3).unwrap();
        let b = DecProtector::derive(&master, 3).unwrap();
        let c = DecProtector::derive(&master, 4).unwrap();
        assert_eq!(a.public_key(), b.public_key());
        assert_ne!(a.public_key(), c.public_key());
    }

    #[tokio::test]
    async fn signatures_are_stable() {
        let protector = DecProtector::derive(&[9u8; 32], 0).unwrap();
        let first = protector.sign(b"name.test").await.unwrap();
        let second = protector.sign(b"name.test").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }
}
