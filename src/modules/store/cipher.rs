use base64::{engine::general_purpose, Engine as _};
use ring::aead::{Aad, BoundKey, Nonce, NonceSequence, OpeningKey, SealingKey, AES_256_GCM};
use ring::pbkdf2::{self, derive};
use ring::rand::{SecureRandom, SystemRandom};
use std::num::NonZeroU32;

use crate::modules::error::kind::ErrorKind;
use crate::modules::error::MailVaultResult;
use crate::raise_error;

const VERIFIER_MAGIC: &str = "mailvault.vault.check";

/// Seals and opens sensitive columns with a key derived from the vault
/// password. Each sealed string embeds its own salt and nonce.
#[derive(Clone)]
pub struct VaultCipher {
    password: String,
}

impl VaultCipher {
    pub fn new(password: &str) -> Self {
        VaultCipher {
            password: password.into(),
        }
    }

    pub fn seal(&self, plaintext: &[u8]) -> MailVaultResult<String> {
        internal_seal(&self.password, plaintext)
            .map_err(|_| raise_error!("Failed to seal value.".into(), ErrorKind::Database))
    }

    pub fn open(&self, data: &str) -> MailVaultResult<Vec<u8>> {
        internal_open(&self.password, data).map_err(|_| {
            raise_error!(
                "Unsealing failed, likely due to an incorrect password or corrupted data".into(),
                ErrorKind::Database
            )
        })
    }

    pub fn seal_str(&self, plaintext: &str) -> MailVaultResult<String> {
        self.seal(plaintext.as_bytes())
    }

    pub fn open_str(&self, data: &str) -> MailVaultResult<String> {
        let bytes = self.open(data)?;
        String::from_utf8(bytes)
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))
    }

    pub fn make_verifier(&self) -> MailVaultResult<String> {
        self.seal_str(VERIFIER_MAGIC)
    }

    /// Check the password against a stored verifier.
    pub fn verify(&self, verifier: &str) -> MailVaultResult<()> {
        let opened = self.open_str(verifier).map_err(|_| {
            raise_error!("Wrong vault password".into(), ErrorKind::Database)
        })?;
        if opened != VERIFIER_MAGIC {
            return Err(raise_error!(
                "Wrong vault password".into(),
                ErrorKind::Database
            ));
        }
        Ok(())
    }
}

struct SingleNonceSequence([u8; 12]);

impl SingleNonceSequence {
    fn new(nonce: [u8; 12]) -> Self {
        SingleNonceSequence(nonce)
    }
}

impl NonceSequence for SingleNonceSequence {
    fn advance(&mut self) -> Result<Nonce, ring::error::Unspecified> {
        Ok(Nonce::assume_unique_for_key(self.0))
    }
}

fn derive_key(password: &str, salt: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        NonZeroU32::new(100_000).unwrap(),
        salt,
        password.as_bytes(),
        &mut key,
    );
    key
}

fn internal_seal(password: &str, plaintext: &[u8]) -> Result<String, ring::error::Unspecified> {
    let rng = SystemRandom::new();
    let mut salt = [0u8; 32];
    rng.fill(&mut salt)?;
    let key = derive_key(password, &salt);
    let mut nonce_bytes = [0u8; 12];
    rng.fill(&mut nonce_bytes)?;
    let unbound_key = ring::aead::UnboundKey::new(&AES_256_GCM, &key)?;
    let nonce_sequence = SingleNonceSequence::new(nonce_bytes);
    let mut sealing_key = SealingKey::new(unbound_key, nonce_sequence);
    let mut in_out = plaintext.to_vec();
    let aad = Aad::empty();
    sealing_key.seal_in_place_append_tag(aad, &mut in_out)?;
    let mut result = Vec::with_capacity(32 + 12 + in_out.len());
    result.extend_from_slice(&salt);
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&in_out);
    Ok(general_purpose::URL_SAFE.encode(&result))
}

fn internal_open(password: &str, data: &str) -> Result<Vec<u8>, ring::error::Unspecified> {
    let data = general_purpose::URL_SAFE
        .decode(data)
        .map_err(|_| ring::error::Unspecified)?;
    if data.len() < 32 + 12 {
        return Err(ring::error::Unspecified);
    }
    let salt = &data[0..32];
    let nonce_bytes: [u8; 12] = data[32..44]
        .try_into()
        .map_err(|_| ring::error::Unspecified)?;
    let ciphertext = &data[44..];
    let key = derive_key(password, salt);
    let unbound_key = ring::aead::UnboundKey::new(&AES_256_GCM, &key)?;
    let nonce_sequence = SingleNonceSequence::new(nonce_bytes);
    let mut opening_key = OpeningKey::new(unbound_key, nonce_sequence);
    let mut in_out = ciphertext.to_vec();
    let aad = Aad::empty();
    let decrypted = opening_key.open_in_place(aad, &mut in_out)?;
    Ok(decrypted.to_vec())
}
