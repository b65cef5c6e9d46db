use native_db::*;
use native_model::{native_model, Model};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::modules::common::ensure_active;
use crate::modules::error::kind::ErrorKind;
use crate::modules::error::MailVaultResult;
use crate::modules::store::vault::DataVault;
use crate::modules::store::with_transaction;
use crate::{raise_error, utc_now};

/// Sealed password verifier; proves the password on `open`.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[native_model(id = 1, version = 1)]
#[native_db(primary_key(pk -> String))]
pub struct VaultVerifier {
    pub check: String,
    pub created_at: i64,
}

impl VaultVerifier {
    fn pk(&self) -> String {
        "verifier".into()
    }
}

/// The single master key all decentralized account keys derive from.
/// Stored sealed; the plaintext never leaves the process.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[native_model(id = 9, version = 1)]
#[native_db(primary_key(pk -> String))]
pub struct MasterKeyEntity {
    pub sealed: String,
    pub updated_at: i64,
}

impl MasterKeyEntity {
    fn pk(&self) -> String {
        "master".into()
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub enum KeyBundleKind {
    #[default]
    Public,
    Secret,
}

impl KeyBundleKind {
    fn key(&self) -> String {
        match self {
            KeyBundleKind::Public => "public".into(),
            KeyBundleKind::Secret => "secret".into(),
        }
    }
}

/// Opaque key material blob (public or secret half), sealed at rest.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[native_model(id = 10, version = 1)]
#[native_db(primary_key(pk -> String))]
pub struct KeyBundleEntity {
    pub kind: KeyBundleKind,
    pub sealed: String,
    pub updated_at: i64,
}

impl KeyBundleEntity {
    fn pk(&self) -> String {
        self.kind.key()
    }
}

impl DataVault {
    pub async fn set_master_key(
        &self,
        key: &[u8],
        token: &CancellationToken,
    ) -> MailVaultResult<()> {
        ensure_active(token)?;
        let session = self.session()?;
        let sealed = session.cipher.seal(key)?;
        with_transaction(&session.db, move |rw| {
            rw.upsert(MasterKeyEntity {
                sealed,
                updated_at: utc_now!(),
            })
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))
            .map(|_| ())
        })
        .await
    }

    pub async fn master_key(&self, token: &CancellationToken) -> MailVaultResult<Vec<u8>> {
        ensure_active(token)?;
        let session = self.session()?;
        let row: Option<MasterKeyEntity> =
            crate::modules::store::with_read(&session.db, |r| {
                r.get()
                    .primary("master".to_string())
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))
            })
            .await?;
        let row = row.ok_or_else(|| {
            raise_error!("Master key has not been stored".into(), ErrorKind::NotFound)
        })?;
        session.cipher.open(&row.sealed)
    }

    pub async fn has_master_key(&self, token: &CancellationToken) -> MailVaultResult<bool> {
        ensure_active(token)?;
        let session = self.session()?;
        let row: Option<MasterKeyEntity> =
            crate::modules::store::with_read(&session.db, |r| {
                r.get()
                    .primary("master".to_string())
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))
            })
            .await?;
        Ok(row.is_some())
    }

    pub async fn set_key_bundle(
        &self,
        kind: KeyBundleKind,
        bytes: &[u8],
        token: &CancellationToken,
    ) -> MailVaultResult<()> {
        ensure_active(token)?;
        let session = self.session()?;
        let sealed = session.cipher.seal(bytes)?;
        with_transaction(&session.db, move |rw| {
            rw.upsert(KeyBundleEntity {
                kind,
                sealed,
                updated_at: utc_now!(),
            })
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))
            .map(|_| ())
        })
        .await
    }

    pub async fn key_bundle(
        &self,
        kind: KeyBundleKind,
        token: &CancellationToken,
    ) -> MailVaultResult<Option<Vec<u8>>> {
        ensure_active(token)?;
        let session = self.session()?;
        let key = kind.key();
        let row: Option<KeyBundleEntity> =
            crate::modules::store::with_read(&session.db, move |r| {
                r.get()
                    .primary(key)
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))
            })
            .await?;
        match row {
            Some(row) => Ok(Some(session.cipher.open(&row.sealed)?)),
            None => Ok(None),
        }
    }
}
