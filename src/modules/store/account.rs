use native_db::*;
use native_model::{native_model, Model};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::modules::common::{ensure_active, normalize_address};
use crate::modules::error::kind::ErrorKind;
use crate::modules::error::MailVaultResult;
use crate::modules::store::cipher::VaultCipher;
use crate::modules::store::folder::{
    delete_folder_cascade_in_tx, folder_path_key, FolderEntity, FolderEntityKey, FolderSpec,
};
use crate::modules::store::vault::DataVault;
use crate::modules::store::{
    list_all_impl, scan_secondary_in_tx, secondary_find_impl, with_transaction,
};
use crate::{id, raise_error, utc_now};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub enum AccountKind {
    #[default]
    Classic,
    Proton,
    Decentralized,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub enum ExternalContentPolicy {
    Allow,
    #[default]
    Ask,
    Block,
}

/// Incoming/outgoing server coordinates for classic accounts.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

/// Account credentials. The string payloads are sealed with the vault
/// cipher before they reach a row; [`DataVault::account_auth`] unseals.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub enum AccountAuth {
    #[default]
    None,
    Password {
        secret: String,
    },
    RefreshToken {
        refresh_token: String,
        access_token: Option<String>,
    },
}

impl AccountAuth {
    fn map_secrets(
        self,
        f: impl Fn(&str) -> MailVaultResult<String>,
    ) -> MailVaultResult<AccountAuth> {
        Ok(match self {
            AccountAuth::None => AccountAuth::None,
            AccountAuth::Password { secret } => AccountAuth::Password {
                secret: f(&secret)?,
            },
            AccountAuth::RefreshToken {
                refresh_token,
                access_token,
            } => AccountAuth::RefreshToken {
                refresh_token: f(&refresh_token)?,
                access_token: access_token.map(|t| f(&t)).transpose()?,
            },
        })
    }

    pub(crate) fn sealed(self, cipher: &VaultCipher) -> MailVaultResult<AccountAuth> {
        self.map_secrets(|s| cipher.seal_str(s))
    }

    pub(crate) fn opened(self, cipher: &VaultCipher) -> MailVaultResult<AccountAuth> {
        self.map_secrets(|s| cipher.open_str(s))
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[native_model(id = 2, version = 1)]
#[native_db(
    primary_key(pk -> String),
    secondary_key(address_key -> String, unique)
)]
pub struct AccountEntity {
    #[secondary_key(unique)]
    pub id: u64,
    /// Display form of the address; uniqueness goes through the normalizer.
    pub address: String,
    pub display_name: Option<String>,
    pub kind: AccountKind,
    /// Network tag for decentralized accounts (the address domain part).
    pub network_tag: Option<String>,
    /// Key-derivation index for decentralized accounts.
    pub derivation_index: Option<u32>,
    pub incoming: Option<ServerConfig>,
    pub outgoing: Option<ServerConfig>,
    /// Sealed credentials; see [`AccountAuth`].
    pub auth: AccountAuth,
    pub default_inbox_path: Option<String>,
    pub external_content: ExternalContentPolicy,
    pub created_at: i64,
    pub updated_at: i64,
}

impl AccountEntity {
    fn pk(&self) -> String {
        format!("{}_{}", self.created_at, self.id)
    }

    fn address_key(&self) -> String {
        normalize_address(&self.address)
    }

    pub fn new(address: &str, kind: AccountKind) -> Self {
        AccountEntity {
            id: id!(64),
            address: address.into(),
            kind,
            created_at: utc_now!(),
            updated_at: utc_now!(),
            ..Default::default()
        }
    }
}

impl DataVault {
    /// Register an account together with its folder tree. Fails with
    /// `Duplicate` when the normalized address is already taken.
    pub async fn add_account(
        &self,
        mut account: AccountEntity,
        folders: Vec<FolderSpec>,
        token: &CancellationToken,
    ) -> MailVaultResult<AccountEntity> {
        ensure_active(token)?;
        if account.address.is_empty() {
            return Err(raise_error!(
                "Account address cannot be empty".into(),
                ErrorKind::InvalidArgument
            ));
        }
        let session = self.session()?;
        if account.id == 0 {
            account.id = id!(64);
        }
        account.created_at = utc_now!();
        account.updated_at = account.created_at;
        account.auth = account.auth.sealed(&session.cipher)?;
        let lock = self.account_lock(account.id);
        let _guard = lock.lock().await;
        let added = with_transaction(&session.db, move |rw| {
            let existing: Option<AccountEntity> = rw
                .get()
                .secondary(AccountEntityKey::address_key, account.address_key())
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
            if existing.is_some() {
                return Err(raise_error!(
                    format!("Account '{}' already exists", account.address),
                    ErrorKind::Duplicate
                ));
            }
            rw.insert(account.clone())
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
            for spec in folders {
                let folder = FolderEntity {
                    id: id!(64),
                    account_id: account.id,
                    path: spec.path,
                    roles: spec.roles,
                    total_count: spec.total_count,
                    unread_count: spec.unread_count,
                    local_count: 0,
                };
                rw.insert(folder)
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
            }
            Ok(account)
        })
        .await?;
        info!("Account '{}' added", added.address);
        Ok(added)
    }

    pub async fn find_account(
        &self,
        address: &str,
        token: &CancellationToken,
    ) -> MailVaultResult<Option<AccountEntity>> {
        ensure_active(token)?;
        let session = self.session()?;
        secondary_find_impl(
            &session.db,
            AccountEntityKey::address_key,
            normalize_address(address),
        )
        .await
    }

    pub async fn get_account(
        &self,
        address: &str,
        token: &CancellationToken,
    ) -> MailVaultResult<AccountEntity> {
        self.find_account(address, token).await?.ok_or_else(|| {
            raise_error!(
                format!("Account '{}' not found", address),
                ErrorKind::NotFound
            )
        })
    }

    pub async fn account_by_id(
        &self,
        account_id: u64,
        token: &CancellationToken,
    ) -> MailVaultResult<AccountEntity> {
        ensure_active(token)?;
        let session = self.session()?;
        let account: Option<AccountEntity> =
            secondary_find_impl(&session.db, AccountEntityKey::id, account_id).await?;
        account.ok_or_else(|| {
            raise_error!(
                format!("Account with id '{account_id}' not found"),
                ErrorKind::NotFound
            )
        })
    }

    pub async fn accounts(&self, token: &CancellationToken) -> MailVaultResult<Vec<AccountEntity>> {
        ensure_active(token)?;
        let session = self.session()?;
        list_all_impl(&session.db).await
    }

    pub async fn account_exists(
        &self,
        address: &str,
        token: &CancellationToken,
    ) -> MailVaultResult<bool> {
        Ok(self.find_account(address, token).await?.is_some())
    }

    /// Unsealed credentials for an account.
    pub async fn account_auth(
        &self,
        address: &str,
        token: &CancellationToken,
    ) -> MailVaultResult<AccountAuth> {
        let session = self.session()?;
        let account = self.get_account(address, token).await?;
        account.auth.opened(&session.cipher)
    }

    /// Update mutable account attributes. Updating an account that does not
    /// exist is a silent no-op; credentials and folders have their own
    /// operations.
    pub async fn update_account(
        &self,
        account: AccountEntity,
        token: &CancellationToken,
    ) -> MailVaultResult<()> {
        ensure_active(token)?;
        let session = self.session()?;
        with_transaction(&session.db, move |rw| {
            let existing: Option<AccountEntity> = rw
                .get()
                .secondary(AccountEntityKey::address_key, account.address_key())
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
            let Some(existing) = existing else {
                return Ok(());
            };
            let mut updated = existing.clone();
            updated.display_name = account.display_name;
            updated.network_tag = account.network_tag;
            updated.derivation_index = account.derivation_index;
            updated.incoming = account.incoming;
            updated.outgoing = account.outgoing;
            updated.default_inbox_path = account.default_inbox_path;
            updated.external_content = account.external_content;
            updated.updated_at = utc_now!();
            rw.update(existing, updated)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
            Ok(())
        })
        .await
    }

    /// Replace an account's credentials. Same silent contract as
    /// [`DataVault::update_account`] for a missing account.
    pub async fn update_account_auth(
        &self,
        address: &str,
        auth: AccountAuth,
        token: &CancellationToken,
    ) -> MailVaultResult<()> {
        ensure_active(token)?;
        let session = self.session()?;
        let sealed = auth.sealed(&session.cipher)?;
        let address_key = normalize_address(address);
        with_transaction(&session.db, move |rw| {
            let existing: Option<AccountEntity> = rw
                .get()
                .secondary(AccountEntityKey::address_key, address_key)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
            let Some(existing) = existing else {
                return Ok(());
            };
            let mut updated = existing.clone();
            updated.auth = sealed;
            updated.updated_at = utc_now!();
            rw.update(existing, updated)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
            Ok(())
        })
        .await
    }

    /// Reconcile the stored folder tree against `folders`: new paths are
    /// inserted (local counter forced to zero), kept paths take the incoming
    /// roles and server counters, paths absent from `folders` are deleted
    /// with their messages.
    pub async fn update_folder_structure(
        &self,
        address: &str,
        folders: Vec<FolderSpec>,
        token: &CancellationToken,
    ) -> MailVaultResult<()> {
        ensure_active(token)?;
        let session = self.session()?;
        let account = self.get_account(address, token).await?;
        let lock = self.account_lock(account.id);
        let _guard = lock.lock().await;
        let account_id = account.id;
        with_transaction(&session.db, move |rw| {
            let stored: Vec<FolderEntity> =
                scan_secondary_in_tx(rw, FolderEntityKey::account_id, account_id)?;
            for folder in &stored {
                let incoming = folders
                    .iter()
                    .find(|s| s.path.to_lowercase() == folder.path.to_lowercase());
                match incoming {
                    Some(spec) => {
                        let mut updated = folder.clone();
                        updated.roles = spec.roles;
                        updated.total_count = spec.total_count;
                        updated.unread_count = spec.unread_count;
                        rw.update(folder.clone(), updated)
                            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
                    }
                    None => {
                        delete_folder_cascade_in_tx(rw, folder)?;
                    }
                }
            }
            for spec in folders {
                let key = folder_path_key(account_id, &spec.path);
                let exists: Option<FolderEntity> = rw
                    .get()
                    .secondary(FolderEntityKey::path_key, key)
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
                if exists.is_none() {
                    let folder = FolderEntity {
                        id: id!(64),
                        account_id,
                        path: spec.path,
                        roles: spec.roles,
                        total_count: spec.total_count,
                        unread_count: spec.unread_count,
                        local_count: 0,
                    };
                    rw.insert(folder)
                        .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
                }
            }
            Ok(())
        })
        .await
    }

    pub async fn delete_account(
        &self,
        account_id: u64,
        token: &CancellationToken,
    ) -> MailVaultResult<()> {
        let account = self.account_by_id(account_id, token).await?;
        self.delete_account_by_address(&account.address, token).await
    }

    pub async fn delete_account_by_address(
        &self,
        address: &str,
        token: &CancellationToken,
    ) -> MailVaultResult<()> {
        ensure_active(token)?;
        let session = self.session()?;
        let account = self.get_account(address, token).await?;
        let lock = self.account_lock(account.id);
        let _guard = lock.lock().await;
        let account_id = account.id;
        with_transaction(&session.db, move |rw| {
            let folders: Vec<FolderEntity> =
                scan_secondary_in_tx(rw, FolderEntityKey::account_id, account_id)?;
            for folder in &folders {
                delete_folder_cascade_in_tx(rw, folder)?;
            }
            rw.remove(account)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
            Ok(())
        })
        .await?;
        info!("Account '{}' deleted", address);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_seals_and_opens() {
        let cipher = VaultCipher::new("pw");
        let auth = AccountAuth::RefreshToken {
            refresh_token: "refresh".into(),
            access_token: Some("access".into()),
        };
        let sealed = auth.clone().sealed(&cipher).unwrap();
        assert_ne!(sealed, auth);
        assert_eq!(sealed.opened(&cipher).unwrap(), auth);
    }
}
