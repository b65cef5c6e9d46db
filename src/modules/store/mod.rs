use std::sync::{Arc, LazyLock};

use db_type::{KeyOptions, ToKeyDefinition};
use itertools::Itertools;
use native_db::*;
use transaction::RwTransaction;

use crate::modules::error::kind::ErrorKind;
use crate::modules::error::MailVaultResult;
use crate::raise_error;

pub mod account;
pub mod address;
pub mod agent;
pub mod cipher;
pub mod contact;
pub mod folder;
pub mod keys;
pub mod message;
pub mod settings;
pub mod vault;
#[cfg(test)]
mod tests;

use account::AccountEntity;
use address::MessageAddressEntity;
use agent::AgentEntity;
use contact::ContactEntity;
use folder::FolderEntity;
use keys::{KeyBundleEntity, MasterKeyEntity, VaultVerifier};
use message::MessageEntity;
use settings::VaultSettings;

pub static VAULT_MODELS: LazyLock<Models> = LazyLock::new(|| {
    let mut adapter = ModelsAdapter::new();
    adapter.register_vault_models();
    adapter.models
});

pub struct ModelsAdapter {
    pub models: Models,
}

impl ModelsAdapter {
    pub fn new() -> Self {
        ModelsAdapter {
            models: Models::new(),
        }
    }

    pub fn register_model<T: ToInput>(&mut self) {
        self.models.define::<T>().expect("failed to define model");
    }

    pub fn register_vault_models(&mut self) {
        self.register_model::<VaultVerifier>();
        self.register_model::<AccountEntity>();
        self.register_model::<FolderEntity>();
        self.register_model::<MessageEntity>();
        self.register_model::<MessageAddressEntity>();
        self.register_model::<ContactEntity>();
        self.register_model::<AgentEntity>();
        self.register_model::<VaultSettings>();
        self.register_model::<MasterKeyEntity>();
        self.register_model::<KeyBundleEntity>();
    }
}

impl Default for ModelsAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a read-write closure as one committed transaction on a blocking
/// worker. Partial application is impossible: any error before `commit`
/// drops the transaction.
pub async fn with_transaction<T, F>(
    database: &Arc<Database<'static>>,
    f: F,
) -> MailVaultResult<T>
where
    F: FnOnce(&RwTransaction) -> MailVaultResult<T> + Send + 'static,
    T: Send + 'static,
{
    let db = database.clone();
    tokio::task::spawn_blocking(move || {
        let rw = db
            .rw_transaction()
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
        let out = f(&rw)?;
        rw.commit()
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
        Ok(out)
    })
    .await
    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?
}

pub async fn with_read<T, F>(database: &Arc<Database<'static>>, f: F) -> MailVaultResult<T>
where
    F: FnOnce(&transaction::RTransaction) -> MailVaultResult<T> + Send + 'static,
    T: Send + 'static,
{
    let db = database.clone();
    tokio::task::spawn_blocking(move || {
        let r = db
            .r_transaction()
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
        f(&r)
    })
    .await
    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?
}

pub async fn list_all_impl<T: ToInput + Clone + Send + 'static>(
    database: &Arc<Database<'static>>,
) -> MailVaultResult<Vec<T>> {
    with_read(database, |r| {
        let entities: Vec<T> = r
            .scan()
            .primary()
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?
            .all()
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?
            .try_collect()
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
        Ok(entities)
    })
    .await
}

pub async fn secondary_find_impl<T: ToInput + Clone + Send + 'static>(
    database: &Arc<Database<'static>>,
    key_def: impl ToKeyDefinition<KeyOptions> + Send + 'static,
    key: impl ToKey + Send + 'static,
) -> MailVaultResult<Option<T>> {
    with_read(database, move |r| {
        r.get()
            .secondary(key_def, key)
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))
    })
    .await
}

pub async fn filter_by_secondary_key_impl<T: ToInput + Clone + Send + 'static>(
    database: &Arc<Database<'static>>,
    key_def: impl ToKeyDefinition<KeyOptions> + Send + 'static,
    start_with: impl ToKey + Send + 'static,
) -> MailVaultResult<Vec<T>> {
    with_read(database, move |r| {
        let entities: Vec<T> = r
            .scan()
            .secondary(key_def)
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?
            .start_with(start_with)
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?
            .try_collect()
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
        Ok(entities)
    })
    .await
}

/// In-transaction variant of the secondary prefix scan, for compound writes.
pub fn scan_secondary_in_tx<T: ToInput + Clone>(
    rw: &RwTransaction,
    key_def: impl ToKeyDefinition<KeyOptions>,
    start_with: impl ToKey,
) -> MailVaultResult<Vec<T>> {
    let entities: Vec<T> = rw
        .scan()
        .secondary(key_def)
        .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?
        .start_with(start_with)
        .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?
        .try_collect()
        .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
    Ok(entities)
}
