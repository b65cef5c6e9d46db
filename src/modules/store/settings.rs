use std::collections::BTreeMap;

use native_db::*;
use native_model::{native_model, Model};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::modules::common::ensure_active;
use crate::modules::error::kind::ErrorKind;
use crate::modules::error::MailVaultResult;
use crate::modules::store::vault::DataVault;
use crate::modules::store::{with_read, with_transaction};
use crate::raise_error;

/// Singleton application settings row: one account counter per
/// decentralized network, feeding key-derivation indexes.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[native_model(id = 8, version = 1)]
#[native_db(primary_key(pk -> String))]
pub struct VaultSettings {
    pub account_counters: BTreeMap<String, u32>,
}

impl VaultSettings {
    fn pk(&self) -> String {
        "settings".into()
    }

    pub fn counter(&self, network: &str) -> u32 {
        self.account_counters.get(network).copied().unwrap_or(0)
    }
}

impl DataVault {
    pub async fn settings(&self, token: &CancellationToken) -> MailVaultResult<VaultSettings> {
        ensure_active(token)?;
        let session = self.session()?;
        let row: Option<VaultSettings> = with_read(&session.db, |r| {
            r.get()
                .primary("settings".to_string())
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))
        })
        .await?;
        Ok(row.unwrap_or_default())
    }

    pub async fn set_settings(
        &self,
        settings: VaultSettings,
        token: &CancellationToken,
    ) -> MailVaultResult<()> {
        ensure_active(token)?;
        let session = self.session()?;
        with_transaction(&session.db, move |rw| {
            rw.upsert(settings)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))
                .map(|_| ())
        })
        .await
    }

    /// Bump and return the account counter for a decentralized network; the
    /// returned value is the derivation index of the next account.
    pub async fn next_account_index(
        &self,
        network: &str,
        token: &CancellationToken,
    ) -> MailVaultResult<u32> {
        ensure_active(token)?;
        let session = self.session()?;
        let network = network.to_string();
        with_transaction(&session.db, move |rw| {
            let current: Option<VaultSettings> = rw
                .get()
                .primary("settings".to_string())
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
            let mut updated = current.unwrap_or_default();
            let next = updated.counter(&network);
            updated.account_counters.insert(network, next + 1);
            rw.upsert(updated)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
            Ok(next)
        })
        .await
    }
}
