use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::modules::common::{ensure_active, normalize_address, validate_email};
use crate::modules::dec::mailbox::DecMailbox;
use crate::modules::dec::route;
use crate::modules::error::kind::ErrorKind;
use crate::modules::error::MailVaultResult;
use crate::modules::mailbox::MailboxDriver;
use crate::modules::store::account::{AccountEntity, AccountKind};
use crate::modules::store::contact::Avatar;
use crate::modules::store::folder::{FolderEntity, FolderRoles};
use crate::modules::store::message::MessageEntity;
use crate::modules::store::vault::DataVault;
use crate::modules::sync::{self, SyncOutcome};
use crate::raise_error;

use contacts::ContactEngine;
use events::{EventChannel, MailEvent};

pub mod composite;
pub mod contacts;
pub mod events;

/// A constructed per-account mailbox: either an external protocol driver or
/// the in-crate decentralized mailbox.
#[derive(Clone)]
pub enum MailboxInstance {
    Standard(Arc<dyn MailboxDriver>),
    Decentralized(Arc<DecMailbox>),
}

impl MailboxInstance {
    pub fn driver(&self) -> Arc<dyn MailboxDriver> {
        match self {
            MailboxInstance::Standard(driver) => Arc::clone(driver),
            MailboxInstance::Decentralized(mailbox) => Arc::clone(mailbox) as Arc<dyn MailboxDriver>,
        }
    }

    fn decentralized(&self) -> Option<&Arc<DecMailbox>> {
        match self {
            MailboxInstance::Decentralized(mailbox) => Some(mailbox),
            MailboxInstance::Standard(_) => None,
        }
    }
}

/// Builds mailbox instances per account. IMAP/SMTP and Proton factories
/// live with their drivers outside this crate; decentralized accounts are
/// assembled from the vault's master key and the account's storage
/// clients.
#[async_trait]
pub trait MailboxFactory: Send + Sync {
    async fn create(
        &self,
        account: &AccountEntity,
        vault: Arc<DataVault>,
        token: &CancellationToken,
    ) -> MailVaultResult<MailboxInstance>;
}

/// The mail-core façade: multiplexes per-account mailbox drivers over the
/// shared vault, derives contacts from traffic, gates folder mutations per
/// account type and emits change events after each committing write.
pub struct MailCore {
    vault: Arc<DataVault>,
    factory: Arc<dyn MailboxFactory>,
    drivers: DashMap<String, MailboxInstance>,
    events: EventChannel,
    contacts: ContactEngine,
    op_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl MailCore {
    pub fn new(vault: Arc<DataVault>, factory: Arc<dyn MailboxFactory>) -> Arc<Self> {
        Arc::new(MailCore {
            contacts: ContactEngine::new(Arc::clone(&vault)),
            vault,
            factory,
            drivers: DashMap::new(),
            events: EventChannel::new(),
            op_locks: DashMap::new(),
        })
    }

    pub fn vault(&self) -> &Arc<DataVault> {
        &self.vault
    }

    pub fn subscribe(&self) -> tokio::sync::mpsc::UnboundedReceiver<MailEvent> {
        self.events.subscribe()
    }

    /// Serialize composite operations (write + contact derivation + event
    /// emission) per account, so events observe commit order.
    async fn lock_account(&self, address: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = self
            .op_locks
            .entry(normalize_address(address))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    pub(crate) async fn driver_for(
        &self,
        address: &str,
        token: &CancellationToken,
    ) -> MailVaultResult<MailboxInstance> {
        let key = normalize_address(address);
        if let Some(instance) = self.drivers.get(&key) {
            return Ok(instance.clone());
        }
        let account = self.vault.get_account(address, token).await?;
        let instance = self
            .factory
            .create(&account, Arc::clone(&self.vault), token)
            .await?;
        self.drivers.insert(key, instance.clone());
        Ok(instance)
    }

    // ---- accounts -------------------------------------------------------

    /// Create an account: validate the address for its type, let the driver
    /// report the folder tree and default inbox, persist, emit.
    pub async fn add_account(
        &self,
        mut account: AccountEntity,
        token: &CancellationToken,
    ) -> MailVaultResult<AccountEntity> {
        ensure_active(token)?;
        match account.kind {
            AccountKind::Classic | AccountKind::Proton => validate_email(&account.address)?,
            AccountKind::Decentralized => {
                let parsed = route::parse_dec_address(&account.address)?;
                account.network_tag = Some(parsed.network.clone());
                if account.derivation_index.is_none() {
                    let index = self
                        .vault
                        .next_account_index(&parsed.network, token)
                        .await?;
                    account.derivation_index = Some(index);
                }
            }
        }
        let _guard = self.lock_account(&account.address).await;
        let instance = self
            .factory
            .create(&account, Arc::clone(&self.vault), token)
            .await?;
        let driver = instance.driver();
        let folders = driver.folders(token).await?;
        if account.default_inbox_path.is_none() {
            account.default_inbox_path = Some(driver.default_inbox(token).await?.path);
        }
        let added = self.vault.add_account(account, folders, token).await?;
        self.drivers
            .insert(normalize_address(&added.address), instance);
        self.events.emit(MailEvent::AccountAdded {
            address: added.address.clone(),
        });
        Ok(added)
    }

    /// Update account attributes. A missing account stays a silent no-op
    /// and emits nothing.
    pub async fn update_account(
        &self,
        account: AccountEntity,
        token: &CancellationToken,
    ) -> MailVaultResult<()> {
        let _guard = self.lock_account(&account.address).await;
        if !self.vault.account_exists(&account.address, token).await? {
            return Ok(());
        }
        let address = account.address.clone();
        self.vault.update_account(account, token).await?;
        self.events.emit(MailEvent::AccountUpdated { address });
        Ok(())
    }

    pub async fn delete_account(
        &self,
        address: &str,
        token: &CancellationToken,
    ) -> MailVaultResult<()> {
        let _guard = self.lock_account(address).await;
        self.vault.delete_account_by_address(address, token).await?;
        self.drivers.remove(&normalize_address(address));
        self.events.emit(MailEvent::AccountDeleted {
            address: address.to_string(),
        });
        Ok(())
    }

    pub async fn account(
        &self,
        address: &str,
        token: &CancellationToken,
    ) -> MailVaultResult<AccountEntity> {
        self.vault.get_account(address, token).await
    }

    pub async fn accounts(&self, token: &CancellationToken) -> MailVaultResult<Vec<AccountEntity>> {
        self.vault.accounts(token).await
    }

    // ---- folders --------------------------------------------------------

    fn ensure_folder_mutation_supported(account: &AccountEntity) -> MailVaultResult<()> {
        match account.kind {
            AccountKind::Classic => Ok(()),
            AccountKind::Proton | AccountKind::Decentralized => Err(raise_error!(
                format!("{:?} accounts do not support folder changes", account.kind),
                ErrorKind::NotSupported
            )),
        }
    }

    pub async fn create_folder(
        &self,
        address: &str,
        path: &str,
        token: &CancellationToken,
    ) -> MailVaultResult<FolderEntity> {
        ensure_active(token)?;
        if path.is_empty() {
            return Err(raise_error!(
                "Folder name cannot be empty".into(),
                ErrorKind::InvalidArgument
            ));
        }
        let _guard = self.lock_account(address).await;
        let account = self.vault.get_account(address, token).await?;
        Self::ensure_folder_mutation_supported(&account)?;
        let instance = self.driver_for(address, token).await?;
        let spec = instance.driver().create_folder(path, token).await?;
        let folder = self.vault.add_folder(account.id, spec, token).await?;
        self.events.emit(MailEvent::FolderCreated {
            account_address: account.address,
            path: folder.path.clone(),
        });
        Ok(folder)
    }

    pub async fn rename_folder(
        &self,
        address: &str,
        old_path: &str,
        new_path: &str,
        token: &CancellationToken,
    ) -> MailVaultResult<()> {
        ensure_active(token)?;
        if old_path.is_empty() || new_path.is_empty() {
            return Err(raise_error!(
                "Folder name cannot be empty".into(),
                ErrorKind::InvalidArgument
            ));
        }
        if old_path == new_path {
            return Err(raise_error!(
                "Folder is already named that".into(),
                ErrorKind::InvalidOperation
            ));
        }
        let _guard = self.lock_account(address).await;
        let account = self.vault.get_account(address, token).await?;
        Self::ensure_folder_mutation_supported(&account)?;
        if let Some(folder) = self.vault.find_folder(account.id, old_path, token).await? {
            if folder.roles.is_special() {
                return Err(raise_error!(
                    format!("Folder '{}' cannot be renamed", folder.path),
                    ErrorKind::InvalidOperation
                ));
            }
        }
        let instance = self.driver_for(address, token).await?;
        instance
            .driver()
            .rename_folder(old_path, new_path, token)
            .await?;
        self.vault
            .update_folder_path(account.id, old_path, new_path, token)
            .await?;
        self.events.emit(MailEvent::FolderRenamed {
            account_address: account.address,
            old_path: old_path.to_string(),
            new_path: new_path.to_string(),
        });
        Ok(())
    }

    pub async fn delete_folder(
        &self,
        address: &str,
        path: &str,
        token: &CancellationToken,
    ) -> MailVaultResult<()> {
        ensure_active(token)?;
        let _guard = self.lock_account(address).await;
        let account = self.vault.get_account(address, token).await?;
        Self::ensure_folder_mutation_supported(&account)?;
        let folder = self
            .vault
            .find_folder(account.id, path, token)
            .await?
            .ok_or_else(|| {
                raise_error!(format!("Folder '{}' not found", path), ErrorKind::NotFound)
            })?;
        if folder.roles.is_special() {
            return Err(raise_error!(
                format!("Folder '{}' cannot be deleted", folder.path),
                ErrorKind::InvalidOperation
            ));
        }
        let instance = self.driver_for(address, token).await?;
        instance.driver().delete_folder(path, token).await?;
        self.vault.delete_folder(account.id, path, token).await?;
        self.events.emit(MailEvent::FolderDeleted {
            account_address: account.address,
            path: folder.path,
        });
        Ok(())
    }

    async fn resolve_folder(
        &self,
        account: &AccountEntity,
        path: &str,
        token: &CancellationToken,
    ) -> MailVaultResult<FolderEntity> {
        self.vault
            .find_folder(account.id, path, token)
            .await?
            .ok_or_else(|| {
                raise_error!(format!("Folder '{}' not found", path), ErrorKind::NotFound)
            })
    }

    async fn inbox_folder(
        &self,
        account: &AccountEntity,
        token: &CancellationToken,
    ) -> MailVaultResult<FolderEntity> {
        if let Some(path) = &account.default_inbox_path {
            if let Some(folder) = self.vault.find_folder(account.id, path, token).await? {
                return Ok(folder);
            }
        }
        let folders = self.vault.folders(account.id, token).await?;
        folders
            .into_iter()
            .find(|f| f.roles.contains(FolderRoles::INBOX))
            .ok_or_else(|| {
                raise_error!(
                    format!("Account '{}' has no inbox", account.address),
                    ErrorKind::NotFound
                )
            })
    }

    // ---- messages -------------------------------------------------------

    /// Persist an incoming batch and run contact derivation in the same
    /// per-account logical transaction; events go out after commit.
    pub async fn add_messages(
        &self,
        address: &str,
        folder_path: &str,
        messages: Vec<MessageEntity>,
        token: &CancellationToken,
    ) -> MailVaultResult<Vec<MessageEntity>> {
        let _guard = self.lock_account(address).await;
        let account = self.vault.get_account(address, token).await?;
        let folder = self.resolve_folder(&account, folder_path, token).await?;
        let outcome = self
            .vault
            .add_messages(folder.id, messages, true, token)
            .await?;
        let contact_events = self
            .contacts
            .on_messages_added(&account.address, &folder, &outcome.added, token)
            .await?;
        self.events.emit_all(contact_events);
        Ok(outcome.added)
    }

    /// Replace a stored message body/flags, keeping its primary key.
    pub async fn replace_message(
        &self,
        address: &str,
        message: MessageEntity,
        token: &CancellationToken,
    ) -> MailVaultResult<()> {
        let _guard = self.lock_account(address).await;
        self.vault.update_message(message, true, token).await
    }

    pub async fn delete_messages(
        &self,
        address: &str,
        folder_path: &str,
        external_ids: Vec<u32>,
        token: &CancellationToken,
    ) -> MailVaultResult<usize> {
        let _guard = self.lock_account(address).await;
        let account = self.vault.get_account(address, token).await?;
        let folder = self.resolve_folder(&account, folder_path, token).await?;
        let mut doomed = Vec::new();
        for external_id in &external_ids {
            if let Some(message) = self.vault.find_message(folder.id, *external_id, token).await? {
                doomed.push(message);
            }
        }
        let removed = self
            .vault
            .delete_messages(folder.id, external_ids, true, token)
            .await?;
        let contact_events = self
            .contacts
            .on_messages_deleted(&folder, &doomed, token)
            .await?;
        self.events.emit_all(contact_events);
        Ok(removed)
    }

    pub async fn move_messages(
        &self,
        address: &str,
        source_path: &str,
        target_path: &str,
        external_ids: Vec<u32>,
        token: &CancellationToken,
    ) -> MailVaultResult<()> {
        let _guard = self.lock_account(address).await;
        let account = self.vault.get_account(address, token).await?;
        let source = self.resolve_folder(&account, source_path, token).await?;
        let target = self.resolve_folder(&account, target_path, token).await?;
        let instance = self.driver_for(address, token).await?;
        let driver = instance.driver();
        driver
            .move_messages(source_path, target_path, &external_ids, token)
            .await?;
        if !driver.writes_local_store() {
            self.vault
                .move_messages(source.id, target.id, external_ids, true, token)
                .await?;
        }
        Ok(())
    }

    pub async fn send_message(
        &self,
        address: &str,
        message: &MessageEntity,
        token: &CancellationToken,
    ) -> MailVaultResult<()> {
        let instance = self.driver_for(address, token).await?;
        instance.driver().send_message(message, token).await
    }

    /// Pull a page of history older than the oldest locally stored
    /// message. Folder counters stay imported when the driver maintains
    /// them remotely.
    pub async fn receive_earlier(
        &self,
        address: &str,
        folder_path: &str,
        count: usize,
        token: &CancellationToken,
    ) -> MailVaultResult<Vec<MessageEntity>> {
        let _guard = self.lock_account(address).await;
        let account = self.vault.get_account(address, token).await?;
        let folder = self.resolve_folder(&account, folder_path, token).await?;
        let local = self.vault.list_messages(folder.id, token).await?;
        let oldest = local.last().map(|m| m.external_id);
        let instance = self.driver_for(address, token).await?;
        let driver = instance.driver();
        let fetched = driver
            .messages_before(&folder.path, oldest, count, token)
            .await?;
        let added = if driver.writes_local_store() {
            fetched
        } else {
            let adjust_counters = !driver.has_folder_counters();
            self.vault
                .add_messages(folder.id, fetched, adjust_counters, token)
                .await?
                .added
        };
        let contact_events = self
            .contacts
            .on_messages_added(&account.address, &folder, &added, token)
            .await?;
        self.events.emit_all(contact_events);
        Ok(added)
    }

    /// Fetch and persist new arrivals for the account's default inbox.
    pub async fn receive_new(
        &self,
        address: &str,
        token: &CancellationToken,
    ) -> MailVaultResult<Vec<MessageEntity>> {
        let _guard = self.lock_account(address).await;
        let account = self.vault.get_account(address, token).await?;
        let inbox = self.inbox_folder(&account, token).await?;
        let newest = self
            .vault
            .latest_message(inbox.id, token)
            .await?
            .map(|m| m.external_id);
        let instance = self.driver_for(address, token).await?;
        let driver = instance.driver();
        let fetched = driver.receive_new(&inbox.path, newest, token).await?;
        let added = if driver.writes_local_store() {
            fetched
        } else {
            let adjust_counters = !driver.has_folder_counters();
            self.vault
                .add_messages(inbox.id, fetched, adjust_counters, token)
                .await?
                .added
        };
        let contact_events = self
            .contacts
            .on_messages_added(&account.address, &inbox, &added, token)
            .await?;
        self.events.emit_all(contact_events);
        Ok(added)
    }

    /// Reconcile one folder's bounded local slice against the driver.
    pub async fn synchronize_folder(
        &self,
        address: &str,
        folder_path: &str,
        page_size: usize,
        token: &CancellationToken,
    ) -> MailVaultResult<SyncOutcome> {
        let _guard = self.lock_account(address).await;
        let account = self.vault.get_account(address, token).await?;
        let folder = self.resolve_folder(&account, folder_path, token).await?;
        let mut local = self.vault.list_messages(folder.id, token).await?;
        local.sort_by_key(|m| (m.date, m.id));
        let oldest = local.first().cloned();
        let newest = local.last().cloned();
        let instance = self.driver_for(address, token).await?;
        sync::synchronize_folder(
            &self.vault,
            instance.driver().as_ref(),
            &folder,
            oldest.as_ref(),
            newest.as_ref(),
            page_size,
            token,
        )
        .await
    }

    // ---- drafts ---------------------------------------------------------

    async fn drafts_folder(
        &self,
        account: &AccountEntity,
        token: &CancellationToken,
    ) -> MailVaultResult<FolderEntity> {
        let folders = self.vault.folders(account.id, token).await?;
        folders
            .into_iter()
            .find(|f| f.roles.contains(FolderRoles::DRAFTS))
            .ok_or_else(|| {
                raise_error!(
                    format!("Account '{}' has no drafts folder", account.address),
                    ErrorKind::NotFound
                )
            })
    }

    /// Append a draft; returns the external id it was stored under.
    pub async fn set_draft(
        &self,
        address: &str,
        message: &MessageEntity,
        token: &CancellationToken,
    ) -> MailVaultResult<u32> {
        let _guard = self.lock_account(address).await;
        let account = self.vault.get_account(address, token).await?;
        let drafts = self.drafts_folder(&account, token).await?;
        let instance = self.driver_for(address, token).await?;
        let driver = instance.driver();
        let external_id = driver.append_draft(&drafts.path, message, token).await?;
        if !driver.writes_local_store() {
            let mut copy = message.clone();
            copy.id = 0;
            copy.external_id = external_id;
            copy.read = true;
            self.vault.add_message(drafts.id, copy, true, token).await?;
        }
        Ok(external_id)
    }

    /// Swap a stored draft for a new body; returns the new external id.
    pub async fn replace_draft(
        &self,
        address: &str,
        external_id: u32,
        message: &MessageEntity,
        token: &CancellationToken,
    ) -> MailVaultResult<u32> {
        let _guard = self.lock_account(address).await;
        let account = self.vault.get_account(address, token).await?;
        let drafts = self.drafts_folder(&account, token).await?;
        let instance = self.driver_for(address, token).await?;
        let driver = instance.driver();
        let new_external_id = driver
            .replace_draft(&drafts.path, external_id, message, token)
            .await?;
        if !driver.writes_local_store() {
            self.vault
                .delete_messages(drafts.id, vec![external_id], true, token)
                .await?;
            let mut copy = message.clone();
            copy.id = 0;
            copy.external_id = new_external_id;
            copy.read = true;
            self.vault.add_message(drafts.id, copy, true, token).await?;
        }
        Ok(new_external_id)
    }

    // ---- contacts -------------------------------------------------------

    pub async fn set_contact_name(
        &self,
        address: &str,
        display_name: &str,
        token: &CancellationToken,
    ) -> MailVaultResult<()> {
        let mut contact = self.vault.get_contact(address, token).await?;
        contact.display_name = display_name.to_string();
        let contact_address = contact.address.clone();
        self.vault.update_contact(contact, token).await?;
        self.events.emit(MailEvent::ContactChanged {
            address: contact_address,
        });
        Ok(())
    }

    pub async fn set_contact_avatar(
        &self,
        address: &str,
        avatar: Avatar,
        token: &CancellationToken,
    ) -> MailVaultResult<()> {
        self.vault.set_contact_avatar(address, avatar, token).await?;
        self.events.emit(MailEvent::ContactChanged {
            address: address.to_string(),
        });
        Ok(())
    }

    pub async fn remove_contact_avatar(
        &self,
        address: &str,
        token: &CancellationToken,
    ) -> MailVaultResult<()> {
        self.vault.remove_contact_avatar(address, token).await?;
        self.events.emit(MailEvent::ContactChanged {
            address: address.to_string(),
        });
        Ok(())
    }

    pub async fn remove_contact(
        &self,
        address: &str,
        token: &CancellationToken,
    ) -> MailVaultResult<()> {
        self.vault.remove_contact(address, token).await?;
        self.events.emit(MailEvent::ContactDeleted {
            address: address.to_string(),
        });
        Ok(())
    }

    // ---- decentralized names -------------------------------------------

    /// Claim a display name for a decentralized account; returns the
    /// canonical name on success, an empty string when the resolver holds
    /// it for someone else.
    pub async fn claim_name(
        &self,
        address: &str,
        name: &str,
        token: &CancellationToken,
    ) -> MailVaultResult<String> {
        let instance = self.driver_for(address, token).await?;
        let mailbox = instance.decentralized().ok_or_else(|| {
            raise_error!(
                format!("Account '{}' does not support name claims", address),
                ErrorKind::NotSupported
            )
        })?;
        let claimed = mailbox.claim_name(name, token).await?;
        if !claimed.is_empty() {
            info!("Claimed name '{}' for {}", claimed, address);
        }
        Ok(claimed)
    }

    /// Resolve a claimed name to a decentralized address.
    pub async fn address_by_name(
        &self,
        address: &str,
        name: &str,
        token: &CancellationToken,
    ) -> MailVaultResult<String> {
        let instance = self.driver_for(address, token).await?;
        let mailbox = instance.decentralized().ok_or_else(|| {
            raise_error!(
                format!("Account '{}' does not support name lookup", address),
                ErrorKind::NotSupported
            )
        })?;
        mailbox.resolve_address(name, token).await
    }
}
