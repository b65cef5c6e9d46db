use std::cmp::Reverse;
use std::collections::BTreeMap;

use native_db::transaction::RwTransaction;
use native_db::*;
use native_model::{native_model, Model};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::modules::common::{ensure_active, Addr};
use crate::modules::error::kind::ErrorKind;
use crate::modules::error::MailVaultResult;
use crate::modules::store::address::{MessageAddressEntity, MessageAddressEntityKey};
use crate::modules::store::contact::{ContactEntity, ContactEntityKey};
use crate::modules::store::folder::{folder_in_tx, FolderEntity};
use crate::modules::store::vault::DataVault;
use crate::modules::store::{
    filter_by_secondary_key_impl, scan_secondary_in_tx, secondary_find_impl, with_transaction,
};
use crate::modules::utils::message_slot_hash;
use crate::{id, raise_error};

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct Attachment {
    pub file_name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub enum ProtectionKind {
    #[default]
    None,
    Signed,
    Encrypted,
    SignedAndEncrypted,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct SignatureInfo {
    pub signer: String,
    pub created_at: i64,
    pub verified: bool,
}

/// Cryptographic state of a stored message.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct Protection {
    pub kind: ProtectionKind,
    pub signatures: Vec<SignatureInfo>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[native_model(id = 4, version = 1)]
#[native_db(
    primary_key(pk -> String),
    secondary_key(slot -> u64, unique)
)]
pub struct MessageEntity {
    /// Surrogate primary key; stable across external-id changes.
    #[secondary_key(unique)]
    pub id: u64,
    #[secondary_key]
    pub folder_id: u64,
    #[secondary_key]
    pub account_id: u64,
    /// Owning folder path, denormalized for path-based queries during
    /// rename.
    pub folder_path: String,
    /// Driver-side identifier, unique within the folder.
    pub external_id: u32,
    pub date: i64,
    pub subject: String,
    pub preview: String,
    pub text_body: String,
    pub html_body: String,
    pub read: bool,
    pub flagged: bool,
    pub decentralized: bool,
    pub from: Vec<Addr>,
    pub to: Vec<Addr>,
    pub cc: Vec<Addr>,
    pub bcc: Vec<Addr>,
    pub reply_to: Vec<Addr>,
    pub attachments: Vec<Attachment>,
    pub protection: Protection,
}

impl MessageEntity {
    fn pk(&self) -> String {
        format!("{:020}", self.id)
    }

    fn slot(&self) -> u64 {
        message_slot_hash(self.folder_id, self.external_id)
    }
}

/// Result of a batch insert: rows that made it in, rows dropped by the
/// duplicate rule.
#[derive(Debug, Default)]
pub struct BatchAddOutcome {
    pub added: Vec<MessageEntity>,
    pub skipped: usize,
}

fn chrono_key(m: &MessageEntity) -> (Reverse<i64>, Reverse<u64>, u64) {
    (Reverse(m.date), Reverse(m.id), m.folder_id)
}

fn apply_contact_deltas(
    rw: &RwTransaction,
    deltas: &BTreeMap<String, i64>,
) -> MailVaultResult<()> {
    for (address, delta) in deltas {
        if *delta == 0 {
            continue;
        }
        let contact: Option<ContactEntity> = rw
            .get()
            .secondary(ContactEntityKey::address_key, address.clone())
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
        if let Some(contact) = contact {
            let mut updated = contact.clone();
            updated.unread_count = (updated.unread_count as i64 + delta).max(0) as u32;
            rw.update(contact, updated)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
        }
    }
    Ok(())
}

fn remove_address_rows(rw: &RwTransaction, message_id: u64) -> MailVaultResult<()> {
    let rows: Vec<MessageAddressEntity> =
        scan_secondary_in_tx(rw, MessageAddressEntityKey::message_id, message_id)?;
    for row in rows {
        rw.remove(row)
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
    }
    Ok(())
}

fn insert_address_rows(
    rw: &RwTransaction,
    message: &MessageEntity,
    folder: &FolderEntity,
) -> MailVaultResult<()> {
    for row in MessageAddressEntity::extract(message, folder.roles) {
        rw.insert(row)
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
    }
    Ok(())
}

impl DataVault {
    /// Insert one message; see [`DataVault::add_messages`] for the batch
    /// contract.
    pub async fn add_message(
        &self,
        folder_id: u64,
        message: MessageEntity,
        update_unread_and_total: bool,
        token: &CancellationToken,
    ) -> MailVaultResult<Option<MessageEntity>> {
        let outcome = self
            .add_messages(folder_id, vec![message], update_unread_and_total, token)
            .await?;
        Ok(outcome.added.into_iter().next())
    }

    /// Insert a batch into one folder atomically.
    ///
    /// Rows colliding on `(folder, external id)` are silently dropped and
    /// never overwrite the stored fields. Surviving rows bump the folder's
    /// local counter; total/unread move only when
    /// `update_unread_and_total` is set. Unread messages in
    /// contact-eligible folders bump the stored unread counter of every
    /// participating contact that already exists.
    pub async fn add_messages(
        &self,
        folder_id: u64,
        messages: Vec<MessageEntity>,
        update_unread_and_total: bool,
        token: &CancellationToken,
    ) -> MailVaultResult<BatchAddOutcome> {
        ensure_active(token)?;
        let session = self.session()?;
        let folder = self.folder_by_id(folder_id, token).await?;
        let lock = self.account_lock(folder.account_id);
        let _guard = lock.lock().await;
        with_transaction(&session.db, move |rw| {
            let folder = folder_in_tx(rw, folder_id)?;
            let mut outcome = BatchAddOutcome::default();
            let mut unread_added: u32 = 0;
            let mut contact_deltas: BTreeMap<String, i64> = BTreeMap::new();
            for mut message in messages {
                message.folder_id = folder.id;
                message.account_id = folder.account_id;
                message.folder_path = folder.path.clone();
                let existing: Option<MessageEntity> = rw
                    .get()
                    .secondary(MessageEntityKey::slot, message.slot())
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
                if existing.is_some() {
                    outcome.skipped += 1;
                    continue;
                }
                if message.id == 0 {
                    message.id = id!(64);
                }
                rw.insert(message.clone())
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
                insert_address_rows(rw, &message, &folder)?;
                if !message.read {
                    unread_added += 1;
                    if folder.roles.is_contact_eligible() {
                        for address in MessageAddressEntity::participants(&message) {
                            *contact_deltas.entry(address).or_default() += 1;
                        }
                    }
                }
                outcome.added.push(message);
            }
            let mut updated_folder = folder.clone();
            updated_folder.local_count += outcome.added.len() as u32;
            if update_unread_and_total {
                updated_folder.total_count += outcome.added.len() as u32;
                updated_folder.unread_count += unread_added;
            }
            rw.update(folder, updated_folder)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
            apply_contact_deltas(rw, &contact_deltas)?;
            Ok(outcome)
        })
        .await
    }

    /// Update one stored message in place. The primary key is preserved
    /// even when the external id changes; the folder total never moves on
    /// update.
    pub async fn update_message(
        &self,
        message: MessageEntity,
        update_unread_and_total: bool,
        token: &CancellationToken,
    ) -> MailVaultResult<()> {
        self.update_messages(vec![message], update_unread_and_total, token)
            .await
    }

    pub async fn update_messages(
        &self,
        messages: Vec<MessageEntity>,
        update_unread_and_total: bool,
        token: &CancellationToken,
    ) -> MailVaultResult<()> {
        ensure_active(token)?;
        if messages.is_empty() {
            return Ok(());
        }
        let session = self.session()?;
        let probe = self.message_by_id(messages[0].id, token).await?;
        let lock = self.account_lock(probe.account_id);
        let _guard = lock.lock().await;
        with_transaction(&session.db, move |rw| {
            let mut folder_unread_deltas: BTreeMap<u64, i64> = BTreeMap::new();
            let mut contact_deltas: BTreeMap<String, i64> = BTreeMap::new();
            for mut message in messages {
                let current: Option<MessageEntity> = rw
                    .get()
                    .secondary(MessageEntityKey::id, message.id)
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
                let current = current.ok_or_else(|| {
                    raise_error!(
                        format!("Message with id '{}' not found", message.id),
                        ErrorKind::NotFound
                    )
                })?;
                let folder = folder_in_tx(rw, current.folder_id)?;
                message.folder_id = current.folder_id;
                message.account_id = current.account_id;
                message.folder_path = current.folder_path.clone();
                if message.external_id != current.external_id {
                    let collision: Option<MessageEntity> = rw
                        .get()
                        .secondary(MessageEntityKey::slot, message.slot())
                        .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
                    if collision.is_some() {
                        return Err(raise_error!(
                            format!(
                                "External id '{}' is already taken in folder '{}'",
                                message.external_id, folder.path
                            ),
                            ErrorKind::Database
                        ));
                    }
                }
                let read_changed = message.read != current.read;
                if folder.roles.is_contact_eligible() {
                    for address in MessageAddressEntity::participants(&current) {
                        if !current.read {
                            *contact_deltas.entry(address).or_default() -= 1;
                        }
                    }
                    for address in MessageAddressEntity::participants(&message) {
                        if !message.read {
                            *contact_deltas.entry(address).or_default() += 1;
                        }
                    }
                }
                remove_address_rows(rw, current.id)?;
                insert_address_rows(rw, &message, &folder)?;
                rw.update(current.clone(), message.clone())
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
                if update_unread_and_total && read_changed {
                    *folder_unread_deltas.entry(folder.id).or_default() +=
                        if message.read { -1 } else { 1 };
                }
            }
            for (folder_id, delta) in folder_unread_deltas {
                let folder = folder_in_tx(rw, folder_id)?;
                let mut updated = folder.clone();
                updated.unread_count = (updated.unread_count as i64 + delta).max(0) as u32;
                rw.update(folder, updated)
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
            }
            apply_contact_deltas(rw, &contact_deltas)?;
            Ok(())
        })
        .await
    }

    /// Flip read/flagged state on a set of messages in one folder. Unknown
    /// external ids are skipped; the folder total is never touched.
    pub async fn update_flags(
        &self,
        folder_id: u64,
        external_ids: Vec<u32>,
        read: Option<bool>,
        flagged: Option<bool>,
        update_unread_and_total: bool,
        token: &CancellationToken,
    ) -> MailVaultResult<()> {
        ensure_active(token)?;
        let session = self.session()?;
        let folder = self.folder_by_id(folder_id, token).await?;
        let lock = self.account_lock(folder.account_id);
        let _guard = lock.lock().await;
        with_transaction(&session.db, move |rw| {
            let folder = folder_in_tx(rw, folder_id)?;
            let mut unread_delta: i64 = 0;
            let mut contact_deltas: BTreeMap<String, i64> = BTreeMap::new();
            for external_id in external_ids {
                let current: Option<MessageEntity> = rw
                    .get()
                    .secondary(
                        MessageEntityKey::slot,
                        message_slot_hash(folder_id, external_id),
                    )
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
                let Some(current) = current else {
                    continue;
                };
                let mut updated = current.clone();
                if let Some(read) = read {
                    updated.read = read;
                }
                if let Some(flagged) = flagged {
                    updated.flagged = flagged;
                }
                if updated == current {
                    continue;
                }
                let read_changed = updated.read != current.read;
                rw.update(current.clone(), updated.clone())
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
                if read_changed {
                    let rows: Vec<MessageAddressEntity> =
                        scan_secondary_in_tx(rw, MessageAddressEntityKey::message_id, current.id)?;
                    for row in rows {
                        let mut touched = row.clone();
                        touched.unread = !updated.read;
                        rw.update(row, touched)
                            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
                    }
                    unread_delta += if updated.read { -1 } else { 1 };
                    if folder.roles.is_contact_eligible() {
                        let delta = if updated.read { -1 } else { 1 };
                        for address in MessageAddressEntity::participants(&updated) {
                            *contact_deltas.entry(address).or_default() += delta;
                        }
                    }
                }
            }
            if update_unread_and_total && unread_delta != 0 {
                let mut updated = folder.clone();
                updated.unread_count = (updated.unread_count as i64 + unread_delta).max(0) as u32;
                rw.update(folder, updated)
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
            }
            apply_contact_deltas(rw, &contact_deltas)?;
            Ok(())
        })
        .await
    }

    pub async fn delete_message(
        &self,
        folder_id: u64,
        external_id: u32,
        update_unread_and_total: bool,
        token: &CancellationToken,
    ) -> MailVaultResult<usize> {
        self.delete_messages(folder_id, vec![external_id], update_unread_and_total, token)
            .await
    }

    /// Remove messages from one folder; returns how many rows went away.
    /// The local counter always drops; total/unread follow the flag.
    pub async fn delete_messages(
        &self,
        folder_id: u64,
        external_ids: Vec<u32>,
        update_unread_and_total: bool,
        token: &CancellationToken,
    ) -> MailVaultResult<usize> {
        ensure_active(token)?;
        let session = self.session()?;
        let folder = self.folder_by_id(folder_id, token).await?;
        let lock = self.account_lock(folder.account_id);
        let _guard = lock.lock().await;
        with_transaction(&session.db, move |rw| {
            let folder = folder_in_tx(rw, folder_id)?;
            let mut removed: u32 = 0;
            let mut unread_removed: u32 = 0;
            let mut contact_deltas: BTreeMap<String, i64> = BTreeMap::new();
            for external_id in external_ids {
                let current: Option<MessageEntity> = rw
                    .get()
                    .secondary(
                        MessageEntityKey::slot,
                        message_slot_hash(folder_id, external_id),
                    )
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
                let Some(current) = current else {
                    continue;
                };
                remove_address_rows(rw, current.id)?;
                if !current.read {
                    unread_removed += 1;
                    if folder.roles.is_contact_eligible() {
                        for address in MessageAddressEntity::participants(&current) {
                            *contact_deltas.entry(address).or_default() -= 1;
                        }
                    }
                }
                rw.remove(current)
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
                removed += 1;
            }
            let mut updated_folder = folder.clone();
            updated_folder.local_count = updated_folder.local_count.saturating_sub(removed);
            if update_unread_and_total {
                updated_folder.total_count = updated_folder.total_count.saturating_sub(removed);
                updated_folder.unread_count =
                    updated_folder.unread_count.saturating_sub(unread_removed);
            }
            rw.update(folder, updated_folder)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
            apply_contact_deltas(rw, &contact_deltas)?;
            Ok(removed as usize)
        })
        .await
    }

    /// Move messages to another folder of the same account, preserving
    /// primary keys and transferring counter weight.
    pub async fn move_messages(
        &self,
        source_folder_id: u64,
        target_folder_id: u64,
        external_ids: Vec<u32>,
        update_unread_and_total: bool,
        token: &CancellationToken,
    ) -> MailVaultResult<()> {
        ensure_active(token)?;
        let session = self.session()?;
        let source = self.folder_by_id(source_folder_id, token).await?;
        let target = self.folder_by_id(target_folder_id, token).await?;
        if source.account_id != target.account_id {
            return Err(raise_error!(
                "Messages can only move between folders of one account".into(),
                ErrorKind::InvalidOperation
            ));
        }
        let lock = self.account_lock(source.account_id);
        let _guard = lock.lock().await;
        with_transaction(&session.db, move |rw| {
            let source = folder_in_tx(rw, source_folder_id)?;
            let target = folder_in_tx(rw, target_folder_id)?;
            let mut moved: u32 = 0;
            let mut unread_moved: u32 = 0;
            let mut contact_deltas: BTreeMap<String, i64> = BTreeMap::new();
            for external_id in external_ids {
                let current: Option<MessageEntity> = rw
                    .get()
                    .secondary(
                        MessageEntityKey::slot,
                        message_slot_hash(source_folder_id, external_id),
                    )
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
                let Some(current) = current else {
                    continue;
                };
                let occupied: Option<MessageEntity> = rw
                    .get()
                    .secondary(
                        MessageEntityKey::slot,
                        message_slot_hash(target_folder_id, external_id),
                    )
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
                if occupied.is_some() {
                    continue;
                }
                let mut relocated = current.clone();
                relocated.folder_id = target.id;
                relocated.folder_path = target.path.clone();
                remove_address_rows(rw, current.id)?;
                insert_address_rows(rw, &relocated, &target)?;
                if !current.read {
                    unread_moved += 1;
                    let delta_out = source.roles.is_contact_eligible();
                    let delta_in = target.roles.is_contact_eligible();
                    if delta_out != delta_in {
                        let delta = if delta_in { 1 } else { -1 };
                        for address in MessageAddressEntity::participants(&current) {
                            *contact_deltas.entry(address).or_default() += delta;
                        }
                    }
                }
                rw.update(current, relocated)
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
                moved += 1;
            }
            let mut updated_source = source.clone();
            updated_source.local_count = updated_source.local_count.saturating_sub(moved);
            let mut updated_target = target.clone();
            updated_target.local_count += moved;
            if update_unread_and_total {
                updated_source.total_count = updated_source.total_count.saturating_sub(moved);
                updated_source.unread_count =
                    updated_source.unread_count.saturating_sub(unread_moved);
                updated_target.total_count += moved;
                updated_target.unread_count += unread_moved;
            }
            rw.update(source, updated_source)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
            rw.update(target, updated_target)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
            apply_contact_deltas(rw, &contact_deltas)?;
            Ok(())
        })
        .await
    }

    pub async fn message_exists(
        &self,
        folder_id: u64,
        external_id: u32,
        token: &CancellationToken,
    ) -> MailVaultResult<bool> {
        Ok(self
            .find_message(folder_id, external_id, token)
            .await?
            .is_some())
    }

    pub async fn find_message(
        &self,
        folder_id: u64,
        external_id: u32,
        token: &CancellationToken,
    ) -> MailVaultResult<Option<MessageEntity>> {
        ensure_active(token)?;
        let session = self.session()?;
        secondary_find_impl(
            &session.db,
            MessageEntityKey::slot,
            message_slot_hash(folder_id, external_id),
        )
        .await
    }

    pub async fn message_by_id(
        &self,
        message_id: u64,
        token: &CancellationToken,
    ) -> MailVaultResult<MessageEntity> {
        ensure_active(token)?;
        let session = self.session()?;
        let message: Option<MessageEntity> =
            secondary_find_impl(&session.db, MessageEntityKey::id, message_id).await?;
        message.ok_or_else(|| {
            raise_error!(
                format!("Message with id '{message_id}' not found"),
                ErrorKind::NotFound
            )
        })
    }

    /// Newest message of a folder by `(date, id)`.
    pub async fn latest_message(
        &self,
        folder_id: u64,
        token: &CancellationToken,
    ) -> MailVaultResult<Option<MessageEntity>> {
        let mut messages = self.list_messages(folder_id, token).await?;
        messages.sort_by_key(chrono_key);
        Ok(messages.into_iter().next())
    }

    /// Every locally stored message of a folder, descending by external id.
    pub async fn list_messages(
        &self,
        folder_id: u64,
        token: &CancellationToken,
    ) -> MailVaultResult<Vec<MessageEntity>> {
        ensure_active(token)?;
        let session = self.session()?;
        let mut messages: Vec<MessageEntity> =
            filter_by_secondary_key_impl(&session.db, MessageEntityKey::folder_id, folder_id)
                .await?;
        messages.sort_by_key(|m| Reverse(m.external_id));
        Ok(messages)
    }

    /// External-id range query. Endpoint order is irrelevant; the span
    /// covers `[min, max)` and rows come back descending by external id.
    pub async fn messages_in_range(
        &self,
        folder_id: u64,
        a: u32,
        b: u32,
        token: &CancellationToken,
    ) -> MailVaultResult<Vec<MessageEntity>> {
        let low = a.min(b);
        let high = a.max(b);
        let messages = self.list_messages(folder_id, token).await?;
        Ok(messages
            .into_iter()
            .filter(|m| m.external_id >= low && m.external_id < high)
            .collect())
    }

    /// Inclusive external-id span, used by the folder synchronizer to load
    /// the bounded local slice.
    pub(crate) async fn messages_in_id_span(
        &self,
        folder_id: u64,
        low: u32,
        high: u32,
        token: &CancellationToken,
    ) -> MailVaultResult<Vec<MessageEntity>> {
        let messages = self.list_messages(folder_id, token).await?;
        Ok(messages
            .into_iter()
            .filter(|m| m.external_id >= low && m.external_id <= high)
            .collect())
    }

    /// Page strictly earlier than `sentinel` in one folder, newest first.
    pub async fn messages_earlier(
        &self,
        folder_id: u64,
        sentinel: Option<&MessageEntity>,
        count: usize,
        token: &CancellationToken,
    ) -> MailVaultResult<Vec<MessageEntity>> {
        self.messages_earlier_across(&[folder_id], sentinel, count, token)
            .await
    }

    /// Merged page over several folders ordered by
    /// `(date desc, id desc, folder id asc)`, strictly after `sentinel`.
    pub async fn messages_earlier_across(
        &self,
        folder_ids: &[u64],
        sentinel: Option<&MessageEntity>,
        count: usize,
        token: &CancellationToken,
    ) -> MailVaultResult<Vec<MessageEntity>> {
        ensure_active(token)?;
        let mut merged = Vec::new();
        for folder_id in folder_ids {
            merged.extend(self.list_messages(*folder_id, token).await?);
        }
        merged.sort_by_key(chrono_key);
        let sentinel_key = sentinel.map(chrono_key);
        Ok(merged
            .into_iter()
            .filter(|m| match &sentinel_key {
                Some(key) => chrono_key(m) > *key,
                None => true,
            })
            .take(count)
            .collect())
    }

    /// Stored messages a given address participates in, via the address
    /// rows.
    pub async fn messages_for_address(
        &self,
        address: &str,
        token: &CancellationToken,
    ) -> MailVaultResult<Vec<MessageEntity>> {
        ensure_active(token)?;
        let session = self.session()?;
        let normalized = crate::modules::common::normalize_address(address);
        let rows: Vec<MessageAddressEntity> = filter_by_secondary_key_impl(
            &session.db,
            MessageAddressEntityKey::address,
            normalized.clone(),
        )
        .await?;
        let mut messages = Vec::new();
        for row in rows {
            if row.address != normalized {
                continue;
            }
            let message: Option<MessageEntity> =
                secondary_find_impl(&session.db, MessageEntityKey::id, row.message_id).await?;
            if let Some(message) = message {
                messages.push(message);
            }
        }
        Ok(messages)
    }

    /// Recount a folder's local and unread numbers from its rows; test and
    /// repair surface for the counter invariants.
    pub async fn recount_folder(
        &self,
        folder_id: u64,
        token: &CancellationToken,
    ) -> MailVaultResult<(u32, u32)> {
        let messages = self.list_messages(folder_id, token).await?;
        let local = messages.len() as u32;
        let unread = messages.iter().filter(|m| !m.read).count() as u32;
        Ok((local, unread))
    }
}
