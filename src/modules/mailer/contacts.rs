use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::modules::common::normalize_address;
use crate::modules::error::MailVaultResult;
use crate::modules::mailer::events::MailEvent;
use crate::modules::store::address::MessageAddressEntity;
use crate::modules::store::contact::{ContactEntity, LastMessageRef};
use crate::modules::store::folder::FolderEntity;
use crate::modules::store::message::MessageEntity;
use crate::modules::store::vault::DataVault;

/// Derives contacts from message traffic.
///
/// Runs under the orchestrator's per-account lock right after the store
/// write and reports the events to emit; messages in junk, trash,
/// important or all folders contribute nothing.
pub struct ContactEngine {
    vault: Arc<DataVault>,
}

struct AddressActivity {
    display_address: String,
    best: LastMessageRef,
    unread: u32,
}

impl ContactEngine {
    pub fn new(vault: Arc<DataVault>) -> Self {
        ContactEngine { vault }
    }

    fn collect_activity(
        account_address: &str,
        messages: &[MessageEntity],
    ) -> BTreeMap<String, AddressActivity> {
        let mut activity: BTreeMap<String, AddressActivity> = BTreeMap::new();
        for message in messages {
            let pointer = LastMessageRef {
                account_address: account_address.to_string(),
                message_id: message.id,
                date: message.date,
            };
            for addr in message
                .from
                .iter()
                .chain(&message.to)
                .chain(&message.cc)
                .chain(&message.bcc)
            {
                if addr.address.is_empty() {
                    continue;
                }
                let key = normalize_address(&addr.address);
                let entry = activity.entry(key).or_insert_with(|| AddressActivity {
                    display_address: addr.address.clone(),
                    best: pointer.clone(),
                    unread: 0,
                });
                if pointer.is_newer_than(&entry.best) {
                    entry.best = pointer.clone();
                }
            }
            if !message.read {
                for key in MessageAddressEntity::participants(message) {
                    if let Some(entry) = activity.get_mut(&key) {
                        entry.unread += 1;
                    }
                }
            }
        }
        activity
    }

    /// React to a committed batch insert. New addresses become contacts
    /// with an empty display name (one `ContactAdded` per address per
    /// batch); existing contacts take the pointer only when the new
    /// message is strictly newer.
    pub async fn on_messages_added(
        &self,
        account_address: &str,
        folder: &FolderEntity,
        messages: &[MessageEntity],
        token: &CancellationToken,
    ) -> MailVaultResult<Vec<MailEvent>> {
        if !folder.roles.is_contact_eligible() || messages.is_empty() {
            return Ok(Vec::new());
        }
        let mut events = Vec::new();
        for (key, activity) in Self::collect_activity(account_address, messages) {
            match self.vault.find_contact(&key, token).await? {
                None => {
                    let mut contact = ContactEntity::new(&activity.display_address, "");
                    contact.last_message = Some(activity.best);
                    // The store's auto-counter only covers pre-existing
                    // contacts; this batch's unread weight seeds the row.
                    contact.unread_count = activity.unread;
                    if self.vault.try_add_contact(contact, token).await? {
                        events.push(MailEvent::ContactAdded {
                            address: activity.display_address,
                        });
                    }
                }
                Some(existing) => {
                    let newer = existing
                        .last_message
                        .as_ref()
                        .map_or(true, |current| activity.best.is_newer_than(current));
                    if newer {
                        let mut updated = existing;
                        updated.last_message = Some(activity.best);
                        self.vault.update_contact(updated, token).await?;
                        events.push(MailEvent::ContactChanged {
                            address: activity.display_address,
                        });
                    }
                }
            }
        }
        Ok(events)
    }

    /// React to a committed delete: when a contact's pointer referenced a
    /// removed message, repoint it at the newest surviving eligible
    /// message. Unread counters were already adjusted by the store.
    pub async fn on_messages_deleted(
        &self,
        folder: &FolderEntity,
        deleted: &[MessageEntity],
        token: &CancellationToken,
    ) -> MailVaultResult<Vec<MailEvent>> {
        if !folder.roles.is_contact_eligible() || deleted.is_empty() {
            return Ok(Vec::new());
        }
        let deleted_ids: Vec<u64> = deleted.iter().map(|m| m.id).collect();
        let mut touched: BTreeMap<String, String> = BTreeMap::new();
        for message in deleted {
            for key in MessageAddressEntity::participants(message) {
                touched.entry(key.clone()).or_insert(key);
            }
        }
        let mut events = Vec::new();
        for key in touched.into_keys() {
            let Some(contact) = self.vault.find_contact(&key, token).await? else {
                continue;
            };
            let pointed_at_deleted = contact
                .last_message
                .as_ref()
                .is_some_and(|lm| deleted_ids.contains(&lm.message_id));
            if !pointed_at_deleted {
                continue;
            }
            let survivors = self.vault.messages_for_address(&key, token).await?;
            let mut best: Option<LastMessageRef> = None;
            for message in survivors {
                let message_folder = self.vault.folder_by_id(message.folder_id, token).await?;
                if !message_folder.roles.is_contact_eligible() {
                    continue;
                }
                let account = self.vault.account_by_id(message.account_id, token).await?;
                let candidate = LastMessageRef {
                    account_address: account.address,
                    message_id: message.id,
                    date: message.date,
                };
                if best.as_ref().map_or(true, |b| candidate.is_newer_than(b)) {
                    best = Some(candidate);
                }
            }
            let mut updated = contact.clone();
            updated.last_message = best;
            self.vault.update_contact(updated, token).await?;
            events.push(MailEvent::ContactChanged {
                address: contact.address,
            });
        }
        Ok(events)
    }
}
