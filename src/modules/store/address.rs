use std::collections::BTreeSet;

use native_db::*;
use native_model::{native_model, Model};
use serde::{Deserialize, Serialize};

use crate::modules::common::normalize_address;
use crate::modules::store::folder::FolderRoles;
use crate::modules::store::message::MessageEntity;

/// Denormalized address row: one per distinct participating address per
/// message. Powers address-based lookups and the unread-by-contact
/// aggregate without deserializing full messages.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[native_model(id = 5, version = 1)]
#[native_db(primary_key(pk -> String))]
pub struct MessageAddressEntity {
    /// Normalized address.
    #[secondary_key]
    pub address: String,
    #[secondary_key]
    pub message_id: u64,
    pub account_id: u64,
    pub folder_id: u64,
    /// Snapshot of the owning folder's roles at write time; rewritten on
    /// message moves.
    pub folder_roles: FolderRoles,
    pub unread: bool,
    pub date: i64,
}

impl MessageAddressEntity {
    fn pk(&self) -> String {
        format!("{}:{:020}", self.address, self.message_id)
    }

    /// Distinct participating addresses of a message, normalized.
    pub fn participants(message: &MessageEntity) -> BTreeSet<String> {
        message
            .from
            .iter()
            .chain(&message.to)
            .chain(&message.cc)
            .chain(&message.bcc)
            .filter(|a| !a.address.is_empty())
            .map(|a| normalize_address(&a.address))
            .collect()
    }

    /// One row per distinct participating address.
    pub fn extract(message: &MessageEntity, roles: FolderRoles) -> Vec<MessageAddressEntity> {
        Self::participants(message)
            .into_iter()
            .map(|address| MessageAddressEntity {
                address,
                message_id: message.id,
                account_id: message.account_id,
                folder_id: message.folder_id,
                folder_roles: roles,
                unread: !message.read,
                date: message.date,
            })
            .collect()
    }
}
