use native_db::*;
use native_model::{native_model, Model};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::modules::common::ensure_active;
use crate::modules::error::kind::ErrorKind;
use crate::modules::error::MailVaultResult;
use crate::modules::store::address::MessageAddressEntity;
use crate::modules::store::message::{MessageEntity, MessageEntityKey};
use crate::modules::store::vault::DataVault;
use crate::modules::store::{
    scan_secondary_in_tx, secondary_find_impl, with_transaction,
};
use crate::{id, raise_error};

/// Bitset of folder role flags.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct FolderRoles(pub u16);

impl FolderRoles {
    pub const INBOX: FolderRoles = FolderRoles(1);
    pub const SENT: FolderRoles = FolderRoles(1 << 1);
    pub const DRAFTS: FolderRoles = FolderRoles(1 << 2);
    pub const TRASH: FolderRoles = FolderRoles(1 << 3);
    pub const JUNK: FolderRoles = FolderRoles(1 << 4);
    pub const IMPORTANT: FolderRoles = FolderRoles(1 << 5);
    pub const ALL: FolderRoles = FolderRoles(1 << 6);
    pub const OTHER: FolderRoles = FolderRoles(1 << 7);

    pub fn contains(&self, role: FolderRoles) -> bool {
        self.0 & role.0 != 0
    }

    pub fn union(&self, role: FolderRoles) -> FolderRoles {
        FolderRoles(self.0 | role.0)
    }

    /// Special folders may never be deleted or renamed.
    pub fn is_special(&self) -> bool {
        const SPECIAL: u16 = 1 | (1 << 1) | (1 << 2) | (1 << 3) | (1 << 4) | (1 << 5) | (1 << 6);
        self.0 & SPECIAL != 0
    }

    /// Folders whose messages feed the contact engine.
    pub fn is_contact_eligible(&self) -> bool {
        const EXCLUDED: u16 = (1 << 3) | (1 << 4) | (1 << 5) | (1 << 6);
        self.0 & EXCLUDED == 0
    }

    /// Folders counted by the unread-by-contact aggregate.
    pub fn counts_toward_unread_map(&self) -> bool {
        const EXCLUDED: u16 = (1 << 2) | (1 << 3) | (1 << 4);
        self.0 & EXCLUDED == 0
    }
}

/// Uniqueness key of a folder within an account: case-insensitive path.
pub fn folder_path_key(account_id: u64, path: &str) -> String {
    format!("{}:{}", account_id, path.to_lowercase())
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[native_model(id = 3, version = 1)]
#[native_db(
    primary_key(pk -> String),
    secondary_key(path_key -> String, unique)
)]
pub struct FolderEntity {
    #[secondary_key(unique)]
    pub id: u64,
    #[secondary_key]
    pub account_id: u64,
    /// Full `/`-separated path, stored case preserved.
    pub path: String,
    pub roles: FolderRoles,
    /// Server-side message count.
    pub total_count: u32,
    /// Server-side unread count.
    pub unread_count: u32,
    /// Messages actually present in the local store. Derived, never imported.
    pub local_count: u32,
}

impl FolderEntity {
    fn pk(&self) -> String {
        format!("{:020}", self.id)
    }

    fn path_key(&self) -> String {
        folder_path_key(self.account_id, &self.path)
    }

    pub fn new(account_id: u64, path: &str, roles: FolderRoles) -> Self {
        FolderEntity {
            id: id!(64),
            account_id,
            path: path.into(),
            roles,
            total_count: 0,
            unread_count: 0,
            local_count: 0,
        }
    }
}

/// Folder shape accepted from drivers and account imports; the store owns
/// ids and the local counter.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct FolderSpec {
    pub path: String,
    pub roles: FolderRoles,
    pub total_count: u32,
    pub unread_count: u32,
}

impl FolderSpec {
    pub fn new(path: &str, roles: FolderRoles) -> Self {
        FolderSpec {
            path: path.into(),
            roles,
            total_count: 0,
            unread_count: 0,
        }
    }
}

/// Case-insensitive prefix match at an exact segment boundary.
///
/// Returns the byte offset of the suffix when `path` equals `base` or
/// continues it with a `/`. `PrefixSuffix` does not match base `Prefix`:
/// the character after the consumed prefix must be the separator. The
/// comparison is literal, so `_` and `%` only match themselves.
pub(crate) fn segment_prefix_offset(path: &str, base: &str) -> Option<usize> {
    let mut path_chars = path.char_indices();
    let mut base_chars = base.chars();
    loop {
        match base_chars.next() {
            None => {
                return match path_chars.next() {
                    None => Some(path.len()),
                    Some((idx, '/')) => Some(idx),
                    Some(_) => None,
                }
            }
            Some(b) => match path_chars.next() {
                Some((_, p)) if p.to_lowercase().eq(b.to_lowercase()) => continue,
                _ => return None,
            },
        }
    }
}

pub(crate) fn folder_in_tx(
    rw: &native_db::transaction::RwTransaction,
    folder_id: u64,
) -> MailVaultResult<FolderEntity> {
    let folder: Option<FolderEntity> = rw
        .get()
        .secondary(FolderEntityKey::id, folder_id)
        .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
    folder.ok_or_else(|| {
        raise_error!(
            format!("Folder with id '{folder_id}' not found"),
            ErrorKind::NotFound
        )
    })
}

/// Delete one folder row plus everything it owns; returns removed messages.
pub(crate) fn delete_folder_cascade_in_tx(
    rw: &native_db::transaction::RwTransaction,
    folder: &FolderEntity,
) -> MailVaultResult<Vec<MessageEntity>> {
    let messages: Vec<MessageEntity> =
        scan_secondary_in_tx(rw, MessageEntityKey::folder_id, folder.id)?;
    for message in &messages {
        let rows: Vec<MessageAddressEntity> = scan_secondary_in_tx(
            rw,
            crate::modules::store::address::MessageAddressEntityKey::message_id,
            message.id,
        )?;
        for row in rows {
            rw.remove(row)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
        }
        rw.remove(message.clone())
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
    }
    rw.remove(folder.clone())
        .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
    Ok(messages)
}

impl DataVault {
    pub async fn folders(
        &self,
        account_id: u64,
        token: &CancellationToken,
    ) -> MailVaultResult<Vec<FolderEntity>> {
        ensure_active(token)?;
        let session = self.session()?;
        crate::modules::store::filter_by_secondary_key_impl(
            &session.db,
            FolderEntityKey::account_id,
            account_id,
        )
        .await
    }

    pub async fn find_folder(
        &self,
        account_id: u64,
        path: &str,
        token: &CancellationToken,
    ) -> MailVaultResult<Option<FolderEntity>> {
        ensure_active(token)?;
        let session = self.session()?;
        secondary_find_impl(
            &session.db,
            FolderEntityKey::path_key,
            folder_path_key(account_id, path),
        )
        .await
    }

    pub async fn folder_by_id(
        &self,
        folder_id: u64,
        token: &CancellationToken,
    ) -> MailVaultResult<FolderEntity> {
        ensure_active(token)?;
        let session = self.session()?;
        let folder: Option<FolderEntity> =
            secondary_find_impl(&session.db, FolderEntityKey::id, folder_id).await?;
        folder.ok_or_else(|| {
            raise_error!(
                format!("Folder with id '{folder_id}' not found"),
                ErrorKind::NotFound
            )
        })
    }

    /// Add one folder to an account. The local counter starts at zero no
    /// matter what the caller supplies.
    pub async fn add_folder(
        &self,
        account_id: u64,
        spec: FolderSpec,
        token: &CancellationToken,
    ) -> MailVaultResult<FolderEntity> {
        ensure_active(token)?;
        if spec.path.is_empty() {
            return Err(raise_error!(
                "Folder path cannot be empty".into(),
                ErrorKind::InvalidArgument
            ));
        }
        let session = self.session()?;
        let lock = self.account_lock(account_id);
        let _guard = lock.lock().await;
        with_transaction(&session.db, move |rw| {
            let existing: Option<FolderEntity> = rw
                .get()
                .secondary(
                    FolderEntityKey::path_key,
                    folder_path_key(account_id, &spec.path),
                )
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
            if existing.is_some() {
                return Err(raise_error!(
                    format!("Folder '{}' already exists", spec.path),
                    ErrorKind::Duplicate
                ));
            }
            let folder = FolderEntity {
                id: id!(64),
                account_id,
                path: spec.path,
                roles: spec.roles,
                total_count: spec.total_count,
                unread_count: spec.unread_count,
                local_count: 0,
            };
            rw.insert(folder.clone())
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
            Ok(folder)
        })
        .await
    }

    /// Delete a folder and cascade to its messages.
    pub async fn delete_folder(
        &self,
        account_id: u64,
        path: &str,
        token: &CancellationToken,
    ) -> MailVaultResult<()> {
        ensure_active(token)?;
        let session = self.session()?;
        let lock = self.account_lock(account_id);
        let _guard = lock.lock().await;
        let path = path.to_string();
        with_transaction(&session.db, move |rw| {
            let folder: Option<FolderEntity> = rw
                .get()
                .secondary(
                    FolderEntityKey::path_key,
                    folder_path_key(account_id, &path),
                )
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
            let folder = folder.ok_or_else(|| {
                raise_error!(format!("Folder '{}' not found", path), ErrorKind::NotFound)
            })?;
            delete_folder_cascade_in_tx(rw, &folder)?;
            Ok(())
        })
        .await
    }

    /// Move a folder subtree from `old_path` to `new_path`.
    ///
    /// The lookup is case-insensitive with an exact segment boundary; the
    /// rewritten paths take the case of `new_path` plus each untouched
    /// suffix. Message path columns are rewritten in the same transaction.
    pub async fn update_folder_path(
        &self,
        account_id: u64,
        old_path: &str,
        new_path: &str,
        token: &CancellationToken,
    ) -> MailVaultResult<()> {
        ensure_active(token)?;
        if old_path.is_empty() || new_path.is_empty() {
            return Err(raise_error!(
                "Folder path cannot be empty".into(),
                ErrorKind::InvalidArgument
            ));
        }
        let session = self.session()?;
        let lock = self.account_lock(account_id);
        let _guard = lock.lock().await;
        let old_path = old_path.to_string();
        let new_path = new_path.to_string();
        with_transaction(&session.db, move |rw| {
            let folders: Vec<FolderEntity> =
                scan_secondary_in_tx(rw, FolderEntityKey::account_id, account_id)?;
            let source_exists = folders
                .iter()
                .any(|f| f.path.to_lowercase() == old_path.to_lowercase());
            if !source_exists {
                return Err(raise_error!(
                    format!("Rename source folder '{}' does not exist", old_path),
                    ErrorKind::Database
                ));
            }
            for folder in folders {
                let Some(suffix_at) = segment_prefix_offset(&folder.path, &old_path) else {
                    continue;
                };
                let rewritten = format!("{}{}", new_path, &folder.path[suffix_at..]);
                let mut updated = folder.clone();
                updated.path = rewritten.clone();
                rw.update(folder.clone(), updated)
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;

                let messages: Vec<MessageEntity> =
                    scan_secondary_in_tx(rw, MessageEntityKey::folder_id, folder.id)?;
                for message in messages {
                    let mut moved = message.clone();
                    moved.folder_path = rewritten.clone();
                    rw.update(message, moved)
                        .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
                }
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_boundary_is_exact() {
        assert_eq!(segment_prefix_offset("Prefix", "Prefix"), Some(6));
        assert_eq!(segment_prefix_offset("Prefix/Sub", "Prefix"), Some(6));
        assert_eq!(segment_prefix_offset("PrefixSuffix", "Prefix"), None);
        assert_eq!(segment_prefix_offset("Prefix2", "Prefix"), None);
        assert_eq!(segment_prefix_offset("pre_fix", "pre%fix"), None);
        assert_eq!(segment_prefix_offset("INBOX/sub", "inbox"), Some(5));
    }

    #[test]
    fn segment_boundary_handles_non_ascii() {
        assert_eq!(segment_prefix_offset("Входящие/Архив", "входящие"), Some(16));
        assert_eq!(segment_prefix_offset("📥 mail/old", "📥 mail"), Some(9));
    }

    #[test]
    fn role_classification() {
        let inbox = FolderRoles::INBOX;
        assert!(inbox.is_special());
        assert!(inbox.is_contact_eligible());
        let junk = FolderRoles::JUNK;
        assert!(!junk.is_contact_eligible());
        assert!(!junk.counts_toward_unread_map());
        let other = FolderRoles::OTHER;
        assert!(!other.is_special());
        assert!(other.is_contact_eligible());
        let drafts = FolderRoles::DRAFTS;
        assert!(drafts.is_contact_eligible());
        assert!(!drafts.counts_toward_unread_map());
    }
}
