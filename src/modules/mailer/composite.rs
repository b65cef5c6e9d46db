use ahash::AHashMap;
use tokio_util::sync::CancellationToken;

use crate::modules::error::MailVaultResult;
use crate::modules::mailer::MailCore;
use crate::modules::store::account::AccountEntity;
use crate::modules::store::folder::{FolderEntity, FolderRoles};

/// Virtual folder aggregating the same-role folders of every account.
/// Counters are sums; operations delegate to each member.
#[derive(Clone, Debug, Default)]
pub struct CompositeFolder {
    pub role: FolderRoles,
    pub name: String,
    /// `(account address, folder)` members, account order preserved.
    pub members: Vec<(String, FolderEntity)>,
    pub total_count: u32,
    pub unread_count: u32,
    pub local_count: u32,
}

/// Aggregate view over every account with one composite folder per
/// standard role.
#[derive(Clone, Debug, Default)]
pub struct CompositeAccount {
    pub accounts: Vec<AccountEntity>,
    pub folders: Vec<CompositeFolder>,
}

const STANDARD_ROLES: &[(FolderRoles, &str)] = &[
    (FolderRoles::INBOX, "Inbox"),
    (FolderRoles::SENT, "Sent"),
    (FolderRoles::DRAFTS, "Drafts"),
    (FolderRoles::TRASH, "Trash"),
    (FolderRoles::JUNK, "Junk"),
    (FolderRoles::IMPORTANT, "Important"),
    (FolderRoles::ALL, "All"),
];

impl MailCore {
    /// Same-role folders of every account, counters summed.
    pub async fn composite_folder(
        &self,
        role: FolderRoles,
        token: &CancellationToken,
    ) -> MailVaultResult<CompositeFolder> {
        let name = STANDARD_ROLES
            .iter()
            .find(|(r, _)| r.0 == role.0)
            .map(|(_, name)| name.to_string())
            .unwrap_or_else(|| "Other".to_string());
        let mut composite = CompositeFolder {
            role,
            name,
            ..Default::default()
        };
        for account in self.vault().accounts(token).await? {
            for folder in self.vault().folders(account.id, token).await? {
                if !folder.roles.contains(role) {
                    continue;
                }
                composite.total_count += folder.total_count;
                composite.unread_count += folder.unread_count;
                composite.local_count += folder.local_count;
                composite.members.push((account.address.clone(), folder));
            }
        }
        Ok(composite)
    }

    /// The full aggregate: every account plus one composite folder per
    /// standard role that has at least one member.
    pub async fn composite_account(
        &self,
        token: &CancellationToken,
    ) -> MailVaultResult<CompositeAccount> {
        let accounts = self.vault().accounts(token).await?;
        let mut per_account_folders: AHashMap<u64, Vec<FolderEntity>> = AHashMap::new();
        for account in &accounts {
            per_account_folders
                .insert(account.id, self.vault().folders(account.id, token).await?);
        }
        let mut folders = Vec::new();
        for (role, name) in STANDARD_ROLES {
            let mut composite = CompositeFolder {
                role: *role,
                name: (*name).to_string(),
                ..Default::default()
            };
            for account in &accounts {
                for folder in per_account_folders.get(&account.id).into_iter().flatten() {
                    if !folder.roles.contains(*role) {
                        continue;
                    }
                    composite.total_count += folder.total_count;
                    composite.unread_count += folder.unread_count;
                    composite.local_count += folder.local_count;
                    composite
                        .members
                        .push((account.address.clone(), folder.clone()));
                }
            }
            if !composite.members.is_empty() {
                folders.push(composite);
            }
        }
        Ok(CompositeAccount { accounts, folders })
    }

    /// Delegated composite operation: mark every locally stored message of
    /// the role's member folders read, driver first, then the store.
    pub async fn mark_composite_folder_read(
        &self,
        role: FolderRoles,
        token: &CancellationToken,
    ) -> MailVaultResult<()> {
        let composite = self.composite_folder(role, token).await?;
        for (account_address, folder) in composite.members {
            let unread_ids: Vec<u32> = self
                .vault()
                .list_messages(folder.id, token)
                .await?
                .into_iter()
                .filter(|m| !m.read)
                .map(|m| m.external_id)
                .collect();
            if unread_ids.is_empty() {
                continue;
            }
            let instance = self.driver_for(&account_address, token).await?;
            let driver = instance.driver();
            driver.mark_read(&folder.path, &unread_ids, token).await?;
            if !driver.writes_local_store() {
                self.vault()
                    .update_flags(folder.id, unread_ids, Some(true), None, true, token)
                    .await?;
            }
        }
        Ok(())
    }
}
