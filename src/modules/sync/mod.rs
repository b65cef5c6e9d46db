use ahash::AHashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[cfg(test)]
mod tests;

use crate::modules::error::MailVaultResult;
use crate::modules::mailbox::MailboxDriver;
use crate::modules::store::folder::FolderEntity;
use crate::modules::store::message::MessageEntity;
use crate::modules::store::vault::DataVault;

/// What a reconciliation pass did; the observable contract of a sync run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SyncOutcome {
    pub deleted: usize,
    pub updated: usize,
    pub added: usize,
}

fn flags_differ(local: &MessageEntity, remote: &MessageEntity) -> bool {
    local.read != remote.read || local.flagged != remote.flagged
}

/// Converge the bounded local slice of a folder with a remote page.
///
/// `oldest_local` and `newest_local` bound the slice; either may be absent.
/// Rows present only locally inside the slice are deleted, rows on both
/// sides take the remote flags, rows only remote and outside the slice are
/// added. Arrivals inside the slice are left to the fetch pass. Deletes
/// run first, then updates, then adds, all with folder counters untouched.
pub async fn synchronize_folder(
    vault: &DataVault,
    driver: &dyn MailboxDriver,
    folder: &FolderEntity,
    oldest_local: Option<&MessageEntity>,
    newest_local: Option<&MessageEntity>,
    page_size: usize,
    token: &CancellationToken,
) -> MailVaultResult<SyncOutcome> {
    let bounds = match (oldest_local, newest_local) {
        (None, None) => None,
        (oldest, newest) => Some((
            oldest.map(|m| m.external_id).unwrap_or(0),
            newest.map(|m| m.external_id).unwrap_or(u32::MAX),
        )),
    };

    let mut local: Vec<MessageEntity> = match bounds {
        Some((low, high)) => vault.messages_in_id_span(folder.id, low, high, token).await?,
        None => Vec::new(),
    };
    local.sort_by_key(|m| std::cmp::Reverse(m.external_id));

    let sentinel = newest_local.and_then(|m| m.external_id.checked_add(1));
    let remote = driver
        .messages_before(&folder.path, sentinel, page_size, token)
        .await?;

    let remote_by_id: AHashMap<u32, &MessageEntity> =
        remote.iter().map(|m| (m.external_id, m)).collect();
    let in_slice = |external_id: u32| match bounds {
        Some((low, high)) => external_id >= low && external_id <= high,
        None => false,
    };

    let mut to_delete: Vec<u32> = Vec::new();
    let mut to_update: Vec<MessageEntity> = Vec::new();
    for message in &local {
        match remote_by_id.get(&message.external_id) {
            Some(remote) if flags_differ(message, remote) => {
                let mut updated = message.clone();
                updated.read = remote.read;
                updated.flagged = remote.flagged;
                to_update.push(updated);
            }
            Some(_) => {}
            None => to_delete.push(message.external_id),
        }
    }

    let local_ids: AHashMap<u32, ()> = local.iter().map(|m| (m.external_id, ())).collect();
    let mut to_add: Vec<MessageEntity> = remote
        .iter()
        .filter(|m| !local_ids.contains_key(&m.external_id) && !in_slice(m.external_id))
        .cloned()
        .collect();
    to_add.sort_by_key(|m| std::cmp::Reverse(m.external_id));

    let outcome = SyncOutcome {
        deleted: to_delete.len(),
        updated: to_update.len(),
        added: to_add.len(),
    };
    debug!(
        "Sync of '{}': {} to delete, {} to update, {} to add",
        folder.path, outcome.deleted, outcome.updated, outcome.added
    );

    if !to_delete.is_empty() {
        vault
            .delete_messages(folder.id, to_delete, false, token)
            .await?;
    }
    if !to_update.is_empty() {
        vault.update_messages(to_update, false, token).await?;
    }
    if !to_add.is_empty() {
        vault.add_messages(folder.id, to_add, false, token).await?;
    }

    Ok(outcome)
}
