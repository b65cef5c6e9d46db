use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::modules::common::Addr;
use crate::modules::error::MailVaultResult;
use crate::modules::mailbox::MailboxDriver;
use crate::modules::store::account::{AccountEntity, AccountKind};
use crate::modules::store::folder::{FolderRoles, FolderSpec};
use crate::modules::store::message::MessageEntity;
use crate::modules::store::vault::DataVault;
use crate::modules::sync::synchronize_folder;

fn token() -> CancellationToken {
    CancellationToken::new()
}

fn message(external_id: u32, read: bool) -> MessageEntity {
    MessageEntity {
        external_id,
        date: external_id as i64 * 10,
        read,
        subject: format!("message {external_id}"),
        from: vec![Addr::new("peer@example.com")],
        ..Default::default()
    }
}

/// Driver stub that serves a fixed remote page.
struct RemoteSlice {
    page: Mutex<Vec<MessageEntity>>,
}

#[async_trait]
impl MailboxDriver for RemoteSlice {
    fn has_folder_counters(&self) -> bool {
        true
    }

    async fn folders(&self, _token: &CancellationToken) -> MailVaultResult<Vec<FolderSpec>> {
        Ok(vec![FolderSpec::new("Inbox", FolderRoles::INBOX)])
    }

    async fn default_inbox(&self, _token: &CancellationToken) -> MailVaultResult<FolderSpec> {
        Ok(FolderSpec::new("Inbox", FolderRoles::INBOX))
    }

    async fn messages_before(
        &self,
        _folder_path: &str,
        before: Option<u32>,
        count: usize,
        _token: &CancellationToken,
    ) -> MailVaultResult<Vec<MessageEntity>> {
        let page = self.page.lock().unwrap();
        Ok(page
            .iter()
            .filter(|m| before.map_or(true, |b| m.external_id < b))
            .take(count)
            .cloned()
            .collect())
    }

    async fn receive_new(
        &self,
        _folder_path: &str,
        _newest_known: Option<u32>,
        _token: &CancellationToken,
    ) -> MailVaultResult<Vec<MessageEntity>> {
        Ok(Vec::new())
    }

    async fn send_message(
        &self,
        _message: &MessageEntity,
        _token: &CancellationToken,
    ) -> MailVaultResult<()> {
        Ok(())
    }

    async fn append_draft(
        &self,
        _folder_path: &str,
        _message: &MessageEntity,
        _token: &CancellationToken,
    ) -> MailVaultResult<u32> {
        Ok(1)
    }

    async fn replace_draft(
        &self,
        _folder_path: &str,
        _external_id: u32,
        _message: &MessageEntity,
        _token: &CancellationToken,
    ) -> MailVaultResult<u32> {
        Ok(1)
    }

    async fn create_folder(
        &self,
        path: &str,
        _token: &CancellationToken,
    ) -> MailVaultResult<FolderSpec> {
        Ok(FolderSpec::new(path, FolderRoles::OTHER))
    }

    async fn rename_folder(
        &self,
        _old_path: &str,
        _new_path: &str,
        _token: &CancellationToken,
    ) -> MailVaultResult<()> {
        Ok(())
    }

    async fn delete_folder(&self, _path: &str, _token: &CancellationToken) -> MailVaultResult<()> {
        Ok(())
    }

    async fn set_flags(
        &self,
        _folder_path: &str,
        _external_ids: &[u32],
        _read: Option<bool>,
        _flagged: Option<bool>,
        _token: &CancellationToken,
    ) -> MailVaultResult<()> {
        Ok(())
    }

    async fn move_messages(
        &self,
        _source_path: &str,
        _target_path: &str,
        _external_ids: &[u32],
        _token: &CancellationToken,
    ) -> MailVaultResult<()> {
        Ok(())
    }

    async fn delete_messages(
        &self,
        _folder_path: &str,
        _external_ids: &[u32],
        _permanent: bool,
        _token: &CancellationToken,
    ) -> MailVaultResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn reconciliation_applies_deletes_updates_and_adds() {
    let vault = DataVault::ephemeral("pw").unwrap();
    let account = vault
        .add_account(
            AccountEntity::new("me@example.com", AccountKind::Classic),
            vec![FolderSpec::new("Inbox", FolderRoles::INBOX)],
            &token(),
        )
        .await
        .unwrap();
    let inbox = vault
        .find_folder(account.id, "Inbox", &token())
        .await
        .unwrap()
        .unwrap();

    // Local slice: 2 (unread), 3, 5.
    vault
        .add_messages(
            inbox.id,
            vec![message(2, false), message(3, true), message(5, true)],
            true,
            &token(),
        )
        .await
        .unwrap();

    // Remote: 1 (below the slice), 2 (now read), 4 (inside the slice but
    // not local), 5 (unchanged). 3 is gone remotely.
    let driver = RemoteSlice {
        page: Mutex::new(vec![
            message(5, true),
            message(4, true),
            message(2, true),
            message(1, true),
        ]),
    };

    let oldest = vault.find_message(inbox.id, 2, &token()).await.unwrap().unwrap();
    let newest = vault.find_message(inbox.id, 5, &token()).await.unwrap().unwrap();
    let outcome = synchronize_folder(
        &vault,
        &driver,
        &inbox,
        Some(&oldest),
        Some(&newest),
        50,
        &token(),
    )
    .await
    .unwrap();

    assert_eq!(outcome.deleted, 1);
    assert_eq!(outcome.updated, 1);
    assert_eq!(outcome.added, 1);

    let ids: Vec<u32> = vault
        .list_messages(inbox.id, &token())
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.external_id)
        .collect();
    assert_eq!(ids, vec![5, 2, 1]);

    // The remote flag state won.
    let updated = vault.find_message(inbox.id, 2, &token()).await.unwrap().unwrap();
    assert!(updated.read);

    // Counters belong to the import path: the sync pass left them alone.
    let inbox = vault
        .find_folder(account.id, "Inbox", &token())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(inbox.total_count, 3);
    assert_eq!(inbox.unread_count, 1);
    assert_eq!(inbox.local_count, 3);
}

#[tokio::test]
async fn matching_slices_are_a_no_op() {
    let vault = DataVault::ephemeral("pw").unwrap();
    let account = vault
        .add_account(
            AccountEntity::new("me@example.com", AccountKind::Classic),
            vec![FolderSpec::new("Inbox", FolderRoles::INBOX)],
            &token(),
        )
        .await
        .unwrap();
    let inbox = vault
        .find_folder(account.id, "Inbox", &token())
        .await
        .unwrap()
        .unwrap();
    vault
        .add_messages(inbox.id, vec![message(1, true), message(2, false)], true, &token())
        .await
        .unwrap();

    let driver = RemoteSlice {
        page: Mutex::new(vec![message(2, false), message(1, true)]),
    };
    let oldest = vault.find_message(inbox.id, 1, &token()).await.unwrap().unwrap();
    let newest = vault.find_message(inbox.id, 2, &token()).await.unwrap().unwrap();
    let outcome = synchronize_folder(
        &vault,
        &driver,
        &inbox,
        Some(&oldest),
        Some(&newest),
        50,
        &token(),
    )
    .await
    .unwrap();
    assert_eq!(outcome, crate::modules::sync::SyncOutcome::default());
}

#[tokio::test]
async fn empty_local_slice_adds_the_remote_page() {
    let vault = DataVault::ephemeral("pw").unwrap();
    let account = vault
        .add_account(
            AccountEntity::new("me@example.com", AccountKind::Classic),
            vec![FolderSpec::new("Inbox", FolderRoles::INBOX)],
            &token(),
        )
        .await
        .unwrap();
    let inbox = vault
        .find_folder(account.id, "Inbox", &token())
        .await
        .unwrap()
        .unwrap();

    let driver = RemoteSlice {
        page: Mutex::new(vec![message(7, true), message(6, false)]),
    };
    let outcome = synchronize_folder(&vault, &driver, &inbox, None, None, 50, &token())
        .await
        .unwrap();
    assert_eq!(outcome.added, 2);
    assert_eq!(outcome.deleted, 0);

    let inbox = vault
        .find_folder(account.id, "Inbox", &token())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(inbox.local_count, 2);
    // Counter updates stay with the import path.
    assert_eq!(inbox.total_count, 0);
    assert_eq!(inbox.unread_count, 0);
}
