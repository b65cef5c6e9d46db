use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::modules::error::MailVaultResult;
use crate::modules::store::folder::FolderSpec;
use crate::modules::store::message::MessageEntity;

/// Per-account mailbox driver.
///
/// Classic IMAP/SMTP and Proton drivers live outside this crate and speak
/// their protocols behind this trait; the decentralized mailbox implements
/// it in-crate. Remote messages travel as [`MessageEntity`] values with a
/// zero surrogate id; the store assigns ids on insert.
#[async_trait]
pub trait MailboxDriver: Send + Sync {
    /// Whether the remote side maintains folder total/unread counters. When
    /// it does, locally stored pages must not perturb the imported numbers.
    fn has_folder_counters(&self) -> bool;

    /// Whether the driver writes fetched/sent messages into the local store
    /// itself. The orchestrator persists for drivers that do not.
    fn writes_local_store(&self) -> bool {
        false
    }

    async fn folders(&self, token: &CancellationToken) -> MailVaultResult<Vec<FolderSpec>>;

    async fn default_inbox(&self, token: &CancellationToken) -> MailVaultResult<FolderSpec>;

    /// Page of remote messages with external ids strictly before `before`,
    /// newest first. `None` starts from the newest remote message.
    async fn messages_before(
        &self,
        folder_path: &str,
        before: Option<u32>,
        count: usize,
        token: &CancellationToken,
    ) -> MailVaultResult<Vec<MessageEntity>>;

    /// Messages that arrived after the newest known external id.
    async fn receive_new(
        &self,
        folder_path: &str,
        newest_known: Option<u32>,
        token: &CancellationToken,
    ) -> MailVaultResult<Vec<MessageEntity>>;

    async fn send_message(
        &self,
        message: &MessageEntity,
        token: &CancellationToken,
    ) -> MailVaultResult<()>;

    /// Append a draft; returns the external id the driver assigned.
    async fn append_draft(
        &self,
        folder_path: &str,
        message: &MessageEntity,
        token: &CancellationToken,
    ) -> MailVaultResult<u32>;

    /// Replace a stored draft with a new body; returns the new external id.
    async fn replace_draft(
        &self,
        folder_path: &str,
        external_id: u32,
        message: &MessageEntity,
        token: &CancellationToken,
    ) -> MailVaultResult<u32>;

    async fn create_folder(
        &self,
        path: &str,
        token: &CancellationToken,
    ) -> MailVaultResult<FolderSpec>;

    async fn rename_folder(
        &self,
        old_path: &str,
        new_path: &str,
        token: &CancellationToken,
    ) -> MailVaultResult<()>;

    async fn delete_folder(&self, path: &str, token: &CancellationToken) -> MailVaultResult<()>;

    async fn set_flags(
        &self,
        folder_path: &str,
        external_ids: &[u32],
        read: Option<bool>,
        flagged: Option<bool>,
        token: &CancellationToken,
    ) -> MailVaultResult<()>;

    async fn mark_read(
        &self,
        folder_path: &str,
        external_ids: &[u32],
        token: &CancellationToken,
    ) -> MailVaultResult<()> {
        self.set_flags(folder_path, external_ids, Some(true), None, token)
            .await
    }

    async fn mark_unread(
        &self,
        folder_path: &str,
        external_ids: &[u32],
        token: &CancellationToken,
    ) -> MailVaultResult<()> {
        self.set_flags(folder_path, external_ids, Some(false), None, token)
            .await
    }

    async fn flag(
        &self,
        folder_path: &str,
        external_ids: &[u32],
        token: &CancellationToken,
    ) -> MailVaultResult<()> {
        self.set_flags(folder_path, external_ids, None, Some(true), token)
            .await
    }

    async fn unflag(
        &self,
        folder_path: &str,
        external_ids: &[u32],
        token: &CancellationToken,
    ) -> MailVaultResult<()> {
        self.set_flags(folder_path, external_ids, None, Some(false), token)
            .await
    }

    async fn move_messages(
        &self,
        source_path: &str,
        target_path: &str,
        external_ids: &[u32],
        token: &CancellationToken,
    ) -> MailVaultResult<()>;

    /// Delete messages; a non-permanent delete is a move to Trash.
    async fn delete_messages(
        &self,
        folder_path: &str,
        external_ids: &[u32],
        permanent: bool,
        token: &CancellationToken,
    ) -> MailVaultResult<()>;
}
