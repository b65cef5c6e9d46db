use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::modules::common::parallel::run_collect;
use crate::modules::common::{ensure_active, run_cancellable, Addr};
use crate::modules::dec::client::{remap_transport, require_any_success, StorageClient};
use crate::modules::dec::protector::{DecProtector, MessageProtector};
use crate::modules::dec::route::{self, DecAddress, DEC_NETWORKS};
use crate::modules::error::kind::ErrorKind;
use crate::modules::error::MailVaultResult;
use crate::modules::mailbox::MailboxDriver;
use crate::modules::store::account::AccountEntity;
use crate::modules::store::folder::{FolderEntity, FolderRoles, FolderSpec};
use crate::modules::store::message::{Attachment, MessageEntity, Protection, ProtectionKind};
use crate::modules::store::vault::DataVault;
use crate::raise_error;

/// JSON wire form of a message blob. Encode → encrypt → decrypt → decode is
/// stable; the read flag travels as true because the blob is minted from
/// the sender's local copy.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct WireMessage {
    pub from: Vec<Addr>,
    pub to: Vec<Addr>,
    pub cc: Vec<Addr>,
    pub bcc: Vec<Addr>,
    pub reply_to: Vec<Addr>,
    pub subject: String,
    pub preview: String,
    pub text_body: String,
    pub html_body: String,
    pub date: i64,
    pub read: bool,
    pub flagged: bool,
    pub attachments: Vec<Attachment>,
}

impl WireMessage {
    pub fn from_entity(message: &MessageEntity) -> Self {
        WireMessage {
            from: message.from.clone(),
            to: message.to.clone(),
            cc: message.cc.clone(),
            bcc: message.bcc.clone(),
            reply_to: message.reply_to.clone(),
            subject: message.subject.clone(),
            preview: message.preview.clone(),
            text_body: message.text_body.clone(),
            html_body: message.html_body.clone(),
            date: message.date,
            read: true,
            flagged: message.flagged,
            attachments: message.attachments.clone(),
        }
    }

    pub fn into_entity(self) -> MessageEntity {
        MessageEntity {
            from: self.from,
            to: self.to,
            cc: self.cc,
            bcc: self.bcc,
            reply_to: self.reply_to,
            subject: self.subject,
            preview: self.preview,
            text_body: self.text_body,
            html_body: self.html_body,
            date: self.date,
            read: self.read,
            flagged: self.flagged,
            decentralized: true,
            attachments: self.attachments,
            protection: Protection {
                kind: ProtectionKind::Encrypted,
                signatures: Vec::new(),
            },
            ..Default::default()
        }
    }
}

/// External id of a blob within the local Inbox/Trash, derived from its
/// content hash so repeated fetches dedupe on the `(folder, external id)`
/// rule.
pub fn external_id_for_hash(content_hash: &str) -> u32 {
    let digest = Sha256::digest(content_hash.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Mailbox of one decentralized account: encrypts per recipient, routes by
/// mailbox id, fans out across every configured storage client.
pub struct DecMailbox {
    account_id: u64,
    account_address: String,
    network: String,
    vault: Arc<DataVault>,
    protector: Arc<dyn MessageProtector>,
    clients: Vec<Arc<dyn StorageClient>>,
}

impl DecMailbox {
    pub fn new(
        account: &AccountEntity,
        vault: Arc<DataVault>,
        protector: Arc<dyn MessageProtector>,
        clients: Vec<Arc<dyn StorageClient>>,
    ) -> Self {
        DecMailbox {
            account_id: account.id,
            account_address: account.address.clone(),
            network: account
                .network_tag
                .clone()
                .unwrap_or_else(|| DEC_NETWORKS[0].into()),
            vault,
            protector,
            clients,
        }
    }

    /// Assemble the mailbox for a stored account: the protector is derived
    /// from the vault's master key and the account's derivation index.
    pub async fn for_account(
        account: &AccountEntity,
        vault: Arc<DataVault>,
        clients: Vec<Arc<dyn StorageClient>>,
        token: &CancellationToken,
    ) -> MailVaultResult<Self> {
        let master_key = vault.master_key(token).await?;
        let index = account.derivation_index.unwrap_or(0);
        let protector = Arc::new(DecProtector::derive(&master_key, index)?);
        Ok(DecMailbox::new(account, vault, protector, clients))
    }

    pub fn account_address(&self) -> &str {
        &self.account_address
    }

    /// The account's own routing identifier.
    pub fn own_mailbox_id(&self) -> MailVaultResult<String> {
        route::mailbox_id(&self.protector.public_key())
    }

    async fn folder_by_role(
        &self,
        role: FolderRoles,
        token: &CancellationToken,
    ) -> MailVaultResult<FolderEntity> {
        let folders = self.vault.folders(self.account_id, token).await?;
        folders
            .into_iter()
            .find(|f| f.roles.contains(role))
            .ok_or_else(|| {
                raise_error!(
                    format!(
                        "Account '{}' has no folder with role {:?}",
                        self.account_address, role
                    ),
                    ErrorKind::NotFound
                )
            })
    }

    async fn resolve_folder(
        &self,
        path: &str,
        token: &CancellationToken,
    ) -> MailVaultResult<FolderEntity> {
        self.vault
            .find_folder(self.account_id, path, token)
            .await?
            .ok_or_else(|| {
                raise_error!(format!("Folder '{}' not found", path), ErrorKind::NotFound)
            })
    }

    async fn next_external_id(
        &self,
        folder_id: u64,
        token: &CancellationToken,
    ) -> MailVaultResult<u32> {
        let messages = self.vault.list_messages(folder_id, token).await?;
        Ok(messages.first().map(|m| m.external_id + 1).unwrap_or(1))
    }

    fn dec_recipients(message: &MessageEntity) -> Vec<DecAddress> {
        let mut seen = BTreeSet::new();
        message
            .to
            .iter()
            .chain(&message.cc)
            .chain(&message.bcc)
            .filter_map(|addr| route::parse_dec_address(&addr.address).ok())
            .filter(|dec| seen.insert(dec.public_key.to_uppercase()))
            .collect()
    }

    /// Encrypt per recipient, put the ciphertext on every storage client
    /// and queue its content hash on the recipient's mailbox id; at least
    /// one client must take each envelope. The sender's copy lands in the
    /// local Sent folder, read and decentralized.
    pub async fn send(
        &self,
        message: &MessageEntity,
        token: &CancellationToken,
    ) -> MailVaultResult<()> {
        ensure_active(token)?;
        let recipients = Self::dec_recipients(message);
        if recipients.is_empty() {
            return Err(raise_error!(
                "Message has no decentralized recipients".into(),
                ErrorKind::InvalidArgument
            ));
        }
        let blob = serde_json::to_vec(&WireMessage::from_entity(message))
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;

        for recipient in &recipients {
            let ciphertext = self
                .protector
                .encrypt_for(&recipient.public_key, &blob)
                .await?;
            let mailbox_id = route::mailbox_id(&recipient.public_key)?;
            let ciphertext = Arc::new(ciphertext);
            let queue_id = Arc::new(mailbox_id.clone());
            let clients = self.clients.clone();
            let concurrency = clients.len().max(1);
            let results = run_cancellable(
                token,
                run_collect(concurrency, clients, move |client| {
                    let ciphertext = Arc::clone(&ciphertext);
                    let queue_id = Arc::clone(&queue_id);
                    async move {
                        let content_hash = client
                            .put(ciphertext.as_ref().clone())
                            .await
                            .map_err(remap_transport)?;
                        client
                            .send(&queue_id, &content_hash)
                            .await
                            .map_err(remap_transport)?;
                        Ok(content_hash)
                    }
                }),
            )
            .await?;
            require_any_success("send", results)?;
            info!(
                "Envelope queued for mailbox {} of {}",
                mailbox_id,
                recipient.to_address()
            );
        }

        let sent = self.folder_by_role(FolderRoles::SENT, token).await?;
        let mut copy = message.clone();
        copy.id = 0;
        copy.read = true;
        copy.decentralized = true;
        if copy.external_id == 0 {
            copy.external_id = self.next_external_id(sent.id, token).await?;
        }
        self.vault.add_message(sent.id, copy, true, token).await?;
        Ok(())
    }

    /// List-then-fetch: union the content hashes across clients, fetch each
    /// blob not already in Inbox or Trash, decrypt and insert into Inbox.
    pub async fn receive(&self, token: &CancellationToken) -> MailVaultResult<Vec<MessageEntity>> {
        ensure_active(token)?;
        let mailbox_id = self.own_mailbox_id()?;
        let queue_id = Arc::new(mailbox_id.clone());
        let clients = self.clients.clone();
        let concurrency = clients.len().max(1);
        let listings = run_cancellable(
            token,
            run_collect(concurrency, clients, move |client| {
                let queue_id = Arc::clone(&queue_id);
                async move { client.list(&queue_id).await.map_err(remap_transport) }
            }),
        )
        .await?;
        let listings = require_any_success("list", listings)?;
        let hashes: BTreeSet<String> = listings.into_iter().flatten().collect();

        let inbox = self.folder_by_role(FolderRoles::INBOX, token).await?;
        let trash = self.folder_by_role(FolderRoles::TRASH, token).await.ok();

        let mut inserted = Vec::new();
        for content_hash in hashes {
            ensure_active(token)?;
            let external_id = external_id_for_hash(&content_hash);
            if self
                .vault
                .message_exists(inbox.id, external_id, token)
                .await?
            {
                continue;
            }
            if let Some(trash) = &trash {
                if self
                    .vault
                    .message_exists(trash.id, external_id, token)
                    .await?
                {
                    continue;
                }
            }

            let mut fetch_results = Vec::with_capacity(self.clients.len());
            for client in &self.clients {
                let fetched = run_cancellable(token, async {
                    client
                        .get(&mailbox_id, &content_hash)
                        .await
                        .map_err(remap_transport)
                })
                .await;
                match fetched {
                    Ok(blob) => {
                        fetch_results.push(Ok(blob));
                        break;
                    }
                    Err(e) if e.kind() == ErrorKind::Canceled => return Err(e),
                    Err(e) => fetch_results.push(Err(e)),
                }
            }
            let blobs = require_any_success("get", fetch_results)?;
            let Some(blob) = blobs.into_iter().next() else {
                continue;
            };

            let plaintext = match self.protector.decrypt(&blob).await {
                Ok(plaintext) => plaintext,
                Err(e) => {
                    warn!("Dropping undecryptable blob {}: {}", content_hash, e);
                    continue;
                }
            };
            let wire: WireMessage = match serde_json::from_slice(&plaintext) {
                Ok(wire) => wire,
                Err(e) => {
                    warn!("Dropping malformed blob {}: {:#?}", content_hash, e);
                    continue;
                }
            };
            let mut entity = wire.into_entity();
            entity.external_id = external_id;
            // Arrivals start unread regardless of the sender-copy flag.
            entity.read = false;
            if let Some(added) = self
                .vault
                .add_message(inbox.id, entity, true, token)
                .await?
            {
                inserted.push(added);
            }
        }
        info!(
            "Received {} new message(s) for {}",
            inserted.len(),
            self.account_address
        );
        Ok(inserted)
    }

    /// Claim a canonical name on the resolver. Only the first network
    /// variant supports names. Returns the canonical name when the resolver
    /// binds it to this account's key, an empty string when someone else
    /// holds it.
    pub async fn claim_name(
        &self,
        name: &str,
        token: &CancellationToken,
    ) -> MailVaultResult<String> {
        ensure_active(token)?;
        if self.network != DEC_NETWORKS[0] {
            return Err(raise_error!(
                format!("Network '{}' does not support name claims", self.network),
                ErrorKind::NotSupported
            ));
        }
        let canonical = route::canonical_name(name)?;
        let signature = Arc::new(self.protector.sign(canonical.as_bytes()).await?);
        let public_key = self.protector.public_key();
        let claim = Arc::new((canonical.clone(), public_key.clone()));
        let clients = self.clients.clone();
        let concurrency = clients.len().max(1);
        let results = run_cancellable(
            token,
            run_collect(concurrency, clients, move |client| {
                let claim = Arc::clone(&claim);
                let signature = Arc::clone(&signature);
                async move {
                    client
                        .claim_name(&claim.0, &claim.1, &signature)
                        .await
                        .map_err(remap_transport)
                }
            }),
        )
        .await?;
        let mut bound = require_any_success("claim-name", results)?;
        let Some(bound_key) = bound.pop() else {
            return Ok(String::new());
        };
        if bound_key.eq_ignore_ascii_case(&public_key) {
            Ok(canonical)
        } else {
            Ok(String::new())
        }
    }

    /// Resolve a canonical name to a decentralized address via any client.
    pub async fn resolve_address(
        &self,
        name: &str,
        token: &CancellationToken,
    ) -> MailVaultResult<String> {
        ensure_active(token)?;
        let lookup = Arc::new(name.to_string());
        let clients = self.clients.clone();
        let concurrency = clients.len().max(1);
        let results = run_cancellable(
            token,
            run_collect(concurrency, clients, move |client| {
                let lookup = Arc::clone(&lookup);
                async move {
                    client
                        .get_address_by_name(&lookup)
                        .await
                        .map_err(remap_transport)
                }
            }),
        )
        .await?;
        let mut addresses = require_any_success("get-address-by-name", results)?;
        addresses.pop().ok_or_else(|| {
            raise_error!(
                format!("Name '{}' did not resolve", name),
                ErrorKind::NotFound
            )
        })
    }

    fn default_folder_specs() -> Vec<FolderSpec> {
        vec![
            FolderSpec::new("Inbox", FolderRoles::INBOX),
            FolderSpec::new("Sent", FolderRoles::SENT),
            FolderSpec::new("Drafts", FolderRoles::DRAFTS),
            FolderSpec::new("Trash", FolderRoles::TRASH),
        ]
    }
}

fn folder_mutation_unsupported() -> crate::modules::error::MailVaultError {
    raise_error!(
        "Decentralized mailboxes do not support folder mutations".into(),
        ErrorKind::NotSupported
    )
}

#[async_trait]
impl MailboxDriver for DecMailbox {
    fn has_folder_counters(&self) -> bool {
        false
    }

    fn writes_local_store(&self) -> bool {
        true
    }

    async fn folders(&self, _token: &CancellationToken) -> MailVaultResult<Vec<FolderSpec>> {
        Ok(Self::default_folder_specs())
    }

    async fn default_inbox(&self, _token: &CancellationToken) -> MailVaultResult<FolderSpec> {
        Ok(FolderSpec::new("Inbox", FolderRoles::INBOX))
    }

    async fn messages_before(
        &self,
        _folder_path: &str,
        _before: Option<u32>,
        _count: usize,
        _token: &CancellationToken,
    ) -> MailVaultResult<Vec<MessageEntity>> {
        // History exists only locally; the mesh keeps undelivered envelopes.
        Ok(Vec::new())
    }

    async fn receive_new(
        &self,
        folder_path: &str,
        _newest_known: Option<u32>,
        token: &CancellationToken,
    ) -> MailVaultResult<Vec<MessageEntity>> {
        let inbox = self.folder_by_role(FolderRoles::INBOX, token).await?;
        if !folder_path.eq_ignore_ascii_case(&inbox.path) {
            return Ok(Vec::new());
        }
        self.receive(token).await
    }

    async fn send_message(
        &self,
        message: &MessageEntity,
        token: &CancellationToken,
    ) -> MailVaultResult<()> {
        self.send(message, token).await
    }

    async fn append_draft(
        &self,
        folder_path: &str,
        message: &MessageEntity,
        token: &CancellationToken,
    ) -> MailVaultResult<u32> {
        let folder = self.resolve_folder(folder_path, token).await?;
        let external_id = self.next_external_id(folder.id, token).await?;
        let mut draft = message.clone();
        draft.id = 0;
        draft.external_id = external_id;
        draft.read = true;
        draft.decentralized = true;
        self.vault.add_message(folder.id, draft, true, token).await?;
        Ok(external_id)
    }

    async fn replace_draft(
        &self,
        folder_path: &str,
        external_id: u32,
        message: &MessageEntity,
        token: &CancellationToken,
    ) -> MailVaultResult<u32> {
        let folder = self.resolve_folder(folder_path, token).await?;
        self.vault
            .delete_messages(folder.id, vec![external_id], true, token)
            .await?;
        self.append_draft(folder_path, message, token).await
    }

    async fn create_folder(
        &self,
        _path: &str,
        _token: &CancellationToken,
    ) -> MailVaultResult<FolderSpec> {
        Err(folder_mutation_unsupported())
    }

    async fn rename_folder(
        &self,
        _old_path: &str,
        _new_path: &str,
        _token: &CancellationToken,
    ) -> MailVaultResult<()> {
        Err(folder_mutation_unsupported())
    }

    async fn delete_folder(
        &self,
        _path: &str,
        _token: &CancellationToken,
    ) -> MailVaultResult<()> {
        Err(folder_mutation_unsupported())
    }

    async fn set_flags(
        &self,
        folder_path: &str,
        external_ids: &[u32],
        read: Option<bool>,
        flagged: Option<bool>,
        token: &CancellationToken,
    ) -> MailVaultResult<()> {
        let folder = self.resolve_folder(folder_path, token).await?;
        self.vault
            .update_flags(folder.id, external_ids.to_vec(), read, flagged, true, token)
            .await
    }

    async fn move_messages(
        &self,
        source_path: &str,
        target_path: &str,
        external_ids: &[u32],
        token: &CancellationToken,
    ) -> MailVaultResult<()> {
        let source = self.resolve_folder(source_path, token).await?;
        let target = self.resolve_folder(target_path, token).await?;
        self.vault
            .move_messages(source.id, target.id, external_ids.to_vec(), true, token)
            .await
    }

    async fn delete_messages(
        &self,
        folder_path: &str,
        external_ids: &[u32],
        permanent: bool,
        token: &CancellationToken,
    ) -> MailVaultResult<()> {
        let folder = self.resolve_folder(folder_path, token).await?;
        if permanent {
            self.vault
                .delete_messages(folder.id, external_ids.to_vec(), true, token)
                .await?;
            return Ok(());
        }
        let trash = self.folder_by_role(FolderRoles::TRASH, token).await?;
        self.vault
            .move_messages(folder.id, trash.id, external_ids.to_vec(), true, token)
            .await
    }
}
