use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::modules::common::Addr;
use crate::modules::error::kind::ErrorKind;
use crate::modules::store::account::{AccountAuth, AccountEntity, AccountKind};
use crate::modules::store::agent::AgentEntity;
use crate::modules::store::contact::{Avatar, ContactEntity};
use crate::modules::store::folder::{FolderEntity, FolderRoles, FolderSpec};
use crate::modules::store::keys::KeyBundleKind;
use crate::modules::store::message::MessageEntity;
use crate::modules::store::vault::DataVault;

fn token() -> CancellationToken {
    CancellationToken::new()
}

fn vault() -> Arc<DataVault> {
    DataVault::ephemeral("vault-password").unwrap()
}

fn message(external_id: u32, date: i64, read: bool, from: &str) -> MessageEntity {
    MessageEntity {
        external_id,
        date,
        read,
        subject: format!("message {external_id}"),
        preview: "preview".into(),
        from: vec![Addr::new(from)],
        to: vec![Addr::new("me@example.com")],
        ..Default::default()
    }
}

async fn seed_account(vault: &DataVault, address: &str, folders: &[(&str, FolderRoles)]) -> u64 {
    let specs = folders
        .iter()
        .map(|(path, roles)| FolderSpec::new(path, *roles))
        .collect();
    let account = vault
        .add_account(
            AccountEntity::new(address, AccountKind::Classic),
            specs,
            &token(),
        )
        .await
        .unwrap();
    account.id
}

async fn folder(vault: &DataVault, account_id: u64, path: &str) -> FolderEntity {
    vault
        .find_folder(account_id, path, &token())
        .await
        .unwrap()
        .unwrap()
}

// ---- lifecycle ----------------------------------------------------------

#[tokio::test]
async fn create_fails_when_file_exists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mail.vault");
    let vault = DataVault::new(&path);
    vault.create("pw", &token()).await.unwrap();
    vault.close();

    let second = DataVault::new(&path);
    let err = second.create("pw", &token()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Database);
}

#[tokio::test]
async fn open_rejects_wrong_password() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mail.vault");
    {
        let vault = DataVault::new(&path);
        vault.create("right", &token()).await.unwrap();
        vault.close();
    }
    let vault = DataVault::new(&path);
    let err = vault.open("wrong", &token()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Database);
    vault.open("right", &token()).await.unwrap();
    assert!(vault.is_open());
}

#[tokio::test]
async fn operations_after_close_are_disposed() {
    let vault = vault();
    vault.close();
    let err = vault.accounts(&token()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Disposed);
}

#[tokio::test]
async fn reset_waits_for_hundred_concurrent_opens() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mail.vault");
    let vault = DataVault::new(&path);
    vault.create("pw", &token()).await.unwrap();

    for _ in 0..100 {
        vault.open("pw", &token()).await.unwrap();
    }
    let closer = {
        let vault = Arc::clone(&vault);
        tokio::spawn(async move {
            for _ in 0..101 {
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
                vault.close();
            }
        })
    };
    vault.reset().await.unwrap();
    closer.await.unwrap();
    assert!(!path.exists());
    assert!(!vault.is_open());

    // The instance is reusable after reset.
    vault.create("pw", &token()).await.unwrap();
    assert!(vault.is_open());
}

#[tokio::test]
async fn cancellation_is_a_distinct_failure() {
    let vault = vault();
    let canceled = CancellationToken::new();
    canceled.cancel();
    let err = vault.accounts(&canceled).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Canceled);
}

// ---- accounts -----------------------------------------------------------

#[tokio::test]
async fn duplicate_account_address_is_rejected() {
    let vault = vault();
    seed_account(&vault, "user@example.com", &[("Inbox", FolderRoles::INBOX)]).await;
    let err = vault
        .add_account(
            AccountEntity::new("user@EXAMPLE.COM", AccountKind::Classic),
            vec![],
            &token(),
        )
        .await
        .unwrap_err();
    // Case differences in the domain do not make a new identity.
    assert_eq!(err.kind(), ErrorKind::Duplicate);
}

#[tokio::test]
async fn updating_missing_account_is_silent() {
    let vault = vault();
    vault
        .update_account(
            AccountEntity::new("ghost@example.com", AccountKind::Classic),
            &token(),
        )
        .await
        .unwrap();
    assert!(!vault.account_exists("ghost@example.com", &token()).await.unwrap());
}

#[tokio::test]
async fn auth_roundtrips_through_sealing() {
    let vault = vault();
    let mut account = AccountEntity::new("user@example.com", AccountKind::Classic);
    account.auth = AccountAuth::Password {
        secret: "hunter2".into(),
    };
    vault.add_account(account, vec![], &token()).await.unwrap();

    let stored = vault.get_account("user@example.com", &token()).await.unwrap();
    assert_ne!(
        stored.auth,
        AccountAuth::Password {
            secret: "hunter2".into()
        }
    );
    let opened = vault.account_auth("user@example.com", &token()).await.unwrap();
    assert_eq!(
        opened,
        AccountAuth::Password {
            secret: "hunter2".into()
        }
    );
}

#[tokio::test]
async fn folder_structure_update_diffs_and_cascades() {
    let vault = vault();
    let account_id = seed_account(
        &vault,
        "user@example.com",
        &[("Inbox", FolderRoles::INBOX), ("Old", FolderRoles::OTHER)],
    )
    .await;
    let old = folder(&vault, account_id, "Old").await;
    vault
        .add_messages(old.id, vec![message(1, 100, false, "a@b.com")], true, &token())
        .await
        .unwrap();

    let incoming = vec![
        FolderSpec::new("Inbox", FolderRoles::INBOX),
        FolderSpec {
            path: "Fresh".into(),
            roles: FolderRoles::OTHER,
            total_count: 9,
            unread_count: 4,
        },
    ];
    vault
        .update_folder_structure("user@example.com", incoming, &token())
        .await
        .unwrap();

    assert!(vault
        .find_folder(account_id, "Old", &token())
        .await
        .unwrap()
        .is_none());
    let fresh = folder(&vault, account_id, "Fresh").await;
    assert_eq!(fresh.total_count, 9);
    assert_eq!(fresh.unread_count, 4);
    // The local counter is derived, never imported.
    assert_eq!(fresh.local_count, 0);
}

// ---- folder rename ------------------------------------------------------

#[tokio::test]
async fn rename_spares_prefix_collisions() {
    let vault = vault();
    let account_id = seed_account(
        &vault,
        "user@example.com",
        &[
            ("Prefix", FolderRoles::OTHER),
            ("PrefixSuffix", FolderRoles::OTHER),
        ],
    )
    .await;
    let prefix = folder(&vault, account_id, "Prefix").await;
    let suffix = folder(&vault, account_id, "PrefixSuffix").await;
    vault
        .add_messages(prefix.id, vec![message(1, 10, true, "a@b.com")], true, &token())
        .await
        .unwrap();
    vault
        .add_messages(suffix.id, vec![message(1, 10, true, "a@b.com")], true, &token())
        .await
        .unwrap();

    vault
        .update_folder_path(account_id, "Prefix", "NewName", &token())
        .await
        .unwrap();

    let renamed = folder(&vault, account_id, "NewName").await;
    let untouched = folder(&vault, account_id, "PrefixSuffix").await;
    assert_eq!(renamed.id, prefix.id);
    assert_eq!(renamed.local_count, 1);
    assert_eq!(untouched.local_count, 1);
    assert!(vault
        .find_folder(account_id, "Prefix", &token())
        .await
        .unwrap()
        .is_none());

    let moved = vault.list_messages(prefix.id, &token()).await.unwrap();
    assert_eq!(moved[0].folder_path, "NewName");
    let kept = vault.list_messages(suffix.id, &token()).await.unwrap();
    assert_eq!(kept[0].folder_path, "PrefixSuffix");
}

#[tokio::test]
async fn rename_rewrites_descendants_only() {
    let vault = vault();
    let account_id = seed_account(
        &vault,
        "user@example.com",
        &[
            ("Inbox/Sub", FolderRoles::OTHER),
            ("Inbox/Sub/Deep", FolderRoles::OTHER),
            ("Inbox/Sub2", FolderRoles::OTHER),
        ],
    )
    .await;

    vault
        .update_folder_path(account_id, "inbox/sub", "Archive/Primary", &token())
        .await
        .unwrap();

    assert!(vault
        .find_folder(account_id, "Archive/Primary", &token())
        .await
        .unwrap()
        .is_some());
    let deep = folder(&vault, account_id, "Archive/Primary/Deep").await;
    assert_eq!(deep.path, "Archive/Primary/Deep");
    // Sibling sharing only a character prefix stays put.
    assert!(vault
        .find_folder(account_id, "Inbox/Sub2", &token())
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn rename_treats_wildcard_characters_literally() {
    let vault = vault();
    let account_id = seed_account(
        &vault,
        "user@example.com",
        &[
            ("pre_fix", FolderRoles::OTHER),
            ("preAfix", FolderRoles::OTHER),
            ("100% done", FolderRoles::OTHER),
        ],
    )
    .await;

    vault
        .update_folder_path(account_id, "pre_fix", "renamed", &token())
        .await
        .unwrap();
    assert!(vault
        .find_folder(account_id, "renamed", &token())
        .await
        .unwrap()
        .is_some());
    // `_` must not have matched the `A`.
    assert!(vault
        .find_folder(account_id, "preAfix", &token())
        .await
        .unwrap()
        .is_some());

    vault
        .update_folder_path(account_id, "100% done", "archived", &token())
        .await
        .unwrap();
    assert!(vault
        .find_folder(account_id, "archived", &token())
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn rename_of_missing_source_is_a_database_error() {
    let vault = vault();
    let account_id =
        seed_account(&vault, "user@example.com", &[("Inbox", FolderRoles::INBOX)]).await;
    let err = vault
        .update_folder_path(account_id, "Nope", "Other", &token())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Database);
}

// ---- message counters and duplicates ------------------------------------

#[tokio::test]
async fn batch_import_is_idempotent() {
    let vault = vault();
    let account_id =
        seed_account(&vault, "user@example.com", &[("Inbox", FolderRoles::INBOX)]).await;
    let inbox = folder(&vault, account_id, "Inbox").await;

    let batch = vec![
        message(1, 10, true, "a@b.com"),
        message(2, 20, false, "a@b.com"),
        message(3, 30, false, "a@b.com"),
    ];
    let outcome = vault
        .add_messages(inbox.id, batch.clone(), true, &token())
        .await
        .unwrap();
    assert_eq!(outcome.added.len(), 3);

    let inbox = folder(&vault, account_id, "Inbox").await;
    assert_eq!(inbox.total_count, 3);
    assert_eq!(inbox.unread_count, 2);
    assert_eq!(inbox.local_count, 3);

    // Re-adding with mutated in-memory flags changes nothing stored.
    let mut mutated = batch;
    mutated[0].read = false;
    mutated[1].read = true;
    let outcome = vault
        .add_messages(inbox.id, mutated, true, &token())
        .await
        .unwrap();
    assert_eq!(outcome.added.len(), 0);
    assert_eq!(outcome.skipped, 3);

    let inbox = folder(&vault, account_id, "Inbox").await;
    assert_eq!(inbox.total_count, 3);
    assert_eq!(inbox.unread_count, 2);
    let stored = vault.find_message(inbox.id, 1, &token()).await.unwrap().unwrap();
    assert!(stored.read);
}

#[tokio::test]
async fn sync_writes_leave_counters_alone() {
    let vault = vault();
    let account_id =
        seed_account(&vault, "user@example.com", &[("Inbox", FolderRoles::INBOX)]).await;
    let inbox = folder(&vault, account_id, "Inbox").await;

    vault
        .add_messages(inbox.id, vec![message(1, 10, false, "a@b.com")], false, &token())
        .await
        .unwrap();
    let after_add = folder(&vault, account_id, "Inbox").await;
    assert_eq!(after_add.total_count, 0);
    assert_eq!(after_add.unread_count, 0);
    assert_eq!(after_add.local_count, 1);

    vault
        .delete_messages(inbox.id, vec![1], false, &token())
        .await
        .unwrap();
    let after_delete = folder(&vault, account_id, "Inbox").await;
    assert_eq!(after_delete.total_count, 0);
    assert_eq!(after_delete.local_count, 0);
}

#[tokio::test]
async fn update_changes_external_id_but_keeps_primary_key() {
    let vault = vault();
    let account_id =
        seed_account(&vault, "user@example.com", &[("Inbox", FolderRoles::INBOX)]).await;
    let inbox = folder(&vault, account_id, "Inbox").await;
    let added = vault
        .add_message(inbox.id, message(5, 10, false, "a@b.com"), true, &token())
        .await
        .unwrap()
        .unwrap();

    let mut updated = added.clone();
    updated.external_id = 9;
    updated.read = true;
    vault.update_message(updated, true, &token()).await.unwrap();

    let reloaded = vault.find_message(inbox.id, 9, &token()).await.unwrap().unwrap();
    assert_eq!(reloaded.id, added.id);
    assert!(vault.find_message(inbox.id, 5, &token()).await.unwrap().is_none());

    // Update never moves the total; the read flip moved unread.
    let inbox = folder(&vault, account_id, "Inbox").await;
    assert_eq!(inbox.total_count, 1);
    assert_eq!(inbox.unread_count, 0);
}

#[tokio::test]
async fn update_flags_adjusts_unread_only() {
    let vault = vault();
    let account_id =
        seed_account(&vault, "user@example.com", &[("Inbox", FolderRoles::INBOX)]).await;
    let inbox = folder(&vault, account_id, "Inbox").await;
    vault
        .add_messages(
            inbox.id,
            vec![
                message(1, 10, false, "a@b.com"),
                message(2, 20, false, "a@b.com"),
            ],
            true,
            &token(),
        )
        .await
        .unwrap();

    vault
        .update_flags(inbox.id, vec![1, 2], Some(true), Some(true), true, &token())
        .await
        .unwrap();
    let inbox_after = folder(&vault, account_id, "Inbox").await;
    assert_eq!(inbox_after.total_count, 2);
    assert_eq!(inbox_after.unread_count, 0);
    let (local, unread) = vault.recount_folder(inbox.id, &token()).await.unwrap();
    assert_eq!((local, unread), (2, 0));
}

// ---- range and pagination queries ---------------------------------------

#[tokio::test]
async fn range_queries_are_order_insensitive_and_descending() {
    let vault = vault();
    let account_id =
        seed_account(&vault, "user@example.com", &[("Inbox", FolderRoles::INBOX)]).await;
    let inbox = folder(&vault, account_id, "Inbox").await;
    let batch = [1u32, 3, 5, 7, 8]
        .iter()
        .map(|&ext| message(ext, ext as i64 * 10, true, "a@b.com"))
        .collect();
    vault.add_messages(inbox.id, batch, true, &token()).await.unwrap();

    let ids = |messages: Vec<MessageEntity>| -> Vec<u32> {
        messages.into_iter().map(|m| m.external_id).collect()
    };

    let forward = vault.messages_in_range(inbox.id, 1, 9, &token()).await.unwrap();
    assert_eq!(ids(forward), vec![8, 7, 5, 3, 1]);
    let backward = vault.messages_in_range(inbox.id, 9, 1, &token()).await.unwrap();
    assert_eq!(ids(backward), vec![8, 7, 5, 3, 1]);
    let inner = vault.messages_in_range(inbox.id, 3, 7, &token()).await.unwrap();
    assert_eq!(ids(inner), vec![5, 3]);
    let empty = vault.messages_in_range(inbox.id, 7, 7, &token()).await.unwrap();
    assert!(empty.is_empty());
}

#[tokio::test]
async fn earlier_across_folders_with_equal_timestamps() {
    let vault = vault();
    let account_id = seed_account(
        &vault,
        "user@example.com",
        &[("A", FolderRoles::OTHER), ("B", FolderRoles::OTHER)],
    )
    .await;
    let folder_a = folder(&vault, account_id, "A").await;
    let folder_b = folder(&vault, account_id, "B").await;

    let stamp = 1_000i64;
    let batch_b: Vec<MessageEntity> = (1..=10u32)
        .map(|ext| {
            let mut m = message(ext, stamp, true, "a@b.com");
            m.id = ext as u64;
            m
        })
        .collect();
    let batch_a: Vec<MessageEntity> = (1..=10u32)
        .map(|ext| {
            let mut m = message(ext, stamp, true, "a@b.com");
            m.id = 100 + ext as u64;
            m
        })
        .collect();
    vault.add_messages(folder_b.id, batch_b, true, &token()).await.unwrap();
    vault.add_messages(folder_a.id, batch_a, true, &token()).await.unwrap();

    let folders = [folder_a.id, folder_b.id];
    let first = vault
        .messages_earlier_across(&folders, None, 10, &token())
        .await
        .unwrap();
    assert_eq!(
        first.iter().map(|m| m.external_id).collect::<Vec<_>>(),
        (1..=10u32).rev().collect::<Vec<_>>()
    );
    assert!(first.iter().all(|m| m.folder_id == folder_a.id));

    let sentinel = first.last().unwrap();
    let second = vault
        .messages_earlier_across(&folders, Some(sentinel), 10, &token())
        .await
        .unwrap();
    assert_eq!(
        second.iter().map(|m| m.external_id).collect::<Vec<_>>(),
        (1..=10u32).rev().collect::<Vec<_>>()
    );
    assert!(second.iter().all(|m| m.folder_id == folder_b.id));

    let oversized = vault
        .messages_earlier_across(&folders, None, 22, &token())
        .await
        .unwrap();
    assert_eq!(oversized.len(), 20);
}

// ---- contacts -----------------------------------------------------------

#[tokio::test]
async fn contact_counters_respect_role_filters() {
    let vault = vault();
    let account_id = seed_account(
        &vault,
        "user@example.com",
        &[
            ("Inbox", FolderRoles::INBOX),
            ("Junk", FolderRoles::JUNK),
            ("Trash", FolderRoles::TRASH),
            ("Important", FolderRoles::IMPORTANT),
            ("All", FolderRoles::ALL),
        ],
    )
    .await;
    vault
        .add_contact(ContactEntity::new("sender@example.com", "Sender"), &token())
        .await
        .unwrap();

    for path in ["Inbox", "Junk", "Trash", "Important", "All"] {
        let f = folder(&vault, account_id, path).await;
        vault
            .add_messages(f.id, vec![message(1, 10, false, "sender@example.com")], true, &token())
            .await
            .unwrap();
    }
    assert_eq!(
        vault.contact_unread_count("sender@example.com", &token()).await.unwrap(),
        1
    );

    for path in ["Junk", "Trash", "Important", "All"] {
        let f = folder(&vault, account_id, path).await;
        vault.delete_messages(f.id, vec![1], true, &token()).await.unwrap();
    }
    assert_eq!(
        vault.contact_unread_count("sender@example.com", &token()).await.unwrap(),
        1
    );

    let inbox = folder(&vault, account_id, "Inbox").await;
    vault.delete_messages(inbox.id, vec![1], true, &token()).await.unwrap();
    assert_eq!(
        vault.contact_unread_count("sender@example.com", &token()).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn contact_add_contracts() {
    let vault = vault();
    let err = vault
        .add_contact(ContactEntity::new("", "No Address"), &token())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    vault
        .add_contact(ContactEntity::new("c@example.com", "C"), &token())
        .await
        .unwrap();
    let err = vault
        .add_contact(ContactEntity::new("c@EXAMPLE.com", "C2"), &token())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Duplicate);
    assert!(!vault
        .try_add_contact(ContactEntity::new("c@example.com", "C3"), &token())
        .await
        .unwrap());
}

#[tokio::test]
async fn avatar_set_and_remove() {
    let vault = vault();
    vault
        .add_contact(ContactEntity::new("c@example.com", "C"), &token())
        .await
        .unwrap();
    let err = vault
        .set_contact_avatar(
            "c@example.com",
            Avatar {
                data: vec![],
                width: 0,
                height: 0,
            },
            &token(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    vault
        .set_contact_avatar(
            "c@example.com",
            Avatar {
                data: vec![1, 2, 3],
                width: 2,
                height: 2,
            },
            &token(),
        )
        .await
        .unwrap();
    let contact = vault.get_contact("c@example.com", &token()).await.unwrap();
    assert_eq!(contact.avatar.as_ref().unwrap().data, vec![1, 2, 3]);

    vault.remove_contact_avatar("c@example.com", &token()).await.unwrap();
    let contact = vault.get_contact("c@example.com", &token()).await.unwrap();
    assert!(contact.avatar.is_none());
}

#[tokio::test]
async fn unread_map_skips_junk_trash_and_drafts() {
    let vault = vault();
    let account_id = seed_account(
        &vault,
        "user@example.com",
        &[
            ("Inbox", FolderRoles::INBOX),
            ("Drafts", FolderRoles::DRAFTS),
            ("Junk", FolderRoles::JUNK),
        ],
    )
    .await;
    vault
        .add_contact(ContactEntity::new("peer@example.com", ""), &token())
        .await
        .unwrap();
    for path in ["Inbox", "Drafts", "Junk"] {
        let f = folder(&vault, account_id, path).await;
        vault
            .add_messages(f.id, vec![message(1, 5, false, "peer@example.com")], true, &token())
            .await
            .unwrap();
    }
    let map = vault.unread_by_contact(&token()).await.unwrap();
    assert_eq!(map.get("peer@EXAMPLE.COM").copied(), Some(1));
}

// ---- agents -------------------------------------------------------------

#[tokio::test]
async fn agents_hydrate_one_level_and_survive_dangling_refs() {
    let vault = vault();
    let account_id =
        seed_account(&vault, "user@example.com", &[("Inbox", FolderRoles::INBOX)]).await;

    let mut pre = AgentEntity::new("classifier", "triage incoming mail");
    pre.account_id = Some(account_id);
    let pre = vault.add_agent(pre, &token()).await.unwrap();

    let mut main = AgentEntity::new("assistant", "draft replies");
    main.pre_processor_id = Some(pre.id);
    let mut main = vault.add_agent(main, &token()).await.unwrap();
    // Self-referencing post-processor.
    main.post_processor_id = Some(main.id);
    vault.update_agent(main.clone(), &token()).await.unwrap();

    let loaded = vault.agent(main.id, &token()).await.unwrap();
    assert_eq!(loaded.pre_processor.as_ref().unwrap().id, pre.id);
    assert_eq!(loaded.post_processor.as_ref().unwrap().id, main.id);
    assert!(loaded.account.is_none());

    // Deleting a referenced agent leaves the key, clears the navigation.
    vault.delete_agent(pre.id, &token()).await.unwrap();
    let reloaded = vault.agent(main.id, &token()).await.unwrap();
    assert_eq!(reloaded.entity.pre_processor_id, Some(pre.id));
    assert!(reloaded.pre_processor.is_none());
}

// ---- settings and keys --------------------------------------------------

#[tokio::test]
async fn network_counters_increment_per_network() {
    let vault = vault();
    assert_eq!(vault.next_account_index("decnet", &token()).await.unwrap(), 0);
    assert_eq!(vault.next_account_index("decnet", &token()).await.unwrap(), 1);
    assert_eq!(vault.next_account_index("decnet.beta", &token()).await.unwrap(), 0);
    let settings = vault.settings(&token()).await.unwrap();
    assert_eq!(settings.counter("decnet"), 2);
}

#[tokio::test]
async fn key_material_roundtrips() {
    let vault = vault();
    let err = vault.master_key(&token()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    vault.set_master_key(&[9u8; 32], &token()).await.unwrap();
    assert_eq!(vault.master_key(&token()).await.unwrap(), vec![9u8; 32]);

    assert!(vault
        .key_bundle(KeyBundleKind::Public, &token())
        .await
        .unwrap()
        .is_none());
    vault
        .set_key_bundle(KeyBundleKind::Secret, b"opaque secret bundle", &token())
        .await
        .unwrap();
    assert_eq!(
        vault.key_bundle(KeyBundleKind::Secret, &token()).await.unwrap(),
        Some(b"opaque secret bundle".to_vec())
    );
}
