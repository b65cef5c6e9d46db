use std::collections::BTreeMap;

use native_db::*;
use native_model::{native_model, Model};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::modules::common::{ensure_active, normalize_address};
use crate::modules::error::kind::ErrorKind;
use crate::modules::error::MailVaultResult;
use crate::modules::store::address::MessageAddressEntity;
use crate::modules::store::vault::DataVault;
use crate::modules::store::{list_all_impl, secondary_find_impl, with_transaction};
use crate::{id, raise_error, utc_now};

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct Avatar {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Pointer at the newest message a contact participates in.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct LastMessageRef {
    /// Address of the local account the message lives under.
    pub account_address: String,
    pub message_id: u64,
    pub date: i64,
}

impl LastMessageRef {
    /// Strictly-newer comparison by `(date, id)`.
    pub fn is_newer_than(&self, other: &LastMessageRef) -> bool {
        (self.date, self.message_id) > (other.date, other.message_id)
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[native_model(id = 6, version = 1)]
#[native_db(
    primary_key(pk -> String),
    secondary_key(address_key -> String, unique)
)]
pub struct ContactEntity {
    #[secondary_key(unique)]
    pub id: u64,
    /// Display form; identity is the normalized address.
    pub address: String,
    pub display_name: String,
    pub avatar: Option<Avatar>,
    pub last_message: Option<LastMessageRef>,
    /// Auto-maintained by the message write paths.
    pub unread_count: u32,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ContactEntity {
    fn pk(&self) -> String {
        format!("{:020}", self.id)
    }

    fn address_key(&self) -> String {
        normalize_address(&self.address)
    }

    pub fn new(address: &str, display_name: &str) -> Self {
        ContactEntity {
            id: id!(64),
            address: address.into(),
            display_name: display_name.into(),
            created_at: utc_now!(),
            updated_at: utc_now!(),
            ..Default::default()
        }
    }
}

impl DataVault {
    /// Add a contact; a contact without an address is rejected, a duplicate
    /// fails with `Duplicate`.
    pub async fn add_contact(
        &self,
        mut contact: ContactEntity,
        token: &CancellationToken,
    ) -> MailVaultResult<ContactEntity> {
        ensure_active(token)?;
        if contact.address.is_empty() {
            return Err(raise_error!(
                "Contact address cannot be empty".into(),
                ErrorKind::InvalidArgument
            ));
        }
        let session = self.session()?;
        if contact.id == 0 {
            contact.id = id!(64);
        }
        with_transaction(&session.db, move |rw| {
            let existing: Option<ContactEntity> = rw
                .get()
                .secondary(ContactEntityKey::address_key, contact.address_key())
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
            if existing.is_some() {
                return Err(raise_error!(
                    format!("Contact '{}' already exists", contact.address),
                    ErrorKind::Duplicate
                ));
            }
            rw.insert(contact.clone())
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
            Ok(contact)
        })
        .await
    }

    /// Duplicate-tolerant add: `false` when the address is already taken.
    pub async fn try_add_contact(
        &self,
        contact: ContactEntity,
        token: &CancellationToken,
    ) -> MailVaultResult<bool> {
        match self.add_contact(contact, token).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::Duplicate => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn find_contact(
        &self,
        address: &str,
        token: &CancellationToken,
    ) -> MailVaultResult<Option<ContactEntity>> {
        ensure_active(token)?;
        let session = self.session()?;
        secondary_find_impl(
            &session.db,
            ContactEntityKey::address_key,
            normalize_address(address),
        )
        .await
    }

    pub async fn get_contact(
        &self,
        address: &str,
        token: &CancellationToken,
    ) -> MailVaultResult<ContactEntity> {
        self.find_contact(address, token).await?.ok_or_else(|| {
            raise_error!(
                format!("Contact '{}' not found", address),
                ErrorKind::NotFound
            )
        })
    }

    pub async fn contacts(&self, token: &CancellationToken) -> MailVaultResult<Vec<ContactEntity>> {
        ensure_active(token)?;
        let session = self.session()?;
        list_all_impl(&session.db).await
    }

    pub async fn contact_exists(
        &self,
        address: &str,
        token: &CancellationToken,
    ) -> MailVaultResult<bool> {
        Ok(self.find_contact(address, token).await?.is_some())
    }

    /// Rewrite a contact's mutable attributes; the normalized address stays
    /// the identity.
    pub async fn update_contact(
        &self,
        contact: ContactEntity,
        token: &CancellationToken,
    ) -> MailVaultResult<()> {
        ensure_active(token)?;
        let session = self.session()?;
        with_transaction(&session.db, move |rw| {
            let existing: Option<ContactEntity> = rw
                .get()
                .secondary(ContactEntityKey::address_key, contact.address_key())
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
            let existing = existing.ok_or_else(|| {
                raise_error!(
                    format!("Contact '{}' not found", contact.address),
                    ErrorKind::NotFound
                )
            })?;
            let mut updated = existing.clone();
            updated.display_name = contact.display_name;
            updated.last_message = contact.last_message;
            updated.unread_count = contact.unread_count;
            updated.updated_at = utc_now!();
            rw.update(existing, updated)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
            Ok(())
        })
        .await
    }

    pub async fn set_contact_avatar(
        &self,
        address: &str,
        avatar: Avatar,
        token: &CancellationToken,
    ) -> MailVaultResult<()> {
        if avatar.data.is_empty() {
            return Err(raise_error!(
                "Avatar image data cannot be empty".into(),
                ErrorKind::InvalidArgument
            ));
        }
        self.replace_avatar(address, Some(avatar), token).await
    }

    pub async fn remove_contact_avatar(
        &self,
        address: &str,
        token: &CancellationToken,
    ) -> MailVaultResult<()> {
        self.replace_avatar(address, None, token).await
    }

    async fn replace_avatar(
        &self,
        address: &str,
        avatar: Option<Avatar>,
        token: &CancellationToken,
    ) -> MailVaultResult<()> {
        ensure_active(token)?;
        let session = self.session()?;
        let address_key = normalize_address(address);
        let not_found = format!("Contact '{}' not found", address);
        with_transaction(&session.db, move |rw| {
            let existing: Option<ContactEntity> = rw
                .get()
                .secondary(ContactEntityKey::address_key, address_key)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
            let existing =
                existing.ok_or_else(|| raise_error!(not_found, ErrorKind::NotFound))?;
            let mut updated = existing.clone();
            updated.avatar = avatar;
            updated.updated_at = utc_now!();
            rw.update(existing, updated)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
            Ok(())
        })
        .await
    }

    pub async fn remove_contact(
        &self,
        address: &str,
        token: &CancellationToken,
    ) -> MailVaultResult<()> {
        ensure_active(token)?;
        let session = self.session()?;
        let address_key = normalize_address(address);
        let not_found = format!("Contact '{}' not found", address);
        with_transaction(&session.db, move |rw| {
            let existing: Option<ContactEntity> = rw
                .get()
                .secondary(ContactEntityKey::address_key, address_key)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
            let existing =
                existing.ok_or_else(|| raise_error!(not_found, ErrorKind::NotFound))?;
            rw.remove(existing)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
            Ok(())
        })
        .await
    }

    /// Stored unread counter of one contact.
    pub async fn contact_unread_count(
        &self,
        address: &str,
        token: &CancellationToken,
    ) -> MailVaultResult<u32> {
        Ok(self.get_contact(address, token).await?.unread_count)
    }

    /// Live unread aggregate per contact across every folder that is not
    /// junk, trash or drafts, computed from the address rows.
    pub async fn unread_by_contact(
        &self,
        token: &CancellationToken,
    ) -> MailVaultResult<BTreeMap<String, u32>> {
        ensure_active(token)?;
        let session = self.session()?;
        let contacts: Vec<ContactEntity> = list_all_impl(&session.db).await?;
        let mut map: BTreeMap<String, u32> = contacts
            .into_iter()
            .map(|c| (c.address_key(), 0))
            .collect();
        let rows: Vec<MessageAddressEntity> = list_all_impl(&session.db).await?;
        for row in rows {
            if !row.unread || !row.folder_roles.counts_toward_unread_map() {
                continue;
            }
            if let Some(count) = map.get_mut(&row.address) {
                *count += 1;
            }
        }
        Ok(map)
    }
}
