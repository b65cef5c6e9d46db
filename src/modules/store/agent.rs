use native_db::*;
use native_model::{native_model, Model};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::modules::common::ensure_active;
use crate::modules::error::kind::ErrorKind;
use crate::modules::error::MailVaultResult;
use crate::modules::store::account::{AccountEntity, AccountEntityKey};
use crate::modules::store::vault::DataVault;
use crate::modules::store::{list_all_impl, secondary_find_impl, with_read, with_transaction};
use crate::{id, raise_error, utc_now};

/// AI agent row. Relations are stored as ids only; hydration is one level
/// deep and never recursive.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[native_model(id = 7, version = 1)]
#[native_db(primary_key(pk -> String))]
pub struct AgentEntity {
    #[secondary_key(unique)]
    pub id: u64,
    pub name: String,
    /// Free-form behavior instructions handed to the agent runtime.
    pub instructions: String,
    pub account_id: Option<u64>,
    pub pre_processor_id: Option<u64>,
    pub post_processor_id: Option<u64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl AgentEntity {
    fn pk(&self) -> String {
        format!("{:020}", self.id)
    }

    pub fn new(name: &str, instructions: &str) -> Self {
        AgentEntity {
            id: id!(64),
            name: name.into(),
            instructions: instructions.into(),
            created_at: utc_now!(),
            updated_at: utc_now!(),
            ..Default::default()
        }
    }
}

/// Shallow-loaded agent: navigation properties are hydrated one level; a
/// dangling foreign key leaves the id in place and the property `None`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Agent {
    pub entity: AgentEntity,
    pub account: Option<AccountEntity>,
    pub pre_processor: Option<AgentEntity>,
    pub post_processor: Option<AgentEntity>,
}

fn hydrate_in_tx(
    r: &native_db::transaction::RTransaction,
    entity: AgentEntity,
) -> MailVaultResult<Agent> {
    let account = match entity.account_id {
        Some(account_id) => r
            .get()
            .secondary::<AccountEntity>(AccountEntityKey::id, account_id)
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?,
        None => None,
    };
    let lookup = |agent_id: Option<u64>| -> MailVaultResult<Option<AgentEntity>> {
        match agent_id {
            // An agent may reference itself; the hydrated copy is the raw
            // row either way, so no recursion is possible.
            Some(agent_id) => r
                .get()
                .secondary::<AgentEntity>(AgentEntityKey::id, agent_id)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database)),
            None => Ok(None),
        }
    };
    let pre_processor = lookup(entity.pre_processor_id)?;
    let post_processor = lookup(entity.post_processor_id)?;
    Ok(Agent {
        entity,
        account,
        pre_processor,
        post_processor,
    })
}

impl DataVault {
    pub async fn add_agent(
        &self,
        mut agent: AgentEntity,
        token: &CancellationToken,
    ) -> MailVaultResult<AgentEntity> {
        ensure_active(token)?;
        let session = self.session()?;
        if agent.id == 0 {
            agent.id = id!(64);
        }
        with_transaction(&session.db, move |rw| {
            rw.insert(agent.clone())
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
            Ok(agent)
        })
        .await
    }

    /// Load one agent with one level of navigation hydrated.
    pub async fn agent(&self, agent_id: u64, token: &CancellationToken) -> MailVaultResult<Agent> {
        ensure_active(token)?;
        let session = self.session()?;
        with_read(&session.db, move |r| {
            let entity: Option<AgentEntity> = r
                .get()
                .secondary(AgentEntityKey::id, agent_id)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
            let entity = entity.ok_or_else(|| {
                raise_error!(
                    format!("Agent with id '{agent_id}' not found"),
                    ErrorKind::NotFound
                )
            })?;
            hydrate_in_tx(r, entity)
        })
        .await
    }

    pub async fn agents(&self, token: &CancellationToken) -> MailVaultResult<Vec<Agent>> {
        ensure_active(token)?;
        let session = self.session()?;
        let entities: Vec<AgentEntity> = list_all_impl(&session.db).await?;
        with_read(&session.db, move |r| {
            entities
                .into_iter()
                .map(|entity| hydrate_in_tx(r, entity))
                .collect()
        })
        .await
    }

    pub async fn update_agent(
        &self,
        agent: AgentEntity,
        token: &CancellationToken,
    ) -> MailVaultResult<()> {
        ensure_active(token)?;
        let session = self.session()?;
        with_transaction(&session.db, move |rw| {
            let existing: Option<AgentEntity> = rw
                .get()
                .secondary(AgentEntityKey::id, agent.id)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
            let existing = existing.ok_or_else(|| {
                raise_error!(
                    format!("Agent with id '{}' not found", agent.id),
                    ErrorKind::NotFound
                )
            })?;
            let mut updated = agent;
            updated.created_at = existing.created_at;
            updated.updated_at = utc_now!();
            rw.update(existing, updated)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
            Ok(())
        })
        .await
    }

    /// Delete an agent row. Rows referencing it keep their foreign keys;
    /// those hydrate as `None` from now on.
    pub async fn delete_agent(
        &self,
        agent_id: u64,
        token: &CancellationToken,
    ) -> MailVaultResult<()> {
        ensure_active(token)?;
        let session = self.session()?;
        with_transaction(&session.db, move |rw| {
            let existing: Option<AgentEntity> = rw
                .get()
                .secondary(AgentEntityKey::id, agent_id)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
            let existing = existing.ok_or_else(|| {
                raise_error!(
                    format!("Agent with id '{agent_id}' not found"),
                    ErrorKind::NotFound
                )
            })?;
            rw.remove(existing)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
            Ok(())
        })
        .await
    }

    pub async fn find_agent_entity(
        &self,
        agent_id: u64,
        token: &CancellationToken,
    ) -> MailVaultResult<Option<AgentEntity>> {
        ensure_active(token)?;
        let session = self.session()?;
        secondary_find_impl(&session.db, AgentEntityKey::id, agent_id).await
    }
}
