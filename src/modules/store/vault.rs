use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use native_db::{Builder, Database};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::modules::common::gate::{HandleGate, HandleGuard};
use crate::modules::common::ensure_active;
use crate::modules::error::kind::ErrorKind;
use crate::modules::error::{MailVaultError, MailVaultResult};
use crate::modules::store::cipher::VaultCipher;
use crate::modules::store::keys::VaultVerifier;
use crate::modules::store::VAULT_MODELS;
use crate::{raise_error, utc_now};

/// The password-opened single-file store.
///
/// All open handles share one underlying database; `reset` waits on the
/// handle gate until every handle (and in-flight operation) is released
/// before deleting the backing file.
pub struct DataVault {
    path: Option<PathBuf>,
    state: Mutex<VaultState>,
    gate: Arc<HandleGate>,
    account_locks: DashMap<u64, Arc<tokio::sync::Mutex<()>>>,
}

#[derive(Default)]
struct VaultState {
    db: Option<Arc<Database<'static>>>,
    cipher: Option<Arc<VaultCipher>>,
    handles: Vec<HandleGuard>,
    resetting: bool,
}

/// A live slice of the vault handed to every store operation. Holding one
/// keeps `reset` from deleting the file underneath the operation.
pub struct VaultSession {
    pub db: Arc<Database<'static>>,
    pub cipher: Arc<VaultCipher>,
    _guard: HandleGuard,
}

impl DataVault {
    pub fn new(path: impl AsRef<std::path::Path>) -> Arc<Self> {
        Arc::new(DataVault {
            path: Some(path.as_ref().to_path_buf()),
            state: Mutex::new(VaultState::default()),
            gate: HandleGate::new(),
            account_locks: DashMap::new(),
        })
    }

    /// An opened, in-memory vault. Used by embedders that keep no file and
    /// throughout the test suite.
    pub fn ephemeral(password: &str) -> MailVaultResult<Arc<Self>> {
        let db = Builder::new()
            .create_in_memory(&VAULT_MODELS)
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
        let db = Arc::new(db);
        let cipher = Arc::new(VaultCipher::new(password));
        Self::write_verifier(&db, &cipher)?;
        let vault = Arc::new(DataVault {
            path: None,
            state: Mutex::new(VaultState::default()),
            gate: HandleGate::new(),
            account_locks: DashMap::new(),
        });
        {
            let mut state = vault.state.lock().unwrap();
            state.db = Some(db);
            state.cipher = Some(cipher);
            let guard = vault.gate.register();
            state.handles.push(guard);
        }
        Ok(vault)
    }

    /// Create the vault file. Fails if the file already exists.
    pub async fn create(&self, password: &str, token: &CancellationToken) -> MailVaultResult<()> {
        ensure_active(token)?;
        let path = self.file_path()?;
        let mut state = self.state.lock().unwrap();
        if state.resetting {
            return Err(disposed());
        }
        if state.db.is_some() || path.exists() {
            return Err(raise_error!(
                format!("Vault file already exists: {:?}", path),
                ErrorKind::Database
            ));
        }
        let db = Builder::new()
            .create(&VAULT_MODELS, &path)
            .map_err(Self::handle_database_error)?;
        let db = Arc::new(db);
        let cipher = Arc::new(VaultCipher::new(password));
        Self::write_verifier(&db, &cipher)?;
        info!("Created vault at {:?}", path);
        state.db = Some(db);
        state.cipher = Some(cipher);
        let guard = self.gate.register();
        state.handles.push(guard);
        Ok(())
    }

    /// Open a handle on the vault. Every concurrent `open` succeeds and
    /// shares the single underlying database; each must prove the password.
    pub async fn open(&self, password: &str, token: &CancellationToken) -> MailVaultResult<()> {
        ensure_active(token)?;
        let mut state = self.state.lock().unwrap();
        if state.resetting {
            return Err(disposed());
        }
        let cipher = Arc::new(VaultCipher::new(password));
        match &state.db {
            Some(db) => {
                Self::check_verifier(db, &cipher)?;
            }
            None => {
                let path = self.file_path()?;
                if !path.exists() {
                    return Err(raise_error!(
                        format!("Vault file does not exist: {:?}", path),
                        ErrorKind::Database
                    ));
                }
                let db = Builder::new()
                    .open(&VAULT_MODELS, &path)
                    .map_err(Self::handle_database_error)?;
                let db = Arc::new(db);
                Self::check_verifier(&db, &cipher)?;
                state.db = Some(db);
                state.cipher = Some(cipher);
            }
        }
        let guard = self.gate.register();
        state.handles.push(guard);
        Ok(())
    }

    /// Release one open handle. When the last handle goes, the database is
    /// closed and further operations fail with `Disposed`.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.handles.pop();
        if state.handles.is_empty() {
            state.db = None;
            state.cipher = None;
        }
    }

    /// Quiesce and delete. Blocks until every outstanding handle has been
    /// released, then removes the backing file.
    pub async fn reset(&self) -> MailVaultResult<()> {
        {
            let mut state = self.state.lock().unwrap();
            if state.resetting {
                return Err(disposed());
            }
            state.resetting = true;
        }
        self.gate.drained().await;
        let mut state = self.state.lock().unwrap();
        state.db = None;
        state.cipher = None;
        state.handles.clear();
        state.resetting = false;
        self.account_locks.clear();
        if let Some(path) = &self.path {
            if path.exists() {
                std::fs::remove_file(path)
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
                info!("Vault file removed: {:?}", path);
            }
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.db.is_some() && !state.handles.is_empty()
    }

    /// Current live slice, or `Disposed` when no handle is open.
    pub(crate) fn session(&self) -> MailVaultResult<VaultSession> {
        let state = self.state.lock().unwrap();
        if state.resetting || state.handles.is_empty() {
            return Err(disposed());
        }
        match (&state.db, &state.cipher) {
            (Some(db), Some(cipher)) => Ok(VaultSession {
                db: Arc::clone(db),
                cipher: Arc::clone(cipher),
                _guard: self.gate.register(),
            }),
            _ => Err(disposed()),
        }
    }

    /// Per-account logical lock: counter-updating writes for one account
    /// are serialized through this.
    pub(crate) fn account_lock(&self, account_id: u64) -> Arc<tokio::sync::Mutex<()>> {
        self.account_locks
            .entry(account_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn file_path(&self) -> MailVaultResult<PathBuf> {
        self.path.clone().ok_or_else(|| {
            raise_error!(
                "In-memory vault has no backing file".into(),
                ErrorKind::Database
            )
        })
    }

    fn write_verifier(db: &Arc<Database<'static>>, cipher: &VaultCipher) -> MailVaultResult<()> {
        let rw = db
            .rw_transaction()
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
        rw.insert(VaultVerifier {
            check: cipher.make_verifier()?,
            created_at: utc_now!(),
        })
        .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
        rw.commit()
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
        Ok(())
    }

    fn check_verifier(db: &Arc<Database<'static>>, cipher: &VaultCipher) -> MailVaultResult<()> {
        let r = db
            .r_transaction()
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
        let verifier: Option<VaultVerifier> = r
            .get()
            .primary("verifier".to_string())
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorKind::Database))?;
        match verifier {
            Some(row) => cipher.verify(&row.check),
            None => Err(raise_error!(
                "Vault file carries no password verifier".into(),
                ErrorKind::Database
            )),
        }
    }

    fn handle_database_error(error: native_db::db_type::Error) -> MailVaultError {
        match error {
            native_db::db_type::Error::RedbDatabaseError(database_error) => match database_error {
                redb::DatabaseError::DatabaseAlreadyOpen => {
                    warn!("Vault file is locked by another process");
                    raise_error!(
                        "Vault is already open by another instance".into(),
                        ErrorKind::Database
                    )
                }
                other => {
                    raise_error!(format!("Vault error: {:?}", other), ErrorKind::Database)
                }
            },
            other => {
                raise_error!(
                    format!("Failed to open vault: {:?}", other),
                    ErrorKind::Database
                )
            }
        }
    }
}

fn disposed() -> MailVaultError {
    raise_error!(
        "Vault handle has been released".into(),
        ErrorKind::Disposed
    )
}
