use async_trait::async_trait;

use crate::modules::error::kind::ErrorKind;
use crate::modules::error::{MailVaultError, MailVaultResult};
use crate::raise_error;

/// One decentralized storage server.
///
/// Implementations live outside this crate (HTTP, test doubles). The DEC
/// mailbox treats a set of clients as a multiset: side-effectful calls need
/// at least one success, reads take the union of what every reachable
/// client returns.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Store a blob; returns its content hash.
    async fn put(&self, data: Vec<u8>) -> MailVaultResult<String>;

    /// Enqueue a content hash on a mailbox.
    async fn send(&self, mailbox_id: &str, content_hash: &str) -> MailVaultResult<()>;

    /// Content hashes queued on a mailbox.
    async fn list(&self, mailbox_id: &str) -> MailVaultResult<Vec<String>>;

    /// Fetch a blob by content hash.
    async fn get(&self, mailbox_id: &str, content_hash: &str) -> MailVaultResult<Vec<u8>>;

    /// Bind a canonical name to a public key; returns the key the name is
    /// bound to after the call (which may be an earlier claimant's).
    async fn claim_name(
        &self,
        canonical_name: &str,
        public_key: &str,
        signature: &[u8],
    ) -> MailVaultResult<String>;

    /// Resolve a canonical name to a decentralized address.
    async fn get_address_by_name(&self, name: &str) -> MailVaultResult<String>;
}

/// Normalize a client failure at the DEC boundary: whatever transport
/// detail the client surfaced becomes a `Connection` error; cancellation
/// passes through untouched.
pub fn remap_transport(error: MailVaultError) -> MailVaultError {
    match error.kind() {
        ErrorKind::Canceled | ErrorKind::Connection => error,
        _ => raise_error!(format!("{}", error), ErrorKind::Connection),
    }
}

/// Collapse fan-out results: at least one success keeps the operation
/// alive; a unanimous failure is a decentralized-transport error.
pub fn require_any_success<T>(
    operation: &str,
    results: Vec<MailVaultResult<T>>,
) -> MailVaultResult<Vec<T>> {
    let total = results.len();
    let mut successes = Vec::with_capacity(total);
    let mut canceled = None;
    for result in results {
        match result {
            Ok(value) => successes.push(value),
            Err(e) if e.kind() == ErrorKind::Canceled => canceled = Some(e),
            Err(e) => {
                tracing::warn!("Storage client failed during {}: {}", operation, e);
            }
        }
    }
    if let Some(canceled) = canceled {
        return Err(canceled);
    }
    if successes.is_empty() && total > 0 {
        return Err(raise_error!(
            format!("All {} storage clients failed during {}", total, operation),
            ErrorKind::DecentralizedTransport
        ));
    }
    Ok(successes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_failure_keeps_successes() {
        let results: Vec<MailVaultResult<u32>> = vec![
            Err(raise_error!("boom".into(), ErrorKind::Connection)),
            Ok(7),
            Err(raise_error!("boom".into(), ErrorKind::Connection)),
        ];
        assert_eq!(require_any_success("list", results).unwrap(), vec![7]);
    }

    #[test]
    fn unanimous_failure_is_transport_error() {
        let results: Vec<MailVaultResult<u32>> = vec![
            Err(raise_error!("boom".into(), ErrorKind::Connection)),
            Err(raise_error!("boom".into(), ErrorKind::Connection)),
        ];
        let err = require_any_success("send", results).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DecentralizedTransport);
    }

    #[test]
    fn transport_remap_preserves_cancellation() {
        let canceled = raise_error!("canceled".into(), ErrorKind::Canceled);
        assert_eq!(remap_transport(canceled).kind(), ErrorKind::Canceled);
        let http = raise_error!("502 bad gateway".into(), ErrorKind::Database);
        assert_eq!(remap_transport(http).kind(), ErrorKind::Connection);
    }
}
