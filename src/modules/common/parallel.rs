use std::{future::Future, sync::Arc};
use tokio::sync::Semaphore;

use crate::{
    modules::error::{kind::ErrorKind, MailVaultResult},
    raise_error,
};

/// Run `f` over `iter` with bounded concurrency, returning every per-item
/// outcome. Fan-out callers decide what partial failure means.
pub async fn run_collect<I, Item, Fut, F, O>(
    concurrency: usize,
    iter: I,
    f: F,
) -> MailVaultResult<Vec<MailVaultResult<O>>>
where
    I: IntoIterator<Item = Item>,
    Item: Send + 'static,
    Fut: Future<Output = MailVaultResult<O>> + Send + 'static,
    F: Fn(Item) -> Fut + Send + Sync + 'static,
    O: Send + 'static,
{
    let sem = Arc::new(Semaphore::new(concurrency));
    let f = Arc::new(f);
    let mut handles = Vec::new();

    for item in iter {
        let permit = sem.clone().acquire_owned().await.map_err(|e| {
            raise_error!(
                format!("Failed to acquire semaphore: {e}"),
                ErrorKind::Database
            )
        })?;
        let f = f.clone();

        handles.push(tokio::spawn(async move {
            let res = f(item).await;
            drop(permit);
            res
        }));
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        let res = handle.await.map_err(|e| {
            raise_error!(
                format!("Task panicked or was cancelled: {e}"),
                ErrorKind::Database
            )
        })?;
        results.push(res);
    }

    Ok(results)
}
