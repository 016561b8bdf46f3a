/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Transaction Scope Helper (§4.1). The source expresses this as a method
//! decorator that turns a transaction-requiring instance method into one
//! callable with or without a transaction kwarg. There is no decorator
//! equivalent in Rust, so this is re-architected as a higher-order helper:
//! every step is written as a closure `FnOnce(&mut dyn Txn) -> Future`, and
//! [`with_txn`] supplies the transaction — the caller's, or a freshly
//! created one that it commits on success and aborts (logging the label)
//! on failure, guaranteeing the transaction is released on every exit path.

use std::future::Future;
use std::pin::Pin;

use store::{Store, Txn};
use trc::Result;

/// The shape every transaction-scoped step closure returns: a future
/// borrowing the transaction for no longer than the step itself runs.
pub type StepFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Runs `op` against `txn` if the caller supplied one, otherwise creates a
/// transaction labeled `label`, commits it if `op` succeeds, and aborts it
/// (logging the failure under `label`) if `op` fails. The failure is
/// surfaced to the caller either way — never swallowed.
pub async fn with_txn<'a, T, F>(
    store: &(dyn Store),
    label: &'static str,
    txn: Option<&'a mut dyn Txn>,
    op: F,
) -> Result<T>
where
    T: Send,
    F: for<'b> FnOnce(&'b mut dyn Txn) -> StepFuture<'b, T> + Send,
{
    match txn {
        Some(txn) => op(txn).await,
        None => {
            let mut owned = store.new_transaction(label).await?;
            match op(owned.as_mut()).await {
                Ok(value) => {
                    owned.commit().await?;
                    Ok(value)
                }
                Err(err) => {
                    trc::event!(error, "migration step failed"; Label = label, Error = err);
                    if let Err(abort_err) = owned.abort().await {
                        trc::event!(error, "transaction abort itself failed"; Label = label, Error = abort_err);
                    }
                    Err(err)
                }
            }
        }
    }
}

#[cfg(all(test, feature = "test_mode"))]
mod tests {
    use super::*;
    use store::mem::MemStore;

    #[tokio::test]
    async fn self_created_txn_commits_on_success() {
        let mem = MemStore::new();
        let result: Result<u32> = with_txn(&mem, "test.commit", None, |txn| {
            Box::pin(async move {
                txn.set_migrating(true);
                Ok(7)
            })
        })
        .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn self_created_txn_aborts_on_failure() {
        let mem = MemStore::new();
        let result: Result<u32> = with_txn(&mem, "test.abort", None, |_txn| {
            Box::pin(async move { Err(trc::Error::new(trc::ErrorKind::StoreFailure).reason("boom")) })
        })
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn caller_supplied_txn_is_reused() {
        let mem = MemStore::new();
        let mut txn = mem.new_transaction("caller").await.unwrap();
        let result: Result<u32> = with_txn(&mem, "test.reuse", Some(txn.as_mut()), |txn| {
            Box::pin(async move {
                txn.set_migrating(true);
                Ok(9)
            })
        })
        .await;
        assert_eq!(result.unwrap(), 9);
        assert!(txn.is_migrating());
        txn.commit().await.unwrap();
    }
}
