/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Delegate Reconciler (§4.6). Three independent sub-steps, each in its
//! own transaction. Delegate rows are keyed by directory uid, not by home
//! id, so no fake uid stands in for the migrating user here — the real
//! `diruid` from the directory record is used directly, same as it will be
//! once switchover renames the home back to it.

use conduit::Conduit;
use directory::DirectoryRecord;
use store::DestinationStore;
use trc::{AddContext, Result};

use crate::txn_scope::with_txn;

/// **individual**: copied verbatim.
async fn sync_individual_delegates(store: &dyn DestinationStore, conduit: &dyn Conduit, record: &DirectoryRecord) -> Result<()> {
    let rows = conduit.dump_individual_delegates(record).await?;
    with_txn(store, "migration.delegate.individual", None, move |txn: &mut dyn store::Txn| {
        Box::pin(async move {
            for row in rows {
                store.insert_individual_delegate(txn, row).await.caused_by(trc::location!())?;
            }
            Ok(())
        })
    })
    .await
}

/// **group**: each `(delegator, group)` resolves the group by directory
/// uid locally (creating it if this pod has never seen it) before insert.
async fn sync_group_delegates(store: &dyn DestinationStore, conduit: &dyn Conduit, record: &DirectoryRecord) -> Result<()> {
    let rows = conduit.dump_group_delegates(record).await?;
    with_txn(store, "migration.delegate.group", None, move |txn: &mut dyn store::Txn| {
        Box::pin(async move {
            for row in rows {
                let group_id = store.group_by_uid(txn, &row.group_uid).await.caused_by(trc::location!())?;
                store
                    .insert_group_delegate(txn, &row.delegator_uid, group_id, row.read_write)
                    .await
                    .caused_by(trc::location!())?;
            }
            Ok(())
        })
    })
    .await
}

/// **external**: copied verbatim.
async fn sync_external_delegates(store: &dyn DestinationStore, conduit: &dyn Conduit, record: &DirectoryRecord) -> Result<()> {
    let rows = conduit.dump_external_delegates(record).await?;
    with_txn(store, "migration.delegate.external", None, move |txn: &mut dyn store::Txn| {
        Box::pin(async move {
            for row in rows {
                store.insert_external_delegate(txn, row).await.caused_by(trc::location!())?;
            }
            Ok(())
        })
    })
    .await
}

/// The full delegate reconcile pass, run once during `RECONCILE`.
pub async fn sync_delegates(store: &dyn DestinationStore, conduit: &dyn Conduit, record: &DirectoryRecord) -> Result<()> {
    sync_individual_delegates(store, conduit, record).await?;
    sync_group_delegates(store, conduit, record).await?;
    sync_external_delegates(store, conduit, record).await
}

#[cfg(all(test, feature = "test_mode"))]
mod tests {
    use super::*;
    use conduit::mem::MemConduit;
    use store::mem::MemStore;
    use types::delegate::{ExternalDelegateRecord, GroupDelegateRecord, IndividualDelegateRecord};

    #[tokio::test]
    async fn copies_all_three_kinds() {
        let store = MemStore::new();
        let conduit = MemConduit::new();
        conduit.seed_individual_delegate(
            "user42",
            IndividualDelegateRecord { delegator_uid: "user42".into(), delegate_uid: "assistant1".into(), read_write: true },
        );
        conduit.seed_group_delegate(
            "user42",
            GroupDelegateRecord { delegator_uid: "user42".into(), group_uid: "team-leads".into(), read_write: false },
        );
        conduit.seed_external_delegate(
            "user42",
            ExternalDelegateRecord { delegator_uid: "user42".into(), external_uid: "ext-1".into(), read_write: true },
        );

        let record = DirectoryRecord::new("user42", false);
        sync_delegates(&store, &conduit, &record).await.unwrap();

        assert_eq!(store.individual_delegates().len(), 1);
        let groups = store.group_delegates();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].0, "user42");
        assert!(!groups[0].2);
        assert_eq!(store.external_delegates().len(), 1);
    }
}
