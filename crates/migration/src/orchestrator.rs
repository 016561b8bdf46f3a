/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Migration Orchestrator (§4.7). The top-level state machine: sequences
//! the calendar list, object, attachment, and delegate reconcilers across
//! the eight phases of §4.7 and enforces the downtime contract of §5.

use std::future::Future;

use conduit::Conduit;
use directory::{DirectoryRecord, DirectoryService};
use serde::Deserialize;
use store::DestinationStore;
use trc::{AddContext, ErrorKind, Result};
use types::{migrating_owner_key, MigrationPhase};

use crate::remote_home::RemoteHomeProxy;
use crate::txn_scope::with_txn;
use crate::{attachment, calendar_list, delegate};

fn default_batch_size() -> usize {
    store::BATCH_SIZE
}

fn default_retries() -> u32 {
    5
}

fn default_backoff_ms() -> u64 {
    100
}

/// Lock-retry backoff for transient store contention. The core itself
/// never retries internally (§5 treats a failed self-created transaction
/// as a first-class failure) — this is read by whatever resumes
/// `migrate_here` after a `StoreFailure`.
#[derive(Debug, Clone, Deserialize)]
pub struct LockRetryConfig {
    #[serde(default = "default_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for LockRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

/// The handful of knobs the core actually needs, loaded the way the
/// teacher loads its own settings: a plain `serde`-deserializable struct
/// with defaults, no bespoke parser.
#[derive(Debug, Clone, Deserialize)]
pub struct MigrationConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub lock_retry: LockRetryConfig,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            lock_retry: LockRetryConfig::default(),
        }
    }
}

/// Drives one user's migration to completion. Built fresh per migration;
/// holds no state across calls to [`Orchestrator::migrate_here`] beyond
/// what's passed in.
pub struct Orchestrator<'a> {
    store: &'a dyn DestinationStore,
    conduit: &'a dyn Conduit,
    directory: &'a dyn DirectoryService,
    #[allow(dead_code)]
    config: MigrationConfig,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        store: &'a dyn DestinationStore,
        conduit: &'a dyn Conduit,
        directory: &'a dyn DirectoryService,
        config: MigrationConfig,
    ) -> Self {
        Self { store, conduit, directory, config }
    }

    /// `migrateHere(diruid)`: the single entry point, driving the
    /// eight-phase state machine in order.
    pub async fn migrate_here(&self, diruid: &str) -> Result<()> {
        let record = self.run_phase(MigrationPhase::Init, self.init(diruid)).await?;
        let migrating_uid = migrating_owner_key(diruid);

        self.run_phase(MigrationPhase::BulkSync, self.sync(&record, &migrating_uid)).await?;
        self.run_phase(MigrationPhase::WarmSync, self.sync(&record, &migrating_uid)).await?;
        self.run_phase(MigrationPhase::DisableSource, self.disable_source(&record)).await?;
        self.run_phase(MigrationPhase::FinalSync, self.sync(&record, &migrating_uid)).await?;
        self.run_phase(MigrationPhase::Reconcile, self.reconcile(&record, &migrating_uid)).await?;
        self.run_phase(MigrationPhase::EnableDestination, self.enable_destination(diruid, &migrating_uid))
            .await?;
        self.run_phase(MigrationPhase::PurgeSource, self.purge_source(&record)).await?;
        Ok(())
    }

    /// Runs one phase, logging and (past `DISABLE_SOURCE`) flagging that a
    /// compensating rollback is needed on failure. The compensation itself
    /// — re-enabling the remote home, restoring shared state on it — is
    /// deliberately left unautomated: the conduit exposes `disable_home`
    /// but no inverse, the same unimplemented-placeholder shape the design
    /// notes call out, and the spec asks implementers not to invent the
    /// semantics rather than guess at them.
    async fn run_phase<T>(&self, phase: MigrationPhase, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match fut.await {
            Ok(value) => Ok(value),
            Err(err) => {
                trc::event!(error, "migration phase failed"; Phase = phase.as_str(), Error = err);
                if phase.requires_compensation_on_failure() {
                    trc::event!(error, "phase requires a compensating rollback"; Phase = phase.as_str());
                }
                Err(err)
            }
        }
    }

    async fn init(&self, diruid: &str) -> Result<DirectoryRecord> {
        let record = self
            .directory
            .record_with_uid(diruid)
            .await
            .caused_by(trc::location!())?
            .ok_or_else(|| trc::Error::new(ErrorKind::DirectoryRecordNotFound).reason(format!("no directory record for {diruid}")))
            .caused_by(trc::location!())?;
        if record.this_server() {
            return Err(trc::Error::new(ErrorKind::InvalidTarget)
                .reason(format!("{diruid} already resident on this pod"))
                .caused_by(trc::location!()));
        }
        Ok(record)
    }

    /// One full `sync()` pass: ensure the local home exists, sync the
    /// calendar list and home metadata, sync the attachment table, then
    /// transfer any attachment blobs it marked as needed. Run three times
    /// (BULK_SYNC, WARM_SYNC, FINAL_SYNC) per §4.7.
    async fn sync(&self, record: &DirectoryRecord, migrating_uid: &str) -> Result<()> {
        let diruid = record.uid();
        let home_id = calendar_list::prepare_calendar_home(self.store, diruid).await?;

        let Some(remote) = RemoteHomeProxy::new(self.conduit, record).await? else {
            trc::event!(warn, "remote home unavailable, treating sync pass as a no-op"; User = diruid);
            return Ok(());
        };

        calendar_list::sync_calendar_list(self.store, &remote, home_id, migrating_uid).await?;
        calendar_list::sync_home_metadata(self.store, &remote, migrating_uid).await?;

        let (needing_blob, _removed) = attachment::sync_attachment_table(self.store, &remote, home_id, migrating_uid).await?;
        for local_attachment_id in needing_blob {
            attachment::sync_attachment_data(self.store, &remote, home_id, migrating_uid, local_attachment_id).await?;
        }
        Ok(())
    }

    /// `DISABLE_SOURCE`: marks the remote home disabled. From here on,
    /// failures require the compensating rollback noted on [`Self::run_phase`].
    async fn disable_source(&self, record: &DirectoryRecord) -> Result<()> {
        let remote_home_id = self
            .conduit
            .send_home_resource_id(record)
            .await
            .caused_by(trc::location!())?
            .ok_or_else(|| trc::Error::new(ErrorKind::RemoteUnavailable).reason("remote home missing at disable"))
            .caused_by(trc::location!())?;
        self.conduit.disable_home(remote_home_id).await.caused_by(trc::location!())
    }

    /// `RECONCILE`: link rebinding (needs both id maps fully populated by
    /// the final sync pass) and delegate reconcile. Shared-collection,
    /// group attendee/sharee, notification, and work-item reconcile are
    /// explicit extension points left unimplemented, per the design notes.
    async fn reconcile(&self, record: &DirectoryRecord, migrating_uid: &str) -> Result<()> {
        let diruid = record.uid();
        let home_id = calendar_list::prepare_calendar_home(self.store, diruid).await?;
        let remote = RemoteHomeProxy::new(self.conduit, record)
            .await?
            .ok_or_else(|| trc::Error::new(ErrorKind::RemoteUnavailable).reason("remote home unavailable during reconcile"))
            .caused_by(trc::location!())?;

        attachment::link_attachments(self.store, &remote, home_id, migrating_uid).await?;
        delegate::sync_delegates(self.store, self.conduit, record).await
    }

    /// `ENABLE_DESTINATION`: the destination half of switchover (I1).
    async fn enable_destination(&self, diruid: &str, migrating_uid: &str) -> Result<()> {
        let store = self.store;
        let diruid = diruid.to_string();
        let migrating_uid = migrating_uid.to_string();
        with_txn(store, "migration.home.enable", None, move |txn: &mut dyn store::Txn| {
            Box::pin(async move { store.rename_home_owner(txn, &migrating_uid, &diruid).await.caused_by(trc::location!()) })
        })
        .await
    }

    /// `PURGE_SOURCE`: removes all old data on the remote pod. A missing
    /// remote home at this point is not a failure — it simply means
    /// there's nothing left to purge.
    async fn purge_source(&self, record: &DirectoryRecord) -> Result<()> {
        let Some(remote_home_id) = self.conduit.send_home_resource_id(record).await.caused_by(trc::location!())? else {
            return Ok(());
        };
        self.conduit.purge_home(remote_home_id).await.caused_by(trc::location!())
    }
}

#[cfg(all(test, feature = "test_mode"))]
mod tests {
    use super::*;
    use conduit::mem::MemConduit;
    use directory::mem::MemDirectory;
    use store::mem::MemStore;
    use store::{Calendar, Home, Store};

    async fn seed_remote_user(conduit: &MemConduit, uid: &str) -> u32 {
        let mut txn = conduit.remote_store().new_transaction("seed").await.unwrap();
        let home = conduit.remote_store().calendar_home_with_uid(txn.as_mut(), uid, true, None).await.unwrap().unwrap();
        let home_id = home.id();
        txn.commit().await.unwrap();
        conduit.remote_store().seed_calendar(uid, 10, "work", true);
        let mut txn = conduit.remote_store().new_transaction("seed_objects").await.unwrap();
        let home = conduit.remote_store().calendar_home_with_uid(txn.as_mut(), uid, false, None).await.unwrap().unwrap();
        let calendar = home.child_with_id(txn.as_mut(), 10).await.unwrap().unwrap();
        calendar.create_object_raw(txn.as_mut(), "e1.ics", b"EVENT1".to_vec(), "x".into()).await.unwrap();
        calendar.create_object_raw(txn.as_mut(), "e2.ics", b"EVENT2".to_vec(), "y".into()).await.unwrap();
        txn.commit().await.unwrap();
        home_id
    }

    #[tokio::test]
    async fn unknown_user_is_directory_record_not_found() {
        let store = MemStore::new();
        let conduit = MemConduit::new();
        let directory = MemDirectory::new();
        let orchestrator = Orchestrator::new(&store, &conduit, &directory, MigrationConfig::default());
        let err = orchestrator.migrate_here("nobody").await.unwrap_err();
        assert!(err.is(trc::ErrorKind::DirectoryRecordNotFound));
    }

    #[tokio::test]
    async fn resident_user_is_invalid_target() {
        let store = MemStore::new();
        let conduit = MemConduit::new();
        let directory = MemDirectory::new();
        directory.add_user("user42", true);
        let orchestrator = Orchestrator::new(&store, &conduit, &directory, MigrationConfig::default());
        let err = orchestrator.migrate_here("user42").await.unwrap_err();
        assert!(err.is(trc::ErrorKind::InvalidTarget));
    }

    #[tokio::test]
    async fn full_migration_moves_calendar_and_objects() {
        let store = MemStore::new();
        let conduit = MemConduit::new();
        let directory = MemDirectory::new();
        directory.add_user("user42", false);
        let remote_home_id = seed_remote_user(&conduit, "user42").await;

        let orchestrator = Orchestrator::new(&store, &conduit, &directory, MigrationConfig::default());
        orchestrator.migrate_here("user42").await.unwrap();

        let mut txn = store.new_transaction("assert").await.unwrap();
        let home = store.calendar_home_with_uid(txn.as_mut(), "user42", false, None).await.unwrap().unwrap();
        let calendars = home.load_children(txn.as_mut()).await.unwrap();
        assert_eq!(calendars.len(), 1);
        let objects = calendars[0]
            .object_resources_with_names(txn.as_mut(), &["e1.ics".to_string(), "e2.ics".to_string()])
            .await
            .unwrap();
        assert_eq!(objects.len(), 2);
        assert!(conduit.remote_store().is_home_disabled(remote_home_id));
    }
}
