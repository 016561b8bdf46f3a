/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Calendar List Reconciler (§4.3). Diffs the set of owned calendars
//! between source and destination and drives per-calendar sync. Follows
//! the "dictionary-of-records diffing" design note: both sides are
//! collected into a plain `AHashMap` keyed by remote calendar id, then
//! diffed with ordinary set operations on the key sets.

use ahash::AHashMap;
use rand::Rng;
use store::{Calendar, DestinationStore, Home};
use trc::{AddContext, Result};
use types::migrating_owner_key;
use types::migration::CalendarMigrationRecord;

use crate::object_reconciler;
use crate::remote_home::RemoteHomeProxy;
use crate::txn_scope::with_txn;

/// `getCalendarSyncList`: the remote owned calendars, each as a record
/// with `local_calendar_id = 0` until a local mapping is created.
async fn get_calendar_sync_list(remote: &RemoteHomeProxy<'_>, home_id: u32) -> Result<AHashMap<u32, CalendarMigrationRecord>> {
    let mut out = AHashMap::default();
    for calendar in remote.load_children().await? {
        if calendar.owned {
            out.insert(
                calendar.id,
                CalendarMigrationRecord {
                    home_id,
                    remote_calendar_id: calendar.id,
                    local_calendar_id: 0,
                    last_sync_token: Some(calendar.sync_token),
                },
            );
        }
    }
    Ok(out)
}

/// `getSyncState`: the local CalendarMigrationRecord rows, keyed by
/// remote calendar id.
async fn get_sync_state(store: &dyn DestinationStore, home_id: u32) -> Result<AHashMap<u32, CalendarMigrationRecord>> {
    with_txn(store, "migration.calendar.sync_state", None, move |txn: &mut dyn store::Txn| {
        Box::pin(async move {
            let records = store.calendar_records(txn, home_id).await.caused_by(trc::location!())?;
            Ok(records.into_iter().map(|r| (r.remote_calendar_id, r)).collect())
        })
    })
    .await
}

/// `purgeLocal`: silently removes local calendars no longer present
/// remotely and drops their state entries.
async fn purge_local(
    store: &dyn DestinationStore,
    migrating_uid: &str,
    local: &mut AHashMap<u32, CalendarMigrationRecord>,
    remote: &AHashMap<u32, CalendarMigrationRecord>,
) -> Result<()> {
    let stale: Vec<u32> = local.keys().filter(|id| !remote.contains_key(id)).copied().collect();
    for remote_id in stale {
        let record = local.remove(&remote_id).expect("key just observed present");
        let local_calendar_id = record.local_calendar_id;
        let home_id = record.home_id;
        let migrating_uid = migrating_uid.to_string();
        with_txn(store, "migration.calendar.purge_local", None, move |txn: &mut dyn store::Txn| {
            Box::pin(async move {
                let Some(home) = store
                    .calendar_home_with_uid(txn, &migrating_uid, false, None)
                    .await
                    .caused_by(trc::location!())?
                else {
                    return Ok(());
                };
                if let Some(calendar) = home.child_with_id(txn, local_calendar_id).await.caused_by(trc::location!())? {
                    calendar.purge(txn).await.caused_by(trc::location!())?;
                }
                store
                    .delete_calendar_record(txn, home_id, remote_id)
                    .await
                    .caused_by(trc::location!())
            })
        })
        .await?;
    }
    Ok(())
}

/// `newCalendar`: creates an empty local calendar under a random name,
/// overwritten once metadata sync runs.
async fn new_calendar(store: &dyn DestinationStore, migrating_uid: &str) -> Result<u32> {
    let migrating_uid = migrating_uid.to_string();
    with_txn(store, "migration.calendar.new", None, move |txn: &mut dyn store::Txn| {
        Box::pin(async move {
            let home = store
                .calendar_home_with_uid(txn, &migrating_uid, false, None)
                .await
                .caused_by(trc::location!())?
                .ok_or_else(|| trc::Error::new(trc::ErrorKind::StoreFailure).reason("migrating home missing"))
                .caused_by(trc::location!())?;
            let name = format!("mig-{:016x}", rand::thread_rng().gen::<u64>());
            let calendar = home.create_child_with_name(txn, &name).await.caused_by(trc::location!())?;
            Ok(calendar.id())
        })
    })
    .await
}

/// `syncCalendarMetaData`.
async fn sync_calendar_metadata(
    store: &dyn DestinationStore,
    remote: &RemoteHomeProxy<'_>,
    migrating_uid: &str,
    remote_calendar_id: u32,
    local_calendar_id: u32,
) -> Result<()> {
    let Some(_) = remote.child_with_id(remote_calendar_id).await? else {
        return Ok(());
    };
    let metadata = remote.calendar_metadata(remote_calendar_id).await?;
    let migrating_uid = migrating_uid.to_string();
    with_txn(store, "migration.calendar.metadata", None, move |txn: &mut dyn store::Txn| {
        Box::pin(async move {
            let home = store
                .calendar_home_with_uid(txn, &migrating_uid, false, None)
                .await
                .caused_by(trc::location!())?
                .ok_or_else(|| trc::Error::new(trc::ErrorKind::StoreFailure).reason("migrating home missing"))
                .caused_by(trc::location!())?;
            let Some(calendar) = home.child_with_id(txn, local_calendar_id).await.caused_by(trc::location!())? else {
                return Ok(());
            };
            calendar.copy_metadata(txn, &metadata).await.caused_by(trc::location!())
        })
    })
    .await
}

/// `updateSyncState`: advances the stored token. Only called once every
/// object batch for the calendar has committed (I3).
async fn update_sync_state(store: &dyn DestinationStore, record: CalendarMigrationRecord) -> Result<()> {
    with_txn(store, "migration.calendar.update_token", None, move |txn: &mut dyn store::Txn| {
        Box::pin(async move { store.upsert_calendar_record(txn, record).await.caused_by(trc::location!()) })
    })
    .await
}

/// `syncCalendar(remoteId)`: creates the local calendar if needed, then —
/// unless the token already matches — runs metadata sync, object sync,
/// and records the new remote token.
async fn sync_calendar(
    store: &dyn DestinationStore,
    remote: &RemoteHomeProxy<'_>,
    home_id: u32,
    migrating_uid: &str,
    remote_id: u32,
    local: &mut AHashMap<u32, CalendarMigrationRecord>,
    remote_token: &str,
) -> Result<()> {
    if !local.contains_key(&remote_id) {
        let local_id = new_calendar(store, migrating_uid).await?;
        local.insert(
            remote_id,
            CalendarMigrationRecord {
                home_id,
                remote_calendar_id: remote_id,
                local_calendar_id: local_id,
                last_sync_token: None,
            },
        );
    }
    let record = local.get(&remote_id).expect("inserted above if absent").clone();

    if record.last_sync_token.as_deref() == Some(remote_token) {
        return Ok(());
    }

    sync_calendar_metadata(store, remote, migrating_uid, remote_id, record.local_calendar_id).await?;
    object_reconciler::sync_objects(store, remote, home_id, migrating_uid, remote_id, record.local_calendar_id, record.last_sync_token.as_deref()).await?;

    let updated = CalendarMigrationRecord {
        last_sync_token: Some(remote_token.to_string()),
        ..record
    };
    update_sync_state(store, updated.clone()).await?;
    local.insert(remote_id, updated);
    Ok(())
}

/// `syncCalendarList`: the full per-calendar reconcile pass.
pub async fn sync_calendar_list(
    store: &dyn DestinationStore,
    remote: &RemoteHomeProxy<'_>,
    home_id: u32,
    migrating_uid: &str,
) -> Result<()> {
    let remote_state = get_calendar_sync_list(remote, home_id).await?;
    let mut local_state = get_sync_state(store, home_id).await?;

    purge_local(store, migrating_uid, &mut local_state, &remote_state).await?;

    for (&remote_id, remote_record) in &remote_state {
        let remote_token = remote_record.last_sync_token.clone().unwrap_or_default();
        sync_calendar(store, remote, home_id, migrating_uid, remote_id, &mut local_state, &remote_token).await?;
    }
    Ok(())
}

/// Ensures the inactive migrating home exists on this pod
/// (`prepareCalendarHome`), returning its local id.
pub async fn prepare_calendar_home(store: &dyn DestinationStore, diruid: &str) -> Result<u32> {
    let migrating_uid = migrating_owner_key(diruid);
    let diruid = diruid.to_string();
    with_txn(store, "migration.home.prepare", None, move |txn: &mut dyn store::Txn| {
        Box::pin(async move {
            if let Some(home) = store
                .calendar_home_with_uid(txn, &migrating_uid, false, None)
                .await
                .caused_by(trc::location!())?
            {
                return Ok(home.id());
            }
            let home = store
                .calendar_home_with_uid(txn, &migrating_uid, true, Some(&diruid))
                .await
                .caused_by(trc::location!())?
                .ok_or_else(|| trc::Error::new(trc::ErrorKind::StoreFailure).reason("failed to create migrating home"))
                .caused_by(trc::location!())?;
            Ok(home.id())
        })
    })
    .await
}

/// `syncCalendarHomeMetaData`.
pub async fn sync_home_metadata(store: &dyn DestinationStore, remote: &RemoteHomeProxy<'_>, migrating_uid: &str) -> Result<()> {
    let metadata = remote.home_metadata().await?;
    let migrating_uid = migrating_uid.to_string();
    with_txn(store, "migration.home.metadata", None, move |txn: &mut dyn store::Txn| {
        Box::pin(async move {
            let home = store
                .calendar_home_with_uid(txn, &migrating_uid, false, None)
                .await
                .caused_by(trc::location!())?
                .ok_or_else(|| trc::Error::new(trc::ErrorKind::StoreFailure).reason("migrating home missing"))
                .caused_by(trc::location!())?;
            home.copy_metadata(txn, &metadata).await.caused_by(trc::location!())
        })
    })
    .await
}
