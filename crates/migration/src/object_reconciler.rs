/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Object Reconciler (§4.4). Per calendar: diffs changed/deleted object
//! names since a sync token, filters the changed set by content hash, and
//! applies both sides in bounded batches (P6), maintaining the remote→local
//! id mapping as it goes (I2).

use ahash::AHashMap;
use store::{Calendar, CalendarObjectData, DestinationStore, Home, BATCH_SIZE};
use trc::{AddContext, Result};
use types::migration::CalendarObjectMigrationRecord;

use crate::remote_home::RemoteHomeProxy;
use crate::txn_scope::with_txn;

async fn open_local_calendar(
    store: &dyn DestinationStore,
    txn: &mut dyn store::Txn,
    migrating_uid: &str,
    local_calendar_id: u32,
) -> Result<Option<Box<dyn Calendar>>> {
    let Some(home) = store
        .calendar_home_with_uid(txn, migrating_uid, false, None)
        .await
        .caused_by(trc::location!())?
    else {
        return Ok(None);
    };
    home.child_with_id(txn, local_calendar_id).await.caused_by(trc::location!())
}

/// `findObjectsToSync`: the subset of `changed` whose name is absent
/// locally or whose remote md5 differs from the local one.
async fn actual_changes(
    store: &dyn DestinationStore,
    migrating_uid: &str,
    local_calendar_id: u32,
    remote_objects: &AHashMap<String, CalendarObjectData>,
    changed: &[String],
) -> Result<Vec<String>> {
    let migrating_uid = migrating_uid.to_string();
    let changed = changed.to_vec();
    let local: Vec<CalendarObjectData> = with_txn(store, "migration.object.diff", None, move |txn: &mut dyn store::Txn| {
        Box::pin(async move {
            let Some(calendar) = open_local_calendar(store, txn, &migrating_uid, local_calendar_id).await? else {
                return Ok(Vec::new());
            };
            calendar.object_resources_with_names(txn, &changed).await.caused_by(trc::location!())
        })
    })
    .await?;
    let local_md5: AHashMap<&str, &str> = local.iter().map(|o| (o.name.as_str(), o.md5.as_str())).collect();

    Ok(remote_objects
        .values()
        .filter(|remote| local_md5.get(remote.name.as_str()) != Some(&remote.md5.as_str()))
        .map(|remote| remote.name.clone())
        .collect())
}

/// `purgeDeletedObjectsInBatches`.
async fn purge_deleted_objects_in_batches(
    store: &dyn DestinationStore,
    home_id: u32,
    migrating_uid: &str,
    local_calendar_id: u32,
    deleted: &[String],
) -> Result<()> {
    for batch in deleted.chunks(BATCH_SIZE) {
        purge_batch(store, home_id, migrating_uid, local_calendar_id, batch).await?;
    }
    Ok(())
}

async fn purge_batch(
    store: &dyn DestinationStore,
    home_id: u32,
    migrating_uid: &str,
    local_calendar_id: u32,
    names: &[String],
) -> Result<()> {
    let migrating_uid = migrating_uid.to_string();
    let names = names.to_vec();
    with_txn(store, "migration.object.purge_batch", None, move |txn: &mut dyn store::Txn| {
        Box::pin(async move {
            let Some(calendar) = open_local_calendar(store, txn, &migrating_uid, local_calendar_id).await? else {
                return Ok(());
            };
            for name in &names {
                let local_id = calendar.object_id_with_name(txn, name).await.caused_by(trc::location!())?;
                if calendar.purge_object(txn, name).await.caused_by(trc::location!())? {
                    if let Some(local_id) = local_id {
                        store
                            .delete_object_record_by_local_id(txn, home_id, local_id)
                            .await
                            .caused_by(trc::location!())?;
                    }
                }
            }
            Ok(())
        })
    })
    .await
}

/// `updateChangedObjectsInBatches`.
async fn update_changed_objects_in_batches(
    store: &dyn DestinationStore,
    home_id: u32,
    migrating_uid: &str,
    local_calendar_id: u32,
    remote_objects: &AHashMap<String, CalendarObjectData>,
    names: &[String],
) -> Result<()> {
    for batch in names.chunks(BATCH_SIZE) {
        update_batch(store, home_id, migrating_uid, local_calendar_id, remote_objects, batch).await?;
    }
    Ok(())
}

async fn update_batch(
    store: &dyn DestinationStore,
    home_id: u32,
    migrating_uid: &str,
    local_calendar_id: u32,
    remote_objects: &AHashMap<String, CalendarObjectData>,
    names: &[String],
) -> Result<()> {
    let migrating_uid = migrating_uid.to_string();
    let remote: Vec<CalendarObjectData> = names
        .iter()
        .filter_map(|name| remote_objects.get(name).cloned())
        .collect();
    with_txn(store, "migration.object.update_batch", None, move |txn: &mut dyn store::Txn| {
        Box::pin(async move {
            let Some(calendar) = open_local_calendar(store, txn, &migrating_uid, local_calendar_id).await? else {
                return Ok(());
            };
            txn.set_migrating(true);

            for object in &remote {
                let existing_id = calendar.object_id_with_name(txn, &object.name).await.caused_by(trc::location!())?;
                match existing_id {
                    Some(_) => {
                        calendar
                            .update_object_raw(txn, &object.name, object.component.clone(), object.md5.clone())
                            .await
                            .caused_by(trc::location!())?;
                    }
                    None => {
                        let local_id = calendar
                            .create_object_raw(txn, &object.name, object.component.clone(), object.md5.clone())
                            .await
                            .caused_by(trc::location!())?;
                        store
                            .insert_object_record(
                                txn,
                                CalendarObjectMigrationRecord {
                                    home_id,
                                    remote_object_id: object.id,
                                    local_object_id: local_id,
                                },
                            )
                            .await
                            .caused_by(trc::location!())?;
                    }
                }
                calendar
                    .copy_object_metadata(txn, &object.name, object.schedule_tag.as_deref(), object.access_mode)
                    .await
                    .caused_by(trc::location!())?;
            }
            Ok(())
        })
    })
    .await
}

/// `syncObjects`: the full per-calendar object reconcile pass, driven by
/// the Calendar List Reconciler once per calendar whose token has moved.
pub async fn sync_objects(
    store: &dyn DestinationStore,
    remote: &RemoteHomeProxy<'_>,
    home_id: u32,
    migrating_uid: &str,
    remote_calendar_id: u32,
    local_calendar_id: u32,
    last_sync_token: Option<&str>,
) -> Result<()> {
    let changes = remote.resource_names_since_token(remote_calendar_id, last_sync_token).await?;
    if changes.invalid_token {
        trc::event!(info, "remote sync token rejected, forcing full re-diff"; CalendarId = remote_calendar_id);
    }

    purge_deleted_objects_in_batches(store, home_id, migrating_uid, local_calendar_id, &changes.deleted).await?;

    if changes.changed.is_empty() {
        return Ok(());
    }

    let remote_objects: AHashMap<String, CalendarObjectData> = remote
        .object_resources_with_names(remote_calendar_id, &changes.changed)
        .await?
        .into_iter()
        .map(|o| (o.name.clone(), o))
        .collect();

    let to_update = actual_changes(store, migrating_uid, local_calendar_id, &remote_objects, &changes.changed).await?;
    update_changed_objects_in_batches(store, home_id, migrating_uid, local_calendar_id, &remote_objects, &to_update).await
}

#[cfg(all(test, feature = "test_mode"))]
mod tests {
    use super::*;
    use conduit::mem::MemConduit;
    use directory::DirectoryRecord;
    use store::mem::MemStore;
    use store::{MigrationRecordStore, Store};

    async fn local_calendar_id(store: &MemStore, uid: &str) -> u32 {
        let mut txn = store.new_transaction("test.setup").await.unwrap();
        let home = store.calendar_home_with_uid(txn.as_mut(), uid, true, None).await.unwrap().unwrap();
        let calendar = home.create_child_with_name(txn.as_mut(), "mig-0").await.unwrap();
        txn.commit().await.unwrap();
        calendar.id()
    }

    #[tokio::test]
    async fn fresh_sync_creates_objects_and_records() {
        let store = MemStore::new();
        let conduit = MemConduit::new();
        let mut seed_txn = conduit.remote_store().new_transaction("seed").await.unwrap();
        let remote_home = conduit
            .remote_store()
            .calendar_home_with_uid(seed_txn.as_mut(), "user42", true, None)
            .await
            .unwrap()
            .unwrap();
        let remote_home_id = remote_home.id();
        seed_txn.commit().await.unwrap();
        conduit.remote_store().seed_calendar("user42", 10, "work", true);
        {
            let mut txn = conduit.remote_store().new_transaction("seed_objects").await.unwrap();
            let home = conduit
                .remote_store()
                .calendar_home_with_uid(txn.as_mut(), "user42", false, None)
                .await
                .unwrap()
                .unwrap();
            let calendar = home.child_with_id(txn.as_mut(), 10).await.unwrap().unwrap();
            calendar
                .create_object_raw(txn.as_mut(), "e1.ics", b"EVENT1".to_vec(), "x".into())
                .await
                .unwrap();
            txn.commit().await.unwrap();
        }

        let record = DirectoryRecord::new("user42", false);
        let remote_proxy = RemoteHomeProxy::new(&conduit, &record).await.unwrap().unwrap();
        assert_eq!(remote_proxy.remote_home_id(), remote_home_id);

        let migrating_uid = "Migrating-user42";
        let local_id = local_calendar_id(&store, migrating_uid).await;

        sync_objects(&store, &remote_proxy, 1, migrating_uid, 10, local_id, None).await.unwrap();

        let mut txn = store.new_transaction("assert").await.unwrap();
        let home = store.calendar_home_with_uid(txn.as_mut(), migrating_uid, false, None).await.unwrap().unwrap();
        let calendar = home.child_with_id(txn.as_mut(), local_id).await.unwrap().unwrap();
        let objects = calendar
            .object_resources_with_names(txn.as_mut(), &["e1.ics".to_string()])
            .await
            .unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].md5, "x");

        let records = store.object_records(txn.as_mut(), 1).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].local_object_id, calendar.object_id_with_name(txn.as_mut(), "e1.ics").await.unwrap().unwrap());
    }
}
