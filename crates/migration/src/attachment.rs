/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Attachment Reconciler (§4.5). Diffs attachment rows by remote id,
//! allocates local placeholders, transfers blob bytes, then rebinds
//! attachment→object links using the id maps built up by this reconciler
//! and the Object Reconciler.

use ahash::AHashMap;
use store::{AttachmentLink, AttachmentSummary, DestinationStore, Home, BATCH_SIZE};
use trc::{AddContext, Result};
use types::migration::AttachmentMigrationRecord;

use crate::remote_home::RemoteHomeProxy;
use crate::txn_scope::with_txn;

/// `syncAttachmentTable`. Returns `(needing_blob, removed_remote_ids)`: the
/// local attachment ids whose blob still needs transferring, and the
/// remote ids of rows that were dropped entirely.
pub async fn sync_attachment_table(
    store: &dyn DestinationStore,
    remote: &RemoteHomeProxy<'_>,
    home_id: u32,
    migrating_uid: &str,
) -> Result<(Vec<u32>, Vec<u32>)> {
    let rmap: AHashMap<u32, AttachmentSummary> =
        remote.get_all_attachments().await?.into_iter().map(|a| (a.remote_id, a)).collect();
    let migrating_uid = migrating_uid.to_string();

    with_txn(store, "migration.attachment.table", None, move |txn: &mut dyn store::Txn| {
        Box::pin(async move {
            let Some(home) = store
                .calendar_home_with_uid(txn, &migrating_uid, false, None)
                .await
                .caused_by(trc::location!())?
            else {
                return Ok((Vec::new(), Vec::new()));
            };

            let mapping = store.attachment_records(txn, home_id).await.caused_by(trc::location!())?;
            let mapping_by_remote: AHashMap<u32, u32> =
                mapping.iter().map(|r| (r.remote_attachment_id, r.local_attachment_id)).collect();
            // `remote_id` here names whatever store produced the reading; on
            // the local home it is the attachment's own local id.
            let lmap: AHashMap<u32, AttachmentSummary> =
                home.get_all_attachments(txn).await.caused_by(trc::location!())?.into_iter().map(|a| (a.remote_id, a)).collect();

            let mut needing_blob = Vec::new();
            let mut removed = Vec::new();

            for record in &mapping {
                if !rmap.contains_key(&record.remote_attachment_id) {
                    if let Some(attachment) = home
                        .get_attachment_by_id(txn, record.local_attachment_id)
                        .await
                        .caused_by(trc::location!())?
                    {
                        attachment.remove(txn, false).await.caused_by(trc::location!())?;
                    }
                    store
                        .delete_attachment_record(txn, home_id, record.remote_attachment_id)
                        .await
                        .caused_by(trc::location!())?;
                    removed.push(record.remote_attachment_id);
                }
            }

            for (remote_id, summary) in &rmap {
                if mapping_by_remote.contains_key(remote_id) {
                    continue;
                }
                let mut attachment = home.create_attachment(txn).await.caused_by(trc::location!())?;
                attachment.copy_remote(txn, summary).await.caused_by(trc::location!())?;
                let local_id = attachment.id();
                store
                    .insert_attachment_record(
                        txn,
                        AttachmentMigrationRecord {
                            home_id,
                            remote_attachment_id: *remote_id,
                            local_attachment_id: local_id,
                        },
                    )
                    .await
                    .caused_by(trc::location!())?;
                needing_blob.push(local_id);
            }

            for (remote_id, local_id) in &mapping_by_remote {
                let Some(summary) = rmap.get(remote_id) else { continue };
                let unchanged = lmap.get(local_id).is_some_and(|local| local.md5 == summary.md5);
                if unchanged {
                    continue;
                }
                if let Some(mut attachment) = home.get_attachment_by_id(txn, *local_id).await.caused_by(trc::location!())? {
                    attachment.copy_remote(txn, summary).await.caused_by(trc::location!())?;
                }
                needing_blob.push(*local_id);
            }

            Ok((needing_blob, removed))
        })
    })
    .await
}

/// `syncAttachmentData(localId)`: one transaction spanning both the
/// conduit blob read and the local write, as the ordering rules in §5
/// explicitly allow for this step.
pub async fn sync_attachment_data(
    store: &dyn DestinationStore,
    remote: &RemoteHomeProxy<'_>,
    home_id: u32,
    migrating_uid: &str,
    local_attachment_id: u32,
) -> Result<()> {
    let migrating_uid = migrating_uid.to_string();
    with_txn(store, "migration.attachment.data", None, move |txn: &mut dyn store::Txn| {
        Box::pin(async move {
            let records = store.attachment_records(txn, home_id).await.caused_by(trc::location!())?;
            let Some(record) = records.iter().find(|r| r.local_attachment_id == local_attachment_id) else {
                return Ok(());
            };
            let Some(home) = store
                .calendar_home_with_uid(txn, &migrating_uid, false, None)
                .await
                .caused_by(trc::location!())?
            else {
                return Ok(());
            };
            let Some(mut attachment) = home.get_attachment_by_id(txn, local_attachment_id).await.caused_by(trc::location!())? else {
                return Ok(());
            };
            let data = remote.read_attachment_data(record.remote_attachment_id).await?;
            attachment.write_data(txn, data).await.caused_by(trc::location!())
        })
    })
    .await
}

/// `linkAttachments`: remaps both ids through the migration-record tables
/// and inserts the result locally, in batches of [`BATCH_SIZE`].
pub async fn link_attachments(
    store: &dyn DestinationStore,
    remote: &RemoteHomeProxy<'_>,
    home_id: u32,
    migrating_uid: &str,
) -> Result<()> {
    let remote_links = remote.get_attachment_links().await?;
    let (attachment_map, object_map): (AHashMap<u32, u32>, AHashMap<u32, u32>) =
        with_txn(store, "migration.attachment.link_maps", None, move |txn: &mut dyn store::Txn| {
            Box::pin(async move {
                let attachments = store.attachment_records(txn, home_id).await.caused_by(trc::location!())?;
                let objects = store.object_records(txn, home_id).await.caused_by(trc::location!())?;
                Ok((
                    attachments.iter().map(|r| (r.remote_attachment_id, r.local_attachment_id)).collect(),
                    objects.iter().map(|r| (r.remote_object_id, r.local_object_id)).collect(),
                ))
            })
        })
        .await?;

    let local_links: Vec<AttachmentLink> = remote_links
        .into_iter()
        .filter_map(|link| {
            let attachment_id = *attachment_map.get(&link.attachment_id)?;
            let object_id = *object_map.get(&link.object_id)?;
            Some(AttachmentLink { attachment_id, object_id })
        })
        .collect();

    for batch in local_links.chunks(BATCH_SIZE) {
        link_batch(store, migrating_uid, batch).await?;
    }
    Ok(())
}

async fn link_batch(store: &dyn DestinationStore, migrating_uid: &str, links: &[AttachmentLink]) -> Result<()> {
    let migrating_uid = migrating_uid.to_string();
    let links = links.to_vec();
    with_txn(store, "migration.attachment.link_batch", None, move |txn: &mut dyn store::Txn| {
        Box::pin(async move {
            let Some(home) = store
                .calendar_home_with_uid(txn, &migrating_uid, false, None)
                .await
                .caused_by(trc::location!())?
            else {
                return Ok(());
            };
            for link in links {
                home.insert_attachment_link(txn, link).await.caused_by(trc::location!())?;
            }
            Ok(())
        })
    })
    .await
}

#[cfg(all(test, feature = "test_mode"))]
mod tests {
    use super::*;
    use conduit::mem::MemConduit;
    use directory::DirectoryRecord;
    use store::mem::MemStore;
    use store::{MigrationRecordStore, Store};

    #[tokio::test]
    async fn table_sync_creates_placeholder_and_marks_for_blob() {
        let store = MemStore::new();
        let conduit = MemConduit::new();
        {
            let mut txn = conduit.remote_store().new_transaction("seed").await.unwrap();
            let home = conduit
                .remote_store()
                .calendar_home_with_uid(txn.as_mut(), "user42", true, None)
                .await
                .unwrap()
                .unwrap();
            let mut attachment = home.create_attachment(txn.as_mut()).await.unwrap();
            attachment
                .copy_remote(
                    txn.as_mut(),
                    &AttachmentSummary { remote_id: 0, md5: "z".into(), content_type: "text/plain".into(), size: 4 },
                )
                .await
                .unwrap();
            attachment.write_data(txn.as_mut(), b"data".to_vec()).await.unwrap();
            txn.commit().await.unwrap();
        }

        let record = DirectoryRecord::new("user42", false);
        let remote_proxy = RemoteHomeProxy::new(&conduit, &record).await.unwrap().unwrap();

        let migrating_uid = "Migrating-user42";
        {
            let mut txn = store.new_transaction("setup").await.unwrap();
            store.calendar_home_with_uid(txn.as_mut(), migrating_uid, true, None).await.unwrap();
            txn.commit().await.unwrap();
        }

        let (needing_blob, removed) = sync_attachment_table(&store, &remote_proxy, 1, migrating_uid).await.unwrap();
        assert_eq!(needing_blob.len(), 1);
        assert!(removed.is_empty());

        sync_attachment_data(&store, &remote_proxy, 1, migrating_uid, needing_blob[0]).await.unwrap();

        let mut txn = store.new_transaction("assert").await.unwrap();
        let home = store.calendar_home_with_uid(txn.as_mut(), migrating_uid, false, None).await.unwrap().unwrap();
        let attachment = home.get_attachment_by_id(txn.as_mut(), needing_blob[0]).await.unwrap();
        assert!(attachment.is_some());
        let records = store.attachment_records(txn.as_mut(), 1).await.unwrap();
        assert_eq!(records.len(), 1);
    }
}
