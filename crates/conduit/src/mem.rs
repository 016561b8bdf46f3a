/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! In-memory conduit, gated behind `test_mode`. Wraps a second
//! `store::mem::MemStore` standing in for "the other pod" and answers
//! every RPC by reading (or, for disable/purge, mutating) that store
//! directly — there is no wire protocol to simulate here, only the RPC
//! shape described in §6.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use directory::DirectoryRecord;
use store::mem::MemStore;
use store::{Calendar, Home, Store, Txn};
use trc::{AddContext, ErrorKind, Result};
use types::delegate::{ExternalDelegateRecord, GroupDelegateRecord, IndividualDelegateRecord};

use crate::{Conduit, RemoteCalendarSummary};

#[derive(Default)]
pub struct MemConduit {
    remote: MemStore,
    individual: Mutex<HashMap<String, Vec<IndividualDelegateRecord>>>,
    group: Mutex<HashMap<String, Vec<GroupDelegateRecord>>>,
    external: Mutex<HashMap<String, Vec<ExternalDelegateRecord>>>,
}

impl MemConduit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: the remote pod's own store, for seeding fixture data
    /// (homes, calendars, objects, attachments) the way a real remote pod
    /// would already have them populated before a migration starts.
    pub fn remote_store(&self) -> &MemStore {
        &self.remote
    }

    pub fn seed_individual_delegate(&self, diruid: &str, record: IndividualDelegateRecord) {
        self.individual.lock().unwrap().entry(diruid.to_string()).or_default().push(record);
    }

    pub fn seed_group_delegate(&self, diruid: &str, record: GroupDelegateRecord) {
        self.group.lock().unwrap().entry(diruid.to_string()).or_default().push(record);
    }

    pub fn seed_external_delegate(&self, diruid: &str, record: ExternalDelegateRecord) {
        self.external.lock().unwrap().entry(diruid.to_string()).or_default().push(record);
    }

    async fn open_home(&self, remote_home_id: u32) -> Result<(Box<dyn Txn>, Box<dyn Home>)> {
        let uid = self
            .remote
            .uid_for_home_id(remote_home_id)
            .ok_or_else(|| trc::Error::new(ErrorKind::MissingRemoteResource).reason("remote home gone"))
            .caused_by(trc::location!())?;
        let mut txn = self.remote.new_transaction("conduit.read").await?;
        let home = self
            .remote
            .calendar_home_with_uid(txn.as_mut(), &uid, false, None)
            .await
            .caused_by(trc::location!())?
            .ok_or_else(|| trc::Error::new(ErrorKind::MissingRemoteResource).reason("remote home gone"))
            .caused_by(trc::location!())?;
        Ok((txn, home))
    }

    async fn open_calendar(&self, remote_home_id: u32, calendar_id: u32) -> Result<(Box<dyn Txn>, Box<dyn Calendar>)> {
        let (mut txn, home) = self.open_home(remote_home_id).await?;
        let calendar = home
            .child_with_id(txn.as_mut(), calendar_id)
            .await
            .caused_by(trc::location!())?
            .ok_or_else(|| trc::Error::new(ErrorKind::MissingRemoteResource).reason("remote calendar gone"))
            .caused_by(trc::location!())?;
        Ok((txn, calendar))
    }
}

#[async_trait]
impl Conduit for MemConduit {
    async fn send_home_resource_id(&self, record: &DirectoryRecord) -> Result<Option<u32>> {
        let mut txn = self.remote.new_transaction("conduit.send_home_resource_id").await?;
        let home = self
            .remote
            .calendar_home_with_uid(txn.as_mut(), record.uid(), false, None)
            .await
            .caused_by(trc::location!())?;
        let id = home.as_ref().map(|home| home.id());
        txn.commit().await?;
        Ok(id)
    }

    async fn load_children(&self, remote_home_id: u32) -> Result<Vec<RemoteCalendarSummary>> {
        let (mut txn, home) = self.open_home(remote_home_id).await?;
        let children = home.load_children(txn.as_mut()).await.caused_by(trc::location!())?;
        let mut out = Vec::with_capacity(children.len());
        for calendar in children {
            let sync_token = calendar.sync_token(txn.as_mut()).await.caused_by(trc::location!())?;
            out.push(RemoteCalendarSummary {
                id: calendar.id(),
                owned: calendar.owned(),
                sync_token,
            });
        }
        txn.commit().await?;
        Ok(out)
    }

    async fn child_with_id(&self, remote_home_id: u32, calendar_id: u32) -> Result<Option<RemoteCalendarSummary>> {
        let (mut txn, home) = self.open_home(remote_home_id).await?;
        let calendar = home.child_with_id(txn.as_mut(), calendar_id).await.caused_by(trc::location!())?;
        let result = match calendar {
            Some(calendar) => {
                let sync_token = calendar.sync_token(txn.as_mut()).await.caused_by(trc::location!())?;
                Some(RemoteCalendarSummary {
                    id: calendar.id(),
                    owned: calendar.owned(),
                    sync_token,
                })
            }
            None => None,
        };
        txn.commit().await?;
        Ok(result)
    }

    async fn resource_names_since_token(
        &self,
        remote_home_id: u32,
        calendar_id: u32,
        token: Option<&str>,
    ) -> Result<store::ResourceChanges> {
        let (mut txn, calendar) = self.open_calendar(remote_home_id, calendar_id).await?;
        let changes = calendar
            .resource_names_since_token(txn.as_mut(), token)
            .await
            .caused_by(trc::location!())?;
        txn.commit().await?;
        Ok(changes)
    }

    async fn object_resources_with_names(
        &self,
        remote_home_id: u32,
        calendar_id: u32,
        names: &[String],
    ) -> Result<Vec<store::CalendarObjectData>> {
        let (mut txn, calendar) = self.open_calendar(remote_home_id, calendar_id).await?;
        let objects = calendar
            .object_resources_with_names(txn.as_mut(), names)
            .await
            .caused_by(trc::location!())?;
        txn.commit().await?;
        Ok(objects)
    }

    async fn calendar_metadata(&self, remote_home_id: u32, calendar_id: u32) -> Result<store::CalendarMetadata> {
        let (mut txn, calendar) = self.open_calendar(remote_home_id, calendar_id).await?;
        let metadata = calendar.metadata(txn.as_mut()).await.caused_by(trc::location!())?;
        txn.commit().await?;
        Ok(metadata)
    }

    async fn home_metadata(&self, remote_home_id: u32) -> Result<store::CalendarHomeMetadata> {
        let (mut txn, home) = self.open_home(remote_home_id).await?;
        let metadata = home.metadata(txn.as_mut()).await.caused_by(trc::location!())?;
        txn.commit().await?;
        Ok(metadata)
    }

    async fn get_all_attachments(&self, remote_home_id: u32) -> Result<Vec<store::AttachmentSummary>> {
        let (mut txn, home) = self.open_home(remote_home_id).await?;
        let attachments = home.get_all_attachments(txn.as_mut()).await.caused_by(trc::location!())?;
        txn.commit().await?;
        Ok(attachments)
    }

    async fn get_attachment_links(&self, remote_home_id: u32) -> Result<Vec<store::AttachmentLink>> {
        let (mut txn, home) = self.open_home(remote_home_id).await?;
        let links = home.get_attachment_links(txn.as_mut()).await.caused_by(trc::location!())?;
        txn.commit().await?;
        Ok(links)
    }

    async fn read_attachment_data(&self, remote_home_id: u32, remote_attachment_id: u32) -> Result<Vec<u8>> {
        let uid = self
            .remote
            .uid_for_home_id(remote_home_id)
            .ok_or_else(|| trc::Error::new(ErrorKind::MissingRemoteResource).reason("remote home gone"))
            .caused_by(trc::location!())?;
        self.remote
            .attachment_bytes(&uid, remote_attachment_id)
            .ok_or_else(|| trc::Error::new(ErrorKind::MissingRemoteResource).reason("remote attachment gone"))
            .caused_by(trc::location!())
    }

    async fn disable_home(&self, remote_home_id: u32) -> Result<()> {
        self.remote.disable_home(remote_home_id);
        Ok(())
    }

    async fn purge_home(&self, remote_home_id: u32) -> Result<()> {
        self.remote.purge_home(remote_home_id);
        Ok(())
    }

    async fn dump_individual_delegates(&self, record: &DirectoryRecord) -> Result<Vec<IndividualDelegateRecord>> {
        Ok(self.individual.lock().unwrap().get(record.uid()).cloned().unwrap_or_default())
    }

    async fn dump_group_delegates(&self, record: &DirectoryRecord) -> Result<Vec<GroupDelegateRecord>> {
        Ok(self.group.lock().unwrap().get(record.uid()).cloned().unwrap_or_default())
    }

    async fn dump_external_delegates(&self, record: &DirectoryRecord) -> Result<Vec<ExternalDelegateRecord>> {
        Ok(self.external.lock().unwrap().get(record.uid()).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_home_returns_none() {
        let conduit = MemConduit::new();
        let record = DirectoryRecord::new("nobody", false);
        assert!(conduit.send_home_resource_id(&record).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn seeded_home_resolves_and_lists_calendars() {
        let conduit = MemConduit::new();
        let mut txn = conduit.remote_store().new_transaction("seed").await.unwrap();
        let home = conduit
            .remote_store()
            .calendar_home_with_uid(txn.as_mut(), "user42", true, None)
            .await
            .unwrap()
            .unwrap();
        let home_id = home.id();
        txn.commit().await.unwrap();
        conduit.remote_store().seed_calendar("user42", 10, "work", true);

        let record = DirectoryRecord::new("user42", false);
        let resolved = conduit.send_home_resource_id(&record).await.unwrap();
        assert_eq!(resolved, Some(home_id));

        let calendars = conduit.load_children(home_id).await.unwrap();
        assert_eq!(calendars.len(), 1);
        assert_eq!(calendars[0].id, 10);
        assert!(calendars[0].owned);
    }
}
