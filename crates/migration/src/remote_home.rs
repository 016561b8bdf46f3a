/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Remote Home Proxy (§4.2). The source builds a synthetic object that
//! mimics the shape of a local home but dispatches every read over the
//! conduit. Re-architected here as a plain struct wrapping a `&dyn
//! Conduit` and the remote home's resource id, rather than a polymorphic
//! stand-in for [`store::Home`] — the core only ever needs to *read*
//! through it, and the conduit trait already speaks in the DTOs
//! ([`store::CalendarObjectData`], [`store::AttachmentSummary`], …) that
//! both a local and a remote home would otherwise have to agree on.

use conduit::{Conduit, RemoteCalendarSummary};
use directory::DirectoryRecord;
use store::{AttachmentLink, AttachmentSummary, CalendarHomeMetadata, CalendarMetadata, CalendarObjectData, ResourceChanges};
use trc::Result;

pub struct RemoteHomeProxy<'c> {
    conduit: &'c dyn Conduit,
    remote_home_id: u32,
}

impl<'c> RemoteHomeProxy<'c> {
    /// Obtains the remote home's resource id from the conduit. `Ok(None)`
    /// means the proxy is unusable — callers must treat the step as a
    /// no-op, per §4.2.
    pub async fn new(conduit: &'c dyn Conduit, record: &DirectoryRecord) -> Result<Option<Self>> {
        Ok(conduit
            .send_home_resource_id(record)
            .await?
            .map(|remote_home_id| Self { conduit, remote_home_id }))
    }

    pub fn remote_home_id(&self) -> u32 {
        self.remote_home_id
    }

    pub async fn load_children(&self) -> Result<Vec<RemoteCalendarSummary>> {
        self.conduit.load_children(self.remote_home_id).await
    }

    pub async fn child_with_id(&self, calendar_id: u32) -> Result<Option<RemoteCalendarSummary>> {
        self.conduit.child_with_id(self.remote_home_id, calendar_id).await
    }

    pub async fn resource_names_since_token(&self, calendar_id: u32, token: Option<&str>) -> Result<ResourceChanges> {
        self.conduit
            .resource_names_since_token(self.remote_home_id, calendar_id, token)
            .await
    }

    pub async fn object_resources_with_names(
        &self,
        calendar_id: u32,
        names: &[String],
    ) -> Result<Vec<CalendarObjectData>> {
        self.conduit
            .object_resources_with_names(self.remote_home_id, calendar_id, names)
            .await
    }

    pub async fn calendar_metadata(&self, calendar_id: u32) -> Result<CalendarMetadata> {
        self.conduit.calendar_metadata(self.remote_home_id, calendar_id).await
    }

    pub async fn home_metadata(&self) -> Result<CalendarHomeMetadata> {
        self.conduit.home_metadata(self.remote_home_id).await
    }

    pub async fn get_all_attachments(&self) -> Result<Vec<AttachmentSummary>> {
        self.conduit.get_all_attachments(self.remote_home_id).await
    }

    pub async fn get_attachment_links(&self) -> Result<Vec<AttachmentLink>> {
        self.conduit.get_attachment_links(self.remote_home_id).await
    }

    /// `readAttachmentData(remoteId, localAttachment)`.
    pub async fn read_attachment_data(&self, remote_attachment_id: u32) -> Result<Vec<u8>> {
        self.conduit.read_attachment_data(self.remote_home_id, remote_attachment_id).await
    }
}
