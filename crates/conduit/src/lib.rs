/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! The pod-to-pod RPC conduit boundary consumed by the migration core
//! (§6). Wire protocol, authentication, and transport are external
//! collaborators (§1) — this crate only fixes the shape of the RPCs the
//! core issues against a remote pod, plus a `test_mode` in-memory double
//! standing in for "the other pod" in tests.
//!
//! The Remote Home Proxy (§4.2) wraps this trait into the same interface
//! shape as a local [`store::Home`]/[`store::Calendar`] — see
//! `migration::remote_home`.

use async_trait::async_trait;
use directory::DirectoryRecord;
use store::{
    AttachmentLink, AttachmentSummary, CalendarHomeMetadata, CalendarMetadata, CalendarObjectData,
    ResourceChanges,
};
use trc::Result;
use types::delegate::{ExternalDelegateRecord, GroupDelegateRecord, IndividualDelegateRecord};

#[cfg(feature = "test_mode")]
pub mod mem;

/// One remote calendar, as returned by `loadChildren()`/`childWithID(id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCalendarSummary {
    pub id: u32,
    pub owned: bool,
    pub sync_token: String,
}

#[async_trait]
pub trait Conduit: Send + Sync {
    /// `conduit.send_home_resource_id(txn, record) → remoteId | null`.
    /// `None` means the proxy built on top of this call is unusable and
    /// the caller must treat the step as a no-op.
    async fn send_home_resource_id(&self, record: &DirectoryRecord) -> Result<Option<u32>>;

    async fn load_children(&self, remote_home_id: u32) -> Result<Vec<RemoteCalendarSummary>>;
    async fn child_with_id(&self, remote_home_id: u32, calendar_id: u32) -> Result<Option<RemoteCalendarSummary>>;

    async fn resource_names_since_token(
        &self,
        remote_home_id: u32,
        calendar_id: u32,
        token: Option<&str>,
    ) -> Result<ResourceChanges>;
    async fn object_resources_with_names(
        &self,
        remote_home_id: u32,
        calendar_id: u32,
        names: &[String],
    ) -> Result<Vec<CalendarObjectData>>;
    async fn calendar_metadata(&self, remote_home_id: u32, calendar_id: u32) -> Result<CalendarMetadata>;

    async fn home_metadata(&self, remote_home_id: u32) -> Result<CalendarHomeMetadata>;
    async fn get_all_attachments(&self, remote_home_id: u32) -> Result<Vec<AttachmentSummary>>;
    async fn get_attachment_links(&self, remote_home_id: u32) -> Result<Vec<AttachmentLink>>;
    /// Streams one attachment's blob bytes from the remote pod into local
    /// storage (`readAttachmentData(remoteId, localAttachment)` — the
    /// local write half lives in `migration::attachment`).
    async fn read_attachment_data(&self, remote_home_id: u32, remote_attachment_id: u32) -> Result<Vec<u8>>;

    /// `disableRemoteHome`: from this point the source rejects external
    /// user writes. Reads made by this core continue unaffected.
    async fn disable_home(&self, remote_home_id: u32) -> Result<()>;
    /// `removeRemoteHome`: the purge-source step. No scheduling, no
    /// sharing notifications.
    async fn purge_home(&self, remote_home_id: u32) -> Result<()>;

    async fn dump_individual_delegates(&self, record: &DirectoryRecord) -> Result<Vec<IndividualDelegateRecord>>;
    async fn dump_group_delegates(&self, record: &DirectoryRecord) -> Result<Vec<GroupDelegateRecord>>;
    async fn dump_external_delegates(&self, record: &DirectoryRecord) -> Result<Vec<ExternalDelegateRecord>>;
}
