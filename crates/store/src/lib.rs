/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! The narrow destination-store interface the migration core is allowed to
//! see (§6). Persistence, schema, and calendar-object lifecycle are out of
//! scope for this crate — it only defines the trait shape the core drives,
//! plus the handful of DTOs that cross the boundary.
//!
//! A `test_mode`-gated in-memory implementation lives in [`mem`] so the core
//! can be exercised without a real backing store, the way the teacher's own
//! crates carry a `test_mode` feature for their in-memory test doubles.

use async_trait::async_trait;
use trc::Result;
use types::delegate::{ExternalDelegateRecord, IndividualDelegateRecord};

#[cfg(feature = "test_mode")]
pub mod mem;

pub mod record;
pub use record::MigrationRecordStore;

/// Convenience bound: the destination is both the narrow store interface
/// of §6 and the keeper of the three migration-record tables of §3. Every
/// concrete store the core is handed implements both.
pub trait DestinationStore: Store + MigrationRecordStore {}
impl<T: Store + MigrationRecordStore> DestinationStore for T {}

/// Batch window used by every batched reconcile step (P6).
pub const BATCH_SIZE: usize = 50;

/// A transaction handle. Self-created transactions are committed on success
/// and aborted on failure by [`crate::Txn`]'s caller — see
/// `migration::txn_scope`.
#[async_trait]
pub trait Txn: Send + Sync {
    /// The label the transaction was created with, used in failure logs.
    fn label(&self) -> &'static str;

    /// A per-transaction hint telling the store to suppress scheduling,
    /// validation, and hash recomputation for the remainder of this
    /// transaction. Set once by the object reconciler before a raw batch
    /// write; never leaks to other transactions.
    fn is_migrating(&self) -> bool;
    fn set_migrating(&mut self, migrating: bool);

    async fn commit(self: Box<Self>) -> Result<()>;
    async fn abort(self: Box<Self>) -> Result<()>;
}

/// The destination store's entry point: creates transactions and resolves
/// calendar homes by directory uid.
#[async_trait]
pub trait Store: Send + Sync {
    async fn new_transaction(&self, label: &'static str) -> Result<Box<dyn Txn>>;

    /// `Txn.calendarHomeWithUID(uid, create?, migratingUID?)`. `migrating_uid`
    /// is the real directory uid to stamp on a freshly created home so it
    /// can later be renamed back to it at switchover.
    async fn calendar_home_with_uid(
        &self,
        txn: &mut dyn Txn,
        uid: &str,
        create: bool,
        migrating_uid: Option<&str>,
    ) -> Result<Option<Box<dyn Home>>>;

    /// Renames a home's owner key in place, e.g. `Migrating-<uid>` ⇄ `<uid>`,
    /// and flips its enabled/disabled status. Used by `disable_remote_home`
    /// is not reachable through this trait (the remote pod is reached only
    /// through the conduit) — this is the destination-side half of
    /// switchover, `ENABLE_DESTINATION`.
    async fn rename_home_owner(&self, txn: &mut dyn Txn, from_uid: &str, to_uid: &str) -> Result<()>;

    /// `txn.groupByUID(groupUID) → localGroup`: resolves a group by its
    /// directory uid, creating an empty local group row if this pod has
    /// never seen it before, and returns its local id.
    async fn group_by_uid(&self, txn: &mut dyn Txn, group_uid: &str) -> Result<u32>;

    async fn insert_individual_delegate(&self, txn: &mut dyn Txn, record: IndividualDelegateRecord) -> Result<()>;
    /// `group_id` is the local group id already resolved via
    /// [`Store::group_by_uid`].
    async fn insert_group_delegate(
        &self,
        txn: &mut dyn Txn,
        delegator_uid: &str,
        group_id: u32,
        read_write: bool,
    ) -> Result<()>;
    async fn insert_external_delegate(&self, txn: &mut dyn Txn, record: ExternalDelegateRecord) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CalendarHomeMetadata {
    pub default_alerts: Vec<String>,
    pub default_calendar: Option<String>,
}

#[async_trait]
pub trait Home: Send + Sync {
    fn id(&self) -> u32;

    async fn load_children(&self, txn: &mut dyn Txn) -> Result<Vec<Box<dyn Calendar>>>;
    async fn child_with_id(&self, txn: &mut dyn Txn, id: u32) -> Result<Option<Box<dyn Calendar>>>;
    async fn create_child_with_name(&self, txn: &mut dyn Txn, name: &str) -> Result<Box<dyn Calendar>>;

    async fn metadata(&self, txn: &mut dyn Txn) -> Result<CalendarHomeMetadata>;
    async fn copy_metadata(&self, txn: &mut dyn Txn, source: &CalendarHomeMetadata) -> Result<()>;

    async fn get_all_attachments(&self, txn: &mut dyn Txn) -> Result<Vec<AttachmentSummary>>;
    async fn get_attachment_by_id(
        &self,
        txn: &mut dyn Txn,
        id: u32,
    ) -> Result<Option<Box<dyn ManagedAttachment>>>;
    async fn create_attachment(&self, txn: &mut dyn Txn) -> Result<Box<dyn ManagedAttachment>>;

    async fn get_attachment_links(&self, txn: &mut dyn Txn) -> Result<Vec<AttachmentLink>>;
    async fn insert_attachment_link(&self, txn: &mut dyn Txn, link: AttachmentLink) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CalendarMetadata {
    pub display_name: String,
    pub description: Option<String>,
    pub color: Option<String>,
}

/// `(changed, deleted, invalid_token)` from `resourceNamesSinceToken`.
#[derive(Debug, Clone, Default)]
pub struct ResourceChanges {
    pub changed: Vec<String>,
    pub deleted: Vec<String>,
    pub invalid_token: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarObjectData {
    /// The object's id on whichever store produced this reading. Read off
    /// the remote side it becomes `CalendarObjectMigrationRecord.remote_object_id`;
    /// this core never relies on it meaning the same thing on both sides.
    pub id: u32,
    pub name: String,
    pub component: Vec<u8>,
    pub md5: String,
    pub schedule_tag: Option<String>,
    pub access_mode: AccessMode,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AccessMode {
    #[default]
    Default,
    ReadOnly,
    ReadWrite,
}

#[async_trait]
pub trait Calendar: Send + Sync {
    fn id(&self) -> u32;
    fn name(&self) -> &str;
    /// `false` for shared-in (non-owned) calendars, excluded from sync.
    fn owned(&self) -> bool;

    async fn sync_token(&self, txn: &mut dyn Txn) -> Result<String>;
    async fn resource_names_since_token(
        &self,
        txn: &mut dyn Txn,
        token: Option<&str>,
    ) -> Result<ResourceChanges>;
    async fn object_resources_with_names(
        &self,
        txn: &mut dyn Txn,
        names: &[String],
    ) -> Result<Vec<CalendarObjectData>>;
    /// Resolves a local object's stable id by name. The object reconciler
    /// needs this to cascade-delete a `CalendarObjectMigrationRecord` when
    /// purging by name (I2) — the store's schema is opaque to this core,
    /// so there is no other way to recover the id a purged name had.
    async fn object_id_with_name(&self, txn: &mut dyn Txn, name: &str) -> Result<Option<u32>>;

    /// `_createCalendarObjectWithNameInternal(name, component, RAW)`: bypasses
    /// validation and scheduling. Returns the newly allocated local object id.
    async fn create_object_raw(
        &self,
        txn: &mut dyn Txn,
        name: &str,
        component: Vec<u8>,
        md5: String,
    ) -> Result<u32>;
    /// `_setComponentInternal(component, RAW)`.
    async fn update_object_raw(
        &self,
        txn: &mut dyn Txn,
        name: &str,
        component: Vec<u8>,
        md5: String,
    ) -> Result<()>;
    async fn copy_object_metadata(
        &self,
        txn: &mut dyn Txn,
        name: &str,
        schedule_tag: Option<&str>,
        access_mode: AccessMode,
    ) -> Result<()>;
    /// Purges an object by name; returns `false` if it was already absent
    /// (a no-op, not a failure).
    async fn purge_object(&self, txn: &mut dyn Txn, name: &str) -> Result<bool>;

    async fn metadata(&self, txn: &mut dyn Txn) -> Result<CalendarMetadata>;
    async fn copy_metadata(&self, txn: &mut dyn Txn, source: &CalendarMetadata) -> Result<()>;

    /// Silently removes the calendar and all its objects; no scheduling
    /// side-effects.
    async fn purge(&self, txn: &mut dyn Txn) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentSummary {
    pub remote_id: u32,
    pub md5: String,
    pub content_type: String,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachmentLink {
    pub attachment_id: u32,
    pub object_id: u32,
}

#[async_trait]
pub trait ManagedAttachment: Send + Sync {
    fn id(&self) -> u32;
    fn md5(&self) -> &str;

    /// Copies remote metadata (md5, content type, size) onto this local
    /// placeholder. Does not transfer blob bytes — see
    /// `write_data`/the Remote Home Proxy.
    async fn copy_remote(&mut self, txn: &mut dyn Txn, source: &AttachmentSummary) -> Result<()>;
    async fn write_data(&mut self, txn: &mut dyn Txn, data: Vec<u8>) -> Result<()>;
    /// `remove(adjustQuota=false)`.
    async fn remove(self: Box<Self>, txn: &mut dyn Txn, adjust_quota: bool) -> Result<()>;
}
