/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Persistence for the three migration-record tables (§3). Unlike the rest
//! of this crate, these tables are part of the migration core's own data
//! model rather than a narrow view onto someone else's schema — but the
//! actual storage backend is still external, so the core only ever sees
//! this trait.
//!
//! The source expresses these as `querysimple`/`insert`/`update`/`duplicate`/
//! `isnew` calls on generic record objects. Re-architected here as explicit,
//! typed methods per record kind — a plain mapping container keyed by
//! remote id, diffed with ordinary set operations, is all the core needs.

use async_trait::async_trait;
use trc::Result;
use types::migration::{AttachmentMigrationRecord, CalendarMigrationRecord, CalendarObjectMigrationRecord};

use crate::Txn;

#[async_trait]
pub trait MigrationRecordStore: Send + Sync {
    async fn calendar_records(
        &self,
        txn: &mut dyn Txn,
        home_id: u32,
    ) -> Result<Vec<CalendarMigrationRecord>>;
    async fn upsert_calendar_record(
        &self,
        txn: &mut dyn Txn,
        record: CalendarMigrationRecord,
    ) -> Result<()>;
    async fn delete_calendar_record(
        &self,
        txn: &mut dyn Txn,
        home_id: u32,
        remote_calendar_id: u32,
    ) -> Result<()>;

    async fn object_records(
        &self,
        txn: &mut dyn Txn,
        home_id: u32,
    ) -> Result<Vec<CalendarObjectMigrationRecord>>;
    async fn insert_object_record(
        &self,
        txn: &mut dyn Txn,
        record: CalendarObjectMigrationRecord,
    ) -> Result<()>;
    /// Realizes I2's cascade: the object reconciler calls this in the same
    /// step it purges a local object, since the store cannot see the FK the
    /// teacher's schema would otherwise enforce for it.
    async fn delete_object_record_by_local_id(
        &self,
        txn: &mut dyn Txn,
        home_id: u32,
        local_object_id: u32,
    ) -> Result<()>;

    async fn attachment_records(
        &self,
        txn: &mut dyn Txn,
        home_id: u32,
    ) -> Result<Vec<AttachmentMigrationRecord>>;
    async fn insert_attachment_record(
        &self,
        txn: &mut dyn Txn,
        record: AttachmentMigrationRecord,
    ) -> Result<()>;
    async fn delete_attachment_record(
        &self,
        txn: &mut dyn Txn,
        home_id: u32,
        remote_attachment_id: u32,
    ) -> Result<()>;
}
