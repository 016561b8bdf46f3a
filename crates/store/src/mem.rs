/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! In-memory destination store, gated behind `test_mode`. Applies writes
//! immediately against shared state rather than staging them per
//! transaction: the store's own two-phase-commit behaviour is out of scope
//! for this core (§1), so the test double only needs to honour the trait
//! contract, not model rollback of a half-applied batch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use trc::{AddContext, ErrorKind, Result};
use types::delegate::{ExternalDelegateRecord, IndividualDelegateRecord};
use types::migration::{AttachmentMigrationRecord, CalendarMigrationRecord, CalendarObjectMigrationRecord};

use crate::{
    AccessMode, AttachmentLink, AttachmentSummary, Calendar, CalendarHomeMetadata, CalendarMetadata,
    CalendarObjectData, Home, ManagedAttachment, MigrationRecordStore, ResourceChanges, Store, Txn,
};

#[derive(Default)]
struct CalendarState {
    id: u32,
    name: String,
    owned: bool,
    /// Monotonic counter, bumped on every object create/update/purge.
    /// `sync_token()` stringifies it; `resource_names_since_token` diffs
    /// against it. Not a content hash — the mem store only needs ordering.
    version: u64,
    objects: HashMap<String, ObjectState>,
    /// Names purged since creation, each tagged with the version they went
    /// away at, so a resync can report them as deleted.
    tombstones: Vec<(String, u64)>,
    metadata: CalendarMetadata,
}

#[derive(Clone)]
struct ObjectState {
    id: u32,
    component: Vec<u8>,
    md5: String,
    schedule_tag: Option<String>,
    access_mode: AccessMode,
    version: u64,
}

struct AttachmentState {
    id: u32,
    md5: String,
    content_type: String,
    size: u64,
    data: Vec<u8>,
}

#[derive(Default)]
struct HomeState {
    id: u32,
    calendars: HashMap<u32, CalendarState>,
    metadata: CalendarHomeMetadata,
    attachments: HashMap<u32, AttachmentState>,
    attachment_links: Vec<AttachmentLink>,
}

#[derive(Default)]
struct Records {
    calendars: Vec<CalendarMigrationRecord>,
    objects: Vec<CalendarObjectMigrationRecord>,
    attachments: Vec<AttachmentMigrationRecord>,
}

#[derive(Default)]
struct State {
    homes_by_uid: HashMap<String, HomeState>,
    next_id: u32,
    records: HashMap<u32, Records>,
    disabled_homes: HashMap<u32, bool>,
    groups_by_uid: HashMap<String, u32>,
    individual_delegates: Vec<IndividualDelegateRecord>,
    group_delegates: Vec<(String, u32, bool)>,
    external_delegates: Vec<ExternalDelegateRecord>,
}

impl State {
    fn alloc_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn uid_for_home_id(&self, home_id: u32) -> Option<String> {
        self.homes_by_uid
            .iter()
            .find(|(_, home)| home.id == home_id)
            .map(|(uid, _)| uid.clone())
    }
}

/// An in-memory stand-in for the destination store. Construct one and share
/// it via `Arc` between the orchestrator and a test's assertions.
#[derive(Clone, Default)]
pub struct MemStore {
    state: Arc<Mutex<State>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves a home's id back to its current owner uid. Used by the
    /// in-memory conduit, which only ever addresses the remote pod by the
    /// home id it handed back from `send_home_resource_id` — the way a
    /// real conduit would resolve ids against the remote pod's own schema
    /// rather than re-deriving them from the directory uid each time.
    pub fn uid_for_home_id(&self, home_id: u32) -> Option<String> {
        self.state.lock().unwrap().uid_for_home_id(home_id)
    }

    /// `disableRemoteHome`: marks the home as rejecting further user
    /// writes. Reads made by the migration core itself are unaffected —
    /// the core never writes to the source home, only external client
    /// traffic is meant to be rejected, which this in-memory double has
    /// no other way to model.
    pub fn disable_home(&self, home_id: u32) {
        self.state.lock().unwrap().disabled_homes.insert(home_id, true);
    }

    pub fn is_home_disabled(&self, home_id: u32) -> bool {
        self.state
            .lock()
            .unwrap()
            .disabled_homes
            .get(&home_id)
            .copied()
            .unwrap_or(false)
    }

    /// `removeRemoteHome`: the purge-source step. Drops the home and all
    /// of its calendars/attachments with no scheduling side-effects.
    pub fn purge_home(&self, home_id: u32) {
        let mut state = self.state.lock().unwrap();
        if let Some(uid) = state.uid_for_home_id(home_id) {
            state.homes_by_uid.remove(&uid);
        }
        state.disabled_homes.remove(&home_id);
    }

    /// Reads a remote attachment's raw bytes directly, bypassing the
    /// `ManagedAttachment` trait (which only models the destination's
    /// write-capable view). Stands in for the conduit's blob-streaming
    /// wire call.
    pub fn attachment_bytes(&self, uid: &str, attachment_id: u32) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .homes_by_uid
            .get(uid)?
            .attachments
            .get(&attachment_id)
            .map(|a| a.data.clone())
    }

    /// Test assertions: the delegate rows inserted so far, as
    /// `(delegator_uid, delegate_uid, read_write)`.
    pub fn individual_delegates(&self) -> Vec<IndividualDelegateRecord> {
        self.state.lock().unwrap().individual_delegates.clone()
    }

    /// Test assertions: `(delegator_uid, local_group_id, read_write)`.
    pub fn group_delegates(&self) -> Vec<(String, u32, bool)> {
        self.state.lock().unwrap().group_delegates.clone()
    }

    pub fn external_delegates(&self) -> Vec<ExternalDelegateRecord> {
        self.state.lock().unwrap().external_delegates.clone()
    }

    pub fn seed_calendar(&self, home_uid: &str, calendar_id: u32, name: &str, owned: bool) {
        let mut state = self.state.lock().unwrap();
        let home = state.homes_by_uid.entry(home_uid.to_string()).or_insert_with(|| {
            let id = 0; // overwritten by caller via calendar_home_with_uid
            HomeState { id, ..Default::default() }
        });
        home.calendars.insert(
            calendar_id,
            CalendarState {
                id: calendar_id,
                name: name.to_string(),
                owned,
                version: 0,
                objects: HashMap::new(),
                tombstones: Vec::new(),
                metadata: CalendarMetadata::default(),
            },
        );
    }
}

pub struct MemTxn {
    label: &'static str,
    migrating: bool,
}

#[async_trait]
impl Txn for MemTxn {
    fn label(&self) -> &'static str {
        self.label
    }

    fn is_migrating(&self) -> bool {
        self.migrating
    }

    fn set_migrating(&mut self, migrating: bool) {
        self.migrating = migrating;
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Store for MemStore {
    async fn new_transaction(&self, label: &'static str) -> Result<Box<dyn Txn>> {
        Ok(Box::new(MemTxn { label, migrating: false }))
    }

    async fn calendar_home_with_uid(
        &self,
        _txn: &mut dyn Txn,
        uid: &str,
        create: bool,
        _migrating_uid: Option<&str>,
    ) -> Result<Option<Box<dyn Home>>> {
        let mut state = self.state.lock().unwrap();
        if let Some(home) = state.homes_by_uid.get(uid) {
            return Ok(Some(Box::new(MemHome {
                uid: uid.to_string(),
                id: home.id,
                state: self.state.clone(),
            })));
        }
        if !create {
            return Ok(None);
        }
        let id = state.alloc_id();
        state.homes_by_uid.insert(
            uid.to_string(),
            HomeState { id, ..Default::default() },
        );
        Ok(Some(Box::new(MemHome {
            uid: uid.to_string(),
            id,
            state: self.state.clone(),
        })))
    }

    async fn rename_home_owner(&self, _txn: &mut dyn Txn, from_uid: &str, to_uid: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let home = state
            .homes_by_uid
            .remove(from_uid)
            .ok_or_else(|| trc::Error::new(ErrorKind::MissingRemoteResource).reason(format!("no home for {from_uid}")))
            .caused_by(trc::location!())?;
        state.homes_by_uid.insert(to_uid.to_string(), home);
        Ok(())
    }

    async fn group_by_uid(&self, _txn: &mut dyn Txn, group_uid: &str) -> Result<u32> {
        let mut state = self.state.lock().unwrap();
        if let Some(&id) = state.groups_by_uid.get(group_uid) {
            return Ok(id);
        }
        let id = state.alloc_id();
        state.groups_by_uid.insert(group_uid.to_string(), id);
        Ok(id)
    }

    async fn insert_individual_delegate(&self, _txn: &mut dyn Txn, record: IndividualDelegateRecord) -> Result<()> {
        self.state.lock().unwrap().individual_delegates.push(record);
        Ok(())
    }

    async fn insert_group_delegate(
        &self,
        _txn: &mut dyn Txn,
        delegator_uid: &str,
        group_id: u32,
        read_write: bool,
    ) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .group_delegates
            .push((delegator_uid.to_string(), group_id, read_write));
        Ok(())
    }

    async fn insert_external_delegate(&self, _txn: &mut dyn Txn, record: ExternalDelegateRecord) -> Result<()> {
        self.state.lock().unwrap().external_delegates.push(record);
        Ok(())
    }
}

struct MemHome {
    uid: String,
    id: u32,
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl Home for MemHome {
    fn id(&self) -> u32 {
        self.id
    }

    async fn load_children(&self, _txn: &mut dyn Txn) -> Result<Vec<Box<dyn Calendar>>> {
        let state = self.state.lock().unwrap();
        let home = state.homes_by_uid.get(&self.uid);
        let Some(home) = home else { return Ok(Vec::new()) };
        Ok(home
            .calendars
            .keys()
            .map(|&id| Box::new(MemCalendar { home_uid: self.uid.clone(), id, state: self.state.clone() }) as Box<dyn Calendar>)
            .collect())
    }

    async fn child_with_id(&self, _txn: &mut dyn Txn, id: u32) -> Result<Option<Box<dyn Calendar>>> {
        let state = self.state.lock().unwrap();
        let has = state
            .homes_by_uid
            .get(&self.uid)
            .is_some_and(|home| home.calendars.contains_key(&id));
        Ok(has.then(|| Box::new(MemCalendar { home_uid: self.uid.clone(), id, state: self.state.clone() }) as Box<dyn Calendar>))
    }

    async fn create_child_with_name(&self, _txn: &mut dyn Txn, name: &str) -> Result<Box<dyn Calendar>> {
        let mut state = self.state.lock().unwrap();
        let id = state.alloc_id();
        let home = state.homes_by_uid.get_mut(&self.uid).expect("home exists");
        home.calendars.insert(
            id,
            CalendarState {
                id,
                name: name.to_string(),
                owned: true,
                version: 0,
                objects: HashMap::new(),
                tombstones: Vec::new(),
                metadata: CalendarMetadata::default(),
            },
        );
        Ok(Box::new(MemCalendar { home_uid: self.uid.clone(), id, state: self.state.clone() }))
    }

    async fn metadata(&self, _txn: &mut dyn Txn) -> Result<CalendarHomeMetadata> {
        let state = self.state.lock().unwrap();
        Ok(state.homes_by_uid.get(&self.uid).map(|h| h.metadata.clone()).unwrap_or_default())
    }

    async fn copy_metadata(&self, _txn: &mut dyn Txn, source: &CalendarHomeMetadata) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(home) = state.homes_by_uid.get_mut(&self.uid) {
            home.metadata = source.clone();
        }
        Ok(())
    }

    async fn get_all_attachments(&self, _txn: &mut dyn Txn) -> Result<Vec<AttachmentSummary>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .homes_by_uid
            .get(&self.uid)
            .map(|home| {
                home.attachments
                    .values()
                    .map(|a| AttachmentSummary {
                        remote_id: a.id,
                        md5: a.md5.clone(),
                        content_type: a.content_type.clone(),
                        size: a.size,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_attachment_by_id(&self, _txn: &mut dyn Txn, id: u32) -> Result<Option<Box<dyn ManagedAttachment>>> {
        let state = self.state.lock().unwrap();
        let exists = state
            .homes_by_uid
            .get(&self.uid)
            .is_some_and(|home| home.attachments.contains_key(&id));
        Ok(exists.then(|| Box::new(MemAttachment { home_uid: self.uid.clone(), id, state: self.state.clone() }) as Box<dyn ManagedAttachment>))
    }

    async fn create_attachment(&self, _txn: &mut dyn Txn) -> Result<Box<dyn ManagedAttachment>> {
        let mut state = self.state.lock().unwrap();
        let id = state.alloc_id();
        let home = state.homes_by_uid.get_mut(&self.uid).expect("home exists");
        home.attachments.insert(
            id,
            AttachmentState { id, md5: String::new(), content_type: String::new(), size: 0, data: Vec::new() },
        );
        Ok(Box::new(MemAttachment { home_uid: self.uid.clone(), id, state: self.state.clone() }))
    }

    async fn get_attachment_links(&self, _txn: &mut dyn Txn) -> Result<Vec<AttachmentLink>> {
        let state = self.state.lock().unwrap();
        Ok(state.homes_by_uid.get(&self.uid).map(|h| h.attachment_links.clone()).unwrap_or_default())
    }

    async fn insert_attachment_link(&self, _txn: &mut dyn Txn, link: AttachmentLink) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(home) = state.homes_by_uid.get_mut(&self.uid) {
            if !home.attachment_links.contains(&link) {
                home.attachment_links.push(link);
            }
        }
        Ok(())
    }
}

struct MemCalendar {
    home_uid: String,
    id: u32,
    state: Arc<Mutex<State>>,
}

impl MemCalendar {
    fn with_calendar<T>(&self, f: impl FnOnce(&CalendarState) -> T) -> Option<T> {
        let state = self.state.lock().unwrap();
        state.homes_by_uid.get(&self.home_uid)?.calendars.get(&self.id).map(f)
    }

    fn with_calendar_mut<T>(&self, f: impl FnOnce(&mut CalendarState) -> T) -> Option<T> {
        let mut state = self.state.lock().unwrap();
        state.homes_by_uid.get_mut(&self.home_uid)?.calendars.get_mut(&self.id).map(f)
    }
}

#[async_trait]
impl Calendar for MemCalendar {
    fn id(&self) -> u32 {
        self.id
    }

    fn name(&self) -> &str {
        // Trait requires a `&str` with no transaction; mem calendars are
        // looked up live so this is only used for display purposes in
        // tests via `metadata()` instead.
        ""
    }

    fn owned(&self) -> bool {
        self.with_calendar(|c| c.owned).unwrap_or(false)
    }

    async fn sync_token(&self, _txn: &mut dyn Txn) -> Result<String> {
        Ok(self.with_calendar(|c| c.version.to_string()).unwrap_or_default())
    }

    async fn resource_names_since_token(
        &self,
        _txn: &mut dyn Txn,
        token: Option<&str>,
    ) -> Result<ResourceChanges> {
        Ok(self
            .with_calendar(|c| match token.map(str::parse::<u64>) {
                None => ResourceChanges {
                    changed: c.objects.keys().cloned().collect(),
                    deleted: Vec::new(),
                    invalid_token: false,
                },
                Some(Ok(since)) => ResourceChanges {
                    changed: c.objects.iter().filter(|(_, o)| o.version > since).map(|(name, _)| name.clone()).collect(),
                    deleted: c.tombstones.iter().filter(|(_, v)| *v > since).map(|(name, _)| name.clone()).collect(),
                    invalid_token: false,
                },
                Some(Err(_)) => ResourceChanges {
                    changed: c.objects.keys().cloned().collect(),
                    deleted: Vec::new(),
                    invalid_token: true,
                },
            })
            .unwrap_or_default())
    }

    async fn object_resources_with_names(
        &self,
        _txn: &mut dyn Txn,
        names: &[String],
    ) -> Result<Vec<CalendarObjectData>> {
        Ok(self
            .with_calendar(|c| {
                names
                    .iter()
                    .filter_map(|name| {
                        c.objects.get(name).map(|o| CalendarObjectData {
                            id: o.id,
                            name: name.clone(),
                            component: o.component.clone(),
                            md5: o.md5.clone(),
                            schedule_tag: o.schedule_tag.clone(),
                            access_mode: o.access_mode,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn object_id_with_name(&self, _txn: &mut dyn Txn, name: &str) -> Result<Option<u32>> {
        Ok(self.with_calendar(|c| c.objects.get(name).map(|o| o.id)).flatten())
    }

    async fn create_object_raw(
        &self,
        _txn: &mut dyn Txn,
        name: &str,
        component: Vec<u8>,
        md5: String,
    ) -> Result<u32> {
        let id = {
            let mut state = self.state.lock().unwrap();
            state.alloc_id()
        };
        self.with_calendar_mut(|c| {
            c.version += 1;
            let version = c.version;
            c.objects.insert(
                name.to_string(),
                ObjectState { id, component, md5, schedule_tag: None, access_mode: AccessMode::default(), version },
            );
        });
        Ok(id)
    }

    async fn update_object_raw(&self, _txn: &mut dyn Txn, name: &str, component: Vec<u8>, md5: String) -> Result<()> {
        self.with_calendar_mut(|c| {
            c.version += 1;
            let version = c.version;
            if let Some(obj) = c.objects.get_mut(name) {
                obj.component = component;
                obj.md5 = md5;
                obj.version = version;
            }
        });
        Ok(())
    }

    async fn copy_object_metadata(
        &self,
        _txn: &mut dyn Txn,
        name: &str,
        schedule_tag: Option<&str>,
        access_mode: AccessMode,
    ) -> Result<()> {
        self.with_calendar_mut(|c| {
            if let Some(obj) = c.objects.get_mut(name) {
                obj.schedule_tag = schedule_tag.map(str::to_string);
                obj.access_mode = access_mode;
            }
        });
        Ok(())
    }

    async fn purge_object(&self, _txn: &mut dyn Txn, name: &str) -> Result<bool> {
        Ok(self
            .with_calendar_mut(|c| {
                c.version += 1;
                let version = c.version;
                let removed = c.objects.remove(name).is_some();
                if removed {
                    c.tombstones.push((name.to_string(), version));
                }
                removed
            })
            .unwrap_or(false))
    }

    async fn metadata(&self, _txn: &mut dyn Txn) -> Result<CalendarMetadata> {
        Ok(self.with_calendar(|c| c.metadata.clone()).unwrap_or_default())
    }

    async fn copy_metadata(&self, _txn: &mut dyn Txn, source: &CalendarMetadata) -> Result<()> {
        self.with_calendar_mut(|c| c.metadata = source.clone());
        Ok(())
    }

    async fn purge(&self, _txn: &mut dyn Txn) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(home) = state.homes_by_uid.get_mut(&self.home_uid) {
            home.calendars.remove(&self.id);
        }
        Ok(())
    }
}

struct MemAttachment {
    home_uid: String,
    id: u32,
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl ManagedAttachment for MemAttachment {
    fn id(&self) -> u32 {
        self.id
    }

    fn md5(&self) -> &str {
        ""
    }

    async fn copy_remote(&mut self, _txn: &mut dyn Txn, source: &AttachmentSummary) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(att) = state
            .homes_by_uid
            .get_mut(&self.home_uid)
            .and_then(|h| h.attachments.get_mut(&self.id))
        {
            att.md5 = source.md5.clone();
            att.content_type = source.content_type.clone();
            att.size = source.size;
        }
        Ok(())
    }

    async fn write_data(&mut self, _txn: &mut dyn Txn, data: Vec<u8>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(att) = state
            .homes_by_uid
            .get_mut(&self.home_uid)
            .and_then(|h| h.attachments.get_mut(&self.id))
        {
            att.size = data.len() as u64;
            att.data = data;
        }
        Ok(())
    }

    async fn remove(self: Box<Self>, _txn: &mut dyn Txn, _adjust_quota: bool) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(home) = state.homes_by_uid.get_mut(&self.home_uid) {
            home.attachments.remove(&self.id);
        }
        Ok(())
    }
}

#[async_trait]
impl MigrationRecordStore for MemStore {
    async fn calendar_records(&self, _txn: &mut dyn Txn, home_id: u32) -> Result<Vec<CalendarMigrationRecord>> {
        let state = self.state.lock().unwrap();
        Ok(state.records.get(&home_id).map(|r| r.calendars.clone()).unwrap_or_default())
    }

    async fn upsert_calendar_record(&self, _txn: &mut dyn Txn, record: CalendarMigrationRecord) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let records = state.records.entry(record.home_id).or_default();
        if let Some(existing) = records
            .calendars
            .iter_mut()
            .find(|r| r.remote_calendar_id == record.remote_calendar_id)
        {
            *existing = record;
        } else {
            records.calendars.push(record);
        }
        Ok(())
    }

    async fn delete_calendar_record(&self, _txn: &mut dyn Txn, home_id: u32, remote_calendar_id: u32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(records) = state.records.get_mut(&home_id) {
            records.calendars.retain(|r| r.remote_calendar_id != remote_calendar_id);
        }
        Ok(())
    }

    async fn object_records(&self, _txn: &mut dyn Txn, home_id: u32) -> Result<Vec<CalendarObjectMigrationRecord>> {
        let state = self.state.lock().unwrap();
        Ok(state.records.get(&home_id).map(|r| r.objects.clone()).unwrap_or_default())
    }

    async fn insert_object_record(&self, _txn: &mut dyn Txn, record: CalendarObjectMigrationRecord) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.records.entry(record.home_id).or_default().objects.push(record);
        Ok(())
    }

    async fn delete_object_record_by_local_id(&self, _txn: &mut dyn Txn, home_id: u32, local_object_id: u32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(records) = state.records.get_mut(&home_id) {
            records.objects.retain(|r| r.local_object_id != local_object_id);
        }
        Ok(())
    }

    async fn attachment_records(&self, _txn: &mut dyn Txn, home_id: u32) -> Result<Vec<AttachmentMigrationRecord>> {
        let state = self.state.lock().unwrap();
        Ok(state.records.get(&home_id).map(|r| r.attachments.clone()).unwrap_or_default())
    }

    async fn insert_attachment_record(&self, _txn: &mut dyn Txn, record: AttachmentMigrationRecord) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.records.entry(record.home_id).or_default().attachments.push(record);
        Ok(())
    }

    async fn delete_attachment_record(&self, _txn: &mut dyn Txn, home_id: u32, remote_attachment_id: u32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(records) = state.records.get_mut(&home_id) {
            records.attachments.retain(|r| r.remote_attachment_id != remote_attachment_id);
        }
        Ok(())
    }
}
