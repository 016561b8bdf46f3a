/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Delegate-assignment rows dumped from the remote home and replayed onto
//! the destination (§4.6). Individual and external rows cross unchanged;
//! group rows carry the group's directory uid rather than a local group
//! id, since the destination must resolve (or create) its own local group
//! row before the assignment can be inserted.

/// One user delegating their calendar to another individual user, verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndividualDelegateRecord {
    pub delegator_uid: String,
    pub delegate_uid: String,
    pub read_write: bool,
}

/// One user delegating to a group, identified by the group's directory uid
/// rather than any pod-local id — the destination resolves its own local
/// group row via `Store::group_by_uid` before inserting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDelegateRecord {
    pub delegator_uid: String,
    pub group_uid: String,
    pub read_write: bool,
}

/// One user delegating to an address with no local principal, verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalDelegateRecord {
    pub delegator_uid: String,
    pub external_uid: String,
    pub read_write: bool,
}
