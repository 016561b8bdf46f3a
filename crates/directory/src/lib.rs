/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! The directory-service boundary consumed by the migration core (§6):
//! resolving a user's directory record by uid, nothing else. User lookup,
//! home-server determination, principal resolution, and every backend
//! (LDAP/SQL/cache) that actually answers those questions are external
//! collaborators (§1) and live entirely outside this workspace.

use async_trait::async_trait;

#[cfg(feature = "test_mode")]
pub mod mem;

/// `record.uid`, `record.thisServer()` (§6). Directory records are
/// otherwise opaque to the migration core — it never inspects anything
/// else about the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRecord {
    uid: String,
    this_server: bool,
}

impl DirectoryRecord {
    pub fn new(uid: impl Into<String>, this_server: bool) -> Self {
        Self {
            uid: uid.into(),
            this_server,
        }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// `true` if this user's home already lives on this pod. Migrating a
    /// user who already reports residency here is `InvalidTarget`.
    pub fn this_server(&self) -> bool {
        self.this_server
    }
}

/// `directoryService().recordWithUID(uid) → record | null` (§6).
#[async_trait]
pub trait DirectoryService: Send + Sync {
    async fn record_with_uid(&self, uid: &str) -> trc::Result<Option<DirectoryRecord>>;
}
