/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! In-memory directory, gated behind `test_mode`, the way the teacher
//! gates its own in-memory directory backend behind the same feature.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{DirectoryRecord, DirectoryService};

#[derive(Default)]
pub struct MemDirectory {
    records: Mutex<HashMap<String, bool>>,
}

impl MemDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a user. `this_server` marks them as already resident on
    /// this pod, exercising the `InvalidTarget` error path.
    pub fn add_user(&self, uid: &str, this_server: bool) {
        self.records.lock().unwrap().insert(uid.to_string(), this_server);
    }
}

#[async_trait]
impl DirectoryService for MemDirectory {
    async fn record_with_uid(&self, uid: &str) -> trc::Result<Option<DirectoryRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(uid)
            .map(|&this_server| DirectoryRecord::new(uid, this_server)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_user_is_none() {
        let dir = MemDirectory::new();
        assert!(dir.record_with_uid("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn known_user_round_trips() {
        let dir = MemDirectory::new();
        dir.add_user("user42", false);
        let record = dir.record_with_uid("user42").await.unwrap().unwrap();
        assert_eq!(record.uid(), "user42");
        assert!(!record.this_server());
    }
}
