/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Small shared types with no behaviour of their own, in the spirit of the
//! teacher's `types` crate: ids and enums that every other crate in the
//! workspace needs to agree on.

pub mod delegate;
pub mod migration;

/// One of the eight ordered states the migration orchestrator drives
/// through, per the state machine design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MigrationPhase {
    Init,
    BulkSync,
    WarmSync,
    DisableSource,
    FinalSync,
    Reconcile,
    EnableDestination,
    PurgeSource,
}

impl MigrationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationPhase::Init => "init",
            MigrationPhase::BulkSync => "bulk_sync",
            MigrationPhase::WarmSync => "warm_sync",
            MigrationPhase::DisableSource => "disable_source",
            MigrationPhase::FinalSync => "final_sync",
            MigrationPhase::Reconcile => "reconcile",
            MigrationPhase::EnableDestination => "enable_destination",
            MigrationPhase::PurgeSource => "purge_source",
        }
    }

    /// Once this phase has started, a failure can no longer be resolved by
    /// simply rerunning `migrate_here` from scratch: the source has already
    /// been (or is about to be) disabled.
    pub fn requires_compensation_on_failure(&self) -> bool {
        !matches!(self, MigrationPhase::Init | MigrationPhase::BulkSync | MigrationPhase::WarmSync)
    }
}

impl std::fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The synthetic owner key a migrating home is parked under until
/// switchover (I1).
pub fn migrating_owner_key(diruid: &str) -> String {
    format!("Migrating-{diruid}")
}
