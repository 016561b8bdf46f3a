/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! The cross-pod user-home migration core. Ties together the narrow
//! destination-store, conduit, and directory boundaries (each its own
//! crate) into the staged migration pipeline and the incremental-sync
//! algorithms it drives. See `Orchestrator::migrate_here` for the single
//! entry point.

pub mod attachment;
pub mod calendar_list;
pub mod delegate;
pub mod object_reconciler;
pub mod orchestrator;
pub mod remote_home;
pub mod txn_scope;

pub use orchestrator::{LockRetryConfig, MigrationConfig, Orchestrator};
