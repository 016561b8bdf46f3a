/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Minimal structured error/event layer shared by every crate in this
//! workspace, in the shape of the teacher's own `trc` crate: a `Result<T>`
//! alias, an `AddContext`/`caused_by` chain for pinpointing the call site a
//! failure passed through, and an `event!` macro for structured logging.
//!
//! Unlike the teacher's `trc`, which backs its own lock-free event
//! collector, this one is a thin adapter over the `tracing` crate: the core
//! being built here does not need a dedicated telemetry pipeline, but it
//! still deserves the same `trc::Result`/`caused_by`/`event!` call-site idiom.

use std::fmt;

/// The failure kinds the migration core can produce, per the error design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The directory has no record for the migrating user.
    DirectoryRecordNotFound,
    /// The user's directory record already reports residency on this pod.
    InvalidTarget,
    /// The conduit returned no remote home id, or the RPC itself failed.
    RemoteUnavailable,
    /// A store operation failed inside a self-created transaction.
    StoreFailure,
    /// A remote resource referenced by id was not found mid-sync.
    MissingRemoteResource,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::DirectoryRecordNotFound => "DirectoryRecordNotFound",
            ErrorKind::InvalidTarget => "InvalidTarget",
            ErrorKind::RemoteUnavailable => "RemoteUnavailable",
            ErrorKind::StoreFailure => "StoreFailure",
            ErrorKind::MissingRemoteResource => "MissingRemoteResource",
        }
    }

    /// Whether a failure of this kind can be retried by simply rerunning
    /// `migrate_here` from the start (true only before the source is
    /// disabled).
    pub fn retriable_from_scratch(&self) -> bool {
        matches!(
            self,
            ErrorKind::RemoteUnavailable | ErrorKind::StoreFailure
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure value carrying its kind, an optional human-readable reason, and
/// the chain of `trc::location!()` call sites it passed through.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    reason: Option<String>,
    locations: Vec<&'static str>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            reason: None,
            locations: Vec::new(),
        }
    }

    pub fn reason(mut self, reason: impl fmt::Display) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    pub fn caused_by(mut self, location: &'static str) -> Self {
        self.locations.push(location);
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(reason) = &self.reason {
            write!(f, ": {reason}")?;
        }
        for location in &self.locations {
            write!(f, "\n  at {location}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Chains a `trc::location!()` onto a failing `Result`, the way the teacher
/// chains `.caused_by(trc::location!())` at every fallible call site.
pub trait AddContext<T> {
    fn caused_by(self, location: &'static str) -> Result<T>;
}

impl<T> AddContext<T> for Result<T> {
    fn caused_by(self, location: &'static str) -> Result<T> {
        self.map_err(|err| err.caused_by(location))
    }
}

#[macro_export]
macro_rules! location {
    () => {
        concat!(file!(), ":", line!())
    };
}

/// Structured logging, e.g. `trc::event!(info, "phase started"; Phase = phase.as_str());`.
#[macro_export]
macro_rules! event {
    ($level:ident, $msg:expr) => {
        tracing::$level!($msg)
    };
    ($level:ident, $msg:expr; $($key:ident = $val:expr),+ $(,)?) => {
        tracing::$level!($($key = %$val,)+ $msg)
    };
}
