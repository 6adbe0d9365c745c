//! Tools for working with the passage of time, mockable for deterministic
//! tests.
//!
//! Every component that needs to observe the current instant takes an
//! `Arc<dyn TimeProvider>` instead of reaching for the system clock, so tests
//! can pin time with a [`MockProvider`].

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr,
    unused_crate_dependencies
)]

// Workaround for "unused crate" lint false positives.
use workspace_hack as _;

use std::fmt::Debug;
use std::ops::{Add, Sub};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Timelike, Utc};
use parking_lot::RwLock;

/// A UTC instant with nanosecond resolution.
///
/// Thin wrapper around a [`chrono`] datetime so callers do not depend on
/// chrono directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Time(DateTime<Utc>);

impl Time {
    /// Create from the number of nanoseconds since the unix epoch.
    pub fn from_timestamp_nanos(nanos: i64) -> Self {
        Self(Utc.timestamp_nanos(nanos))
    }

    /// Create from whole seconds since the unix epoch, or `None` if out of
    /// range.
    pub fn from_timestamp(secs: i64, nanos: u32) -> Option<Self> {
        Utc.timestamp_opt(secs, nanos).single().map(Self)
    }

    /// Create from an arbitrary chrono datetime.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Nanoseconds since the unix epoch.
    pub fn timestamp_nanos(&self) -> i64 {
        self.0
            .timestamp_nanos_opt()
            .expect("timestamp out of range")
    }

    /// Whole seconds since the unix epoch.
    pub fn timestamp(&self) -> i64 {
        self.0.timestamp()
    }

    /// The nanosecond component of this instant.
    pub fn timestamp_subsec_nanos(&self) -> u32 {
        self.0.nanosecond()
    }

    /// The wrapped chrono datetime.
    pub fn date_time(&self) -> DateTime<Utc> {
        self.0
    }

    /// RFC 3339 rendering, the canonical string form of DATE values.
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }

    /// Parse the RFC 3339 string form, normalising to UTC.
    pub fn from_rfc3339(s: &str) -> Result<Self, chrono::ParseError> {
        Ok(Self(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc)))
    }
}

impl std::fmt::Display for Time {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_rfc3339())
    }
}

impl Add<Duration> for Time {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0 + chrono::Duration::from_std(rhs).expect("duration out of range"))
    }
}

impl Sub<Time> for Time {
    type Output = Duration;

    fn sub(self, rhs: Time) -> Self::Output {
        (self.0 - rhs.0).to_std().expect("negative duration")
    }
}

/// A source of the current wall-clock instant.
pub trait TimeProvider: Debug + Send + Sync + 'static {
    /// Returns the current instant.
    fn now(&self) -> Time;
}

impl TimeProvider for std::sync::Arc<dyn TimeProvider> {
    fn now(&self) -> Time {
        (**self).now()
    }
}

/// A [`TimeProvider`] backed by the system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProvider;

impl SystemProvider {
    /// Create a new provider.
    pub fn new() -> Self {
        Self
    }
}

impl TimeProvider for SystemProvider {
    fn now(&self) -> Time {
        Time(Utc::now())
    }
}

/// A [`TimeProvider`] that returns a pinned instant until told otherwise.
#[derive(Debug)]
pub struct MockProvider {
    now: RwLock<Time>,
}

impl MockProvider {
    /// Create a provider pinned to `now`.
    pub fn new(now: Time) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    /// Pin the provider to a new instant.
    pub fn set(&self, now: Time) {
        *self.now.write() = now;
    }

    /// Advance the pinned instant by `d`.
    pub fn inc(&self, d: Duration) -> Time {
        let mut now = self.now.write();
        *now = *now + d;
        *now
    }
}

impl TimeProvider for MockProvider {
    fn now(&self) -> Time {
        *self.now.read()
    }
}
