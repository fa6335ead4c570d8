//! Drift Normalizer.
//!
//! Turns a fresh remote read into either a present record or an absence,
//! and compares a freshly observed shape against the recorded one.

use serde::Serialize;

use crate::advisory::Advisory;
use crate::diff::{Attribute, render};
use crate::model::Observe;
use crate::retry::CallError;

/// Result of reading a remote object.
#[derive(Debug, Clone, PartialEq)]
pub enum Presence<R> {
    Present(R),
    /// Gone, or in a state that counts as gone. `last_seen` is the record
    /// when the object still answered.
    Absent { reason: String, last_seen: Option<R> },
}

impl<R> Presence<R> {
    pub fn is_absent(&self) -> bool {
        matches!(self, Presence::Absent { .. })
    }

    pub fn map<U>(self, f: impl FnOnce(R) -> U) -> Presence<U> {
        match self {
            Presence::Present(record) => Presence::Present(f(record)),
            Presence::Absent { reason, last_seen } => Presence::Absent {
                reason,
                last_seen: last_seen.map(f),
            },
        }
    }
}

/// Normalize a read: 404 and records that report themselves vanished become
/// [`Presence::Absent`]; other errors pass through.
pub fn presence<R: Observe>(read: Result<R, CallError>) -> Result<Presence<R>, CallError> {
    match read {
        Ok(record) => Ok(match record.vanished() {
            Some(reason) => Presence::Absent {
                reason,
                last_seen: Some(record),
            },
            None => Presence::Present(record),
        }),
        Err(e) if e.is_not_found() => Ok(Presence::Absent {
            reason: "remote object not found".to_string(),
            last_seen: None,
        }),
        Err(e) => Err(e),
    }
}

/// Observed attributes that can report drift against a later observation.
pub trait DetectDrift {
    /// One [`Advisory::Drift`] per operator-settable attribute whose remote
    /// value differs from `self`.
    fn drift(&self, remote: &Self) -> Vec<Advisory>;
}

/// Collects drift advisories attribute by attribute.
#[derive(Debug, Default)]
pub struct DriftReport {
    advisories: Vec<Advisory>,
}

impl DriftReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field<T>(self, attribute: Attribute, recorded: &T, remote: &T) -> Self
    where
        T: PartialEq + Serialize + ?Sized,
    {
        self.optional(attribute, Some(recorded), Some(remote))
    }

    pub fn optional<T>(mut self, attribute: Attribute, recorded: Option<&T>, remote: Option<&T>) -> Self
    where
        T: PartialEq + Serialize + ?Sized,
    {
        // computed values are expected to move
        if attribute.is_settable() && recorded != remote {
            let show = |value: Option<&T>| value.map(render).unwrap_or_else(|| "null".to_string());
            self.advisories
                .push(Advisory::drift(attribute.name, show(recorded), show(remote)));
        }
        self
    }

    pub fn finish(self) -> Vec<Advisory> {
        self.advisories
    }
}
