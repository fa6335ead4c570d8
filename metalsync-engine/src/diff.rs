//! Diff Classifier.
//!
//! Compares desired configuration against observed attributes and labels
//! every compared attribute with the action its change needs. The label is
//! static per attribute: it comes from the [`Mutability`] on the
//! attribute's [`Attribute`] constant, never from the call site.

use std::fmt;

use serde::Serialize;

use crate::error::EngineError;
use crate::model::ResourceKind;

/// How a remote attribute may change once the object exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mutability {
    /// Changing it means destroying and recreating the object.
    Immutable,
    /// Changing it means reinstalling the operating system (servers only).
    Reinstallable,
    /// Changed with an in-place update call.
    Mutable,
    /// Assigned by the remote API; never taken from the desired side.
    ComputedOnly,
}

/// A named remote attribute and its mutability class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Attribute {
    pub name: &'static str,
    pub mutability: Mutability,
}

impl Attribute {
    pub const fn immutable(name: &'static str) -> Self {
        Self {
            name,
            mutability: Mutability::Immutable,
        }
    }

    pub const fn reinstallable(name: &'static str) -> Self {
        Self {
            name,
            mutability: Mutability::Reinstallable,
        }
    }

    pub const fn mutable(name: &'static str) -> Self {
        Self {
            name,
            mutability: Mutability::Mutable,
        }
    }

    pub const fn computed(name: &'static str) -> Self {
        Self {
            name,
            mutability: Mutability::ComputedOnly,
        }
    }

    /// Whether the operator can set it, i.e. whether remote divergence is drift.
    pub fn is_settable(&self) -> bool {
        self.mutability != Mutability::ComputedOnly
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Classification of a single compared attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Unchanged,
    InPlace,
    RequiresReplace,
    RequiresReinstall,
}

/// One entry of a [`ChangeSet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeChange {
    pub attribute: Attribute,
    pub change: Change,
    /// Observed value, rendered for diagnostics.
    pub from: String,
    /// Desired value, rendered for diagnostics.
    pub to: String,
}

/// What a convergence pass has to do overall.
///
/// Ordered by severity; the verdict of a change set is its most severe entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verdict {
    Noop,
    InPlace,
    Reinstall,
    Replace,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Noop => "noop",
            Verdict::InPlace => "in_place",
            Verdict::Reinstall => "reinstall",
            Verdict::Replace => "replace",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-attribute classification of desired vs observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    pub kind: ResourceKind,
    pub entries: Vec<AttributeChange>,
}

impl ChangeSet {
    pub fn verdict(&self) -> Verdict {
        self.entries
            .iter()
            .map(|entry| match entry.change {
                Change::Unchanged => Verdict::Noop,
                Change::InPlace => Verdict::InPlace,
                Change::RequiresReinstall => Verdict::Reinstall,
                Change::RequiresReplace => Verdict::Replace,
            })
            .max()
            .unwrap_or(Verdict::Noop)
    }

    fn names_with(&self, change: Change) -> Vec<&'static str> {
        self.entries
            .iter()
            .filter(|entry| entry.change == change)
            .map(|entry| entry.attribute.name)
            .collect()
    }

    pub fn replace_attributes(&self) -> Vec<&'static str> {
        self.names_with(Change::RequiresReplace)
    }

    /// Every Reinstallable attribute that changed, not just the first.
    pub fn reinstall_attributes(&self) -> Vec<&'static str> {
        self.names_with(Change::RequiresReinstall)
    }

    pub fn in_place_attributes(&self) -> Vec<&'static str> {
        self.names_with(Change::InPlace)
    }

    pub fn get(&self, name: &str) -> Option<&AttributeChange> {
        self.entries.iter().find(|entry| entry.attribute.name == name)
    }

    /// Whether `attribute` changed in a way an update call handles.
    pub fn updates(&self, attribute: Attribute) -> bool {
        self.get(attribute.name)
            .is_some_and(|entry| entry.change == Change::InPlace)
    }

    pub fn changed(&self, attribute: Attribute) -> bool {
        self.get(attribute.name)
            .is_some_and(|entry| entry.change != Change::Unchanged)
    }
}

/// Desired configuration that can be compared against observed attributes.
pub trait Classify {
    type Observed;

    /// Pure. Fails only when a computed attribute is explicitly overridden.
    fn classify(&self, observed: &Self::Observed) -> Result<ChangeSet, EngineError>;
}

/// Accumulates the entries of a [`ChangeSet`].
pub struct DiffBuilder {
    kind: ResourceKind,
    entries: Vec<AttributeChange>,
    error: Option<EngineError>,
}

impl DiffBuilder {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            entries: Vec::new(),
            error: None,
        }
    }

    /// Compare a required attribute.
    pub fn field<T>(self, attribute: Attribute, desired: &T, observed: &T) -> Self
    where
        T: PartialEq + Serialize + ?Sized,
    {
        self.optional(attribute, Some(desired), Some(observed))
    }

    /// Compare an attribute only when the desired side sets it.
    pub fn optional<T>(mut self, attribute: Attribute, desired: Option<&T>, observed: Option<&T>) -> Self
    where
        T: PartialEq + Serialize + ?Sized,
    {
        let Some(desired) = desired else {
            return self;
        };
        let same = observed.is_some_and(|observed| observed == desired);
        let from = observed.map(render).unwrap_or_else(|| "null".to_string());
        let to = render(desired);

        let change = match (same, attribute.mutability) {
            (true, _) => Change::Unchanged,
            (false, Mutability::Immutable) => Change::RequiresReplace,
            (false, Mutability::Reinstallable) => Change::RequiresReinstall,
            (false, Mutability::Mutable) => Change::InPlace,
            (false, Mutability::ComputedOnly) => {
                if self.error.is_none() {
                    self.error = Some(EngineError::ComputedOverride {
                        kind: self.kind,
                        attribute: attribute.name,
                        declared: to,
                        observed: from,
                    });
                }
                return self;
            }
        };

        self.entries.push(AttributeChange {
            attribute,
            change,
            from,
            to,
        });
        self
    }

    pub fn finish(self) -> Result<ChangeSet, EngineError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(ChangeSet {
                kind: self.kind,
                entries: self.entries,
            }),
        }
    }
}

/// Render a value for diagnostics: strings bare, everything else as JSON.
pub(crate) fn render<T: Serialize + ?Sized>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        Ok(other) => other.to_string(),
        Err(_) => "<unrenderable>".to_string(),
    }
}
