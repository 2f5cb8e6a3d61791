//! Method-level capabilities of a dispensed plugin service.
//!
//! A plugin advertises the methods its dispensed object answers. The host
//! compares that set with the methods a service descriptor requires before
//! binding the remote object to a typed interface.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A method a dispensed service can answer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Capability {
    /// Scheme identity accessor.
    GetName,

    /// Scheme media-type accessor.
    GetSupportedMediaTypes,

    /// Software-component attribute synthesis from reference measurements.
    SynthSwAttributes,

    /// Any other method name.
    Custom(String),
}

impl Capability {
    /// Parse a capability from a method name.
    pub fn parse(s: &str) -> Self {
        match s {
            "get_name" => Capability::GetName,
            "get_supported_media_types" => Capability::GetSupportedMediaTypes,
            "synth_sw_attributes" => Capability::SynthSwAttributes,
            other => Capability::Custom(other.to_string()),
        }
    }

    /// Method name on the wire.
    pub fn as_str(&self) -> &str {
        match self {
            Capability::GetName => "get_name",
            Capability::GetSupportedMediaTypes => "get_supported_media_types",
            Capability::SynthSwAttributes => "synth_sw_attributes",
            Capability::Custom(s) => s,
        }
    }
}

impl From<String> for Capability {
    fn from(value: String) -> Self {
        Capability::parse(&value)
    }
}

impl From<Capability> for String {
    fn from(value: Capability) -> Self {
        value.as_str().to_string()
    }
}

/// A set of capabilities, ordered for stable error messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    capabilities: BTreeSet<Capability>,
}

impl CapabilitySet {
    /// Create an empty capability set.
    pub fn new() -> Self {
        Self {
            capabilities: BTreeSet::new(),
        }
    }

    /// Create a capability set from a list of method names.
    pub fn from_strings<I, S>(strings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let capabilities = strings
            .into_iter()
            .map(|s| Capability::parse(s.as_ref()))
            .collect();
        Self { capabilities }
    }

    /// Check if the set contains a capability.
    pub fn has(&self, cap: &Capability) -> bool {
        self.capabilities.contains(cap)
    }

    /// Capabilities in `required` that this set lacks.
    pub fn missing_from(&self, required: &CapabilitySet) -> Vec<Capability> {
        required
            .capabilities
            .difference(&self.capabilities)
            .cloned()
            .collect()
    }

    /// Method names, in order.
    pub fn method_names(&self) -> Vec<String> {
        self.capabilities
            .iter()
            .map(|c| c.as_str().to_string())
            .collect()
    }

    /// Get the number of capabilities.
    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        Self {
            capabilities: iter.into_iter().collect(),
        }
    }
}
