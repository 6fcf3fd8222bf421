//! Static table of capabilities, built once and never mutated

use crate::capability::Capability;
use crate::schema::{InputSchema, SchemaError};
use hostgate_guard::{Role, RoleAuthorizer};
use serde::Serialize;
use serde_json::Value;

/// Everything known about one capability before it runs
#[derive(Debug, Clone)]
pub struct CapabilityDescriptor {
    pub capability: Capability,
    pub name: &'static str,
    pub required_role: Role,
    pub description: &'static str,
    /// Compiled once, at registry construction
    pub schema: InputSchema,
}

impl CapabilityDescriptor {
    fn of(capability: Capability) -> Result<Self, SchemaError> {
        Ok(Self {
            capability,
            name: capability.name(),
            required_role: capability.required_role(),
            description: capability.description(),
            schema: capability.schema()?,
        })
    }

    /// Listing entry with the schema rendered as JSON Schema
    #[must_use]
    pub fn summary(&self) -> CapabilitySummary {
        CapabilitySummary {
            name: self.name,
            required_role: self.required_role,
            description: self.description,
            input_schema: self.schema.to_json_schema(),
        }
    }
}

/// Serializable view of a descriptor
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitySummary {
    pub name: &'static str,
    pub required_role: Role,
    pub description: &'static str,
    pub input_schema: Value,
}

/// Name-indexed capability table
#[derive(Debug, Clone)]
pub struct CapabilityRegistry {
    descriptors: Vec<CapabilityDescriptor>,
    authorizer: RoleAuthorizer,
}

impl CapabilityRegistry {
    /// Registry of every capability, in [`Capability::ALL`] order
    ///
    /// # Errors
    /// Returns a [`SchemaError`] if an argument schema does not compile
    pub fn new() -> Result<Self, SchemaError> {
        Ok(Self {
            descriptors: Capability::ALL
                .into_iter()
                .map(CapabilityDescriptor::of)
                .collect::<Result<_, _>>()?,
            authorizer: RoleAuthorizer::new(),
        })
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&CapabilityDescriptor> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    /// Capabilities `role` may invoke, in registry order
    pub fn list_for(&self, role: Role) -> impl Iterator<Item = &CapabilityDescriptor> + '_ {
        let authorizer = self.authorizer;
        self.descriptors
            .iter()
            .filter(move |d| authorizer.permits(role, d.required_role))
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn authorizer(&self) -> &RoleAuthorizer {
        &self.authorizer
    }
}
