//! Capability kinds served by lifecycle handlers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A capability the declarative layer can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CapabilityKind {
    /// Create and attach a service-control policy to the organization root.
    EnableScp,
    /// Set up the multi-account landing zone.
    EnableControlTower,
}

impl CapabilityKind {
    /// Every kind.
    pub const ALL: [Self; 2] = [Self::EnableScp, Self::EnableControlTower];

    /// Declared resource type.
    #[must_use]
    pub fn resource_type(self) -> &'static str {
        match self {
            Self::EnableScp => "Custom::EnableSCP",
            Self::EnableControlTower => "Custom::EnableControltower",
        }
    }

    /// Stable construct id of the singleton provider.
    #[must_use]
    pub fn provider_id(self) -> &'static str {
        match self {
            Self::EnableScp => "superwerker.attach-scp",
            Self::EnableControlTower => "superwerker.generate-email-address-provider",
        }
    }

    /// Looks a kind up by resource type.
    #[must_use]
    pub fn from_resource_type(resource_type: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.resource_type() == resource_type)
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.resource_type())
    }
}
