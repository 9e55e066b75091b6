//! Resource action enumeration.
//!
//! Every route resolves to one of a closed set of actions. Handler
//! collaborators (deserializer, controller, serializer) expose one method
//! per action, each defaulting to the collaborator's `default_action`, so
//! action resolution is a total function rather than a name lookup that can
//! fail at runtime.

use serde::{Deserialize, Serialize};

/// The logical operation resolved from a route match.
///
/// Used to select the method invoked on each member of a
/// handler descriptor (deserializer, controller, serializer).
///
/// # Example
///
/// ```rust
/// use canopy_core::Action;
///
/// let action = Action::Create;
/// assert_eq!(action.as_str(), "create");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Create a new resource.
    Create,
    /// List a resource collection.
    List,
    /// Show a single resource.
    Show,
    /// Update an existing resource.
    Update,
    /// Delete a resource.
    Delete,
}

impl Action {
    /// All supported actions, in a stable order.
    pub const ALL: [Self; 5] = [
        Self::Create,
        Self::List,
        Self::Show,
        Self::Update,
        Self::Delete,
    ];

    /// Returns the lowercase action name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::List => "list",
            Self::Show => "show",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Parses an action name.
    ///
    /// Returns `None` for names outside the supported set.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "create" => Some(Self::Create),
            "list" => Some(Self::List),
            "show" => Some(Self::Show),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
