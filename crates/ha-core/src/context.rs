//! Context type for tracking what caused a state write or event

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Causality marker carried by every event and state write.
///
/// Writes made together share one context, so consumers can group them: the
/// initial states of a batch of added entities, or the removals of an unload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    /// Unique identifier (ULID)
    pub id: String,

    /// Context that triggered this one, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            id: Ulid::new().to_string(),
            parent_id: None,
        }
    }

    /// Derive a context caused by this one
    pub fn child(&self) -> Self {
        Self {
            id: Ulid::new().to_string(),
            parent_id: Some(self.id.clone()),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_links_parent() {
        let parent = Context::new();
        let child = parent.child();
        assert_eq!(child.parent_id.as_deref(), Some(parent.id.as_str()));
        assert_ne!(child.id, parent.id);
    }
}
