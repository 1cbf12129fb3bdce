//! Owner handles: the logical module a task is registered for.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::ValidationError;

struct OwnerInner {
    name: String,
    authors: Vec<String>,
    enabled: AtomicBool,
}

/// Identity of the module that registered a task.
///
/// Cloning is cheap and clones compare equal. Two owners created separately
/// are distinct even if they share a name: bulk cancellation matches by
/// identity, never by name.
#[derive(Clone)]
pub struct Owner(Arc<OwnerInner>);

impl Owner {
    /// Create an enabled owner with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_authors(name, Vec::new())
    }

    /// Create an enabled owner with an author list (used in shutdown reports).
    pub fn with_authors(name: impl Into<String>, authors: Vec<String>) -> Self {
        Owner(Arc::new(OwnerInner {
            name: name.into(),
            authors,
            enabled: AtomicBool::new(true),
        }))
    }

    /// Owner name
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Authors, in declaration order
    pub fn authors(&self) -> &[String] {
        &self.0.authors
    }

    /// Whether the owner may currently register tasks
    pub fn is_enabled(&self) -> bool {
        self.0.enabled.load(Ordering::Acquire)
    }

    /// Enable or disable registration for this owner.
    ///
    /// Disabling does not cancel existing tasks; pair it with
    /// [`crate::Scheduler::cancel_tasks`].
    pub fn set_enabled(&self, enabled: bool) {
        self.0.enabled.store(enabled, Ordering::Release);
    }

    /// Check that this owner may register work right now.
    pub(crate) fn validate(&self) -> Result<(), ValidationError> {
        if self.0.name.trim().is_empty() {
            return Err(ValidationError::InvalidOwner(
                "owner name cannot be empty".to_string(),
            ));
        }
        if !self.is_enabled() {
            return Err(ValidationError::OwnerDisabled(self.0.name.clone()));
        }
        Ok(())
    }
}

impl PartialEq for Owner {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Owner {}

impl Hash for Owner {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl fmt::Debug for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Owner")
            .field("name", &self.0.name)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_identity() {
        let a = Owner::new("alpha");
        let b = Owner::new("alpha");
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn test_owner_validation() {
        let owner = Owner::new("alpha");
        assert!(owner.validate().is_ok());

        owner.set_enabled(false);
        assert_eq!(
            owner.validate(),
            Err(ValidationError::OwnerDisabled("alpha".to_string()))
        );

        let blank = Owner::new("  ");
        assert!(matches!(
            blank.validate(),
            Err(ValidationError::InvalidOwner(_))
        ));
    }
}
