//! Registry of branchers and the rules for enabling them
//!
//! Enabling a `Default` or `Exclusive` brancher disables every other one
//! first. Disabling one of those re-enables the `Default` brancher, if there
//! is one. `Concurrent` branchers are switched on and off independently.

use crate::elements::{BranchPriority, BrancherControllable};
use crate::error::{Error, Result};
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Default)]
struct Registry {
    branchers: Vec<Arc<dyn BrancherControllable>>,
    default_set: bool,
}

impl Registry {
    fn position(&self, id: &str) -> Result<usize> {
        self.branchers
            .iter()
            .position(|b| b.id() == id)
            .ok_or_else(|| Error::BranchController(format!("no brancher with id {}", id)))
    }

    fn disable_all(&self) {
        for brancher in &self.branchers {
            brancher.set_enabled(false);
        }
    }

    fn enable_default(&self) {
        if !self.default_set {
            return;
        }
        for brancher in &self.branchers {
            if brancher.priority() == BranchPriority::Default {
                brancher.set_enabled(true);
            }
        }
    }
}

/// Thread-safe set of branchers addressed by id
#[derive(Default)]
pub struct BranchController {
    registry: Mutex<Registry>,
}

impl BranchController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a brancher
    ///
    /// Fails if `brancher` is a second `Default` or reuses an id.
    pub fn attach_brancher(&self, brancher: Arc<dyn BrancherControllable>) -> Result<()> {
        let mut registry = self.registry.lock().unwrap();
        if registry.position(brancher.id()).is_ok() {
            return Err(Error::BranchController(format!(
                "brancher {} already attached",
                brancher.id()
            )));
        }
        if brancher.priority() == BranchPriority::Default {
            if registry.default_set {
                return Err(Error::BranchController(format!(
                    "cannot attach {}: a default brancher is already attached",
                    brancher.id()
                )));
            }
            registry.default_set = true;
        }
        debug!(
            "BranchController: attached {} ({:?})",
            brancher.id(),
            brancher.priority()
        );
        registry.branchers.push(brancher);
        Ok(())
    }

    pub fn get_brancher(&self, id: &str) -> Result<Arc<dyn BrancherControllable>> {
        let registry = self.registry.lock().unwrap();
        let index = registry.position(id)?;
        Ok(Arc::clone(&registry.branchers[index]))
    }

    pub fn remove_brancher(&self, id: &str) -> Result<()> {
        let mut registry = self.registry.lock().unwrap();
        let index = registry.position(id)?;
        let brancher = registry.branchers.remove(index);
        if brancher.priority() == BranchPriority::Default {
            registry.default_set = false;
        }
        debug!("BranchController: removed {}", id);
        Ok(())
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let registry = self.registry.lock().unwrap();
        let index = registry.position(id)?;
        let brancher = &registry.branchers[index];
        if matches!(
            brancher.priority(),
            BranchPriority::Default | BranchPriority::Exclusive
        ) {
            if enabled {
                registry.disable_all();
            } else {
                registry.enable_default();
            }
        }
        debug!("BranchController: {} enabled={}", id, enabled);
        brancher.set_enabled(enabled);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeBrancher {
        id: String,
        priority: BranchPriority,
        enabled: AtomicBool,
    }

    fn brancher(id: &str, priority: BranchPriority) -> Arc<FakeBrancher> {
        Arc::new(FakeBrancher {
            id: id.to_string(),
            priority,
            enabled: AtomicBool::new(false),
        })
    }

    impl BrancherControllable for FakeBrancher {
        fn id(&self) -> &str {
            &self.id
        }
        fn priority(&self) -> BranchPriority {
            self.priority
        }
        fn set_enabled(&self, enabled: bool) {
            self.enabled.store(enabled, Ordering::SeqCst);
        }
        fn is_enabled(&self) -> bool {
            self.enabled.load(Ordering::SeqCst)
        }
    }

    fn controller() -> (
        BranchController,
        Arc<FakeBrancher>,
        Arc<FakeBrancher>,
        Arc<FakeBrancher>,
    ) {
        let controller = BranchController::new();
        let default = brancher("Local", BranchPriority::Default);
        let exclusive = brancher("Songcast", BranchPriority::Exclusive);
        let concurrent = brancher("Monitor", BranchPriority::Concurrent);
        controller.attach_brancher(default.clone()).unwrap();
        controller.attach_brancher(exclusive.clone()).unwrap();
        controller.attach_brancher(concurrent.clone()).unwrap();
        (controller, default, exclusive, concurrent)
    }

    #[test]
    fn test_exclusive_disables_others_then_restores_default() {
        let (controller, default, exclusive, concurrent) = controller();
        controller.set_enabled("Local", true).unwrap();
        controller.set_enabled("Monitor", true).unwrap();
        assert!(default.is_enabled() && concurrent.is_enabled());

        controller.set_enabled("Songcast", true).unwrap();
        assert!(exclusive.is_enabled());
        assert!(!default.is_enabled());
        assert!(!concurrent.is_enabled());

        controller.set_enabled("Songcast", false).unwrap();
        assert!(!exclusive.is_enabled());
        assert!(default.is_enabled());
        assert!(!concurrent.is_enabled());
    }

    #[test]
    fn test_concurrent_leaves_others_alone() {
        let (controller, default, _, concurrent) = controller();
        controller.set_enabled("Local", true).unwrap();
        controller.set_enabled("Monitor", true).unwrap();
        controller.set_enabled("Monitor", false).unwrap();
        assert!(default.is_enabled());
        assert!(!concurrent.is_enabled());
    }

    #[test]
    fn test_second_default_rejected() {
        let (controller, ..) = controller();
        let result = controller.attach_brancher(brancher("Other", BranchPriority::Default));
        assert!(matches!(result, Err(Error::BranchController(_))));
    }

    #[test]
    fn test_unknown_id_rejected() {
        let (controller, ..) = controller();
        assert!(controller.set_enabled("Nope", true).is_err());
        assert!(controller.get_brancher("Nope").is_err());
        assert!(controller.remove_brancher("Nope").is_err());
    }

    #[test]
    fn test_remove_default_allows_new_default() {
        let (controller, ..) = controller();
        controller.remove_brancher("Local").unwrap();
        controller
            .attach_brancher(brancher("Local2", BranchPriority::Default))
            .unwrap();
        assert_eq!(controller.get_brancher("Local2").unwrap().id(), "Local2");
    }
}
