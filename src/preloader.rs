//! Preloader (SPEC_FULL.md §4.3): brings the resident set online at startup
//! and vetoes just-in-time loads of non-resident models. Grounded on the
//! teacher's sequential, `tracing`-narrated startup style in `main.rs`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::lifecycle::LifecycleManager;
use crate::registry::Registry;

/// Tracks, per resident model, how many physical instances were declared
/// and a round-robin counter. The kernel currently supports one physical
/// copy per model (SPEC_FULL.md §9) — this is a forward-looking capacity
/// hook, not a live multi-instance pool.
pub struct Preloader {
    registry: Arc<Registry>,
    allow_jit: bool,
    instance_counts: HashMap<String, usize>,
    round_robin: HashMap<String, AtomicUsize>,
}

impl Preloader {
    pub fn new(registry: Arc<Registry>, allow_jit: bool, instance_counts: HashMap<String, usize>) -> Self {
        let round_robin = instance_counts.keys().map(|k| (k.clone(), AtomicUsize::new(0))).collect();
        Self { registry, allow_jit, instance_counts, round_robin }
    }

    /// Load the resident set, in priority order, via the lifecycle manager.
    pub async fn preload(&self, lifecycle: &LifecycleManager) {
        let auto_load = self.registry.auto_load_set();
        let total_gb: f64 = auto_load.iter().map(|d| d.memory_gb).sum();
        tracing::info!(models = auto_load.len(), estimated_gb = total_gb, "preloading resident set");

        for descriptor in auto_load {
            match lifecycle.load(&descriptor.id).await {
                Ok(()) => tracing::info!(model = %descriptor.id, "resident model loaded"),
                Err(error) => tracing::warn!(model = %descriptor.id, %error, "resident model failed to load"),
            }
        }
    }

    /// Whether a request for `model_id` may trigger a just-in-time load.
    /// Resident (auto-load) models are always accepted; anything else is
    /// only accepted when JIT loading is enabled.
    pub fn admits_load(&self, model_id: &str) -> bool {
        match self.registry.resolve(model_id) {
            Some(descriptor) if descriptor.auto_load => true,
            Some(_) => self.allow_jit,
            None => false,
        }
    }

    /// Round-robin instance index for a model with multiple declared
    /// instances (capacity hook only — see struct docs).
    pub fn next_instance(&self, model_id: &str) -> usize {
        let count = *self.instance_counts.get(model_id).unwrap_or(&1);
        if count <= 1 {
            return 0;
        }
        let counter = self.round_robin.get(model_id).expect("instance_counts and round_robin share keys");
        counter.fetch_add(1, Ordering::Relaxed) % count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::EchoKernel;
    use crate::registry::default_registry;

    #[tokio::test]
    async fn preload_loads_the_auto_load_set() {
        let registry = Arc::new(default_registry());
        let lifecycle = LifecycleManager::new(Arc::clone(&registry), Arc::new(EchoKernel));
        let preloader = Preloader::new(Arc::clone(&registry), false, HashMap::new());
        preloader.preload(&lifecycle).await;
        assert!(lifecycle.loaded_models().contains(&"default".to_string()));
        assert!(lifecycle.loaded_models().contains(&"medical-7b".to_string()));
    }

    #[test]
    fn jit_load_is_vetoed_by_default_for_non_resident_models() {
        let registry = Arc::new(default_registry());
        let preloader = Preloader::new(Arc::clone(&registry), false, HashMap::new());
        assert!(!preloader.admits_load("speech-encoder"));
        assert!(preloader.admits_load("default"));
    }

    #[test]
    fn jit_load_allowed_when_enabled() {
        let registry = Arc::new(default_registry());
        let preloader = Preloader::new(registry, true, HashMap::new());
        assert!(preloader.admits_load("speech-encoder"));
    }

    #[test]
    fn round_robin_cycles_through_declared_instances() {
        let registry = Arc::new(default_registry());
        let mut counts = HashMap::new();
        counts.insert("default".to_string(), 3);
        let preloader = Preloader::new(registry, false, counts);
        let seq: Vec<usize> = (0..4).map(|_| preloader.next_instance("default")).collect();
        assert_eq!(seq, vec![0, 1, 2, 0]);
    }
}
