//! Model registry & aliases — the static, read-only catalog of admissible
//! models. Built once from configuration and held behind an `Arc`; no
//! interior mutability, mirroring the static tier table this is grounded on.

use std::collections::HashMap;

/// Catalog entry for one model. Immutable once the registry is built.
#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    pub id: String,
    pub aliases: Vec<String>,
    pub memory_gb: f64,
    pub context_window: u32,
    pub auto_load: bool,
    pub priority: u32,
    pub fallback: Option<String>,
}

/// Static catalog of admissible models, indexed for O(1) id and alias lookup.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    by_id: HashMap<String, ModelDescriptor>,
    alias_to_id: HashMap<String, String>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Whitelist query: resolve an id or alias to its descriptor. Any
    /// identifier that does not resolve here must never reach the kernel.
    pub fn resolve(&self, name: &str) -> Option<&ModelDescriptor> {
        if let Some(descriptor) = self.by_id.get(name) {
            return Some(descriptor);
        }
        let canonical = self.alias_to_id.get(name)?;
        self.by_id.get(canonical)
    }

    pub fn is_admissible(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    /// The auto-load set, ordered by ascending priority (loaded first).
    pub fn auto_load_set(&self) -> Vec<&ModelDescriptor> {
        let mut set: Vec<&ModelDescriptor> = self.by_id.values().filter(|d| d.auto_load).collect();
        set.sort_by_key(|d| d.priority);
        set
    }

    /// Sum of declared memory for a set of model ids already known to resolve.
    pub fn estimate_gb(&self, names: &[&str]) -> f64 {
        names
            .iter()
            .filter_map(|n| self.resolve(n))
            .map(|d| d.memory_gb)
            .sum()
    }

    pub fn all(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.by_id.values()
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    descriptors: Vec<ModelDescriptor>,
}

impl RegistryBuilder {
    pub fn with(mut self, descriptor: ModelDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    pub fn build(self) -> anyhow::Result<Registry> {
        let mut by_id = HashMap::new();
        let mut alias_to_id = HashMap::new();

        for descriptor in self.descriptors {
            anyhow::ensure!(
                !by_id.contains_key(&descriptor.id),
                "duplicate model id in registry: {}",
                descriptor.id
            );
            for alias in &descriptor.aliases {
                anyhow::ensure!(
                    !alias_to_id.contains_key(alias) && !by_id.contains_key(alias),
                    "alias `{alias}` collides with an existing id or alias"
                );
                alias_to_id.insert(alias.clone(), descriptor.id.clone());
            }
            by_id.insert(descriptor.id.clone(), descriptor);
        }

        Ok(Registry { by_id, alias_to_id })
    }
}

/// Seed catalog used by default and by tests: the broader whitelist from
/// the design note in SPEC_FULL.md §9, mapping `vista` to the medical tier.
pub fn default_registry() -> Registry {
    Registry::builder()
        .with(ModelDescriptor {
            id: "default".into(),
            aliases: vec![],
            memory_gb: 4.0,
            context_window: 8192,
            auto_load: true,
            priority: 0,
            fallback: None,
        })
        .with(ModelDescriptor {
            id: "medical-7b".into(),
            aliases: vec!["vista".into()],
            memory_gb: 8.0,
            context_window: 16384,
            auto_load: true,
            priority: 1,
            fallback: Some("default".into()),
        })
        .with(ModelDescriptor {
            id: "speech-encoder".into(),
            aliases: vec!["whisplbrx".into()],
            memory_gb: 2.0,
            context_window: 0,
            auto_load: false,
            priority: 2,
            fallback: None,
        })
        .build()
        .expect("built-in seed registry must be internally consistent")
}
