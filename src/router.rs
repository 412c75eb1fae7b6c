//! Router & admission (SPEC_FULL.md §4.4): a pure mapping from caller
//! identity and requested model to a concrete, whitelisted model id, plus
//! the fallback chain consulted after a load/generation failure.

use std::collections::HashMap;

use crate::registry::Registry;

/// Caller identity as extracted from the bearer credential and request.
#[derive(Debug, Clone, Default)]
pub struct Caller {
    pub id: String,
    pub service: Option<String>,
}

/// Per-caller and per-service override tables, populated from operator
/// configuration. Empty by default — every caller gets the global default.
#[derive(Debug, Clone, Default)]
pub struct RoutingRules {
    pub caller_overrides: HashMap<String, String>,
    pub service_overrides: HashMap<String, String>,
    pub default_model: String,
}

/// `<service-prefix>_<random>` → service name, per SPEC_FULL.md §4.4's
/// design note (the broader whitelist, `vista` mapped to the medical tier).
const SERVICE_PREFIXES: &[(&str, &str)] = &[
    ("vista", "vista"),
    ("whisp", "whisplbrx"),
    ("fork", "forkmeASAPp"),
    ("data", "anydatanext"),
    ("voice", "lbrxvoice"),
];

/// Extract the service name from an API key of the form `<prefix>_<rest>`.
/// Bearer framing must already be stripped by the caller.
pub fn service_from_api_key(key: &str) -> Option<&'static str> {
    let prefix = key.split('_').next()?;
    SERVICE_PREFIXES
        .iter()
        .find(|(p, _)| *p == prefix)
        .map(|(_, service)| *service)
}

pub struct Router<'a> {
    registry: &'a Registry,
    rules: &'a RoutingRules,
}

impl<'a> Router<'a> {
    pub fn new(registry: &'a Registry, rules: &'a RoutingRules) -> Self {
        Self { registry, rules }
    }

    /// Resolve `(caller, requested_model)` to a concrete, whitelisted model
    /// id. Priority: explicit request → caller override → service override
    /// → global default.
    pub fn resolve(&self, caller: &Caller, requested_model: &str) -> Option<String> {
        if requested_model != "default" && self.registry.is_admissible(requested_model) {
            return self
                .registry
                .resolve(requested_model)
                .map(|d| d.id.clone());
        }

        if let Some(model) = self.rules.caller_overrides.get(&caller.id) {
            if self.registry.is_admissible(model) {
                return Some(model.clone());
            }
        }

        if let Some(service) = &caller.service {
            if let Some(model) = self.rules.service_overrides.get(service) {
                if self.registry.is_admissible(model) {
                    return Some(model.clone());
                }
            }
        }

        self.registry
            .resolve(&self.rules.default_model)
            .map(|d| d.id.clone())
    }

    /// The next model to try after `model_id` failed to load or generate,
    /// per the descriptor's declared fallback.
    pub fn fallback_for(&self, model_id: &str) -> Option<String> {
        self.registry.resolve(model_id)?.fallback.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::default_registry;

    fn rules() -> RoutingRules {
        RoutingRules { default_model: "default".into(), ..Default::default() }
    }

    #[test]
    fn explicit_admissible_model_wins() {
        let registry = default_registry();
        let rules = rules();
        let router = Router::new(&registry, &rules);
        let caller = Caller { id: "c1".into(), service: None };
        assert_eq!(router.resolve(&caller, "vista"), Some("medical-7b".into()));
    }

    #[test]
    fn inadmissible_model_falls_through_to_default() {
        let registry = default_registry();
        let rules = rules();
        let router = Router::new(&registry, &rules);
        let caller = Caller { id: "c1".into(), service: None };
        assert_eq!(router.resolve(&caller, "evil-net"), Some("default".into()));
    }

    #[test]
    fn service_override_applies_when_no_explicit_model() {
        let registry = default_registry();
        let mut rules = rules();
        rules.service_overrides.insert("vista".into(), "medical-7b".into());
        let router = Router::new(&registry, &rules);
        let caller = Caller { id: "c1".into(), service: Some("vista".into()) };
        assert_eq!(router.resolve(&caller, "default"), Some("medical-7b".into()));
    }

    #[test]
    fn caller_override_beats_service_override() {
        let registry = default_registry();
        let mut rules = rules();
        rules.caller_overrides.insert("c1".into(), "medical-7b".into());
        rules.service_overrides.insert("vista".into(), "default".into());
        let router = Router::new(&registry, &rules);
        let caller = Caller { id: "c1".into(), service: Some("vista".into()) };
        assert_eq!(router.resolve(&caller, "default"), Some("medical-7b".into()));
    }

    #[test]
    fn service_prefix_table_resolves_known_prefixes() {
        assert_eq!(service_from_api_key("vista_deadbeef"), Some("vista"));
        assert_eq!(service_from_api_key("whisp_abc123"), Some("whisplbrx"));
        assert_eq!(service_from_api_key("unknownprefix_xyz"), None);
    }

    #[test]
    fn fallback_chain_follows_descriptor() {
        let registry = default_registry();
        let rules = rules();
        let router = Router::new(&registry, &rules);
        assert_eq!(router.fallback_for("medical-7b"), Some("default".into()));
    }
}
