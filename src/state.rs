//! Shared application state, wired once at startup and handed to every
//! handler via axum's `State` extractor — the same shape as the teacher's
//! `RouterState`, generalized to the kernel-backed domain.

use std::sync::Arc;
use std::time::Instant;

use crate::auth::Authenticator;
use crate::config::Config;
use crate::journal::Journal;
use crate::kernel::InferenceKernel;
use crate::lifecycle::LifecycleManager;
use crate::metrics::Metrics;
use crate::middleware::rate_limit::RateLimiter;
use crate::preloader::Preloader;
use crate::registry::Registry;
use crate::router::RoutingRules;
use crate::session::SessionStore;

pub struct AppState {
    pub config: Config,
    pub registry: Arc<Registry>,
    pub lifecycle: Arc<LifecycleManager>,
    pub preloader: Arc<Preloader>,
    pub routing_rules: RoutingRules,
    pub sessions: Arc<dyn SessionStore>,
    pub auth: Authenticator,
    pub journal: Arc<Journal>,
    pub metrics: Arc<Metrics>,
    pub rate_limiter: RateLimiter,
    pub started_at: Instant,
}

impl AppState {
    pub async fn new(config: Config, kernel: Arc<dyn InferenceKernel>) -> anyhow::Result<Arc<Self>> {
        let registry = Arc::new(crate::registry::default_registry());
        let lifecycle = Arc::new(LifecycleManager::new(Arc::clone(&registry), kernel));
        let preloader = Arc::new(Preloader::new(Arc::clone(&registry), false, Default::default()));

        let sessions =
            crate::session::build_session_store(config.redis_url.as_deref(), config.session_ttl_hours)
                .await?;

        let auth = Authenticator::new(
            config.enable_auth,
            config.api_keys.clone(),
            config.jwt_secret.clone(),
            &config.jwt_algorithm,
        );

        let routing_rules = RoutingRules { default_model: config.default_model.clone(), ..Default::default() };
        let journal = Arc::new(Journal::new(config.journal_dir.clone().into()));
        let metrics = Arc::new(Metrics::default());
        let rate_limiter = RateLimiter::new(config.rate_limit_per_minute, config.rate_limit_per_hour);

        Ok(Arc::new(Self {
            config,
            registry,
            lifecycle,
            preloader,
            routing_rules,
            sessions,
            auth,
            journal,
            metrics,
            rate_limiter,
            started_at: Instant::now(),
        }))
    }

    pub async fn initialize(&self) {
        self.preloader.preload(&self.lifecycle).await;
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
