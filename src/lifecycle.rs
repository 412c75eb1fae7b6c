//! Model lifecycle manager (SPEC_FULL.md §4.2) — the sole owner of the
//! kernel mutex and the sole caller of [`InferenceKernel`]. Grounded on the
//! `Mutex<Model>` serialization pattern from the modelrunner example and the
//! cooperative-cancellation idiom (`AbortHandle`/yield-on-drop) from
//! elisplash-paw's engine state.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use futures_util::{Stream, StreamExt};
use tiktoken_rs::CoreBPE;
use tokio::sync::Mutex;

use crate::kernel::{GenerationRequest, InferenceKernel, KernelError, MemoryUsage};
use crate::registry::Registry;
use crate::session::Message;

#[derive(Debug, Clone)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub stop: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub loaded_at: Instant,
    pub last_used: Instant,
}

#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Inner state protected by the kernel mutex. Holding this guard for the
/// duration of a streaming generation is what serializes every kernel call,
/// including the whole body of a stream — see SPEC_FULL.md §4.2, §5.
struct Inner {
    kernel: Arc<dyn InferenceKernel>,
    loaded: HashMap<String, LoadedModel>,
}

pub struct LifecycleManager {
    registry: Arc<Registry>,
    inner: Arc<Mutex<Inner>>,
}

impl LifecycleManager {
    pub fn new(registry: Arc<Registry>, kernel: Arc<dyn InferenceKernel>) -> Self {
        Self {
            registry,
            inner: Arc::new(Mutex::new(Inner { kernel, loaded: HashMap::new() })),
        }
    }

    /// Load the default model, then the rest of the auto-load set in
    /// priority order. Failures are logged but do not abort startup.
    pub async fn initialize(&self) {
        for descriptor in self.registry.auto_load_set() {
            if let Err(error) = self.load(&descriptor.id).await {
                tracing::warn!(model = %descriptor.id, %error, "auto-load failed at startup");
            }
        }
    }

    pub async fn load(&self, model_id: &str) -> Result<(), LifecycleError> {
        let descriptor = self
            .registry
            .resolve(model_id)
            .ok_or_else(|| LifecycleError::NotAdmissible(model_id.to_string()))?;
        let canonical = descriptor.id.clone();

        let mut guard = self.inner.lock().await;
        if let Some(loaded) = guard.loaded.get_mut(&canonical) {
            loaded.last_used = Instant::now();
            return Ok(());
        }

        tracing::info!(model = %canonical, "acquiring kernel mutex for load");
        guard
            .kernel
            .load(&canonical)
            .await
            .map_err(|e| LifecycleError::LoadFailed { model: canonical.clone(), reason: e.to_string() })?;

        let now = Instant::now();
        guard.loaded.insert(canonical.clone(), LoadedModel { loaded_at: now, last_used: now });
        tracing::info!(model = %canonical, "model loaded, releasing kernel mutex");
        Ok(())
    }

    pub async fn unload(&self, model_id: &str) -> Result<(), LifecycleError> {
        let descriptor = self
            .registry
            .resolve(model_id)
            .ok_or_else(|| LifecycleError::NotFound(model_id.to_string()))?;
        let canonical = descriptor.id.clone();

        let mut guard = self.inner.lock().await;
        guard
            .kernel
            .unload(&canonical)
            .await
            .map_err(|e| LifecycleError::Generation(e.to_string()))?;
        guard.loaded.remove(&canonical);
        Ok(())
    }

    pub fn is_loaded(&self, model_id: &str) -> bool {
        // best-effort, racy by design: callers re-check under the mutex on the hot path
        self.inner
            .try_lock()
            .map(|g| g.loaded.contains_key(model_id))
            .unwrap_or(false)
    }

    pub async fn generate(
        &self,
        model_id: &str,
        messages: &[Message],
        params: GenerationParams,
    ) -> Result<(String, TokenUsage), LifecycleError> {
        let descriptor = self
            .registry
            .resolve(model_id)
            .ok_or_else(|| LifecycleError::NotAdmissible(model_id.to_string()))?;
        let canonical = descriptor.id.clone();
        self.load(&canonical).await?;

        let prompt = apply_chat_template(messages);
        let request = GenerationRequest {
            prompt: prompt.clone(),
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
            stop: params.stop,
        };

        let mut guard = self.inner.lock().await;
        if let Some(loaded) = guard.loaded.get_mut(&canonical) {
            loaded.last_used = Instant::now();
        }
        let output = guard
            .kernel
            .generate(&canonical, request)
            .await
            .map_err(|e| LifecycleError::Generation(e.to_string()))?;
        drop(guard);

        let usage = TokenUsage {
            prompt_tokens: estimate_tokens(&prompt),
            completion_tokens: estimate_tokens(&output),
        };
        Ok((output, usage))
    }

    /// Stream tokens while holding the kernel mutex for the duration of the
    /// stream. The returned stream carries the lock guard internally, so
    /// dropping it (client disconnect) releases the mutex at the next
    /// token boundary — the cooperative-cancellation contract in
    /// SPEC_FULL.md §4.2 and §5.
    pub async fn stream_generate(
        &self,
        model_id: &str,
        messages: &[Message],
        params: GenerationParams,
    ) -> Result<impl Stream<Item = Result<String, LifecycleError>>, LifecycleError> {
        let descriptor = self
            .registry
            .resolve(model_id)
            .ok_or_else(|| LifecycleError::NotAdmissible(model_id.to_string()))?;
        let canonical = descriptor.id.clone();
        self.load(&canonical).await?;

        let prompt = apply_chat_template(messages);
        let request = GenerationRequest {
            prompt,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
            stop: params.stop,
        };

        let canonical_for_guard = canonical.clone();

        // The mutex is acquired eagerly (before the first token) and held via
        // an owned guard for the lifetime of the returned stream.
        let guard = Arc::clone(&self.inner).lock_owned().await;
        let inner_stream = guard
            .kernel
            .stream_generate(&canonical_for_guard, request)
            .await
            .map_err(|e| LifecycleError::Generation(e.to_string()))?;

        Ok(inner_stream
            .map(|item| item.map_err(|e| LifecycleError::Generation(e.to_string())))
            .chain(futures_util::stream::once(async move {
                drop(guard);
                Err(LifecycleError::StreamEnded)
            }))
            .take_while(|item| {
                let keep = !matches!(item, Err(LifecycleError::StreamEnded));
                futures_util::future::ready(keep)
            }))
    }

    pub fn memory_usage(&self) -> MemoryUsage {
        self.inner
            .try_lock()
            .map(|g| g.kernel.memory_usage())
            .unwrap_or_default()
    }

    pub fn loaded_models(&self) -> Vec<String> {
        self.inner
            .try_lock()
            .map(|g| g.loaded.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("model not found: {0}")]
    NotFound(String),
    #[error("model not admissible: {0}")]
    NotAdmissible(String),
    #[error("failed to load model {model}: {reason}")]
    LoadFailed { model: String, reason: String },
    #[error("generation failed: {0}")]
    Generation(String),
    #[error("stream ended")]
    StreamEnded,
}

impl From<KernelError> for LifecycleError {
    fn from(e: KernelError) -> Self {
        LifecycleError::Generation(e.to_string())
    }
}

/// Apply the fallback chat template (SPEC_FULL.md §4.2): each message is
/// rendered as `{Role}: {Content}\n\n`, with an `Assistant: ` generation cue
/// appended. A real chat-template-bearing tokenizer would take precedence
/// over this — that hook lives in the kernel implementation itself, since
/// the template is intrinsic to the loaded model.
fn apply_chat_template(messages: &[Message]) -> String {
    let mut rendered = String::new();
    for message in messages {
        let role = capitalize(&message.role);
        rendered.push_str(&format!("{role}: {}\n\n", message.content));
    }
    rendered.push_str("Assistant: ");
    rendered
}

fn capitalize(role: &str) -> String {
    let mut chars = role.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

static TOKENIZER: OnceLock<Option<CoreBPE>> = OnceLock::new();

/// Exact counts from the cl100k_base tokenizer are preferred (SPEC_FULL.md
/// §4.2); the word-count × 1.3 heuristic is a fallback for when building the
/// tokenizer fails, since no kernel-reported vocabulary is available here.
fn estimate_tokens(text: &str) -> u32 {
    let tokenizer = TOKENIZER.get_or_init(|| tiktoken_rs::cl100k_base().ok());
    match tokenizer {
        Some(bpe) => bpe.encode_with_special_tokens(text).len() as u32,
        None => estimate_tokens_fallback(text),
    }
}

fn estimate_tokens_fallback(text: &str) -> u32 {
    let words = text.split_whitespace().count() as f64;
    (words * 1.3).ceil() as u32
}
