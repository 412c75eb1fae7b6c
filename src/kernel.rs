//! The narrow trait boundary to the native inference kernel.
//!
//! The concrete on-device accelerator library is an external collaborator
//! out of scope for this crate (SPEC_FULL.md §1, §4.2). [`InferenceKernel`]
//! is the seam the lifecycle manager depends on; [`EchoKernel`] is a
//! deterministic in-process stand-in used for tests and for running the
//! gateway without native acceleration — it is not a production backend.

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};

use crate::session::Message;

/// A single generation request as seen by the kernel: a fully rendered
/// prompt plus sampling controls. Chat-template application and stop-token
/// encoding happen above this boundary, in the lifecycle manager.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub stop: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryUsage {
    pub active_gb: f64,
    pub peak_gb: f64,
    pub cache_gb: f64,
}

/// Kernel-level error — the lifecycle manager maps these onto the public
/// `GatewayError::LoadFailed` / `GenerationFailed` variants.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("load failed: {0}")]
    Load(String),
    #[error("generation failed: {0}")]
    Generation(String),
    #[error("cancelled")]
    Cancelled,
}

/// load / unload / generate / stream-generate, as named in SPEC_FULL.md §4.2.
///
/// Every call into an implementor is made while the lifecycle manager's
/// kernel mutex is held — implementors may assume single-threaded access.
#[async_trait]
pub trait InferenceKernel: Send + Sync {
    async fn load(&self, model_id: &str) -> Result<(), KernelError>;
    async fn unload(&self, model_id: &str) -> Result<(), KernelError>;

    async fn generate(
        &self,
        model_id: &str,
        request: GenerationRequest,
    ) -> Result<String, KernelError>;

    /// Returns a finite, lazily-pulled stream of token strings. Dropping the
    /// stream before exhaustion is the cancellation mechanism — the kernel
    /// must stop emitting at the next token boundary once it is no longer
    /// polled.
    async fn stream_generate(
        &self,
        model_id: &str,
        request: GenerationRequest,
    ) -> Result<BoxStream<'static, Result<String, KernelError>>, KernelError>;

    fn memory_usage(&self) -> MemoryUsage;
}

/// Deterministic, dependency-free kernel used for tests and for running the
/// gateway without a real accelerator. "Generation" echoes the last user
/// turn, tokenized on whitespace, optionally truncated by `max_tokens` and
/// `stop` strings — enough to exercise routing, streaming, and the
/// think-tag filter without a native library.
#[derive(Debug, Default)]
pub struct EchoKernel;

#[async_trait]
impl InferenceKernel for EchoKernel {
    async fn load(&self, _model_id: &str) -> Result<(), KernelError> {
        Ok(())
    }

    async fn unload(&self, _model_id: &str) -> Result<(), KernelError> {
        Ok(())
    }

    async fn generate(
        &self,
        _model_id: &str,
        request: GenerationRequest,
    ) -> Result<String, KernelError> {
        let tokens = render_tokens(&request);
        Ok(tokens.join(" "))
    }

    async fn stream_generate(
        &self,
        _model_id: &str,
        request: GenerationRequest,
    ) -> Result<BoxStream<'static, Result<String, KernelError>>, KernelError> {
        let tokens = render_tokens(&request);
        Ok(Box::pin(stream::iter(tokens.into_iter().map(Ok))))
    }

    fn memory_usage(&self) -> MemoryUsage {
        MemoryUsage { active_gb: 0.1, peak_gb: 0.1, cache_gb: 0.0 }
    }
}

fn render_tokens(request: &GenerationRequest) -> Vec<String> {
    let mut words: Vec<String> = format!("echo: {}", request.prompt.trim())
        .split_whitespace()
        .map(str::to_string)
        .collect();

    // max_tokens == 0 truncates to an empty completion (SPEC_FULL.md §8),
    // not "no limit" — there is no sentinel value for unlimited here.
    words.truncate(request.max_tokens as usize);

    if let Some(stop_idx) = words.iter().position(|w| {
        request
            .stop
            .iter()
            .any(|s| !s.is_empty() && w.contains(s.as_str()))
    }) {
        words.truncate(stop_idx);
    }

    words
}

/// Render an ordered message log into a single prompt, for kernels (like
/// [`EchoKernel`]) with no chat template of their own. The lifecycle
/// manager's own `chat_template` module applies the real fallback format
/// (`{Role}: {Content}`); this helper exists purely so [`EchoKernel`] has
/// something to echo in tests without depending on that module directly.
pub fn last_user_turn(messages: &[Message]) -> String {
    messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.clone())
        .unwrap_or_default()
}
