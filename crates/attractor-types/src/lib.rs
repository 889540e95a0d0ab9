//! Shared types, errors, context, and outcome for the Attractor pipeline engine.
//!
//! This crate provides the foundational types used across all other Attractor crates:
//! - `AttractorError` — unified error taxonomy
//! - `Context` — ordered key-value store for pipeline state
//! - `Outcome` — result of executing a node handler
//!
//! Checkpoint serialization lives in `attractor-pipeline`, where its field
//! set tracks the runner state machine it snapshots.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Unified error type for all Attractor subsystems.
#[derive(Debug, thiserror::Error)]
pub enum AttractorError {
    // === LLM Provider Errors ===
    #[error("Provider {provider} returned HTTP {status}: {message}")]
    ProviderError {
        provider: String,
        status: u16,
        message: String,
        retryable: bool,
    },

    #[error("Rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    #[error("Authentication failed for provider {provider}")]
    AuthError { provider: String },

    #[error("Request to {provider} timed out after {timeout_ms}ms")]
    RequestTimeout {
        provider: String,
        timeout_ms: u64,
    },

    #[error("Context length exceeded for {provider}: {message}")]
    ContextLengthExceeded { provider: String, message: String },

    // === Parser Errors ===
    #[error("DOT parse error at line {line}, col {col}: {message}")]
    ParseError {
        line: usize,
        col: usize,
        message: String,
        source_snippet: Option<String>,
    },

    // === Pipeline Errors ===
    #[error("Pipeline validation failed: {0}")]
    ValidationError(String),

    #[error("Handler '{handler}' failed on node '{node}': {message}")]
    HandlerError {
        handler: String,
        node: String,
        message: String,
    },

    #[error("Goal gate unsatisfied: node '{node}' did not reach SUCCESS")]
    GoalGateUnsatisfied { node: String },

    #[error("No retry target for failed goal gate '{node}'")]
    NoRetryTarget { node: String },

    #[error("Max retries exhausted for node '{node}' after {attempts} attempts")]
    RetriesExhausted { node: String, attempts: usize },

    // === Tool Errors ===
    #[error("Tool '{tool}' error: {message}")]
    ToolError { tool: String, message: String },

    #[error("Command timed out after {timeout_ms}ms")]
    CommandTimeout { timeout_ms: u64 },

    // === Agent Errors ===
    #[error("Agent loop detected after {window} consecutive identical tool calls")]
    LoopDetected { window: usize },

    #[error("Turn limit reached: {turns} turns")]
    TurnLimitReached { turns: usize },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl AttractorError {
    /// Returns `true` if the error is transient and the operation may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AttractorError::RateLimited { .. }
                | AttractorError::CommandTimeout { .. }
                | AttractorError::ProviderError { retryable: true, .. }
        )
    }

    /// Returns `true` if the error is permanent and retrying will not help.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttractorError::AuthError { .. }
                | AttractorError::ValidationError(_)
                | AttractorError::ContextLengthExceeded { .. }
        )
    }

    /// Maps the error to an HTTP status code for server mode.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            AttractorError::RateLimited { .. } => Some(429),
            AttractorError::AuthError { .. } => Some(401),
            AttractorError::ProviderError { status, .. } => Some(*status),
            AttractorError::RequestTimeout { .. } | AttractorError::CommandTimeout { .. } => {
                Some(504)
            }
            AttractorError::ValidationError(_) => Some(400),
            AttractorError::ContextLengthExceeded { .. } => Some(413),
            _ => None,
        }
    }
}

/// A convenience alias for `Result<T, AttractorError>`.
pub type Result<T> = std::result::Result<T, AttractorError>;

// ---------------------------------------------------------------------------
// Context — ordered key-value store for pipeline state
// ---------------------------------------------------------------------------

use std::sync::Arc;

/// Ordered, string-valued key-value store shared across pipeline nodes.
///
/// Values are strings only; callers serialize structured data as JSON text
/// before calling [`set`](Context::set). Insertion order is observable
/// through [`keys`](Context::keys).
///
/// Cloning via the derived [`Clone`] impl yields another handle to the
/// **same** inner state (a cheap `Arc` bump) — this is how a sequential
/// node "receives the context by reference". Use
/// [`clone_isolated`](Context::clone_isolated) to get a fully independent
/// deep copy, as parallel branches require.
#[derive(Clone)]
pub struct Context {
    inner: Arc<tokio::sync::RwLock<ContextInner>>,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
struct ContextInner {
    values: IndexMap<String, String>,
    logs: Vec<String>,
}

impl Context {
    /// Create an empty context.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(tokio::sync::RwLock::new(ContextInner::default())),
        }
    }

    /// Insert or overwrite a key. Re-setting an existing key keeps its
    /// original insertion position.
    pub async fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.write().await.values.insert(key.into(), value.into());
    }

    /// `true` if the key is present.
    pub async fn has(&self, key: &str) -> bool {
        self.inner.read().await.values.contains_key(key)
    }

    /// Number of keys currently held.
    pub async fn size(&self) -> usize {
        self.inner.read().await.values.len()
    }

    /// Keys in insertion order.
    pub async fn keys(&self) -> Vec<String> {
        self.inner.read().await.values.keys().cloned().collect()
    }

    /// Read a value by key, falling back to `default` when absent.
    pub async fn get(&self, key: &str, default: &str) -> String {
        self.inner
            .read()
            .await
            .values
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_owned())
    }

    /// Read a value by key, `None` when absent.
    pub async fn get_opt(&self, key: &str) -> Option<String> {
        self.inner.read().await.values.get(key).cloned()
    }

    /// Alias of [`get`](Context::get) kept for call sites that read more
    /// naturally as "get_string".
    pub async fn get_string(&self, key: &str, default: &str) -> String {
        self.get(key, default).await
    }

    /// Append a free-form log entry.
    pub async fn append_log(&self, entry: impl Into<String>) {
        self.inner.write().await.logs.push(entry.into());
    }

    /// Read-only view of the accumulated log entries.
    pub async fn logs(&self) -> Vec<String> {
        self.inner.read().await.logs.clone()
    }

    /// Ordered copy of the current values map.
    pub async fn snapshot(&self) -> IndexMap<String, String> {
        self.inner.read().await.values.clone()
    }

    /// Deep copy that is fully independent of the original context: later
    /// mutation of either side is invisible to the other.
    pub async fn clone_isolated(&self) -> Context {
        let guard = self.inner.read().await;
        Context {
            inner: Arc::new(tokio::sync::RwLock::new(guard.clone())),
        }
    }

    /// Merge `updates` into the context, overwriting existing keys.
    /// Pre-existing keys absent from `updates` are preserved.
    pub async fn apply_updates(&self, updates: IndexMap<String, String>) {
        let mut guard = self.inner.write().await;
        for (k, v) in updates {
            guard.values.insert(k, v);
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// StageStatus — outcome status of a pipeline node
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    PartialSuccess,
    Retry,
    Fail,
    Skipped,
}

// ---------------------------------------------------------------------------
// Outcome — result of executing a node handler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Outcome {
    pub status: StageStatus,
    pub preferred_label: Option<String>,
    pub suggested_next_ids: Vec<String>,
    pub context_updates: IndexMap<String, String>,
    pub notes: String,
    pub failure_reason: Option<String>,
}

impl Default for StageStatus {
    fn default() -> Self {
        StageStatus::Success
    }
}

impl Outcome {
    /// Create a successful outcome with the given notes.
    pub fn success(notes: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Success,
            notes: notes.into(),
            ..Default::default()
        }
    }

    /// Create a failed outcome with the given reason.
    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Fail,
            failure_reason: Some(reason.into()),
            ..Default::default()
        }
    }

    /// Create an outcome with a specific status and preferred label.
    pub fn with_label(status: StageStatus, label: impl Into<String>) -> Self {
        Self {
            status,
            preferred_label: Some(label.into()),
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// FidelityMode — controls output fidelity/compression level
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FidelityMode {
    Full,
    Truncate,
    Compact,
    SummaryLow,
    SummaryMedium,
    SummaryHigh,
}
