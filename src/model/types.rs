use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

pub const MAX_NEW_TOKENS_LIMIT: u32 = 2048;
pub const MIN_TEMPERATURE: f64 = 0.0;
pub const MAX_TEMPERATURE: f64 = 2.0;
pub const DEFAULT_MAX_NEW_TOKENS: u32 = 128;
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Substituted for model output that is empty once the echoed prompt is removed.
pub const EMPTY_RESPONSE_PLACEHOLDER: &str = "(empty response)";

/// Caller-supplied generation settings before defaults and bounds are applied.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct RawGenerationParams {
    pub max_new_tokens: Option<i64>,
    pub temperature: Option<f64>,
}

/// Fallback values used when a request leaves a parameter out.
#[derive(Debug, Clone, Copy)]
pub struct ParamDefaults {
    pub max_new_tokens: u32,
    pub temperature: f64,
}

impl Default for ParamDefaults {
    fn default() -> Self {
        Self {
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

/// Effective parameters sent to the pipeline. Only constructed through
/// [`GenerationParams::resolve`], so values are always within bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub max_new_tokens: u32,
    pub temperature: f64,
}

impl GenerationParams {
    pub fn resolve(raw: RawGenerationParams, defaults: ParamDefaults) -> Self {
        let max_new_tokens = raw
            .max_new_tokens
            .unwrap_or(i64::from(defaults.max_new_tokens))
            .clamp(1, i64::from(MAX_NEW_TOKENS_LIMIT)) as u32;

        let temperature = raw
            .temperature
            .filter(|t| t.is_finite())
            .unwrap_or(defaults.temperature);
        let temperature = if temperature.is_finite() {
            temperature.clamp(MIN_TEMPERATURE, MAX_TEMPERATURE)
        } else {
            DEFAULT_TEMPERATURE
        };

        Self {
            max_new_tokens,
            temperature,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    TextGeneration,
    Text2TextGeneration,
    Summarization,
    /// Marks a result produced because the backend could not be reached or run.
    Unknown,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::TextGeneration => "text-generation",
            TaskKind::Text2TextGeneration => "text2text-generation",
            TaskKind::Summarization => "summarization",
            TaskKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "text-generation" => Ok(TaskKind::TextGeneration),
            "text2text-generation" => Ok(TaskKind::Text2TextGeneration),
            "summarization" => Ok(TaskKind::Summarization),
            other => Err(format!("unsupported task kind: {other}")),
        }
    }
}

/// Outcome of one generation call. Backend failures are folded into this same
/// shape with `task_kind == TaskKind::Unknown`.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationResult {
    pub response_text: String,
    pub elapsed_seconds: f64,
    pub used_params: GenerationParams,
    pub model_id: String,
    pub task_kind: TaskKind,
}

impl GenerationResult {
    pub fn is_backend_failure(&self) -> bool {
        self.task_kind == TaskKind::Unknown
    }
}
