use serde_json::Value;

use crate::model::{
    BackendError,
    types::{EMPTY_RESPONSE_PLACEHOLDER, TaskKind},
};

/// Task-shaped pipeline output, selected by the configured task kind rather
/// than by inspecting what the pipeline returned.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutput {
    /// Causal generation; the text may start with the echoed prompt.
    Generation { generated_text: String },
    /// Seq2seq and summarization; the text is the answer on its own.
    Seq2Seq { text: String },
}

impl TaskOutput {
    /// Decodes the raw payload of a pipeline call. Pipelines answer with a list
    /// of candidates (`[{"generated_text": ..}]`); a bare object is accepted as
    /// a single candidate.
    pub fn from_raw(task: TaskKind, raw: &Value) -> Result<Self, BackendError> {
        let candidate = match raw {
            Value::Array(items) => items.first().ok_or_else(|| {
                BackendError::MalformedOutput("pipeline returned no candidates".into())
            })?,
            Value::Object(_) => raw,
            other => {
                return Err(BackendError::MalformedOutput(format!(
                    "expected a list of candidates, got {other}"
                )));
            }
        };

        match task {
            TaskKind::TextGeneration => Ok(TaskOutput::Generation {
                generated_text: text_field(candidate, "generated_text")?,
            }),
            TaskKind::Text2TextGeneration => Ok(TaskOutput::Seq2Seq {
                text: text_field(candidate, "generated_text")?,
            }),
            TaskKind::Summarization => Ok(TaskOutput::Seq2Seq {
                text: text_field(candidate, "summary_text")?,
            }),
            TaskKind::Unknown => Err(BackendError::UnsupportedTask(task)),
        }
    }

    /// Plain response text, never empty.
    pub fn into_text(self, prompt: &str) -> String {
        let text = match self {
            TaskOutput::Generation { generated_text } => strip_echo(&generated_text, prompt),
            TaskOutput::Seq2Seq { text } => text.trim().to_string(),
        };
        if text.is_empty() {
            EMPTY_RESPONSE_PLACEHOLDER.to_string()
        } else {
            text
        }
    }
}

fn strip_echo(generated: &str, prompt: &str) -> String {
    let rest = if prompt.is_empty() {
        generated
    } else {
        generated.strip_prefix(prompt).unwrap_or(generated)
    };
    rest.trim().to_string()
}

fn text_field(candidate: &Value, field: &str) -> Result<String, BackendError> {
    candidate
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| BackendError::MalformedOutput(format!("missing string field '{field}'")))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn generation_output_strips_echoed_prompt() {
        let raw = json!([{ "generated_text": "Explain X. X is Y." }]);
        let output = TaskOutput::from_raw(TaskKind::TextGeneration, &raw).unwrap();
        assert_eq!(output.into_text("Explain X."), "X is Y.");
    }

    #[test]
    fn generation_output_without_echo_is_kept() {
        let raw = json!([{ "generated_text": "X is Y." }]);
        let output = TaskOutput::from_raw(TaskKind::TextGeneration, &raw).unwrap();
        assert_eq!(output.into_text("Explain X."), "X is Y.");
    }

    #[test]
    fn seq2seq_output_never_strips_prompt() {
        let raw = json!([{ "generated_text": "Explain X. again" }]);
        let output = TaskOutput::from_raw(TaskKind::Text2TextGeneration, &raw).unwrap();
        assert_eq!(output.into_text("Explain X."), "Explain X. again");
    }

    #[test]
    fn summarization_reads_summary_text() {
        let raw = json!([{ "summary_text": "  short  " }]);
        let output = TaskOutput::from_raw(TaskKind::Summarization, &raw).unwrap();
        assert_eq!(output, TaskOutput::Seq2Seq { text: "  short  ".into() });
        assert_eq!(output.into_text("long article"), "short");
    }

    #[test]
    fn shape_follows_task_kind_not_content() {
        let raw = json!([{ "generated_text": "oops" }]);
        let err = TaskOutput::from_raw(TaskKind::Summarization, &raw).unwrap_err();
        assert!(matches!(err, BackendError::MalformedOutput(_)));
    }

    #[test]
    fn empty_output_becomes_placeholder() {
        let raw = json!([{ "generated_text": "Hello" }]);
        let output = TaskOutput::from_raw(TaskKind::TextGeneration, &raw).unwrap();
        assert_eq!(output.into_text("Hello"), EMPTY_RESPONSE_PLACEHOLDER);

        let output = TaskOutput::Seq2Seq { text: "   ".into() };
        assert_eq!(output.into_text("anything"), EMPTY_RESPONSE_PLACEHOLDER);
    }

    #[test]
    fn single_object_is_accepted_as_candidate() {
        let raw = json!({ "generated_text": "hi there" });
        let output = TaskOutput::from_raw(TaskKind::Text2TextGeneration, &raw).unwrap();
        assert_eq!(output.into_text("hi"), "hi there");
    }

    #[test]
    fn empty_candidate_list_is_malformed() {
        let err = TaskOutput::from_raw(TaskKind::TextGeneration, &json!([])).unwrap_err();
        assert!(matches!(err, BackendError::MalformedOutput(_)));
        let err = TaskOutput::from_raw(TaskKind::TextGeneration, &json!("text")).unwrap_err();
        assert!(matches!(err, BackendError::MalformedOutput(_)));
    }
}
