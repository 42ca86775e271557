use crate::{error::ServiceError, store::InteractionRecord};

/// Longest prompt/response written to a CSV cell, in characters.
pub const CSV_FIELD_LIMIT: usize = 10_000;

pub const CSV_HEADER: [&str; 9] = [
    "id",
    "created_at",
    "session_id",
    "model",
    "task",
    "prompt",
    "response",
    "latency_seconds",
    "params",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

impl ExportFormat {
    /// Anything other than `json` exports as CSV.
    pub fn parse_lenient(raw: Option<&str>) -> Self {
        match raw.map(|r| r.trim().to_lowercase()) {
            Some(f) if f == "json" => ExportFormat::Json,
            _ => ExportFormat::Csv,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Json => "application/json; charset=utf-8",
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "interactions.csv",
            ExportFormat::Json => "interactions.json",
        }
    }

    pub fn render(&self, records: &[InteractionRecord]) -> Result<Vec<u8>, ServiceError> {
        match self {
            ExportFormat::Csv => to_csv(records),
            ExportFormat::Json => to_json(records),
        }
    }
}

pub fn to_csv(records: &[InteractionRecord]) -> Result<Vec<u8>, ServiceError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CSV_HEADER).map_err(csv_error)?;

    for record in records {
        let params = serde_json::to_string(&record.params)
            .map_err(|e| ServiceError::Other(format!("params encoding failed: {e}")))?;
        let created_at = record.created_at.to_rfc3339();
        let prompt = flatten_cell(&record.prompt);
        let response = flatten_cell(&record.response);
        let latency = record.latency_seconds.to_string();
        writer
            .write_record([
                record.id.as_str(),
                created_at.as_str(),
                record.session_id.as_str(),
                record.model.as_str(),
                record.task.as_str(),
                prompt.as_str(),
                response.as_str(),
                latency.as_str(),
                params.as_str(),
            ])
            .map_err(csv_error)?;
    }

    writer
        .into_inner()
        .map_err(|e| ServiceError::Other(format!("csv flush failed: {e}")))
}

pub fn to_json(records: &[InteractionRecord]) -> Result<Vec<u8>, ServiceError> {
    serde_json::to_vec_pretty(records)
        .map_err(|e| ServiceError::Other(format!("json export failed: {e}")))
}

fn flatten_cell(value: &str) -> String {
    value
        .replace(['\r', '\n'], " ")
        .chars()
        .take(CSV_FIELD_LIMIT)
        .collect()
}

fn csv_error(err: csv::Error) -> ServiceError {
    ServiceError::Other(format!("csv export failed: {err}"))
}
