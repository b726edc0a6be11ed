use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::error::{ResearchError, Result};
use crate::model::{AttemptOutcome, ResearchResult, RunStatus, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    Csv,
    Markdown,
}

impl OutputFormat {
    pub fn writer(&self) -> Box<dyn ReportWriter + Send + Sync> {
        match self {
            OutputFormat::Json => Box::new(JsonWriter),
            OutputFormat::Csv => Box::new(CsvWriter::new(CsvWriter::default_columns())),
            OutputFormat::Markdown => Box::new(MarkdownWriter),
        }
    }
}

/// Renders a finished run into a document.
pub trait ReportWriter {
    fn render(&self, result: &ResearchResult) -> Result<String>;
    fn file_extension(&self) -> &str;
    fn header(&self) -> Option<String>;
}

pub struct JsonWriter;

pub struct CsvWriter {
    columns: Vec<String>,
}

pub struct MarkdownWriter;

impl ReportWriter for JsonWriter {
    fn render(&self, result: &ResearchResult) -> Result<String> {
        let mut output = serde_json::to_string_pretty(result)
            .map_err(|e| ResearchError::OutputError(format!("JSON serialization failed: {}", e)))?;
        output.push('\n');
        Ok(output)
    }

    fn file_extension(&self) -> &str {
        "json"
    }

    fn header(&self) -> Option<String> {
        None
    }
}

/// One row per search result, joined with its scrape outcome and extracted
/// document. Suited to spreadsheets.
impl CsvWriter {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }

    pub fn default_columns() -> Vec<String> {
        ["rank", "url", "title", "snippet", "status", "attempts", "error", "body_chars"]
            .iter()
            .map(|column| column.to_string())
            .collect()
    }

    fn escape_csv_field(field: &str) -> String {
        if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
            format!("\"{}\"", field.replace('"', "\"\""))
        } else {
            field.to_string()
        }
    }

    fn field_value(&self, result: &ResearchResult, index: usize, column: &str) -> String {
        let hit = &result.search_results[index];
        let task = result.scrape_outcomes.iter().find(|task| task.url == hit.url);
        let document = result.documents.iter().find(|doc| doc.source_url == hit.url);
        let omitted = result.omitted_sources.contains(&hit.url);

        match column {
            "rank" => hit.rank.to_string(),
            "url" => hit.url.clone(),
            "title" => document.map_or_else(|| hit.title.clone(), |doc| doc.title.clone()),
            "snippet" => hit.snippet.clone(),
            "status" if omitted => "Omitted".to_string(),
            "status" => task.map_or_else(|| "NotScraped".to_string(), |task| status_label(&task.status)),
            "attempts" => task.map_or(0, |task| task.attempts).to_string(),
            "error" => task.and_then(|task| task.last_error.clone()).unwrap_or_default(),
            "body_chars" => document.map_or(0, |doc| doc.body.chars().count()).to_string(),
            _ => String::new(),
        }
    }
}

impl ReportWriter for CsvWriter {
    fn render(&self, result: &ResearchResult) -> Result<String> {
        let mut output = String::new();
        if let Some(header) = self.header() {
            output.push_str(&header);
            output.push('\n');
        }

        for index in 0..result.search_results.len() {
            let row: Vec<String> = self
                .columns
                .iter()
                .map(|column| Self::escape_csv_field(&self.field_value(result, index, column)))
                .collect();
            output.push_str(&row.join(","));
            output.push('\n');
        }

        Ok(output)
    }

    fn file_extension(&self) -> &str {
        "csv"
    }

    fn header(&self) -> Option<String> {
        Some(self.columns.join(","))
    }
}

fn status_label(status: &TaskStatus) -> String {
    match status {
        TaskStatus::Failed(kind) => format!("Failed({:?})", kind),
        other => format!("{:?}", other),
    }
}

fn outcome_label(outcome: &AttemptOutcome) -> String {
    match outcome {
        AttemptOutcome::Failed(kind) => format!("Failed({:?})", kind),
        other => format!("{:?}", other),
    }
}

impl ReportWriter for MarkdownWriter {
    fn render(&self, result: &ResearchResult) -> Result<String> {
        let mut out = format!("# Research: {}\n\n", result.query.text.trim());

        let status = match &result.status {
            RunStatus::Completed => "completed".to_string(),
            RunStatus::Failed(kind) => format!("failed ({})", kind),
        };
        out.push_str(&format!(
            "Run `{}` started {}, {}.\n\n",
            result.run_id,
            result.started_at.to_rfc3339(),
            status
        ));

        out.push_str("## Synthesis\n\n");
        match result.synthesis {
            Some(ref response) => {
                out.push_str(response.text.trim());
                out.push_str(&format!(
                    "\n\n_Generated by {} ({}) in {:?}._\n\n",
                    response.provider_id, response.model, response.latency
                ));
            }
            None => out.push_str("_No synthesis was produced._\n\n"),
        }

        if !result.documents.is_empty() {
            out.push_str("## Sources\n\n");
            for (index, document) in result.documents.iter().enumerate() {
                out.push_str(&format!("{}. [{}]({})\n", index + 1, document.title, document.source_url));
            }
            out.push('\n');
        }

        if !result.omitted_sources.is_empty() {
            out.push_str("Extracted but left out of the prompt:\n\n");
            for url in &result.omitted_sources {
                out.push_str(&format!("- <{}>\n", url));
            }
            out.push('\n');
        }

        if !result.scrape_outcomes.is_empty() {
            out.push_str("## Scrape outcomes\n\n| URL | Status | Attempts |\n|---|---|---|\n");
            for task in &result.scrape_outcomes {
                out.push_str(&format!("| {} | {} | {} |\n", task.url, status_label(&task.status), task.attempts));
            }
            out.push('\n');
        }

        if !result.llm_attempts.is_empty() {
            out.push_str("## Provider attempts\n\n| Provider | Attempt | Outcome | Latency |\n|---|---|---|---|\n");
            for attempt in &result.llm_attempts {
                out.push_str(&format!(
                    "| {} | {} | {} | {:?} |\n",
                    attempt.provider_id,
                    attempt.attempt,
                    outcome_label(&attempt.outcome),
                    attempt.latency
                ));
            }
        }

        Ok(out)
    }

    fn file_extension(&self) -> &str {
        "md"
    }

    fn header(&self) -> Option<String> {
        None
    }
}

/// `research-<run id>.<ext>` inside `directory`
pub fn default_report_path(directory: &Path, result: &ResearchResult, format: OutputFormat) -> PathBuf {
    let writer = format.writer();
    directory.join(format!("research-{}.{}", result.run_id, writer.file_extension()))
}

pub async fn write_report(result: &ResearchResult, format: OutputFormat, path: &Path) -> Result<()> {
    let content = format.writer().render(result)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ResearchError::OutputError(format!("Failed to create directory: {}", e)))?;
        }
    }

    fs::write(path, &content)
        .await
        .map_err(|e| ResearchError::OutputError(format!("Failed to write report: {}", e)))?;

    debug!("Wrote {} bytes", content.len());
    info!("Report written to {}", path.display());
    Ok(())
}
