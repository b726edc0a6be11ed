use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{ExtractedDocument, SynthesisPrompt};
use crate::search::SearchRequest;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a research assistant. Answer the question using only the \
numbered sources provided. Cite sources inline as [n]. If the sources disagree or do not answer the \
question, say so.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptSettings {
    pub system_prompt: String,
    pub max_chars_per_document: usize,
    pub max_prompt_chars: usize,
    /// Appended after the sources, e.g. the desired report structure
    pub custom_instruction: Option<String>,
}

impl Default for PromptSettings {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_chars_per_document: 4000,
            max_prompt_chars: 48_000,
            custom_instruction: None,
        }
    }
}

/// Groups paragraphs (blank-line separated) into chunks of at most
/// `max_chars` characters. A single paragraph longer than the limit
/// becomes its own chunk.
pub fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_size = 0;

    for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let size = paragraph.chars().count();
        if current_size + size > max_chars && !current.is_empty() {
            chunks.push(current.join("\n\n"));
            current.clear();
            current_size = 0;
        }
        current.push(paragraph);
        current_size += size;
    }

    if !current.is_empty() {
        chunks.push(current.join("\n\n"));
    }
    chunks
}

/// Leading part of `body` that fits in `max_chars`, cut at a paragraph
/// boundary where possible and at a word boundary otherwise.
pub fn excerpt(body: &str, max_chars: usize) -> String {
    let Some(first) = split_into_chunks(body, max_chars).into_iter().next() else {
        return String::new();
    };
    if first.chars().count() <= max_chars {
        return first;
    }

    let mut cut: String = first.chars().take(max_chars).collect();
    if let Some(space) = cut.rfind(char::is_whitespace) {
        cut.truncate(space);
    }
    format!("{}...", cut.trim_end())
}

/// Assembles the synthesis prompt from the documents that extracted
/// successfully, numbering them in the order given.
pub struct PromptBuilder {
    settings: PromptSettings,
}

impl PromptBuilder {
    pub fn new(settings: PromptSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &PromptSettings {
        &self.settings
    }

    /// `request` is the planned search: trimmed question, normalized language.
    pub fn build(&self, request: &SearchRequest, documents: &[ExtractedDocument]) -> SynthesisPrompt {
        let mut user = format!("Research question: {}\n", request.query);
        if let Some(ref language) = request.language {
            user.push_str(&format!("Answer in the language with code '{}'.\n", language));
        }
        user.push_str("\nSources:\n");

        let mut sources = Vec::new();
        for document in documents {
            let number = sources.len() + 1;
            let section = format!(
                "\n[{}] {} ({})\n{}\n",
                number,
                document.title,
                document.source_url,
                excerpt(&document.body, self.settings.max_chars_per_document)
            );

            if user.chars().count() + section.chars().count() > self.settings.max_prompt_chars && !sources.is_empty() {
                debug!(
                    "Prompt budget of {} chars reached, dropping {} remaining source(s)",
                    self.settings.max_prompt_chars,
                    documents.len() - sources.len()
                );
                break;
            }

            user.push_str(&section);
            sources.push(document.source_url.clone());
        }

        user.push_str("\nWrite a concise, well-structured synthesis that answers the question, citing sources as [n].");
        if let Some(ref instruction) = self.settings.custom_instruction {
            user.push_str("\n\n");
            user.push_str(instruction.trim());
        }

        SynthesisPrompt {
            system: self.settings.system_prompt.clone(),
            user,
            sources,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(url: &str, title: &str, body: &str) -> ExtractedDocument {
        ExtractedDocument {
            source_url: url.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            links: vec![],
        }
    }

    fn request(query: &str, language: Option<&str>) -> SearchRequest {
        SearchRequest {
            query: query.to_string(),
            max_results: 5,
            language: language.map(str::to_string),
        }
    }

    #[test]
    fn test_split_into_chunks_respects_paragraphs() {
        let text = "aaaa\n\nbbbb\n\ncccc";
        assert_eq!(split_into_chunks(text, 8), vec!["aaaa\n\nbbbb", "cccc"]);
        assert_eq!(split_into_chunks(text, 100), vec![text]);
        assert_eq!(split_into_chunks("", 10), Vec::<String>::new());
        assert_eq!(split_into_chunks("0123456789abc", 5), vec!["0123456789abc"]);
    }

    #[test]
    fn test_excerpt_cuts_long_single_paragraph() {
        assert_eq!(excerpt("one two three four", 9), "one two...");
        assert_eq!(excerpt("short\n\nsecond paragraph", 6), "short");
    }

    #[test]
    fn test_build_numbers_sources_in_order() {
        let builder = PromptBuilder::new(PromptSettings::default());
        let documents = vec![
            document("https://a.example.com", "Study A", "Finding A."),
            document("https://b.example.com", "Study B", "Finding B."),
        ];
        let prompt = builder.build(&request("impact of X on Y", None), &documents);

        assert_eq!(prompt.system, DEFAULT_SYSTEM_PROMPT);
        assert!(prompt.user.starts_with("Research question: impact of X on Y\n"));
        assert!(prompt.user.contains("[1] Study A (https://a.example.com)\nFinding A."));
        assert!(prompt.user.contains("[2] Study B (https://b.example.com)\nFinding B."));
        assert_eq!(prompt.sources, vec!["https://a.example.com", "https://b.example.com"]);
    }

    #[test]
    fn test_build_stops_at_prompt_budget() {
        let settings = PromptSettings {
            max_chars_per_document: 1000,
            max_prompt_chars: 300,
            ..PromptSettings::default()
        };
        let body = "word ".repeat(40);
        let documents = vec![
            document("https://a.example.com", "A", &body),
            document("https://b.example.com", "B", &body),
        ];

        let prompt = PromptBuilder::new(settings).build(&request("q", None), &documents);
        assert_eq!(prompt.sources, vec!["https://a.example.com"]);
        assert!(!prompt.user.contains("[2]"));
    }

    #[test]
    fn test_custom_instruction_and_language() {
        let settings = PromptSettings {
            custom_instruction: Some("Format the answer as a table.".to_string()),
            ..PromptSettings::default()
        };
        let prompt = PromptBuilder::new(settings).build(&request("q", Some("de")), &[document("https://a.example.com", "A", "body")]);

        assert!(prompt.user.contains("language with code 'de'"));
        assert!(prompt.user.ends_with("Format the answer as a table."));
    }
}
