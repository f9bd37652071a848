//! Typed deliverables produced by the aggregator.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::task::OutputType;

/// The aggregated deliverable of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Artifact {
    /// Prose deliverables: report, document, website copy.
    Text {
        output_type: OutputType,
        content: String,
    },
    /// Code deliverable as a path -> content tree.
    Code { files: BTreeMap<String, String> },
    /// Media deliverable as a list of asset URIs.
    Media {
        output_type: OutputType,
        uris: Vec<String>,
    },
    /// Tabular/dataset deliverable kept as structured JSON.
    Dataset { data: serde_json::Value },
    /// Bundle of per-subtype artifacts for composite tasks.
    Composite { parts: Vec<Artifact> },
}

impl Artifact {
    pub fn report(content: impl Into<String>) -> Self {
        Artifact::Text {
            output_type: OutputType::Report,
            content: content.into(),
        }
    }

    pub fn output_type(&self) -> OutputType {
        match self {
            Artifact::Text { output_type, .. } => *output_type,
            Artifact::Code { .. } => OutputType::Code,
            Artifact::Media { output_type, .. } => *output_type,
            Artifact::Dataset { .. } => OutputType::Dataset,
            Artifact::Composite { .. } => OutputType::Composite,
        }
    }

    /// Primary text rendering, used for result previews and tests.
    pub fn as_text(&self) -> String {
        match self {
            Artifact::Text { content, .. } => content.clone(),
            Artifact::Code { files } => files
                .iter()
                .map(|(path, content)| format!("// {path}\n{content}"))
                .collect::<Vec<_>>()
                .join("\n\n"),
            Artifact::Media { uris, .. } => uris.join("\n"),
            Artifact::Dataset { data } => data.to_string(),
            Artifact::Composite { parts } => parts
                .iter()
                .map(Artifact::as_text)
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Artifact::Text { content, .. } => content.trim().is_empty(),
            Artifact::Code { files } => files.is_empty(),
            Artifact::Media { uris, .. } => uris.is_empty(),
            Artifact::Dataset { data } => data.is_null(),
            Artifact::Composite { parts } => parts.iter().all(Artifact::is_empty),
        }
    }
}

/// Artifact plus provenance, as handed to the embedding application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactBundle {
    pub artifact: Artifact,
    /// Step ids whose outputs contributed, in completion order.
    pub sources: Vec<String>,
    /// Step ids whose outputs were dropped as overlapping duplicates.
    pub dropped: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_types() {
        let text = Artifact::report("hello");
        assert_eq!(text.output_type(), OutputType::Report);
        assert!(!text.is_empty());

        let code = Artifact::Code {
            files: BTreeMap::from([("src/main.rs".to_string(), "fn main() {}".to_string())]),
        };
        assert_eq!(code.output_type(), OutputType::Code);
        assert!(code.as_text().contains("src/main.rs"));
    }

    #[test]
    fn test_composite_rendering() {
        let bundle = Artifact::Composite {
            parts: vec![
                Artifact::report("summary"),
                Artifact::Media {
                    output_type: OutputType::Image,
                    uris: vec!["https://assets/img.png".to_string()],
                },
            ],
        };
        let text = bundle.as_text();
        assert!(text.contains("summary"));
        assert!(text.contains("img.png"));
    }

    #[test]
    fn test_wire_format_round_trip() {
        let artifact = Artifact::Code {
            files: BTreeMap::from([("a.rs".to_string(), "x".to_string())]),
        };
        let json = serde_json::to_string(&artifact).unwrap();
        assert!(json.contains("\"type\":\"code\""));
        let back: Artifact = serde_json::from_str(&json).unwrap();
        assert_eq!(back, artifact);
    }
}
