//! Result aggregation.
//!
//! Collects the outputs of terminal completed steps and merges them into
//! one typed artifact. Aggregation is a pure function of the flow, so
//! re-running it over the same terminal state yields an identical
//! artifact.

use std::collections::BTreeMap;

use swarm_core::types::{
    Artifact, ArtifactBundle, ExecutionFlow, MergeRule, OutputType, Role, Step, Task,
};

/// Literal-overlap ratio above which two outputs count as duplicates.
const OVERLAP_THRESHOLD: f64 = 0.8;

pub struct Aggregator;

impl Aggregator {
    /// Merge terminal-step outputs into the task's deliverable.
    ///
    /// Works on whatever completed: a cancelled or partially failed flow
    /// yields a partial artifact over the steps that did finish.
    pub fn aggregate(flow: &ExecutionFlow, task: &Task) -> ArtifactBundle {
        let mut terminals = flow.terminal_completed_steps();
        // Deterministic merge order: completion time, then ordinal.
        terminals.sort_by(|a, b| {
            a.completed_at
                .cmp(&b.completed_at)
                .then(a.number.cmp(&b.number))
        });

        let (kept, dropped) = Self::drop_overlapping(terminals);
        let output_type = Self::resolve_output_type(task, &kept);

        let artifact = match output_type {
            OutputType::Composite => Self::merge_composite(&kept),
            OutputType::Code => Self::merge_code(&kept),
            OutputType::Image | OutputType::Video => Self::merge_media(&kept, output_type),
            other => Self::merge_text(&kept, other),
        };

        ArtifactBundle {
            artifact,
            sources: kept.iter().map(|s| s.id.clone()).collect(),
            dropped,
        }
    }

    /// Later-completed steps win overlap conflicts; earlier duplicates
    /// are dropped and reported.
    fn drop_overlapping(terminals: Vec<&Step>) -> (Vec<&Step>, Vec<String>) {
        let mut dropped = Vec::new();
        let mut kept: Vec<&Step> = Vec::new();

        for candidate in terminals {
            let candidate_text = candidate.output_text().unwrap_or_default();
            // Retain only previously kept steps that do not overlap with
            // this newer output.
            let mut still_kept = Vec::new();
            for earlier in kept {
                let earlier_text = earlier.output_text().unwrap_or_default();
                if literal_overlap(&earlier_text, &candidate_text) > OVERLAP_THRESHOLD {
                    dropped.push(earlier.id.clone());
                } else {
                    still_kept.push(earlier);
                }
            }
            kept = still_kept;
            kept.push(candidate);
        }
        (kept, dropped)
    }

    /// Output type for `auto`: majority vote over the terminal roles.
    fn resolve_output_type(task: &Task, terminals: &[&Step]) -> OutputType {
        if task.output_type != OutputType::Auto {
            return task.output_type;
        }

        let mut votes: BTreeMap<OutputType, usize> = BTreeMap::new();
        for step in terminals {
            *votes.entry(role_output_hint(step.role)).or_insert(0) += 1;
        }
        votes
            .into_iter()
            .max_by_key(|(_, count)| *count)
            .map(|(output_type, _)| output_type)
            .unwrap_or(OutputType::Report)
    }

    fn merge_text(terminals: &[&Step], output_type: OutputType) -> Artifact {
        let content = match terminals {
            [] => String::new(),
            [single] => single.output_text().unwrap_or_default(),
            many => many
                .iter()
                .map(|step| {
                    format!(
                        "## {}\n\n{}",
                        step.name,
                        step.output_text().unwrap_or_default()
                    )
                })
                .collect::<Vec<_>>()
                .join("\n\n"),
        };
        Artifact::Text {
            output_type,
            content,
        }
    }

    fn merge_code(terminals: &[&Step]) -> Artifact {
        let mut files: BTreeMap<String, String> = BTreeMap::new();
        for (index, step) in terminals.iter().enumerate() {
            let text = step.output_text().unwrap_or_default();
            let extracted = extract_file_tree(&text);
            if extracted.is_empty() {
                files.insert(format!("step_{}.txt", index + 1), text);
            } else {
                // Later steps overwrite files of the same path.
                files.extend(extracted);
            }
        }
        Artifact::Code { files }
    }

    fn merge_media(terminals: &[&Step], output_type: OutputType) -> Artifact {
        let uris = terminals
            .iter()
            .flat_map(|step| {
                step.output_text()
                    .unwrap_or_default()
                    .lines()
                    .filter(|line| line.starts_with("http://") || line.starts_with("https://"))
                    .map(|line| line.trim().to_string())
                    .collect::<Vec<_>>()
            })
            .collect();
        Artifact::Media { output_type, uris }
    }

    fn merge_composite(terminals: &[&Step]) -> Artifact {
        let mut parts = Vec::new();

        let text_steps: Vec<&Step> = terminals
            .iter()
            .copied()
            .filter(|s| s.role.merge_rule() == MergeRule::HeadedSections)
            .collect();
        if !text_steps.is_empty() {
            parts.push(Self::merge_text(&text_steps, OutputType::Report));
        }

        let code_steps: Vec<&Step> = terminals
            .iter()
            .copied()
            .filter(|s| s.role.merge_rule() == MergeRule::FileTree)
            .collect();
        if !code_steps.is_empty() {
            parts.push(Self::merge_code(&code_steps));
        }

        // One media part per produced type; image and video generators
        // in the same composite must not collapse into one mislabeled
        // bucket.
        let mut media_by_type: BTreeMap<OutputType, Vec<&Step>> = BTreeMap::new();
        for step in terminals
            .iter()
            .copied()
            .filter(|s| s.role.merge_rule() == MergeRule::MediaUris)
        {
            media_by_type
                .entry(role_output_hint(step.role))
                .or_default()
                .push(step);
        }
        for (output_type, steps) in media_by_type {
            parts.push(Self::merge_media(&steps, output_type));
        }

        Artifact::Composite { parts }
    }
}

fn role_output_hint(role: Role) -> OutputType {
    use Role::*;
    match role {
        Coder => OutputType::Code,
        TextToImage | ImageToVideo => OutputType::Image,
        // No audio output type exists; synthesized voice assets are
        // time-based media and ride the video bucket.
        TextToVideo | VoiceSynth => OutputType::Video,
        Translator | DocumentAnalyst => OutputType::Document,
        _ => OutputType::Report,
    }
}

/// Word-level containment of the smaller text in the larger one.
fn literal_overlap(a: &str, b: &str) -> f64 {
    use std::collections::HashSet;

    let words_a: HashSet<&str> = a.split_whitespace().collect();
    let words_b: HashSet<&str> = b.split_whitespace().collect();
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }
    let (smaller, larger) = if words_a.len() <= words_b.len() {
        (&words_a, &words_b)
    } else {
        (&words_b, &words_a)
    };
    let shared = smaller.iter().filter(|word| larger.contains(**word)).count();
    shared as f64 / smaller.len() as f64
}

/// Parse fenced code blocks into a path -> content map. A block's path
/// comes from a `path=` attribute on the fence, or from a short
/// path-looking line immediately above it.
fn extract_file_tree(text: &str) -> BTreeMap<String, String> {
    let mut files = BTreeMap::new();
    let lines: Vec<&str> = text.lines().collect();
    let mut index = 0;
    let mut anonymous = 0usize;

    while index < lines.len() {
        let line = lines[index];
        if let Some(fence_rest) = line.trim_start().strip_prefix("```") {
            let path_attr = fence_rest
                .split_whitespace()
                .find_map(|token| token.strip_prefix("path="))
                .map(|p| p.trim_matches('"').to_string());

            let path_above = if index > 0 {
                let above = lines[index - 1].trim();
                let candidate = above
                    .trim_start_matches(['#', '/', '*', '-', ' '])
                    .trim()
                    .trim_matches('`');
                (candidate.contains('/') || candidate.contains('.'))
                    .then(|| candidate.to_string())
                    .filter(|c| !c.contains(' ') && c.len() < 200)
            } else {
                None
            };

            let mut body = Vec::new();
            index += 1;
            while index < lines.len() && !lines[index].trim_start().starts_with("```") {
                body.push(lines[index]);
                index += 1;
            }

            let path = path_attr.or(path_above).unwrap_or_else(|| {
                anonymous += 1;
                format!("snippet_{anonymous}.txt")
            });
            files.insert(path, body.join("\n"));
        }
        index += 1;
    }
    files
}
