//! Agent roles and their templates.
//!
//! Roles are a closed set: each step declares exactly one, and the
//! template behind it fixes the system prompt, preferred model, tool
//! access, and how the aggregator merges outputs of that role.

use serde::{Deserialize, Serialize};

/// Closed set of agent roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Supervisor,
    Researcher,
    Searcher,
    Coder,
    Writer,
    Analyst,
    Summarizer,
    Translator,
    FactChecker,
    Creative,
    ImageAnalyst,
    DocumentAnalyst,
    QualityChecker,
    // Multimodal generation roles, materialised on demand.
    TextToImage,
    TextToVideo,
    ImageToVideo,
    VoiceSynth,
}

impl Role {
    /// All roles a planner may assign to steps (everything but Supervisor).
    pub fn assignable() -> &'static [Role] {
        use Role::*;
        &[
            Researcher,
            Searcher,
            Coder,
            Writer,
            Analyst,
            Summarizer,
            Translator,
            FactChecker,
            Creative,
            ImageAnalyst,
            DocumentAnalyst,
            QualityChecker,
            TextToImage,
            TextToVideo,
            ImageToVideo,
            VoiceSynth,
        ]
    }

    /// Wire name, identical to the serde tag.
    pub fn as_str(&self) -> &'static str {
        use Role::*;
        match self {
            Supervisor => "supervisor",
            Researcher => "researcher",
            Searcher => "searcher",
            Coder => "coder",
            Writer => "writer",
            Analyst => "analyst",
            Summarizer => "summarizer",
            Translator => "translator",
            FactChecker => "fact_checker",
            Creative => "creative",
            ImageAnalyst => "image_analyst",
            DocumentAnalyst => "document_analyst",
            QualityChecker => "quality_checker",
            TextToImage => "text_to_image",
            TextToVideo => "text_to_video",
            ImageToVideo => "image_to_video",
            VoiceSynth => "voice_synth",
        }
    }

    /// Parse a planner-emitted role name, tolerating a few aliases the
    /// models like to produce.
    pub fn parse(name: &str) -> Option<Role> {
        use Role::*;
        let normalized = name.trim().to_lowercase().replace(['-', ' '], "_");
        let role = match normalized.as_str() {
            "supervisor" => Supervisor,
            "researcher" | "research" => Researcher,
            "searcher" | "search" | "web_searcher" => Searcher,
            "coder" | "developer" | "programmer" | "engineer" => Coder,
            "writer" | "author" => Writer,
            "analyst" | "data_analyst" => Analyst,
            "summarizer" | "summariser" => Summarizer,
            "translator" => Translator,
            "fact_checker" | "factchecker" | "verifier" => FactChecker,
            "creative" | "designer" => Creative,
            "image_analyst" => ImageAnalyst,
            "document_analyst" => DocumentAnalyst,
            "quality_checker" | "reviewer" => QualityChecker,
            "text_to_image" => TextToImage,
            "text_to_video" => TextToVideo,
            "image_to_video" => ImageToVideo,
            "voice_synth" | "voice_synthesizer" => VoiceSynth,
            _ => return None,
        };
        Some(role)
    }

    /// How the aggregator merges outputs of this role.
    ///
    /// Only roles that generate media assets collect URIs; analysis
    /// roles such as `ImageAnalyst` produce prose and merge as text.
    pub fn merge_rule(&self) -> MergeRule {
        use Role::*;
        match self {
            Coder => MergeRule::FileTree,
            TextToImage | TextToVideo | ImageToVideo | VoiceSynth => MergeRule::MediaUris,
            _ => MergeRule::HeadedSections,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Merge behaviour for a role's outputs during aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeRule {
    /// Concatenate as markdown sections with step-name headings.
    HeadedSections,
    /// Parse fenced blocks into a path -> content file tree.
    FileTree,
    /// Collect binary/object URIs.
    MediaUris,
}

/// Static template materialised into an agent instance per step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleTemplate {
    pub role: Role,
    pub display_name: String,
    pub system_prompt: String,
    /// Preferred model id, resolved by the gateway's backend registry.
    pub model: String,
    pub temperature: f64,
    /// Tool names this role may call.
    pub tools: Vec<String>,
    pub avatar: String,
    /// Critical steps are never best-effort-continued on exhausted
    /// retries; their failure skips the downstream instead.
    pub critical: bool,
    /// Rough character budget for dependency context injected into the
    /// prompt; overflow is chunk-summarised by the gateway.
    pub context_budget: usize,
    /// When true the step output must parse as a JSON object.
    pub structured_output: bool,
}

impl RoleTemplate {
    fn new(role: Role, display_name: &str, model: &str, temperature: f64) -> Self {
        Self {
            role,
            display_name: display_name.to_string(),
            system_prompt: String::new(),
            model: model.to_string(),
            temperature,
            tools: Vec::new(),
            avatar: String::new(),
            critical: false,
            context_budget: 24_000,
            structured_output: false,
        }
    }

    fn prompt(mut self, prompt: &str) -> Self {
        self.system_prompt = prompt.to_string();
        self
    }

    fn tools(mut self, tools: &[&str]) -> Self {
        self.tools = tools.iter().map(|s| s.to_string()).collect();
        self
    }

    fn avatar(mut self, avatar: &str) -> Self {
        self.avatar = avatar.to_string();
        self
    }

    fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    /// The built-in template for a role.
    pub fn for_role(role: Role) -> RoleTemplate {
        use Role::*;
        match role {
            Supervisor => RoleTemplate::new(role, "Supervisor", "qwen3-max", 0.2)
                .prompt(SUPERVISOR_PROMPT)
                .tools(&["sandbox_browser"])
                .avatar("clipboard"),
            Researcher => RoleTemplate::new(role, "Researcher", "deepseek-r1", 0.5)
                .prompt(RESEARCHER_PROMPT)
                .tools(&["sandbox_browser", "read_file"])
                .avatar("books"),
            Searcher => RoleTemplate::new(role, "Searcher", "qwen3-max", 0.3)
                .prompt(SEARCHER_PROMPT)
                .tools(&["sandbox_browser"])
                .avatar("magnifier"),
            Coder => RoleTemplate::new(role, "Coder", "deepseek-v3", 0.1)
                .prompt(CODER_PROMPT)
                .tools(&["sandbox_code_interpreter", "read_file", "write_file"])
                .avatar("laptop")
                .critical(),
            Writer => RoleTemplate::new(role, "Writer", "glm-4.7", 0.7)
                .prompt(WRITER_PROMPT)
                .avatar("pen"),
            Analyst => RoleTemplate::new(role, "Analyst", "glm-4.7", 0.5)
                .prompt(ANALYST_PROMPT)
                .tools(&["sandbox_browser", "sandbox_code_interpreter"])
                .avatar("chart"),
            Summarizer => RoleTemplate::new(role, "Summarizer", "kimi-k2.5", 0.4)
                .prompt(SUMMARIZER_PROMPT)
                .avatar("scroll"),
            Translator => RoleTemplate::new(role, "Translator", "kimi-k2.5", 0.2)
                .prompt(TRANSLATOR_PROMPT)
                .avatar("globe"),
            FactChecker => RoleTemplate::new(role, "Fact checker", "deepseek-r1", 0.2)
                .prompt(FACT_CHECKER_PROMPT)
                .tools(&["sandbox_browser"])
                .avatar("scales")
                .critical(),
            Creative => RoleTemplate::new(role, "Creative", "glm-4.7", 0.8)
                .prompt(CREATIVE_PROMPT)
                .avatar("palette"),
            ImageAnalyst => RoleTemplate::new(role, "Image analyst", "qwen3-vl-plus", 0.2)
                .prompt(IMAGE_ANALYST_PROMPT)
                .tools(&["read_file"])
                .avatar("camera"),
            DocumentAnalyst => RoleTemplate::new(role, "Document analyst", "kimi-k2.5", 0.3)
                .prompt(DOCUMENT_ANALYST_PROMPT)
                .tools(&["read_file"])
                .avatar("folder"),
            QualityChecker => RoleTemplate::new(role, "Quality checker", "qwen3-max", 0.2)
                .prompt(QUALITY_CHECKER_PROMPT)
                .avatar("badge"),
            TextToImage => RoleTemplate::new(role, "Image generator", "wanx2.1-t2i", 0.7)
                .prompt(MEDIA_PROMPT)
                .avatar("frame"),
            TextToVideo => RoleTemplate::new(role, "Video generator", "wanx2.1-t2v", 0.7)
                .prompt(MEDIA_PROMPT)
                .avatar("clapper"),
            ImageToVideo => RoleTemplate::new(role, "Animator", "wanx2.1-i2v", 0.7)
                .prompt(MEDIA_PROMPT)
                .avatar("film"),
            VoiceSynth => RoleTemplate::new(role, "Voice synthesizer", "cosyvoice-v1", 0.5)
                .prompt(MEDIA_PROMPT)
                .avatar("microphone"),
        }
    }
}

const SUPERVISOR_PROMPT: &str = "You are the supervisor of an AI team. You analyze the user's \
request, research background where needed, rewrite the task so it is precise and executable, and \
decompose it into dependent steps for specialist agents. Think before you act.";

const RESEARCHER_PROMPT: &str = "You are a research specialist. Investigate the assigned question \
in depth, cross-reference sources, and produce a structured set of findings with citations. Report \
exact figures and dates from sources; never invent them.";

const SEARCHER_PROMPT: &str = "You are a search specialist. Formulate effective queries, collect \
results from multiple angles, prefer authoritative sources, and return a structured digest with \
source attributions.";

const CODER_PROMPT: &str = "You are a software engineer. Produce complete, runnable code for the \
assigned step. Put each file in a fenced block preceded by its path. Validate logic with the code \
interpreter when available.";

const WRITER_PROMPT: &str = "You are a professional writer. Turn the supplied material into clear, \
well-structured prose matching the requested format and audience. Do not pad; every section must \
carry information from the inputs.";

const ANALYST_PROMPT: &str = "You are a data analyst. Examine the supplied material, quantify \
where possible, identify patterns and outliers, and state conclusions with the evidence behind \
them, including limitations.";

const SUMMARIZER_PROMPT: &str = "You condense long material into faithful summaries. Preserve key \
facts, figures, and caveats; drop repetition and filler.";

const TRANSLATOR_PROMPT: &str = "You translate text precisely, preserving register, formatting, \
and technical terminology. Output only the translation.";

const FACT_CHECKER_PROMPT: &str = "You verify claims against reliable sources. For each claim \
return a verdict (confirmed, partially confirmed, unverifiable, refuted) with the evidence.";

const CREATIVE_PROMPT: &str = "You are a creative specialist. Produce original, engaging content \
for the assigned step while staying within the given constraints.";

const IMAGE_ANALYST_PROMPT: &str = "You analyze images: describe content, extract text, and answer \
the step's question about the visual material.";

const DOCUMENT_ANALYST_PROMPT: &str = "You analyze documents: extract structure, key clauses, \
figures, and answer the step's question about the material.";

const QUALITY_CHECKER_PROMPT: &str = "You review work for correctness, completeness, and internal \
consistency, and report concrete defects with locations.";

const MEDIA_PROMPT: &str = "You produce a generation request for the target media model from the \
step description and return the resulting asset URI.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_role_has_a_template() {
        for role in Role::assignable() {
            let template = RoleTemplate::for_role(*role);
            assert_eq!(template.role, *role);
            assert!(!template.system_prompt.is_empty());
            assert!(!template.model.is_empty());
        }
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!(Role::parse("fact-checker"), Some(Role::FactChecker));
        assert_eq!(Role::parse("Developer"), Some(Role::Coder));
        assert_eq!(Role::parse("web searcher"), Some(Role::Searcher));
        assert_eq!(Role::parse("unknown_role"), None);
    }

    #[test]
    fn test_wire_name_round_trip() {
        for role in Role::assignable() {
            assert_eq!(Role::parse(role.as_str()), Some(*role));
            let json = serde_json::to_string(role).unwrap();
            assert_eq!(json, format!("\"{}\"", role.as_str()));
        }
    }

    #[test]
    fn test_critical_roles() {
        assert!(RoleTemplate::for_role(Role::Coder).critical);
        assert!(RoleTemplate::for_role(Role::FactChecker).critical);
        assert!(!RoleTemplate::for_role(Role::Writer).critical);
    }

    #[test]
    fn test_merge_rules() {
        assert_eq!(Role::Coder.merge_rule(), MergeRule::FileTree);
        assert_eq!(Role::Writer.merge_rule(), MergeRule::HeadedSections);
        assert_eq!(Role::TextToImage.merge_rule(), MergeRule::MediaUris);
        assert_eq!(Role::VoiceSynth.merge_rule(), MergeRule::MediaUris);
        // Analysis roles write prose about media; they merge as text.
        assert_eq!(Role::ImageAnalyst.merge_rule(), MergeRule::HeadedSections);
    }
}
