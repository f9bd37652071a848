//! Sandbox browser: web search plus page fetch.
//!
//! The search path posts to a Tavily-style endpoint; the fetch path GETs
//! a page and strips it down to readable text. Domain filters apply to
//! both paths.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use swarm_core::{CancelToken, SwarmError};
use swarm_gateway::ToolDefinition;

use crate::tool::{Tool, handler_error, require_str};

const TOOL_NAME: &str = "sandbox_browser";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    #[serde(default = "default_endpoint")]
    pub search_endpoint: String,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default)]
    pub allowed_domains: Option<Vec<String>>,
    #[serde(default)]
    pub blocked_domains: Vec<String>,
    /// Fetched pages are truncated to this many characters.
    #[serde(default = "default_fetch_limit")]
    pub fetch_char_limit: usize,
    /// Environment variable holding the search API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_endpoint() -> String {
    "https://api.tavily.com/search".to_string()
}

fn default_max_results() -> usize {
    5
}

fn default_fetch_limit() -> usize {
    20_000
}

fn default_api_key_env() -> String {
    "SEARCH_API_KEY".to_string()
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            search_endpoint: default_endpoint(),
            max_results: default_max_results(),
            allowed_domains: None,
            blocked_domains: Vec::new(),
            fetch_char_limit: default_fetch_limit(),
            api_key_env: default_api_key_env(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
    #[serde(default)]
    answer: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    title: String,
    url: String,
    content: String,
}

pub struct SandboxBrowser {
    config: BrowserConfig,
    client: reqwest::Client,
}

impl SandboxBrowser {
    pub fn new() -> Self {
        Self::with_config(BrowserConfig::default())
    }

    pub fn with_config(config: BrowserConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn is_url_allowed(&self, url: &str) -> bool {
        let domain = url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .split('/')
            .next()
            .unwrap_or_default();

        if self
            .config
            .blocked_domains
            .iter()
            .any(|blocked| domain.contains(blocked.as_str()))
        {
            return false;
        }
        if let Some(allowed) = &self.config.allowed_domains {
            return allowed.iter().any(|a| domain.contains(a.as_str()));
        }
        true
    }

    async fn search(&self, query: &str) -> Result<serde_json::Value, SwarmError> {
        let api_key = std::env::var(&self.config.api_key_env).map_err(|_| {
            handler_error(
                TOOL_NAME,
                format!("{} environment variable is not set", self.config.api_key_env),
            )
        })?;

        let mut body = json!({
            "api_key": api_key,
            "query": query,
            "max_results": self.config.max_results,
            "include_answer": true,
        });
        if let Some(allowed) = &self.config.allowed_domains {
            body["include_domains"] = json!(allowed);
        }
        if !self.config.blocked_domains.is_empty() {
            body["exclude_domains"] = json!(self.config.blocked_domains);
        }

        let response = self
            .client
            .post(&self.config.search_endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| handler_error(TOOL_NAME, format!("search request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(handler_error(
                TOOL_NAME,
                format!("search API responded with status {status}: {text}"),
            ));
        }

        let payload: SearchResponse = response
            .json()
            .await
            .map_err(|e| handler_error(TOOL_NAME, format!("unable to parse search response: {e}")))?;

        let mut output = String::new();
        if let Some(answer) = payload.answer {
            if !answer.trim().is_empty() {
                output.push_str(&format!("Summary: {answer}\n\n"));
            }
        }
        for (index, result) in payload
            .results
            .iter()
            .filter(|r| self.is_url_allowed(&r.url))
            .enumerate()
        {
            output.push_str(&format!(
                "{}. {} ({})\n{}\n\n",
                index + 1,
                result.title,
                result.url,
                result.content
            ));
        }
        if output.trim().is_empty() {
            output = "No results found.".to_string();
        }
        Ok(serde_json::Value::String(output))
    }

    async fn fetch(&self, url: &str) -> Result<serde_json::Value, SwarmError> {
        if !self.is_url_allowed(url) {
            return Err(handler_error(TOOL_NAME, format!("domain not allowed: {url}")));
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| handler_error(TOOL_NAME, format!("fetch failed: {e}")))?;

        if !response.status().is_success() {
            return Err(handler_error(
                TOOL_NAME,
                format!("fetch returned status {}", response.status()),
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| handler_error(TOOL_NAME, format!("fetch body unreadable: {e}")))?;

        let mut text = strip_html(&body);
        if text.len() > self.config.fetch_char_limit {
            text.truncate(floor_boundary(&text, self.config.fetch_char_limit));
            text.push_str("\n[truncated]");
        }
        Ok(serde_json::Value::String(text))
    }
}

impl Default for SandboxBrowser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for SandboxBrowser {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            TOOL_NAME,
            "Search the web or fetch a page. Use action \"search\" with a query, or action \
             \"fetch\" with a url.",
            json!({
                "type": "object",
                "properties": {
                    "action": {"type": "string", "enum": ["search", "fetch"]},
                    "query": {"type": "string"},
                    "url": {"type": "string"}
                },
                "required": ["action"]
            }),
        )
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        cancel: &CancelToken,
    ) -> Result<serde_json::Value, SwarmError> {
        if cancel.is_cancelled() {
            return Err(SwarmError::Cancelled);
        }
        let action = require_str(TOOL_NAME, &args, "action")?;
        match action {
            "search" => {
                let query = require_str(TOOL_NAME, &args, "query")?;
                self.search(query).await
            }
            "fetch" => {
                let url = require_str(TOOL_NAME, &args, "url")?;
                self.fetch(url).await
            }
            other => Err(handler_error(TOOL_NAME, format!("unknown action '{other}'"))),
        }
    }
}

/// Minimal HTML-to-text: drop scripts/styles/tags, collapse whitespace.
fn strip_html(html: &str) -> String {
    let mut text = String::with_capacity(html.len() / 4);
    let mut rest = html;
    // Remove script and style elements wholesale.
    let mut cleaned = String::with_capacity(html.len());
    loop {
        // ASCII lowering keeps byte offsets aligned with `rest`.
        let lower = rest.to_ascii_lowercase();
        let open = ["<script", "<style"]
            .iter()
            .filter_map(|tag| lower.find(tag).map(|i| (i, *tag)))
            .min_by_key(|(i, _)| *i);
        match open {
            Some((start, tag)) => {
                cleaned.push_str(&rest[..start]);
                let close = if tag == "<script" { "</script>" } else { "</style>" };
                match lower[start..].find(close) {
                    Some(end) => rest = &rest[start + end + close.len()..],
                    None => {
                        rest = "";
                    }
                }
            }
            None => {
                cleaned.push_str(rest);
                break;
            }
        }
    }

    let mut in_tag = false;
    for ch in cleaned.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                text.push(' ');
            }
            c if !in_tag => text.push(c),
            _ => {}
        }
    }

    let mut collapsed = String::with_capacity(text.len());
    let mut last_space = true;
    for ch in text.chars() {
        if ch.is_whitespace() {
            if !last_space {
                collapsed.push(' ');
                last_space = true;
            }
        } else {
            collapsed.push(ch);
            last_space = false;
        }
    }
    collapsed.trim().to_string()
}

fn floor_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_html() {
        let html = "<html><head><style>body { color: red }</style></head>\
                    <body><h1>Title</h1><script>alert(1)</script><p>Some  text</p></body></html>";
        let text = strip_html(html);
        assert!(text.contains("Title"));
        assert!(text.contains("Some text"));
        assert!(!text.contains("alert"));
        assert!(!text.contains("color"));
    }

    #[test]
    fn test_domain_filters() {
        let browser = SandboxBrowser::with_config(BrowserConfig {
            allowed_domains: Some(vec!["docs.rs".to_string()]),
            blocked_domains: vec!["evil.example".to_string()],
            ..Default::default()
        });
        assert!(browser.is_url_allowed("https://docs.rs/tokio"));
        assert!(!browser.is_url_allowed("https://evil.example/page"));
        assert!(!browser.is_url_allowed("https://other.example/page"));
    }

    #[tokio::test]
    async fn test_unknown_action_rejected() {
        let browser = SandboxBrowser::new();
        let err = browser
            .execute(json!({"action": "teleport"}), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SwarmError::ToolHandler { .. }));
    }

    #[tokio::test]
    async fn test_missing_query_rejected() {
        let browser = SandboxBrowser::new();
        let err = browser
            .execute(json!({"action": "search"}), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("query"));
    }
}
