//! LLM-backed extraction of structured program records from raw search results.
//!
//! The LLM is asked for a JSON array and nothing else; [`parse_extraction_response`]
//! is deliberately tolerant of a model that wraps its answer in prose or a markdown
//! fence, since that is the single most common way this kind of extraction fails in
//! practice. Records missing a required field are dropped rather than the whole
//! batch, and every other field gets a safe default — extraction degrades per
//! program, never per batch.

use crate::cache::{Confidence, NewProgram};
use crate::search::SearchResult;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExtractorError {
    #[error("LLM request failed: {0}")]
    Request(String),

    #[error("LLM returned an unparseable response")]
    Unparseable,
}

pub type Result<T> = std::result::Result<T, ExtractorError>;

/// A chat-completion backend. Abstracted so tests can substitute a canned
/// responder without making network calls.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

/// Minimal Anthropic Messages API client — just enough surface for single-turn
/// structured extraction, not a general chat-completion wrapper.
pub struct AnthropicClient {
    http_client: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicClient {
    const API_URL: &'static str = "https://api.anthropic.com/v1/messages";
    const API_VERSION: &'static str = "2023-06-01";

    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: 4096,
        }
    }
}

#[derive(serde::Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(serde::Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let request = AnthropicRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system,
            messages: vec![AnthropicMessage { role: "user", content: user }],
        };

        let response = self
            .http_client
            .post(Self::API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", Self::API_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| ExtractorError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractorError::Request(format!("{status}: {body}")));
        }

        let parsed: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| ExtractorError::Request(e.to_string()))?;

        Ok(parsed.content.into_iter().map(|b| b.text).collect::<Vec<_>>().join(""))
    }
}

/// Context needed to render the extraction prompt; mirrors the fields the router
/// and session carry forward for every discovery node.
pub struct ExtractionContext<'a> {
    pub level: &'a str,
    pub location: &'a str,
    pub legal_entity_type: &'a str,
    pub industry_code: &'a str,
}

fn build_system_prompt() -> &'static str {
    "You are an expert at identifying employer hiring incentive programs from web content."
}

fn build_user_prompt(ctx: &ExtractionContext, search_results: &[SearchResult]) -> String {
    let formatted_results = search_results
        .iter()
        .take(10)
        .map(|r| {
            let content: String = r.content.chars().take(1000).collect();
            format!("Source: {}\nTitle: {}\nContent: {}", r.url, r.title, content)
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Government Level: {level}\nLocation: {location}\nLegal Entity Type: {entity}\nIndustry: {industry}\n\n\
Search Results:\n{results}\n\n\
Extract ALL employer hiring incentive programs mentioned. For each program, provide:\n\
- program_name: Official name of the program\n\
- agency: Government agency administering it\n\
- benefit_type: One of [tax_credit, wage_subsidy, training_grant, bonding, other]\n\
- max_value: Maximum benefit value (e.g., \"$2,400 per hire\")\n\
- target_populations: List of eligible worker groups\n\
- description: Brief description of the program\n\
- source_url: URL where this was found\n\
- confidence: \"high\" if official source, \"medium\" if secondary, \"low\" if uncertain\n\n\
IMPORTANT RULES:\n\
1. ONLY include programs that are administered by or available in \"{location}\" at the {level} level.\n\
2. DO NOT include programs from other states, countries, cities, or counties.\n\
   For example, if Location is \"Arizona\", do NOT include programs from Ohio, Alberta, or any other jurisdiction.\n\
3. Cast a wide net within the correct geography - include anything that MIGHT be a hiring incentive in {location}.\n\
4. Better to include false positives from the right location than miss real programs.\n\n\
Return ONLY a valid JSON array (no markdown fence). If no programs found, return [].",
        level = ctx.level,
        location = ctx.location,
        entity = ctx.legal_entity_type,
        industry = ctx.industry_code,
        results = formatted_results,
    )
}

#[derive(Debug, Deserialize, Default)]
struct RawProgram {
    #[serde(default)]
    program_name: Option<String>,
    #[serde(default)]
    agency: Option<String>,
    #[serde(default)]
    benefit_type: Option<String>,
    #[serde(default)]
    max_value: Option<String>,
    #[serde(default)]
    target_populations: Option<Vec<String>>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    source_url: Option<String>,
    #[serde(default)]
    confidence: Option<String>,
}

/// Strip a markdown code fence if the model wrapped its JSON in one.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        rest.trim_end_matches("```").trim()
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest.trim_end_matches("```").trim()
    } else {
        trimmed
    }
}

/// Parse the model's raw text response into validated [`NewProgram`]s. Programs
/// missing any of `program_name`/`agency`/`benefit_type` are dropped; every other
/// field defaults per the extraction contract.
pub fn parse_extraction_response(raw_text: &str) -> Vec<NewProgram> {
    let cleaned = strip_code_fence(raw_text);
    let raw_programs: Vec<RawProgram> = match serde_json::from_str(cleaned) {
        Ok(programs) => programs,
        Err(_) => return Vec::new(),
    };

    raw_programs
        .into_iter()
        .filter_map(|raw| {
            let program_name = raw.program_name.filter(|s| !s.trim().is_empty())?;
            let agency = raw.agency.filter(|s| !s.trim().is_empty())?;
            let benefit_type = raw.benefit_type.filter(|s| !s.trim().is_empty())?;

            Some(NewProgram {
                program_name,
                agency,
                benefit_type,
                jurisdiction: String::new(),
                max_value: raw.max_value.unwrap_or_else(|| "Unknown".to_string()),
                target_populations: raw.target_populations.unwrap_or_default(),
                description: raw.description.unwrap_or_default(),
                source_url: raw.source_url.unwrap_or_default(),
                confidence: raw
                    .confidence
                    .map(|c| Confidence::parse(&c))
                    .unwrap_or(Confidence::Low),
            })
        })
        .collect()
}

/// Run extraction end to end: render the prompt, call the LLM, validate the
/// response. Any LLM failure degrades to an empty program list — a single
/// extraction call failing never aborts the discovery session.
pub async fn extract_programs(
    llm: &dyn LlmClient,
    search_results: &[SearchResult],
    ctx: &ExtractionContext<'_>,
) -> Vec<NewProgram> {
    if search_results.is_empty() {
        return Vec::new();
    }

    let system = build_system_prompt();
    let user = build_user_prompt(ctx, search_results);

    match llm.complete(system, &user).await {
        Ok(text) => parse_extraction_response(&text),
        Err(err) => {
            tracing::warn!(level = %ctx.level, error = %err, "extraction failed");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_json_array() {
        let text = r#"[{"program_name":"WOTC","agency":"DOL","benefit_type":"tax_credit","confidence":"high"}]"#;
        let programs = parse_extraction_response(text);
        assert_eq!(programs.len(), 1);
        assert_eq!(programs[0].program_name, "WOTC");
        assert_eq!(programs[0].confidence, Confidence::High);
        assert_eq!(programs[0].max_value, "Unknown");
    }

    #[test]
    fn strips_markdown_fence_before_parsing() {
        let text = "```json\n[{\"program_name\":\"WOTC\",\"agency\":\"DOL\",\"benefit_type\":\"tax_credit\"}]\n```";
        let programs = parse_extraction_response(text);
        assert_eq!(programs.len(), 1);
    }

    #[test]
    fn drops_programs_missing_required_fields() {
        let text = r#"[{"program_name":"Missing Agency","benefit_type":"tax_credit"}]"#;
        let programs = parse_extraction_response(text);
        assert!(programs.is_empty());
    }

    #[test]
    fn keeps_valid_programs_and_drops_invalid_ones_in_same_batch() {
        let text = r#"[
            {"program_name":"Valid","agency":"DOL","benefit_type":"tax_credit"},
            {"program_name":"","agency":"DOL","benefit_type":"tax_credit"}
        ]"#;
        let programs = parse_extraction_response(text);
        assert_eq!(programs.len(), 1);
        assert_eq!(programs[0].program_name, "Valid");
    }

    #[test]
    fn defaults_are_applied_for_missing_optional_fields() {
        let text = r#"[{"program_name":"X","agency":"Y","benefit_type":"other"}]"#;
        let programs = parse_extraction_response(text);
        assert_eq!(programs[0].description, "");
        assert_eq!(programs[0].source_url, "");
        assert_eq!(programs[0].confidence, Confidence::Low);
        assert!(programs[0].target_populations.is_empty());
    }

    #[test]
    fn malformed_json_yields_empty_vec_rather_than_panicking() {
        let programs = parse_extraction_response("not json at all");
        assert!(programs.is_empty());
    }

    struct StaticLlm(&'static str);

    #[async_trait]
    impl LlmClient for StaticLlm {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct FailingLlm;

    #[async_trait]
    impl LlmClient for FailingLlm {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            Err(ExtractorError::Request("boom".to_string()))
        }
    }

    #[tokio::test]
    async fn extract_programs_returns_empty_for_no_search_results() {
        let llm = StaticLlm("[]");
        let ctx = ExtractionContext {
            level: "state",
            location: "Illinois",
            legal_entity_type: "LLC",
            industry_code: "54",
        };
        let result = extract_programs(&llm, &[], &ctx).await;
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn extract_programs_degrades_to_empty_on_llm_failure() {
        let llm = FailingLlm;
        let ctx = ExtractionContext {
            level: "state",
            location: "Illinois",
            legal_entity_type: "LLC",
            industry_code: "54",
        };
        let results = vec![SearchResult {
            url: "https://example.gov".to_string(),
            title: "t".to_string(),
            content: "c".to_string(),
        }];
        let programs = extract_programs(&llm, &results, &ctx).await;
        assert!(programs.is_empty());
    }

    #[tokio::test]
    async fn extract_programs_parses_llm_output() {
        let llm = StaticLlm(r#"[{"program_name":"WOTC","agency":"DOL","benefit_type":"tax_credit"}]"#);
        let ctx = ExtractionContext {
            level: "federal",
            location: "United States",
            legal_entity_type: "LLC",
            industry_code: "54",
        };
        let results = vec![SearchResult {
            url: "https://dol.gov".to_string(),
            title: "WOTC".to_string(),
            content: "description".to_string(),
        }];
        let programs = extract_programs(&llm, &results, &ctx).await;
        assert_eq!(programs.len(), 1);
    }
}
