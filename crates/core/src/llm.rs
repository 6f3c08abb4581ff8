use crate::error::LlmError;
use crate::traits::LanguageModel;
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::sync::OnceLock;
use tracing::{debug, instrument};
use url::Url;

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub model_name: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub project: String,
    pub location: String,
    /// Overrides the regional Vertex AI host.
    pub endpoint: Option<String>,
    pub access_token: Option<String>,
    /// Ask the model for `application/json` output constrained by the output
    /// schema. Older models reject it.
    pub json_mode: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model_name: "gemini-pro".to_string(),
            temperature: 0.8,
            max_output_tokens: 500,
            project: String::new(),
            location: "us-central1".to_string(),
            endpoint: None,
            access_token: None,
            json_mode: false,
        }
    }
}

/// Gemini on Vertex AI, called through `:generateContent`.
pub struct GeminiClient {
    config: LlmConfig,
    client: Client,
}

impl GeminiClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    pub fn generate_url(&self) -> Result<Url, LlmError> {
        let cfg = &self.config;
        let base = match &cfg.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://{}-aiplatform.googleapis.com", cfg.location),
        };
        Ok(Url::parse(&format!(
            "{base}/v1/projects/{}/locations/{}/publishers/google/models/{}:generateContent",
            cfg.project, cfg.location, cfg.model_name
        ))?)
    }

    fn request_body(&self, prompt: &str, schema: &Value) -> Value {
        let mut generation_config = json!({
            "temperature": self.config.temperature,
            "maxOutputTokens": self.config.max_output_tokens,
        });
        if self.config.json_mode {
            generation_config["responseMimeType"] = json!("application/json");
            generation_config["responseSchema"] = response_schema(schema);
        }

        json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": generation_config,
        })
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    #[instrument(skip(self, prompt, schema), fields(model = %self.config.model_name, prompt_len = prompt.len()))]
    async fn complete_structured(&self, prompt: &str, schema: &Value) -> Result<Value, LlmError> {
        let mut request = self
            .client
            .post(self.generate_url()?)
            .json(&self.request_body(prompt, schema));
        if let Some(token) = &self.config.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let payload: Value = response.json().await?;
        let text = candidate_text(&payload).ok_or(LlmError::EmptyResponse)?;
        debug!(response_len = text.len(), "received model response");
        extract_json_object(&text)
    }
}

const UNSUPPORTED_KEYWORDS: [&str; 6] = [
    "$schema",
    "$defs",
    "definitions",
    "title",
    "default",
    "additionalProperties",
];

/// Rewrites a generated JSON schema into the subset Vertex accepts as
/// `responseSchema`: local `$ref`s are inlined and meta keywords dropped.
pub fn response_schema(schema: &Value) -> Value {
    let defs = schema
        .get("$defs")
        .or_else(|| schema.get("definitions"))
        .cloned()
        .unwrap_or(Value::Null);
    inline_refs(schema, &defs, false, 0)
}

fn inline_refs(node: &Value, defs: &Value, property_map: bool, depth: usize) -> Value {
    match node {
        Value::Object(map) if property_map => Value::Object(
            map.iter()
                .map(|(name, value)| (name.clone(), inline_refs(value, defs, false, depth)))
                .collect(),
        ),
        Value::Object(map) => {
            let target = map
                .get("$ref")
                .and_then(Value::as_str)
                .and_then(|reference| reference.rsplit('/').next())
                .and_then(|name| defs.get(name));
            if let Some(target) = target {
                if depth < 16 {
                    return inline_refs(target, defs, false, depth + 1);
                }
            }

            let mut out = Map::new();
            for (key, value) in map {
                if key == "$ref" || UNSUPPORTED_KEYWORDS.contains(&key.as_str()) {
                    continue;
                }
                out.insert(
                    key.clone(),
                    inline_refs(value, defs, key == "properties", depth),
                );
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| inline_refs(item, defs, false, depth))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn candidate_text(payload: &Value) -> Option<String> {
    let parts = payload
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)?;

    let text = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<String>();

    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

fn fenced_block() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").ok())
        .as_ref()
}

/// Pulls the first JSON object out of model text, tolerating markdown fences
/// and prose around it.
pub fn extract_json_object(text: &str) -> Result<Value, LlmError> {
    let candidate = fenced_block()
        .and_then(|fence| fence.captures(text))
        .and_then(|captures| captures.get(1))
        .map(|body| body.as_str())
        .unwrap_or(text);

    let start = candidate.find('{');
    let end = candidate.rfind('}');
    let slice = match (start, end) {
        (Some(start), Some(end)) if start < end => &candidate[start..=end],
        _ => return Err(LlmError::InvalidJson(truncate(text))),
    };

    match serde_json::from_str::<Value>(slice) {
        Ok(value) if value.is_object() => Ok(value),
        Ok(_) => Err(LlmError::InvalidJson(truncate(text))),
        Err(error) => Err(LlmError::InvalidJson(format!("{error}: {}", truncate(text)))),
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::output_schema;

    #[test]
    fn fenced_json_is_extracted() {
        let text = "Here you go:\n```json\n{\"question\": \"Q1\"}\n```\nGood luck";
        let value = extract_json_object(text).expect("json present");
        assert_eq!(value["question"], "Q1");
    }

    #[test]
    fn bare_json_with_prose_is_extracted() {
        let value = extract_json_object("Sure! {\"answer\": \"B\"} done").expect("json present");
        assert_eq!(value["answer"], "B");
    }

    #[test]
    fn non_object_output_is_invalid() {
        assert!(matches!(
            extract_json_object("no json here"),
            Err(LlmError::InvalidJson(_))
        ));
        assert!(matches!(
            extract_json_object("{not json}"),
            Err(LlmError::InvalidJson(_))
        ));
    }

    #[test]
    fn candidate_text_joins_parts() {
        let payload = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "{\"a\":" }, { "text": " 1}" }] }
            }]
        });
        assert_eq!(candidate_text(&payload).as_deref(), Some("{\"a\": 1}"));
        assert_eq!(candidate_text(&json!({"candidates": []})), None);
    }

    #[test]
    fn request_body_carries_generation_settings() {
        let client = GeminiClient::new(LlmConfig {
            json_mode: true,
            ..LlmConfig::default()
        });
        let body = client.request_body("prompt", &output_schema());

        assert_eq!(body["generationConfig"]["maxOutputTokens"], 500);
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert!(body["generationConfig"]["responseSchema"]["properties"]["question"].is_object());
        assert_eq!(body["contents"][0]["parts"][0]["text"], "prompt");
    }

    #[test]
    fn plain_mode_sends_no_schema() {
        let client = GeminiClient::new(LlmConfig::default());
        let body = client.request_body("prompt", &output_schema());
        assert!(body["generationConfig"].get("responseSchema").is_none());
    }

    #[test]
    fn response_schema_inlines_refs_and_drops_meta_keywords() {
        let schema = json!({
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "title": "Contract",
            "type": "object",
            "properties": {
                "title": { "type": "string", "default": "" },
                "choice": { "$ref": "#/$defs/Choice" }
            },
            "$defs": {
                "Choice": {
                    "type": "object",
                    "properties": { "key": { "type": "string" } }
                }
            }
        });

        let rewritten = response_schema(&schema);

        assert_eq!(
            rewritten,
            json!({
                "type": "object",
                "properties": {
                    "title": { "type": "string" },
                    "choice": {
                        "type": "object",
                        "properties": { "key": { "type": "string" } }
                    }
                }
            })
        );
    }

    #[test]
    fn contract_schema_has_no_references_left() {
        let rewritten = response_schema(&output_schema()).to_string();
        assert!(!rewritten.contains("$ref"));
        assert!(!rewritten.contains("$defs"));
    }

    #[test]
    fn generate_url_honours_endpoint_override() {
        let client = GeminiClient::new(LlmConfig {
            project: "p".to_string(),
            endpoint: Some("http://localhost:8080/".to_string()),
            ..LlmConfig::default()
        });
        let url = client.generate_url().expect("url builds");
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/v1/projects/p/locations/us-central1/publishers/google/models/gemini-pro:generateContent"
        );
    }
}
