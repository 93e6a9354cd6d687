use futures::future::BoxFuture;
use serde_json::json;
use std::time::Duration;

const SYSTEM_PROMPT: &str = "You convert exam question text into JSON. \
Reply with JSON only: an object {\"groups\": [...]} where each group has \
\"domain\", \"context\" (shared scenario text or an empty string) and \"questions\". \
Each question has \"question\", \"choices\" (array of strings, without letter labels), \
\"correct_answers\" (array of zero-based choice indices) and \"explanation\".";

/// Turns free-form text into a JSON import payload. Implementations return
/// the raw model output; the caller strips fences and validates it.
pub trait QuestionExtractor: Send + Sync {
    fn is_enabled(&self) -> bool {
        true
    }

    fn extract(&self, text: &str, domain: &str) -> BoxFuture<'static, anyhow::Result<String>>;
}

/// Used when no API key is configured.
#[derive(Clone)]
pub struct DisabledExtractor;

impl QuestionExtractor for DisabledExtractor {
    fn is_enabled(&self) -> bool {
        false
    }

    fn extract(&self, _text: &str, _domain: &str) -> BoxFuture<'static, anyhow::Result<String>> {
        Box::pin(async { anyhow::bail!("ai extraction is not configured") })
    }
}

/// Any OpenAI-compatible chat completions endpoint.
#[derive(Clone)]
pub struct OpenAiExtractor {
    pub client: reqwest::Client,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

impl OpenAiExtractor {
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("AI_API_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty())?;
        let base_url = std::env::var("AI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let model = std::env::var("AI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let timeout_secs = std::env::var("AI_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(60);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .ok()?;
        Some(Self {
            client,
            base_url,
            api_key,
            model,
        })
    }
}

impl QuestionExtractor for OpenAiExtractor {
    fn extract(&self, text: &str, domain: &str) -> BoxFuture<'static, anyhow::Result<String>> {
        let client = self.client.clone();
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let api_key = self.api_key.clone();
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": format!("Domain: {domain}\n\n{text}") }
            ]
        });

        Box::pin(async move {
            let response = client.post(&url).bearer_auth(api_key).json(&body).send().await?;
            let status = response.status();
            if !status.is_success() {
                let detail = response.text().await.unwrap_or_default();
                anyhow::bail!("ai endpoint returned {}: {}", status, detail.trim());
            }
            let payload: serde_json::Value = response.json().await?;
            let content = payload
                .pointer("/choices/0/message/content")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let cleaned = strip_code_fences(content);
            if cleaned.is_empty() {
                anyhow::bail!("ai endpoint returned empty content");
            }
            Ok(cleaned)
        })
    }
}

/// Removes a surrounding ```json fence if the model added one.
pub fn strip_code_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with("```") {
        trimmed
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim()
            .to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fences_are_stripped() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n[]\n```  "), "[]");
        assert_eq!(strip_code_fences("  {\"groups\":[]} "), "{\"groups\":[]}");
    }

    #[tokio::test]
    async fn disabled_extractor_refuses() {
        let extractor = DisabledExtractor;
        assert!(!extractor.is_enabled());
        assert!(extractor.extract("text", "General").await.is_err());
    }
}
