//! Claude-backed estimator.
//!
//! Asks the Anthropic Messages API for a strict-JSON re-estimate of a
//! position's thesis. The model is prompted to answer with a single JSON
//! object; markdown code fences around it are tolerated and stripped.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{Estimate, EstimateContext, Estimator};
use crate::config::EstimatorConfig;
use crate::error::{ConfigError, Error, EstimationError, Result};

/// Anthropic Messages API endpoint.
const API_URL: &str = "https://api.anthropic.com/v1/messages";

/// API version header value.
const API_VERSION: &str = "2023-06-01";

pub struct ClaudeEstimator {
    client: Client,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl ClaudeEstimator {
    #[must_use]
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            max_tokens,
        }
    }

    /// Build from config; the key must have been loaded from the
    /// environment by `Config::load`.
    pub fn from_config(config: &EstimatorConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or(Error::Config(
            ConfigError::MissingField {
                field: "ANTHROPIC_API_KEY",
            },
        ))?;
        Ok(Self::new(api_key, config.model.clone(), config.max_tokens))
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = Request {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: 0.2,
            messages: vec![Message {
                role: "user",
                content: prompt.to_string(),
            }],
        };

        let response = self
            .client
            .post(API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| Error::Connection(e.to_string()))?
            .json::<Response>()
            .await?;

        Ok(response
            .content
            .into_iter()
            .map(|c| c.text)
            .collect::<Vec<_>>()
            .join(""))
    }
}

#[derive(Serialize)]
struct Request {
    model: String,
    max_tokens: u32,
    temperature: f64,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct Response {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    text: String,
}

fn build_prompt(ctx: &EstimateContext) -> String {
    let prior = ctx
        .thesis_probability
        .map(|p| p.to_string())
        .unwrap_or_else(|| "none".to_string());
    format!(
        "You are a superforecaster re-evaluating an open {} position.\n\
         Question: {}\n\
         Entry price: {}\n\
         Current price: {}\n\
         Prior probability estimate: {}\n\
         Prior rationale: {}\n\
         Trigger for this re-check: {}\n\n\
         Re-estimate the true probability of the YES outcome and the edge \
         (probability minus current price) at the current price.\n\
         Respond with ONLY a JSON object, no other text:\n\
         {{\"probability\": 0.00, \"edge\": 0.00, \"rationale\": \"one sentence\"}}",
        ctx.strategy,
        ctx.question,
        ctx.entry_price,
        ctx.current_price,
        prior,
        ctx.thesis_rationale,
        ctx.trigger,
    )
}

/// Strip optional markdown code fences around a JSON payload.
fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

fn parse_estimate(text: &str) -> Result<Estimate> {
    serde_json::from_str(strip_fences(text))
        .map_err(|e| EstimationError::MalformedResponse(format!("{e}: {text}")).into())
}

#[async_trait]
impl Estimator for ClaudeEstimator {
    async fn estimate(&self, ctx: &EstimateContext) -> Result<Estimate> {
        let prompt = build_prompt(ctx);
        let completion = self.complete(&prompt).await?;
        parse_estimate(&completion)
    }

    fn name(&self) -> &'static str {
        "claude"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PositionId, StrategyKind};
    use rust_decimal_macros::dec;

    fn ctx() -> EstimateContext {
        EstimateContext {
            position_id: PositionId::new("abc12345"),
            strategy: StrategyKind::Prediction,
            instrument: "tok-1".into(),
            question: "Will X happen by March?".to_string(),
            entry_price: dec!(0.45),
            current_price: dec!(0.52),
            thesis_probability: Some(dec!(0.55)),
            thesis_rationale: "base rates".to_string(),
            trigger: "price drift 15.6%".to_string(),
        }
    }

    #[test]
    fn prompt_carries_thesis_and_trigger() {
        let prompt = build_prompt(&ctx());
        assert!(prompt.contains("Will X happen by March?"));
        assert!(prompt.contains("0.55"));
        assert!(prompt.contains("price drift 15.6%"));
        assert!(prompt.contains("ONLY a JSON object"));
    }

    #[test]
    fn parses_bare_json() {
        let est = parse_estimate(
            r#"{"probability": 0.48, "edge": -0.04, "rationale": "market caught up"}"#,
        )
        .unwrap();
        assert_eq!(est.probability, dec!(0.48));
        assert_eq!(est.edge, dec!(-0.04));
    }

    #[test]
    fn parses_fenced_json() {
        let est = parse_estimate(
            "```json\n{\"probability\": 0.60, \"edge\": 0.08, \"rationale\": \"still cheap\"}\n```",
        )
        .unwrap();
        assert_eq!(est.probability, dec!(0.60));
    }

    #[test]
    fn parses_plain_fence() {
        let est = parse_estimate(
            "```\n{\"probability\": 0.50, \"edge\": 0.0, \"rationale\": \"flat\"}\n```",
        )
        .unwrap();
        assert_eq!(est.edge, dec!(0.0));
    }

    #[test]
    fn rejects_prose_response() {
        let err = parse_estimate("I think the probability is around 60%").unwrap_err();
        assert!(matches!(
            err,
            Error::Estimation(EstimationError::MalformedResponse(_))
        ));
    }

    #[test]
    fn from_config_requires_api_key() {
        let config = EstimatorConfig::default();
        assert!(ClaudeEstimator::from_config(&config).is_err());

        let mut with_key = EstimatorConfig::default();
        with_key.api_key = Some("test-key".to_string());
        let client = ClaudeEstimator::from_config(&with_key).unwrap();
        assert_eq!(client.name(), "claude");
    }

    #[test]
    fn request_serialization() {
        let request = Request {
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 1024,
            temperature: 0.2,
            messages: vec![Message {
                role: "user",
                content: "hi".to_string(),
            }],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["max_tokens"], 1024);
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn response_blocks_are_joined() {
        let json = r#"{
            "content": [
                {"type": "text", "text": "{\"probability\": 0.5, "},
                {"type": "text", "text": "\"edge\": 0.02, \"rationale\": \"split\"}"}
            ]
        }"#;
        let response: Response = serde_json::from_str(json).unwrap();
        let combined: String = response.content.into_iter().map(|c| c.text).collect();
        assert!(parse_estimate(&combined).is_ok());
    }
}
