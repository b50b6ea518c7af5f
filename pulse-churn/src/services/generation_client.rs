//! Generated widget copy and the chat-completions client that produces it
//!
//! The generator is a narrow external collaborator: given a segment and a
//! risk level, return a four-field piece of widget copy. The production
//! implementation calls an OpenAI-compatible chat-completions endpoint;
//! tests substitute their own implementation.

use futures::future::BoxFuture;
use pulse_common::RiskSegment;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Content generation errors
#[derive(Debug, Error)]
pub enum GeneratorError {
    /// No API key configured; generation is disabled
    #[error("Content generation is not configured")]
    NotConfigured,

    /// Network communication error
    #[error("Network error: {0}")]
    Network(String),

    /// Generation API returned an error response
    #[error("Generation API error {0}: {1}")]
    Api(u16, String),

    /// Response did not contain usable widget copy
    #[error("Unusable generation response: {0}")]
    Parse(String),
}

/// One generated piece of widget copy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WidgetCopy {
    pub title: String,
    pub message: String,
    pub cta_text: String,
    pub cta_link: String,
}

/// External content generator boundary
pub trait ContentGenerator: Send + Sync {
    fn generate<'a>(
        &'a self,
        segment: &'a str,
        risk_level: RiskSegment,
    ) -> BoxFuture<'a, Result<WidgetCopy, GeneratorError>>;
}

/// Retention angle fed into the prompt for a given segment
fn retention_strategy(segment: &str, risk_level: RiskSegment) -> String {
    let base = match segment {
        "Champions" => "Reward loyalty with exclusive VIP perks and early access",
        "Loyal Customers" => "Nurture relationship with appreciation and special offers",
        "Potential Loyalists" => "Build affinity with engagement incentives and benefits",
        "New Customers" => "Onboard with welcome offers and product education",
        "Promising" => "Increase awareness with targeted campaigns and value propositions",
        "Need Attention" => "Re-engage with personalized offers and reminders",
        "About to Sleep" => "Win-back with urgency-driven limited-time offers",
        "At Risk" => "Urgent retention with significant incentives and personal touch",
        "Cannot Lose Them" => "VIP treatment with maximum value offers and priority support",
        "Hibernating" => "Last-chance aggressive discounts and compelling value",
        "Lost" => "Win-back with breakthrough offers and fresh start messaging",
        _ => "Generic retention approach",
    };

    match risk_level {
        RiskSegment::High | RiskSegment::Critical => {
            format!("{} (emphasize urgency and scarcity)", base)
        }
        _ => base.to_string(),
    }
}

fn build_prompt(segment: &str, risk_level: RiskSegment) -> String {
    format!(
        r#"You are a conversion optimization specialist. Generate a personalized widget popup message for customers in the "{segment}" segment with "{risk}" churn risk.

SEGMENT CONTEXT:
- Segment: {segment}
- Risk Level: {risk}
- Retention Strategy: {strategy}

TASK:
Create a concise, compelling widget popup that:
1. Title: 20-30 characters, attention-grabbing and personalized
2. Message: 150-200 characters HTML snippet with specific incentive/offer (use <strong>, <ul>, <li> for formatting)
3. CTA Text: 3-5 words, action-oriented (e.g., "Claim Offer Now", "Get My Discount", "Unlock Deal")
4. CTA Link: Dynamic offer page path based on segment

IMPORTANT:
- Keep tone friendly but urgent for High/Critical risk customers
- Use specific numbers/percentages for discounts
- Message should be concise and scannable

Return ONLY valid JSON in this exact format:
{{"title": "...", "message": "...", "cta_text": "...", "cta_link": "..."}}"#,
        segment = segment,
        risk = risk_level,
        strategy = retention_strategy(segment, risk_level),
    )
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    response_format: ResponseFormat<'a>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

/// Chat-completions content generator
pub struct OpenAiGenerator {
    http_client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiGenerator {
    pub fn new(api_url: String, api_key: Option<String>, model: String) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap_or_default();

        Self {
            http_client,
            api_url,
            api_key,
            model,
        }
    }

    async fn generate_inner(
        &self,
        segment: &str,
        risk_level: RiskSegment,
    ) -> Result<WidgetCopy, GeneratorError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(GeneratorError::NotConfigured)?;

        let prompt = build_prompt(segment, risk_level);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &prompt,
            }],
            temperature: 0.8,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        debug!(segment = %segment, risk = %risk_level, "Requesting widget copy generation");

        let response = self
            .http_client
            .post(&self.api_url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GeneratorError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(GeneratorError::Api(status.as_u16(), error_text));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| GeneratorError::Parse(e.to_string()))?;

        let content = chat
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| GeneratorError::Parse("Response has no choices".to_string()))?;

        let copy: WidgetCopy = serde_json::from_str(content)
            .map_err(|e| GeneratorError::Parse(format!("Invalid widget copy JSON: {}", e)))?;

        if copy.title.is_empty() || copy.message.is_empty() {
            return Err(GeneratorError::Parse(
                "Generated copy has empty title or message".to_string(),
            ));
        }

        Ok(copy)
    }
}

impl ContentGenerator for OpenAiGenerator {
    fn generate<'a>(
        &'a self,
        segment: &'a str,
        risk_level: RiskSegment,
    ) -> BoxFuture<'a, Result<WidgetCopy, GeneratorError>> {
        Box::pin(self.generate_inner(segment, risk_level))
    }
}
