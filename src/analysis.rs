//! Optional LLM-backed narrative analysis of a finished drive's statistics.
//! Entirely config-gated (`ai_analysis.enabled`); when disabled or when the
//! request fails, the drive pipeline proceeds without it — this is an
//! enrichment, never a dependency of drive-end processing.
//!
//! Grounded on `tibber::TibberClient::refresh_if_due`'s `reqwest::Client`
//! POST-with-bearer-and-timeout shape, adapted from Tibber's GraphQL
//! endpoint to a local Ollama-compatible chat-completion endpoint.

use crate::config::AiAnalysisConfig;
use crate::error::{Result, VigilError};
use crate::logging::{StructuredLogger, get_logger};
use crate::store::model::AnalysisResult;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Narrative recommendation produced from one drive's [`AnalysisResult`]
/// rows. Distinct from `AnalysisResult` itself, which holds the raw
/// statistics this text is derived from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiRecommendation {
    pub drive_id: Uuid,
    pub summary: String,
    pub focus_areas: Vec<String>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

/// Client for an optional local/self-hosted LLM endpoint (Ollama's
/// `/api/chat` contract). Disabled by default; never required for core
/// operation.
pub struct AiAnalysisClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    focus_areas: Vec<String>,
    logger: StructuredLogger,
}

impl AiAnalysisClient {
    pub fn new(cfg: &AiAnalysisConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
            focus_areas: cfg.focus_areas.clone(),
            logger: get_logger("analysis"),
        })
    }

    /// Ask the model for a short human-readable summary of one drive's
    /// per-parameter statistics. Returns `Ok(None)` on any transport or
    /// protocol failure rather than propagating it — analysis is best-effort.
    pub async fn summarize(&self, drive_id: Uuid, results: &[AnalysisResult]) -> Option<AiRecommendation> {
        match self.request_summary(drive_id, results).await {
            Ok(rec) => Some(rec),
            Err(e) => {
                self.logger
                    .warn(&format!("AI analysis skipped for drive {}: {}", drive_id, e));
                None
            }
        }
    }

    async fn request_summary(&self, drive_id: Uuid, results: &[AnalysisResult]) -> Result<AiRecommendation> {
        let prompt = build_prompt(results, &self.focus_areas);
        let url = format!("{}/api/chat", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt,
            }],
            stream: false,
        };

        let resp = self.http.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(VigilError::network(format!(
                "AI analysis endpoint returned {}",
                resp.status()
            )));
        }
        let parsed: ChatResponse = resp.json().await?;
        Ok(AiRecommendation {
            drive_id,
            summary: parsed.message.content,
            focus_areas: self.focus_areas.clone(),
        })
    }
}

fn build_prompt(results: &[AnalysisResult], focus_areas: &[String]) -> String {
    let mut lines = vec![
        "Summarize this drive's telemetry for a vehicle owner in two or three sentences.".to_string(),
    ];
    if !focus_areas.is_empty() {
        lines.push(format!("Pay particular attention to: {}.", focus_areas.join(", ")));
    }
    for r in results {
        lines.push(format!(
            "{}: avg={:.2} min={:.2} max={:.2} mode={:.2}",
            r.parameter, r.avg, r.min, r.max, r.mode
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(parameter: &str) -> AnalysisResult {
        AnalysisResult {
            drive_id: Uuid::nil(),
            parameter: parameter.to_string(),
            min: 10.0,
            max: 90.0,
            avg: 50.0,
            mode: 48.0,
            std1: 5.0,
            std2: 10.0,
            outlier_lo: 0.0,
            outlier_hi: 100.0,
        }
    }

    #[test]
    fn prompt_includes_focus_areas_and_every_parameter() {
        let results = vec![result("RPM"), result("COOLANT_TEMP")];
        let prompt = build_prompt(&results, &["fuel economy".to_string()]);
        assert!(prompt.contains("fuel economy"));
        assert!(prompt.contains("RPM"));
        assert!(prompt.contains("COOLANT_TEMP"));
    }

    #[test]
    fn prompt_omits_focus_line_when_empty() {
        let prompt = build_prompt(&[result("RPM")], &[]);
        assert!(!prompt.contains("Pay particular attention"));
    }
}
