use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error};

use crate::models::{EvalResult, Posting, Profile};
use crate::source::EvalMode;

/// Failure taxonomy for a single evaluation call. The orchestrator decides
/// whether to skip the posting or abort; nothing is retried here.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("request to evaluation service failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("evaluation service returned status {status}: {body}")]
    Upstream { status: StatusCode, body: String },

    #[error("reply contains no valid JSON object: {snippet}")]
    Malformed { snippet: String },
}

/// Seam between the orchestrator and the reasoning service.
pub trait JobEvaluator {
    fn evaluate(&self, posting: &Posting, mode: EvalMode) -> Result<EvalResult, EvalError>;
}

// --- Chat-completions wire format ---

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// Scores postings against the candidate's resume and profile through an
/// OpenAI-style chat-completions endpoint.
pub struct Evaluator {
    client: reqwest::blocking::Client,
    api_key: String,
    model: String,
    base_url: String,
    resume: String,
    profile: Profile,
}

impl Evaluator {
    pub fn new(
        api_key: String,
        model: String,
        base_url: String,
        resume: String,
        profile: Profile,
        timeout: Duration,
    ) -> Result<Self> {
        // The request timeout is the only bounded-wait guarantee the
        // pipeline has; the call must fail rather than hang past it.
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            api_key,
            model,
            base_url,
            resume,
            profile,
        })
    }

    fn candidate_payload(&self) -> Value {
        json!({
            "resume": self.resume,
            "profile": {
                "target_seniority": self.profile.target_seniority,
                "must_have": self.profile.must_have,
                "can_have": self.profile.can_have,
                "avoid": self.profile.avoid,
                "notes": self.profile.notes,
            }
        })
    }

    fn standard_system(&self) -> String {
        format!(
            "You are a job posting evaluator. \
             ALL responses must be written exclusively in {}. \
             Do not mix languages. \
             Evaluate the fit between the candidate and the posting based on the resume and preferences. \
             Respond ONLY with valid JSON (no markdown, no extra explanations).",
            self.profile.language
        )
    }

    /// Rubric for structured board postings, which already carry
    /// title/company/description.
    fn standard_payload(&self, posting: &Posting) -> Value {
        json!({
            "candidate": self.candidate_payload(),
            "job": {
                "title": posting.title,
                "company": posting.company,
                "description": posting.description,
            },
            "instructions": [
                "Compute a score from 0 to 100 based on overall fit.",
                "If the posting mentions technologies from 'must_have', increase the score.",
                "If the posting lists several alternative technologies (e.g. React, Vue or Angular), the candidate only needs to master at least one of them for the score to increase.",
                "Do not penalize the candidate for avoiding technologies that are optional alternatives in the posting, as long as they have experience with at least one of the required technologies.",
                "If the posting mentions technologies from 'avoid', reduce the score drastically, unless they are optional alternatives and the candidate masters an equivalent technology.",
                "If the seniority does not match 'target_seniority', reduce the score.",
                "If the description is vague or incomplete, reduce 'confidence'.",
                "Decide 'apply' if score >= 70 and there are no red flags, otherwise 'skip'.",
            ],
            "output_format": {
                "score": "number (0-100)",
                "decision": "string ('apply' or 'skip')",
                "confidence": "number (0.0-1.0)",
                "reasons": "array of strings (main reasons)",
                "matched_skills": "array of strings (technologies that match)",
                "missing_skills": "array of strings (requirements that are missing)",
                "notes": "string (extra observations)",
            }
        })
    }

    fn strict_system(&self) -> String {
        format!(
            "You are a rigorous job posting evaluator. \
             ALL responses must be written exclusively in {}. \
             Do not mix languages. \
             Evaluate the fit between the candidate and the posting based on the resume and preferences. \
             ALWAYS follow these decision rules: \
             - ANY posting that violates one of the candidate's 'avoid' rules must have score <= 30 and decision 'skip' \
             - On-site or hybrid postings when the candidate wants remote must have score <= 20 and decision 'skip' \
             - Fullstack postings with an undesired backend must have score <= 25 and decision 'skip' \
             - Respond ONLY with valid JSON (no markdown, no extra explanations). \
             If the post is not about an open position, answer 'skip' and explain why in the notes.",
            self.profile.language
        )
    }

    /// Rubric for free-text social posts, which may not even be genuine
    /// postings. Hard ceilings apply regardless of other matches, and the
    /// model is asked to extract title/company itself.
    fn strict_payload(&self, posting: &Posting) -> Value {
        json!({
            "candidate": self.candidate_payload(),
            "job": {
                "post_text": posting.description,
            },
            "instructions": [
                "Compute a score from 0 to 100 based on overall fit.",
                "CRITICAL RULES (violation = score <= 30 and decision 'skip'):",
                "- If the posting mentions technologies from 'avoid', reduce the score drastically (<= 30).",
                "- If the posting is on-site or hybrid and the candidate wants remote, score <= 20.",
                "- If the posting is fullstack with an undesired backend (e.g. Node.js when the candidate avoids it), score <= 25.",
                "- If the posting mentions technologies from 'must_have', increase the score BUT DO NOT COMPENSATE red flags.",
                "If the seniority does not match 'target_seniority', reduce the score.",
                "If the description is vague or incomplete, reduce 'confidence'.",
                "FINAL decision: 'apply' ONLY if score >= 70 AND NO critical red flag was triggered, otherwise 'skip'.",
            ],
            "output_format": {
                "title": "string (job title)",
                "company": "string (company name)",
                "score": "number (0-100)",
                "decision": "string ('apply' or 'skip')",
                "confidence": "number (0.0-1.0)",
                "reasons": "array of strings (main reasons)",
                "matched_skills": "array of strings (technologies that match)",
                "missing_skills": "array of strings (requirements that are missing)",
                "notes": "string (extra observations)",
            }
        })
    }

    fn request_completion(&self, system: &str, user_payload: &Value) -> Result<String, EvalError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user_payload.to_string(),
                },
            ],
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()?;

        let status = response.status();
        let body = response.text()?;

        if !status.is_success() {
            error!(%status, body = %snippet(&body), "evaluation service returned an error");
            return Err(EvalError::Upstream { status, body });
        }

        let envelope: ChatResponse = serde_json::from_str(&body).map_err(|_| {
            error!(body = %snippet(&body), "evaluation reply is not a chat completion");
            EvalError::Malformed {
                snippet: snippet(&body),
            }
        })?;

        envelope
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| {
                error!("evaluation reply has no choices");
                EvalError::Malformed {
                    snippet: snippet(&body),
                }
            })
    }
}

impl JobEvaluator for Evaluator {
    fn evaluate(&self, posting: &Posting, mode: EvalMode) -> Result<EvalResult, EvalError> {
        debug!(model = %self.model, id = %posting.id, ?mode, "sending evaluation request");

        let (system, payload) = match mode {
            EvalMode::Standard => (self.standard_system(), self.standard_payload(posting)),
            EvalMode::Strict => (self.strict_system(), self.strict_payload(posting)),
        };

        let content = self.request_completion(&system, &payload)?;
        let parsed = extract_json(&content).inspect_err(|_| {
            error!(id = %posting.id, reply = %snippet(&content), "no JSON object in evaluation reply");
        })?;

        debug!(id = %posting.id, "evaluation reply parsed");
        Ok(EvalResult::from_value(&parsed))
    }
}

/// Locates the JSON object in a model reply. Strict whole-text parse first;
/// replies wrapped in prose fall back to the widest `{...}` span. No object
/// at all is a hard failure, never a defaulted result.
fn extract_json(text: &str) -> Result<Value, EvalError> {
    let text = text.trim();

    if let Ok(v) = serde_json::from_str::<Value>(text) {
        if v.is_object() {
            return Ok(v);
        }
    }

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            if let Ok(v) = serde_json::from_str::<Value>(&text[start..=end]) {
                if v.is_object() {
                    return Ok(v);
                }
            }
        }
    }

    Err(EvalError::Malformed {
        snippet: snippet(text),
    })
}

fn snippet(text: &str) -> String {
    text.chars().take(500).collect()
}
