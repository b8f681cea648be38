use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A scraped job posting, before evaluation. One per opportunity per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Posting {
    /// Stable dedup key: canonical URL or platform-assigned id.
    pub id: String,
    pub title: String,
    pub company: String,
    /// Structured description for board postings, raw post text for
    /// social-feed postings.
    pub description: String,
    /// URL of the posting page. Often equal to `id`.
    pub link: String,
    pub application_link: Option<String>,
    /// Tag of the source adapter that produced this posting.
    pub source: String,
}

/// Verdict of a fit evaluation. Built once from the model reply, never
/// mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalResult {
    pub score: f64,
    pub decision: String, // "apply" or "skip" by convention; passed through as-is
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub matched_skills: Vec<String>,
    pub missing_skills: Vec<String>,
    pub notes: String,
    /// Filled only by the strict (free-text) evaluation, which extracts
    /// title/company from the post itself.
    pub title: String,
    pub company: String,
}

impl EvalResult {
    /// Builds a result from a parsed reply object. Missing fields degrade
    /// to a conservative verdict: score 0, decision "skip", confidence 0.5,
    /// empty lists and strings.
    pub fn from_value(v: &Value) -> Self {
        Self {
            score: num_field(v, "score", 0.0),
            decision: str_field(v, "decision", "skip"),
            confidence: num_field(v, "confidence", 0.5),
            reasons: list_field(v, "reasons"),
            matched_skills: list_field(v, "matched_skills"),
            missing_skills: list_field(v, "missing_skills"),
            notes: str_field(v, "notes", ""),
            title: str_field(v, "title", ""),
            company: str_field(v, "company", ""),
        }
    }
}

// Models sometimes quote numbers ("score": "82"); accept those too.
fn num_field(v: &Value, key: &str, default: f64) -> f64 {
    match v.get(key) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(default),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

fn str_field(v: &Value, key: &str, default: &str) -> String {
    match v.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => default.to_string(),
        Some(other) => other.to_string(),
    }
}

fn list_field(v: &Value, key: &str) -> Vec<String> {
    v.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Durable row for an evaluated posting, one per unique posting id.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: String,
    pub title: String,
    pub link: String,
    pub application_link: Option<String>,
    pub company: String,
    pub description: String,
    /// Full evaluation, serialized as JSON.
    pub evaluation: String,
    pub evaluation_score: f64,
    pub decision: String,
    /// UTC timestamp, RFC 3339.
    pub visited_at: String,
    pub notified: bool,
    pub source: String,
}

impl JobRecord {
    pub fn new(posting: &Posting, result: &EvalResult, notified: bool) -> Self {
        // Board postings carry title/company themselves; social posts get
        // them from the evaluation, when the model could extract any.
        let title = if posting.title.is_empty() {
            result.title.clone()
        } else {
            posting.title.clone()
        };
        let company = if posting.company.is_empty() {
            result.company.clone()
        } else {
            posting.company.clone()
        };
        Self {
            id: posting.id.clone(),
            title,
            link: posting.link.clone(),
            application_link: posting.application_link.clone(),
            company,
            description: posting.description.clone(),
            evaluation: serde_json::to_string(result).unwrap_or_default(),
            evaluation_score: result.score,
            decision: result.decision.clone(),
            visited_at: chrono::Utc::now().to_rfc3339(),
            notified,
            source: posting.source.clone(),
        }
    }
}

/// Candidate preferences, loaded from profile.yaml.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub target_seniority: Vec<String>,
    pub must_have: Vec<String>,
    pub can_have: Vec<String>,
    pub avoid: Vec<String>,
    pub notes: String,
    pub language: String,
    pub min_score_to_notify: f64,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            target_seniority: Vec::new(),
            must_have: Vec::new(),
            can_have: Vec::new(),
            avoid: Vec::new(),
            notes: String::new(),
            language: "pt-BR".to_string(),
            min_score_to_notify: 70.0,
        }
    }
}
