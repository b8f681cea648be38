use serde_json::json;
use tracing::{error, info, warn};

use crate::models::{EvalResult, Posting};

/// Human-facing delivery channel for qualifying matches. Best-effort:
/// implementations report failure through the return value and never let an
/// error escape past this boundary.
pub trait Notifier {
    fn notify(&self, posting: &Posting, result: &EvalResult) -> bool;
}

/// Selects the channel at configuration time: Telegram when fully
/// configured, console otherwise.
pub fn from_config(token: Option<String>, chat_id: Option<String>) -> Box<dyn Notifier> {
    match (token, chat_id) {
        (Some(token), Some(chat_id)) if !token.is_empty() && !chat_id.is_empty() => {
            info!(chat_id = %chat_id, "using Telegram notifications");
            Box::new(TelegramNotifier::new(token, chat_id))
        }
        _ => {
            warn!("Telegram not configured, falling back to console notifications");
            Box::new(ConsoleNotifier)
        }
    }
}

pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, posting: &Posting, result: &EvalResult) -> bool {
        let title = display_title(posting, result);
        info!("new matching posting (console mode)");
        info!("title: {}", title);
        info!("company: {}", display_company(posting, result));
        info!("score: {}/100", result.score);
        if !result.reasons.is_empty() {
            info!("main reasons:");
            for reason in &result.reasons {
                info!(" - {}", reason);
            }
        }
        true
    }
}

const TELEGRAM_API_URL: &str = "https://api.telegram.org";

pub struct TelegramNotifier {
    client: reqwest::blocking::Client,
    token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(token: String, chat_id: String) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            token,
            chat_id,
        }
    }
}

impl Notifier for TelegramNotifier {
    fn notify(&self, posting: &Posting, result: &EvalResult) -> bool {
        let message = build_message(posting, result);

        let url = format!("{}/bot{}/sendMessage", TELEGRAM_API_URL, self.token);
        let response = self
            .client
            .post(url)
            .json(&json!({
                "chat_id": self.chat_id,
                "text": message,
                "parse_mode": "Markdown",
                "disable_web_page_preview": true,
            }))
            .send();

        match response {
            Ok(response) if response.status().is_success() => {
                info!(chat_id = %self.chat_id, "notification sent");
                true
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().unwrap_or_default();
                error!(%status, body = %body, "Telegram rejected the notification");
                false
            }
            Err(e) => {
                error!(error = %e, "failed to send notification");
                false
            }
        }
    }
}

fn display_title<'a>(posting: &'a Posting, result: &'a EvalResult) -> &'a str {
    if !posting.title.is_empty() {
        &posting.title
    } else if !result.title.is_empty() {
        &result.title
    } else {
        "Untitled"
    }
}

fn display_company<'a>(posting: &'a Posting, result: &'a EvalResult) -> &'a str {
    if !posting.company.is_empty() {
        &posting.company
    } else if !result.company.is_empty() {
        &result.company
    } else {
        "N/A"
    }
}

// Telegram's legacy Markdown mode chokes on bare '_' and '*'.
fn escape_markdown(text: &str) -> String {
    text.replace('_', r"\_").replace('*', r"\*")
}

fn build_message(posting: &Posting, result: &EvalResult) -> String {
    let title = escape_markdown(display_title(posting, result));
    let company = escape_markdown(display_company(posting, result));

    let mut message = String::from("🔔 *New matching posting!*\n\n");
    message.push_str(&format!("🔥 *{}*\n", title));
    message.push_str(&format!("🏢 Company: {}\n", company));
    message.push_str(&format!("🎯 Score: *{}/100*\n", result.score));
    message.push_str(&format!("💪 Confidence: {:.0}%\n\n", result.confidence * 100.0));

    if !result.matched_skills.is_empty() {
        let skills: Vec<String> = result.matched_skills.iter().map(|s| escape_markdown(s)).collect();
        message.push_str(&format!("✅ *Matching skills:*\n{}\n\n", skills.join(", ")));
    }

    if !result.missing_skills.is_empty() {
        let skills: Vec<String> = result.missing_skills.iter().map(|s| escape_markdown(s)).collect();
        message.push_str(&format!("❌ *Missing skills:*\n{}\n\n", skills.join(", ")));
    }

    if !result.reasons.is_empty() {
        message.push_str("💡 *Main reasons:*\n");
        for reason in &result.reasons {
            message.push_str(&format!("• {}\n", escape_markdown(reason)));
        }
        message.push('\n');
    }

    if !result.notes.is_empty() {
        message.push_str(&format!("📝 {}\n\n", escape_markdown(&result.notes)));
    }

    let apply_link = posting.application_link.as_deref().unwrap_or(&posting.link);
    message.push_str(&format!("👉 [Apply now]({})\n", apply_link));
    message.push_str(&format!("🔎 [See the posting]({})\n", posting.link));

    message
}
