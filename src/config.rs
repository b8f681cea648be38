use anyhow::{Context, Result, bail};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::db::Store;
use crate::models::Profile;

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_EVAL_TIMEOUT_SECS: u64 = 60;

/// Everything the run needs, resolved up front: secrets and knobs from the
/// environment, candidate profile and resume from files next to the binary.
pub struct Config {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub db_path: PathBuf,
    pub eval_timeout: Duration,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub profile: Profile,
    pub resume: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let api_key = env::var("API_KEY")
            .context("API_KEY environment variable not set. Set it with: export API_KEY=your-key-here")?;
        let model = env::var("LLM_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let base_url = env::var("EVAL_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        let db_path = env::var("DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Store::default_path());

        let eval_timeout = match env::var("EVAL_TIMEOUT_SECS") {
            Ok(raw) => Duration::from_secs(
                raw.parse()
                    .context("EVAL_TIMEOUT_SECS must be a number of seconds")?,
            ),
            Err(_) => Duration::from_secs(DEFAULT_EVAL_TIMEOUT_SECS),
        };

        let profile = load_profile(Path::new("profile.yaml"))?;
        let resume = load_text(Path::new("resume.md"));
        if resume.trim().is_empty() {
            bail!("Resume is empty or missing. Provide resume.md (or resume.md.example).");
        }

        Ok(Self {
            api_key,
            model,
            base_url,
            db_path,
            eval_timeout,
            telegram_bot_token: env::var("TELEGRAM_BOT_TOKEN").ok(),
            telegram_chat_id: env::var("TELEGRAM_CHAT_ID").ok(),
            profile,
            resume,
        })
    }
}

// Both file loaders fall back to a committed `.example` next to the real
// file, so a fresh checkout still runs.
fn load_profile(path: &Path) -> Result<Profile> {
    match read_with_example_fallback(path) {
        Some(raw) => serde_yaml::from_str(&raw)
            .with_context(|| format!("Failed to parse profile file {:?}", path)),
        None => Ok(Profile::default()),
    }
}

fn load_text(path: &Path) -> String {
    read_with_example_fallback(path).unwrap_or_default()
}

fn read_with_example_fallback(path: &Path) -> Option<String> {
    if let Ok(raw) = std::fs::read_to_string(path) {
        return Some(raw);
    }
    let mut example = path.as_os_str().to_os_string();
    example.push(".example");
    std::fs::read_to_string(PathBuf::from(example)).ok()
}
