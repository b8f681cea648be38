use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::info;

use crate::models::Posting;

/// Which rubric a source's postings are judged with. Structured board
/// postings get the standard rubric; free-text social posts get the strict
/// one with its hard score ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalMode {
    Standard,
    Strict,
}

/// One origin of postings (job board, social feed). Each run fetches from
/// scratch; a fetch is finite and may yield nothing.
pub trait JobSource {
    fn name(&self) -> &str;
    fn mode(&self) -> EvalMode;
    fn fetch(&mut self) -> Result<Vec<Posting>>;
}

// Feed entries as captured upstream. Board entries carry structured fields;
// social entries are just {link, text}.
#[derive(Debug, Deserialize)]
struct FeedEntry {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    company: String,
    #[serde(default, alias = "text")]
    description: String,
    link: String,
    #[serde(default)]
    application_link: Option<String>,
}

/// Source adapter over a JSON feed file of captured postings.
pub struct FeedFileSource {
    name: String,
    mode: EvalMode,
    path: PathBuf,
}

impl FeedFileSource {
    pub fn new(name: &str, mode: EvalMode, path: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            mode,
            path,
        }
    }
}

impl JobSource for FeedFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> EvalMode {
        self.mode
    }

    fn fetch(&mut self) -> Result<Vec<Posting>> {
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read feed file {:?}", self.path))?;
        let postings = parse_feed(&raw, &self.name)?;
        info!(source = %self.name, count = postings.len(), "fetched postings");
        Ok(postings)
    }
}

fn parse_feed(raw: &str, source: &str) -> Result<Vec<Posting>> {
    let entries: Vec<FeedEntry> =
        serde_json::from_str(raw).context("Feed file is not a JSON array of postings")?;

    Ok(entries
        .into_iter()
        .map(|entry| Posting {
            // The canonical link doubles as the dedup key unless the feed
            // carries a platform id.
            id: entry.id.unwrap_or_else(|| entry.link.clone()),
            title: entry.title,
            company: entry.company,
            description: entry.description,
            link: entry.link,
            application_link: entry.application_link,
            source: source.to_string(),
        })
        .collect())
}
