//! Script sources.

use crate::config::ScriptSource;
use crate::error::ProducerError;
use crate::http::{self, RetryPolicy};
use crate::producer::ScriptProducer;
use roxmltree::{Document, Node};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Rotates through the `.txt` files of a directory in name order.
pub struct DirectoryScripts {
    dir: PathBuf,
    next: AtomicUsize,
}

impl DirectoryScripts {
    pub fn new(dir: PathBuf) -> Self {
        DirectoryScripts {
            dir,
            next: AtomicUsize::new(0),
        }
    }

    fn script_files(&self) -> Result<Vec<PathBuf>, ProducerError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| {
            ProducerError::Script(format!("cannot read '{}': {e}", self.dir.display()))
        })?;
        let mut files: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .and_then(|e| e.to_str())
                        .is_some_and(|e| e.eq_ignore_ascii_case("txt"))
            })
            .collect();
        files.sort();
        Ok(files)
    }
}

impl ScriptProducer for DirectoryScripts {
    fn produce(&self) -> Result<String, ProducerError> {
        let files = self.script_files()?;
        if files.is_empty() {
            return Err(ProducerError::Script(format!(
                "no .txt scripts in '{}'",
                self.dir.display()
            )));
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % files.len();
        let path = &files[index];
        tracing::debug!(script = %path.display(), "script picked");
        Ok(fs::read_to_string(path)?)
    }
}

/// Fetches a plain-text script from a URL on every call.
pub struct HttpScripts {
    url: String,
    policy: RetryPolicy,
}

impl HttpScripts {
    pub fn new(url: String, timeout: Duration) -> Self {
        HttpScripts {
            url,
            policy: RetryPolicy::with_timeout(timeout),
        }
    }
}

impl ScriptProducer for HttpScripts {
    fn produce(&self) -> Result<String, ProducerError> {
        http::get_text(&self.url, &self.policy).map_err(ProducerError::Script)
    }
}

/// One item of a news feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub title: String,
    pub summary: String,
}

/// Reads a news feed and speaks its first `top_n` entries.
pub struct FeedScripts {
    url: String,
    top_n: usize,
    policy: RetryPolicy,
}

impl FeedScripts {
    pub fn new(url: String, top_n: usize, timeout: Duration) -> Self {
        FeedScripts {
            url,
            top_n,
            policy: RetryPolicy::with_timeout(timeout),
        }
    }

    /// Fetch the feed and return its first entries.
    pub fn fetch_entries(&self) -> Result<Vec<FeedEntry>, ProducerError> {
        let xml = http::get_text(&self.url, &self.policy).map_err(ProducerError::Script)?;
        parse_feed(&xml, self.top_n)
            .map_err(|e| ProducerError::Script(format!("{}: {e}", self.url)))
    }
}

impl ScriptProducer for FeedScripts {
    fn produce(&self) -> Result<String, ProducerError> {
        let entries = self.fetch_entries()?;
        if entries.is_empty() {
            return Err(ProducerError::Script(format!(
                "no entries in feed '{}'",
                self.url
            )));
        }
        tracing::debug!(feed = %self.url, entries = entries.len(), "feed read");
        Ok(compose_feed_script(&entries))
    }
}

/// First `limit` RSS `<item>`s or Atom `<entry>`s, in document order.
/// Summaries come from `description`, `summary` or `content`, stripped of HTML.
pub fn parse_feed(xml: &str, limit: usize) -> Result<Vec<FeedEntry>, String> {
    let doc = Document::parse(xml).map_err(|e| format!("invalid feed: {e}"))?;
    let entries = doc
        .descendants()
        .filter(|n| n.is_element() && matches!(n.tag_name().name(), "item" | "entry"))
        .take(limit)
        .map(|item| FeedEntry {
            title: strip_html(&child_text(item, &["title"])),
            summary: strip_html(&child_text(item, &["description", "summary", "content"])),
        })
        .collect();
    Ok(entries)
}

fn child_text(item: Node, names: &[&str]) -> String {
    names
        .iter()
        .find_map(|name| {
            item.children()
                .find(|n| n.is_element() && n.tag_name().name() == *name)
                .and_then(|n| n.text())
                .map(str::trim)
                .filter(|t| !t.is_empty())
        })
        .unwrap_or_default()
        .to_string()
}

/// Drop tags, turn `&nbsp;` into a space and collapse whitespace.
pub fn strip_html(text: &str) -> String {
    let mut plain = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => {
                in_tag = true;
                plain.push(' ');
            }
            '>' if in_tag => in_tag = false,
            _ if !in_tag => plain.push(c),
            _ => {}
        }
    }
    plain
        .replace("&nbsp;", " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// One paragraph per entry, separated by pause markers.
pub fn compose_feed_script(entries: &[FeedEntry]) -> String {
    entries
        .iter()
        .map(|entry| {
            if entry.summary.is_empty() || entry.summary == entry.title {
                entry.title.clone()
            } else if entry.title.ends_with(['.', '!', '?']) {
                format!("{} {}", entry.title, entry.summary)
            } else {
                format!("{}. {}", entry.title, entry.summary)
            }
        })
        .collect::<Vec<_>>()
        .join("\n[pause]\n")
}

/// Build the configured script source.
pub fn from_config(source: &ScriptSource) -> Box<dyn ScriptProducer> {
    match source {
        ScriptSource::Directory { dir } => Box::new(DirectoryScripts::new(dir.clone())),
        ScriptSource::Http { url, timeout_secs } => Box::new(HttpScripts::new(
            url.clone(),
            Duration::from_secs(*timeout_secs),
        )),
        ScriptSource::Feed {
            url,
            top_n,
            timeout_secs,
        } => Box::new(FeedScripts::new(
            url.clone(),
            *top_n,
            Duration::from_secs(*timeout_secs),
        )),
    }
}
