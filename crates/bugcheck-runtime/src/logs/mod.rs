//! Log retrieval and filtering.
//!
//! Reading a file goes through the same steps in both modes:
//!
//! 1. resolve the restart delimiter and fold it into the grep pattern
//! 2. fetch the lines from the cache, the bundle on disk, or the live host
//! 3. apply the time window to log files
//! 4. cut everything up to the last restart delimiter
//!
//! Every failure along the way produces an empty line sequence.

mod delimiter;
mod timestamp;

pub use delimiter::{compose_grep, restart_delimiter, truncate_after_last};
pub use timestamp::TimeWindow;

use regex::Regex;
use tracing::{debug, warn, Span};

use crate::cache::{CacheKey, CachedValue, FileCache};
use crate::exec::{Executor, RunOptions, Target};

/// File name suffixes that mark a file as a log
const LOG_SUFFIXES: &[&str] = &["log", "out", "journalctl", "kubelet_journalctl", "coredns"];

/// Options for [`LogReader::read`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// Apply the time window even if the file is not a log file
    pub force_time_filter: bool,
    /// Explicit restart delimiter, overriding the built-in table
    pub from_last: Option<String>,
    /// Only keep lines matching this regex
    pub grep: Option<String>,
}

impl ReadOptions {
    /// Only keep lines matching `pattern`
    #[must_use]
    pub fn grep(pattern: impl Into<String>) -> Self {
        Self {
            grep: Some(pattern.into()),
            ..Self::default()
        }
    }
}

/// Returns true if `path` names a log file: the text after the last `.`,
/// stripped of any directory part, is one of the known log suffixes.
pub fn is_log_file(path: &str) -> bool {
    let last = path.rsplit('.').next().unwrap_or(path);
    let last = last.rsplit('/').next().unwrap_or(last);
    LOG_SUFFIXES.contains(&last)
}

/// Where a [`LogReader`] gets its lines from
#[derive(Debug, Clone)]
pub enum LogSource<'a> {
    /// Extracted bundle on the local filesystem
    Bundle {
        /// Bundle logs directory, used to resolve restart delimiters
        logs_dir: &'a str,
    },
    /// Live host, read through `cat` / `egrep`
    Live {
        /// Executor used to run the read commands
        executor: &'a Executor,
        /// Host the unit inspects
        target: &'a Target,
    },
}

/// Reads files for one unit
#[derive(Debug)]
pub struct LogReader<'a> {
    source: LogSource<'a>,
    cache: &'a dyn FileCache,
    window: Option<TimeWindow>,
    since_restart: bool,
    span: &'a Span,
}

impl<'a> LogReader<'a> {
    /// Create a reader
    pub const fn new(source: LogSource<'a>, cache: &'a dyn FileCache, span: &'a Span) -> Self {
        Self {
            source,
            cache,
            window: None,
            since_restart: false,
            span,
        }
    }

    /// Only keep log lines inside `window`
    #[must_use]
    pub const fn with_window(mut self, window: Option<TimeWindow>) -> Self {
        self.window = window;
        self
    }

    /// Only keep content written after the last service restart
    #[must_use]
    pub const fn since_last_restart(mut self, enabled: bool) -> Self {
        self.since_restart = enabled;
        self
    }

    /// Read `path`. Any failure yields an empty sequence.
    pub async fn read(&self, path: &str, options: &ReadOptions) -> Vec<String> {
        let delimiter = self.delimiter(path, options);
        let grep = match (&options.grep, &delimiter) {
            (Some(grep), Some(delimiter)) => {
                let composed = compose_grep(grep, delimiter);
                debug!(parent: self.span, pattern = %composed, "formatted regex search");
                Some(composed)
            }
            (grep, _) => grep.clone(),
        };

        let filter = match grep.as_deref().map(Regex::new).transpose() {
            Ok(filter) => filter,
            Err(e) => {
                warn!(parent: self.span, path, error = %e, "invalid grep pattern");
                return Vec::new();
            }
        };

        let Some(mut lines) = self.fetch(path, grep.as_deref(), filter.as_ref()).await else {
            return Vec::new();
        };

        if is_log_file(path) || options.force_time_filter {
            match &self.window {
                Some(window) => lines = window.filter(lines, self.span),
                None => debug!(parent: self.span, path, "bypassing date filtering"),
            }
        } else {
            debug!(parent: self.span, path, "skipping timestamp filtering");
        }

        if let Some(delimiter) = delimiter {
            lines = truncate_after_last(lines, &delimiter, self.span);
        }
        lines
    }

    fn delimiter(&self, path: &str, options: &ReadOptions) -> Option<String> {
        if !self.since_restart {
            debug!(parent: self.span, path, "bypassing service last restart filtering");
            return None;
        }
        let logs_dir = match &self.source {
            LogSource::Bundle { logs_dir } => *logs_dir,
            LogSource::Live { .. } => "",
        };
        let delimiter = options
            .from_last
            .clone()
            .or_else(|| restart_delimiter(path, logs_dir).map(str::to_string));
        if delimiter.is_none() {
            debug!(parent: self.span, path, "no delimiter found");
        }
        delimiter
    }

    /// Cached or freshly read lines for `(path, grep)`. Holds the cache lock
    /// for the key while reading.
    async fn fetch(&self, path: &str, grep: Option<&str>, filter: Option<&Regex>) -> Option<Vec<String>> {
        let key = CacheKey::filtered(path, grep);
        if let Some(lines) = self.cached(&key).await {
            debug!(parent: self.span, path, "re-used cached contents");
            return Some(lines);
        }

        self.cache.lock(&key).await;
        let lines = match self.cached(&key).await {
            Some(lines) => Some(lines),
            None => match &self.source {
                LogSource::Bundle { .. } => self.read_bundle(path, grep, filter).await,
                LogSource::Live { executor, target } => {
                    self.read_live(executor, target, path, grep).await
                }
            },
        };
        self.cache.unlock(&key).await;
        lines
    }

    async fn cached(&self, key: &CacheKey) -> Option<Vec<String>> {
        match self.cache.get(key).await {
            Some(CachedValue::Lines(lines)) => Some(lines),
            _ => None,
        }
    }

    async fn read_bundle(&self, path: &str, grep: Option<&str>, filter: Option<&Regex>) -> Option<Vec<String>> {
        let raw_key = CacheKey::new(path);
        let raw = match self.cached(&raw_key).await {
            Some(lines) => lines,
            None => {
                let bytes = match tokio::fs::read(path).await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        debug!(parent: self.span, path, error = %e, "could not read file");
                        return None;
                    }
                };
                let lines: Vec<String> = String::from_utf8_lossy(&bytes)
                    .lines()
                    .map(str::to_string)
                    .collect();
                self.cache.put(raw_key, CachedValue::Lines(lines.clone())).await;
                lines
            }
        };

        let Some(filter) = filter else {
            return Some(raw);
        };
        let total = raw.len();
        let kept: Vec<String> = raw.into_iter().filter(|line| filter.is_match(line)).collect();
        debug!(
            parent: self.span,
            path,
            removed = total - kept.len(),
            remaining = kept.len(),
            "grepped file"
        );
        self.cache
            .put(CacheKey::filtered(path, grep), CachedValue::Lines(kept.clone()))
            .await;
        Some(kept)
    }

    async fn read_live(&self, executor: &Executor, target: &Target, path: &str, grep: Option<&str>) -> Option<Vec<String>> {
        let command = grep.map_or_else(
            || format!("cat {path}"),
            |grep| format!("egrep '{}' {path}", quote_single(grep)),
        );
        let result = executor.run(&command, target, &RunOptions::default()).await;
        if result.is_unavailable() {
            debug!(parent: self.span, path, "could not read file");
            return None;
        }
        let lines = result.stdout();
        self.cache
            .put(CacheKey::filtered(path, grep), CachedValue::Lines(lines.clone()))
            .await;
        Some(lines)
    }
}

/// Make `text` safe inside a single-quoted shell word
fn quote_single(text: &str) -> String {
    text.replace('\'', r"'\''")
}
