//! Free space on the CVP partitions.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt::Write;
use tracing::{debug, trace};

use bugcheck_core::{Result, StatusCode, StatusRecord};
use bugcheck_runtime::logs::ReadOptions;
use bugcheck_runtime::unit::DirectoryKind;
use bugcheck_runtime::{Bugcheck, RunOptions, UnitContext};

/// Partitions checked unless configured otherwise
pub const DEFAULT_PARTITIONS: &[&str] = &["/", "/data"];

const WARN_THRESHOLD: u8 = 70;
const ERROR_THRESHOLD: u8 = 90;

/// Flags partitions whose usage crosses the warning or error threshold
pub struct DiskSpace {
    context: UnitContext,
    partitions: Vec<String>,
    warn_threshold: u8,
    error_threshold: u8,
}

impl DiskSpace {
    /// Check [`DEFAULT_PARTITIONS`] with the default thresholds
    pub fn new(context: UnitContext) -> Self {
        Self {
            context,
            partitions: DEFAULT_PARTITIONS.iter().map(|p| (*p).to_string()).collect(),
            warn_threshold: WARN_THRESHOLD,
            error_threshold: ERROR_THRESHOLD,
        }
    }

    /// Check `partitions` instead of the defaults
    #[must_use]
    pub fn with_partitions(mut self, partitions: &[&str]) -> Self {
        self.partitions = partitions.iter().map(|p| (*p).to_string()).collect();
        self
    }

    /// Usage percentages at which WARNING and ERROR are reported
    #[must_use]
    pub const fn with_thresholds(mut self, warn: u8, error: u8) -> Self {
        self.warn_threshold = warn;
        self.error_threshold = error;
        self
    }

    /// `df -h` output, from the bundle or the live node
    async fn df_output(&self) -> Vec<String> {
        if self.context.is_using_local_logs() {
            let dir = self
                .context
                .local_directory(DirectoryKind::Commands)
                .unwrap_or_default();
            self.context
                .read_file(&format!("{dir}/df_h"), &ReadOptions::default())
                .await
        } else {
            let command = format!("df -h {}", self.partitions.join(" "));
            self.context
                .run_command(&command, &RunOptions::default())
                .await
                .stdout()
        }
    }

    fn evaluate(&self, usage: &BTreeMap<String, u8>) -> (StatusCode, Option<String>) {
        let mut code = StatusCode::Ok;
        let mut details = String::new();

        for partition in &self.partitions {
            match usage.get(partition) {
                Some(&percent) if percent >= self.error_threshold => {
                    code = StatusCode::Error;
                    let _ = write!(details, " ({partition} usage: {percent}%)");
                }
                Some(&percent) if percent >= self.warn_threshold => {
                    if code != StatusCode::Error {
                        code = StatusCode::Warning;
                    }
                    let _ = write!(details, " ({partition} usage: {percent}%)");
                }
                Some(_) => {}
                None => {
                    if code == StatusCode::Ok {
                        code = StatusCode::Unavailable;
                    }
                    let _ = write!(details, " ({partition} not available)");
                }
            }
        }

        let message = if code.is_issue() {
            Some(format!("Low free space in partitions{details}"))
        } else if details.is_empty() {
            None
        } else {
            Some(details.trim_start().to_string())
        };
        (code, message)
    }
}

/// Usage percentage per mount point, skipping headers and short lines
fn parse_df(lines: &[String]) -> BTreeMap<String, u8> {
    lines
        .iter()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let (used, mount) = (fields.get(4)?, fields.get(5)?);
            let percent = used.trim_end_matches('%').parse().ok()?;
            Some(((*mount).to_string(), percent))
        })
        .collect()
}

#[async_trait]
impl Bugcheck for DiskSpace {
    fn context(&self) -> &UnitContext {
        &self.context
    }

    fn context_mut(&mut self) -> &mut UnitContext {
        &mut self.context
    }

    async fn scan(&mut self) -> Result<StatusCode> {
        let output = self.df_output().await;
        let usage = parse_df(&output);
        trace!(parent: self.context.span(), usage = ?usage, "partition usage");

        let (code, message) = self.evaluate(&usage);
        debug!(parent: self.context.span(), code = %code, "disk space evaluated");

        let extra: Map<String, Value> = usage
            .into_iter()
            .map(|(partition, percent)| (partition, Value::from(percent)))
            .collect();
        self.context
            .set_status_record(StatusRecord::new(code, message, Value::Object(extra)));
        Ok(code)
    }
}
