//! Service restart markers.

use tracing::{debug, Span};

/// Known "service started" markers, keyed by path relative to the logs
/// directory
const RESTART_MARKERS: &[(&str, &str)] = &[
    ("/hbasemaster", "server.Server: Started"),
    ("/elasticsearch-server/es-cluster.log", "] started"),
    ("/aaa/aaa.stderr.log", "Initializing auth providers map"),
    ("/user/user-upgrade.log", "Upgrading user component"),
];

/// Restart marker for `path`. `logs_dir` is the bundle logs directory, or
/// empty in live mode. When several entries match, the last one wins.
pub fn restart_delimiter(path: &str, logs_dir: &str) -> Option<&'static str> {
    RESTART_MARKERS
        .iter()
        .rev()
        .find(|(suffix, _)| path.contains(&format!("{logs_dir}{suffix}")))
        .map(|(_, marker)| *marker)
}

/// OR the escaped `delimiter` into a grep pattern so marker lines survive
/// the grep.
pub fn compose_grep(grep: &str, delimiter: &str) -> String {
    format!("({grep}|{})", regex::escape(delimiter))
}

/// Keep only the lines after the last line containing `delimiter`.
///
/// Without a match the lines are returned unchanged. Applying this twice
/// with the same delimiter gives the same result as applying it once.
pub fn truncate_after_last(mut lines: Vec<String>, delimiter: &str, span: &Span) -> Vec<String> {
    match lines.iter().rposition(|line| line.contains(delimiter)) {
        Some(index) => {
            debug!(parent: span, delimiter, index, "restart delimiter found");
            lines.split_off(index + 1)
        }
        None => {
            debug!(parent: span, delimiter, "no occurrences of restart delimiter");
            lines
        }
    }
}
