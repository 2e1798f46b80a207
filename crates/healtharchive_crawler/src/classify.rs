//! Crawl outcome classification.
//!
//! One function over `(exit code, log tail, state file)` replaces scattered
//! error handling: the result says what happened and whether the retry
//! budget is charged. Infra and config detection is a data-driven rule list
//! that has grown by incident; add patterns to the tables, not the code.

use std::sync::OnceLock;

use regex::Regex;

use crate::state_file::ArchiveState;

/// Crawler exit code for invalid arguments (EX_USAGE).
pub const EXIT_USAGE: i32 = 64;

/// Log patterns that mark a run as infrastructure-caused. Matched
/// case-insensitively against the combined log tail.
const INFRA_LOG_PATTERNS: &[(&str, &str)] = &[
    ("transport endpoint is not connected", "stale_mount"),
    (r"errno 107", "stale_mount"),
    (r"errno 5\b", "io_error"),
    ("input/output error", "io_error"),
    ("no space left on device", "disk_full"),
    (r"errno 28", "disk_full"),
    ("network is unreachable", "network_unreachable"),
    (r"errno 101", "network_unreachable"),
    ("connection timed out", "network_timeout"),
    (r"errno 110", "network_timeout"),
    ("name or service not known", "dns_failure"),
    ("temporary failure in name resolution", "dns_failure"),
];

/// Log patterns that mark a run as misconfigured.
const CONFIG_LOG_PATTERNS: &[(&str, &str)] = &[
    ("unrecognized arguments", "unrecognized_arguments"),
    ("invalid argument value", "invalid_argument_value"),
];

/// How a finished crawl attempt is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    /// Exit 0 with a state file; proceed to indexing.
    Success,
    /// Crawler-side failure; consumes one retry.
    CrawlFailure,
    /// Infrastructure-caused; retryable without charging the budget.
    InfraError,
    /// Bad configuration; terminal until an operator intervenes.
    ConfigError,
}

/// Classification of a crawl attempt, with the rationale that picked it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: OutcomeKind,
    pub reason: String,
}

/// Everything the classifier looks at.
#[derive(Debug, Default)]
pub struct ClassifyInput<'a> {
    /// None when the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// The driver's hard wall-clock ceiling fired.
    pub timed_out: bool,
    pub log_tail: &'a str,
    pub state: Option<&'a ArchiveState>,
}

fn infra_rules() -> &'static Vec<(Regex, &'static str)> {
    static RULES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    RULES.get_or_init(|| compile_rules(INFRA_LOG_PATTERNS))
}

fn config_rules() -> &'static Vec<(Regex, &'static str)> {
    static RULES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    RULES.get_or_init(|| compile_rules(CONFIG_LOG_PATTERNS))
}

fn compile_rules(patterns: &[(&str, &'static str)]) -> Vec<(Regex, &'static str)> {
    patterns
        .iter()
        .filter_map(|(pattern, reason)| {
            Regex::new(&format!("(?i){pattern}"))
                .ok()
                .map(|regex| (regex, *reason))
        })
        .collect()
}

fn first_match(rules: &[(Regex, &'static str)], log_tail: &str) -> Option<&'static str> {
    rules
        .iter()
        .find(|(regex, _)| regex.is_match(log_tail))
        .map(|(_, reason)| *reason)
}

/// Classify a finished crawl attempt.
pub fn classify(input: &ClassifyInput<'_>) -> Classification {
    if input.timed_out {
        return Classification {
            kind: OutcomeKind::CrawlFailure,
            reason: "wall_clock_ceiling".to_string(),
        };
    }

    match input.exit_code {
        Some(0) => {
            if input.state.is_some() {
                Classification {
                    kind: OutcomeKind::Success,
                    reason: "exit_zero".to_string(),
                }
            } else {
                // A clean exit without the sidecar means the output dir
                // contract broke underneath the crawler.
                Classification {
                    kind: OutcomeKind::InfraError,
                    reason: "state_file_missing".to_string(),
                }
            }
        }
        Some(EXIT_USAGE) => Classification {
            kind: OutcomeKind::ConfigError,
            reason: "exit_usage".to_string(),
        },
        Some(_) => {
            if let Some(reason) = first_match(config_rules(), input.log_tail) {
                return Classification {
                    kind: OutcomeKind::ConfigError,
                    reason: reason.to_string(),
                };
            }
            if let Some(reason) = first_match(infra_rules(), input.log_tail) {
                return Classification {
                    kind: OutcomeKind::InfraError,
                    reason: reason.to_string(),
                };
            }
            Classification {
                kind: OutcomeKind::CrawlFailure,
                reason: "nonzero_exit".to_string(),
            }
        }
        None => Classification {
            kind: OutcomeKind::CrawlFailure,
            reason: "killed_by_signal".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ArchiveState {
        ArchiveState {
            pages_crawled: 10,
            container_restarts: 0,
            current_workers: 1,
            last_progress_timestamp: None,
            stalled: false,
            temp_dirs: vec![],
        }
    }

    #[test]
    fn exit_zero_with_state_is_success() {
        let state = state();
        let result = classify(&ClassifyInput {
            exit_code: Some(0),
            state: Some(&state),
            ..Default::default()
        });
        assert_eq!(result.kind, OutcomeKind::Success);
    }

    #[test]
    fn exit_zero_without_state_is_infra() {
        let result = classify(&ClassifyInput {
            exit_code: Some(0),
            ..Default::default()
        });
        assert_eq!(result.kind, OutcomeKind::InfraError);
        assert_eq!(result.reason, "state_file_missing");
    }

    #[test]
    fn stale_mount_log_is_infra() {
        let result = classify(&ClassifyInput {
            exit_code: Some(1),
            log_tail: "OSError: [Errno 107] Transport endpoint is not connected: '/srv/warc'",
            ..Default::default()
        });
        assert_eq!(result.kind, OutcomeKind::InfraError);
        assert_eq!(result.reason, "stale_mount");
    }

    #[test]
    fn disk_full_is_infra() {
        let result = classify(&ClassifyInput {
            exit_code: Some(2),
            log_tail: "write failed: No space left on device",
            ..Default::default()
        });
        assert_eq!(result.kind, OutcomeKind::InfraError);
        assert_eq!(result.reason, "disk_full");
    }

    #[test]
    fn usage_exit_is_config_error() {
        let result = classify(&ClassifyInput {
            exit_code: Some(EXIT_USAGE),
            log_tail: "error: unrecognized arguments: --initial-wrokers",
            ..Default::default()
        });
        assert_eq!(result.kind, OutcomeKind::ConfigError);
    }

    #[test]
    fn unrecognized_arguments_beat_infra_patterns() {
        // Config detection wins when both pattern families appear.
        let result = classify(&ClassifyInput {
            exit_code: Some(2),
            log_tail: "unrecognized arguments: --x\nConnection timed out",
            ..Default::default()
        });
        assert_eq!(result.kind, OutcomeKind::ConfigError);
    }

    #[test]
    fn plain_nonzero_exit_consumes_retry() {
        let result = classify(&ClassifyInput {
            exit_code: Some(2),
            log_tail: "crawler gave up after too many fetch errors",
            ..Default::default()
        });
        assert_eq!(result.kind, OutcomeKind::CrawlFailure);
        assert_eq!(result.reason, "nonzero_exit");
    }

    #[test]
    fn signal_death_is_crawl_failure() {
        let result = classify(&ClassifyInput {
            exit_code: None,
            ..Default::default()
        });
        assert_eq!(result.kind, OutcomeKind::CrawlFailure);
        assert_eq!(result.reason, "killed_by_signal");
    }

    #[test]
    fn timeout_overrides_exit_code() {
        let result = classify(&ClassifyInput {
            exit_code: None,
            timed_out: true,
            ..Default::default()
        });
        assert_eq!(result.kind, OutcomeKind::CrawlFailure);
        assert_eq!(result.reason, "wall_clock_ceiling");
    }
}
