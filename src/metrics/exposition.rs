//! Extraction of per-deployment query counts from a Prometheus text exposition
//!
//! Indexer services report successful queries as
//! `indexer_service_queries_ok{deployment="<id>"} <count>`, one sample per line.

use crate::{AgoraError, Result};
use regex::Regex;
use tracing::warn;

pub const QUERIES_OK_METRIC: &str = "indexer_service_queries_ok";
pub const DEPLOYMENT_LABEL: &str = "deployment";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSample {
    pub workload_id: String,
    pub value: u64,
}

/// Matches the query counter sample of a single deployment
#[derive(Debug, Clone)]
pub struct SampleMatcher {
    workload_id: String,
    pattern: Regex,
}

impl SampleMatcher {
    pub fn new(workload_id: &str) -> Result<Self> {
        // Optional trailing timestamp after the value.
        let pattern = format!(
            r#"^{}\{{{}="{}"\}}\s+([0-9]+)(?:\s+-?[0-9]+)?$"#,
            regex::escape(QUERIES_OK_METRIC),
            regex::escape(DEPLOYMENT_LABEL),
            regex::escape(&escape_label_value(workload_id)),
        );

        let pattern = Regex::new(&pattern).map_err(|e| {
            AgoraError::ConfigError(format!("Invalid deployment id {:?}: {}", workload_id, e))
        })?;

        Ok(Self {
            workload_id: workload_id.to_string(),
            pattern,
        })
    }

    pub fn workload_id(&self) -> &str {
        &self.workload_id
    }

    pub fn samples<'a>(&'a self, body: &'a str) -> impl Iterator<Item = MetricSample> + 'a {
        body.lines().filter_map(move |line| {
            let captures = self.pattern.captures(line.trim())?;
            match captures[1].parse::<u64>() {
                Ok(value) => Some(MetricSample {
                    workload_id: self.workload_id.clone(),
                    value,
                }),
                Err(e) => {
                    warn!("Skipping sample {:?}: {}", line, e);
                    None
                }
            }
        })
    }

    /// Sum of all matching samples; duplicates are added together.
    pub fn sum(&self, body: &str) -> u64 {
        self.samples(body)
            .fold(0u64, |total, sample| total.saturating_add(sample.value))
    }
}

/// Escape a label value the way the text exposition format writes it.
fn escape_label_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = "\
# HELP indexer_service_queries_ok Successfully executed queries
# TYPE indexer_service_queries_ok counter
indexer_service_queries_ok{deployment=\"Qm123\"} 7
indexer_service_queries_ok{deployment=\"Qm1234\"} 100
indexer_service_queries_ok{deployment=\"QmOther\"} 11
indexer_service_queries_failed{deployment=\"Qm123\"} 5
";

    #[test]
    fn test_sum_matches_exact_label() {
        let matcher = SampleMatcher::new("Qm123").unwrap();
        assert_eq!(matcher.sum(BODY), 7);
    }

    #[test]
    fn test_missing_sample_is_zero() {
        let matcher = SampleMatcher::new("QmNotServed").unwrap();
        assert_eq!(matcher.sum(BODY), 0);
        assert_eq!(matcher.samples(BODY).count(), 0);
    }

    #[test]
    fn test_duplicates_are_summed() {
        let body = "indexer_service_queries_ok{deployment=\"Qm123\"} 7\n\
                    indexer_service_queries_ok{deployment=\"Qm123\"} 2\n";
        let matcher = SampleMatcher::new("Qm123").unwrap();
        assert_eq!(matcher.sum(body), 9);
    }

    #[test]
    fn test_timestamped_and_indented_samples() {
        let body = "  indexer_service_queries_ok{deployment=\"Qm123\"} 4 1700000000000\r\n";
        let matcher = SampleMatcher::new("Qm123").unwrap();
        assert_eq!(
            matcher.samples(body).collect::<Vec<_>>(),
            vec![MetricSample {
                workload_id: "Qm123".to_string(),
                value: 4
            }]
        );
    }

    #[test]
    fn test_identifier_is_not_a_pattern() {
        let matcher = SampleMatcher::new("Qm.*").unwrap();
        assert_eq!(matcher.sum(BODY), 0);

        let body = "indexer_service_queries_ok{deployment=\"Qm.*\"} 3\n";
        assert_eq!(matcher.sum(body), 3);
    }

    #[test]
    fn test_non_integer_value_is_ignored() {
        let body = "indexer_service_queries_ok{deployment=\"Qm123\"} 7.5\n\
                    indexer_service_queries_ok{deployment=\"Qm123\"} 99999999999999999999999\n";
        let matcher = SampleMatcher::new("Qm123").unwrap();
        assert_eq!(matcher.sum(body), 0);
    }

    #[test]
    fn test_label_value_escaping() {
        let quoted = SampleMatcher::new("a\"b").unwrap();
        assert_eq!(
            quoted.sum(r#"indexer_service_queries_ok{deployment="a\"b"} 3"#),
            3
        );

        let backslash = SampleMatcher::new(r"a\b").unwrap();
        assert_eq!(
            backslash.sum(r#"indexer_service_queries_ok{deployment="a\\b"} 5"#),
            5
        );
        assert_eq!(
            backslash.sum(r#"indexer_service_queries_ok{deployment="a\b"} 5"#),
            0
        );
    }
}
