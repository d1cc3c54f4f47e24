//! Result Aggregation
//!
//! Reduces an ordered list of [`TaskResult`]s into one [`AggregateResult`].
//!
//! | Mode | Output | Success |
//! |---|---|---|
//! | concatenate | `"<template_id>: <output-or-error>"` per result | always |
//! | synthesize | merged narrative of the successes plus a list of failures | ≥1 success |
//! | vote | first successful output; consensus = strict majority succeeded | ≥1 success |
//! | rank | successes sorted by confidence, descending, stable | ≥1 success |
//! | diff | per-result previews | always |
//!
//! `vote` counts success/failure only and never compares content. `diff`
//! reports previews only; its agreement/disagreement fields are reserved and
//! always empty.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::types::TaskResult;
use crate::invoke::{Invoker, OfflineInvoker};
use crate::templates::{BehaviorTemplate, SYNTHESIZER_TEMPLATE_ID, TemplateRegistry};
use crate::{Error, Result};

/// Confidence assumed for a result that carries none
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Confidence reported for a successful vote
pub const VOTE_CONFIDENCE: f64 = 0.8;

/// Stand-in output when no input succeeded
pub const NO_SUCCESSFUL_RESULTS: &str = "No successful results";

/// Default preview length for `diff`, in characters
pub const DEFAULT_PREVIEW_LEN: usize = 500;

const DEFAULT_SYNTHESIS_TIMEOUT: Duration = Duration::from_secs(120);

/// Strategy for aggregating results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateMode {
    Concatenate,
    #[default]
    Synthesize,
    Vote,
    Rank,
    Diff,
}

impl AggregateMode {
    pub const ALL: [AggregateMode; 5] = [
        Self::Concatenate,
        Self::Synthesize,
        Self::Vote,
        Self::Rank,
        Self::Diff,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Concatenate => "concatenate",
            Self::Synthesize => "synthesize",
            Self::Vote => "vote",
            Self::Rank => "rank",
            Self::Diff => "diff",
        }
    }
}

impl fmt::Display for AggregateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregateMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::Config(format!("Unknown aggregate mode: {}", s)))
    }
}

/// A failed input as reported by `synthesize`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedInput {
    pub index: usize,
    pub template_id: String,
    pub error_message: String,
}

/// One ballot in a `vote`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteEntry {
    pub index: usize,
    pub template_id: String,
    pub success: bool,
    pub confidence: f64,
}

/// One place in a `rank`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntry {
    /// 1-based position
    pub rank: usize,
    /// Position in the input list
    pub index: usize,
    pub template_id: String,
    pub confidence: f64,
    pub output: String,
}

/// One truncated output in a `diff`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffPreview {
    pub index: usize,
    pub template_id: String,
    pub success: bool,
    pub preview: String,
}

/// Mode-specific part of an [`AggregateResult`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AggregateDetails {
    Concatenate,
    Synthesize {
        /// Backend that produced the narrative; absent when nothing succeeded
        synthesized_by: Option<String>,
        failed: Vec<FailedInput>,
    },
    Vote {
        consensus: bool,
        winning_output: String,
        votes: Vec<VoteEntry>,
    },
    Rank {
        ranking: Vec<RankedEntry>,
        top_result: Option<String>,
    },
    Diff {
        previews: Vec<DiffPreview>,
        /// Reserved: cross-result comparison is not implemented
        agreements: Vec<String>,
        /// Reserved: cross-result comparison is not implemented
        disagreements: Vec<String>,
    },
}

/// Merged outcome of several task results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub mode: AggregateMode,
    pub success: bool,
    pub success_count: usize,
    pub failure_count: usize,
    pub output: String,
    pub raw_results: Vec<TaskResult>,
    pub details: AggregateDetails,
}

impl AggregateResult {
    fn new(
        mode: AggregateMode,
        success: bool,
        output: String,
        raw_results: Vec<TaskResult>,
        details: AggregateDetails,
    ) -> Self {
        let success_count = raw_results.iter().filter(|r| r.success).count();
        Self {
            mode,
            success,
            success_count,
            failure_count: raw_results.len() - success_count,
            output,
            raw_results,
            details,
        }
    }

    /// Get all errors as an iterator
    pub fn errors(&self) -> impl Iterator<Item = &str> {
        self.raw_results
            .iter()
            .filter_map(|r| r.error_message.as_deref())
    }
}

/// Result aggregator for combining worker results
#[derive(Clone)]
pub struct ResultAggregator {
    synthesizer: Arc<dyn Invoker>,
    synthesis_template: Arc<BehaviorTemplate>,
    synthesis_timeout: Duration,
    preview_len: usize,
}

impl ResultAggregator {
    pub fn new(synthesizer: Arc<dyn Invoker>, synthesis_template: Arc<BehaviorTemplate>) -> Self {
        let synthesis_timeout = synthesis_template
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_SYNTHESIS_TIMEOUT);
        Self {
            synthesizer,
            synthesis_template,
            synthesis_timeout,
            preview_len: DEFAULT_PREVIEW_LEN,
        }
    }

    /// Use `synthesizer` with the registry's synthesis template
    pub fn from_registry(
        synthesizer: Arc<dyn Invoker>,
        registry: &TemplateRegistry,
    ) -> Result<Self> {
        let template = registry.resolve(SYNTHESIZER_TEMPLATE_ID)?;
        Ok(Self::new(synthesizer, template))
    }

    /// Deterministic aggregator with no external calls
    pub fn offline() -> Self {
        let registry = TemplateRegistry::builtin();
        let template = registry.resolve(SYNTHESIZER_TEMPLATE_ID).unwrap_or_else(|_| {
            Arc::new(BehaviorTemplate::new(
                SYNTHESIZER_TEMPLATE_ID,
                "Merges worker outputs",
                "Merge the worker outputs into one answer.",
            ))
        });
        Self::new(Arc::new(OfflineInvoker::new()), template)
    }

    pub fn with_preview_len(mut self, preview_len: usize) -> Self {
        self.preview_len = preview_len;
        self
    }

    pub fn with_synthesis_timeout(mut self, timeout: Duration) -> Self {
        self.synthesis_timeout = timeout;
        self
    }

    pub fn synthesizer_name(&self) -> &str {
        self.synthesizer.name()
    }

    /// Combine `results` (kept in their given order) with `mode`
    pub async fn combine(
        &self,
        results: Vec<TaskResult>,
        mode: AggregateMode,
    ) -> Result<AggregateResult> {
        debug!(mode = %mode, count = results.len(), "Aggregating results");

        match mode {
            AggregateMode::Concatenate => Ok(concatenate(results)),
            AggregateMode::Synthesize => self.synthesize(results).await,
            AggregateMode::Vote => Ok(vote(results)),
            AggregateMode::Rank => Ok(rank(results)),
            AggregateMode::Diff => Ok(diff(results, self.preview_len)),
        }
    }

    async fn synthesize(&self, results: Vec<TaskResult>) -> Result<AggregateResult> {
        let failed: Vec<FailedInput> = results
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.success)
            .map(|(index, r)| FailedInput {
                index,
                template_id: r.template_id.clone(),
                error_message: r.text().to_string(),
            })
            .collect();

        let successes: Vec<&TaskResult> = results.iter().filter(|r| r.success).collect();

        if successes.is_empty() {
            let output = format!(
                "No successful inputs to synthesize.{}",
                failure_section(&failed)
            );
            return Ok(AggregateResult::new(
                AggregateMode::Synthesize,
                false,
                output,
                results,
                AggregateDetails::Synthesize {
                    synthesized_by: None,
                    failed,
                },
            ));
        }

        let context = json!({
            "results": successes
                .iter()
                .map(|r| json!({
                    "template_id": r.template_id,
                    "task": r.task,
                    "duration_ms": r.duration_ms,
                    "output": r.text(),
                }))
                .collect::<Vec<_>>(),
            "failed": failed,
        });
        let instruction = format!(
            "Merge the {} successful worker outputs in the context into one coherent answer.",
            successes.len()
        );

        let narrative = tokio::time::timeout(
            self.synthesis_timeout,
            self.synthesizer
                .invoke(&self.synthesis_template, &instruction, None, Some(&context)),
        )
        .await
        .map_err(|_| {
            Error::Aggregation(format!(
                "synthesis via {} timed out after {}ms",
                self.synthesizer.name(),
                self.synthesis_timeout.as_millis()
            ))
        })?
        .map_err(|e| {
            warn!(synthesizer = self.synthesizer.name(), error = %e, "Synthesis failed");
            Error::Aggregation(format!(
                "synthesis via {} failed: {}",
                self.synthesizer.name(),
                e
            ))
        })?;

        let output = format!("{}{}", narrative, failure_section(&failed));

        Ok(AggregateResult::new(
            AggregateMode::Synthesize,
            true,
            output,
            results,
            AggregateDetails::Synthesize {
                synthesized_by: Some(self.synthesizer.name().to_string()),
                failed,
            },
        ))
    }
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::offline()
    }
}

fn failure_section(failed: &[FailedInput]) -> String {
    if failed.is_empty() {
        return String::new();
    }

    let lines: Vec<String> = failed
        .iter()
        .map(|f| format!("- {}: {}", f.template_id, f.error_message))
        .collect();
    format!("\n\nFailed inputs:\n{}", lines.join("\n"))
}

/// Join every result as `"<template_id>: <output-or-error>"`, in order
pub fn concatenate(results: Vec<TaskResult>) -> AggregateResult {
    let output = results
        .iter()
        .map(|r| format!("{}: {}", r.template_id, r.text()))
        .collect::<Vec<_>>()
        .join("\n\n");

    AggregateResult::new(
        AggregateMode::Concatenate,
        true,
        output,
        results,
        AggregateDetails::Concatenate,
    )
}

/// Majority rule over success/failure
pub fn vote(results: Vec<TaskResult>) -> AggregateResult {
    let total = results.len();
    let success_count = results.iter().filter(|r| r.success).count();
    let consensus = success_count * 2 > total;

    let winning_output = results
        .iter()
        .find(|r| r.success)
        .map(|r| r.text().to_string())
        .unwrap_or_else(|| NO_SUCCESSFUL_RESULTS.to_string());

    let votes = results
        .iter()
        .enumerate()
        .map(|(index, r)| VoteEntry {
            index,
            template_id: r.template_id.clone(),
            success: r.success,
            confidence: if r.success { VOTE_CONFIDENCE } else { 0.0 },
        })
        .collect();

    AggregateResult::new(
        AggregateMode::Vote,
        success_count > 0,
        winning_output.clone(),
        results,
        AggregateDetails::Vote {
            consensus,
            winning_output,
            votes,
        },
    )
}

/// Stable descending sort of the successes by confidence
pub fn rank(results: Vec<TaskResult>) -> AggregateResult {
    let mut candidates: Vec<(usize, f64, &TaskResult)> = results
        .iter()
        .enumerate()
        .filter(|(_, r)| r.success)
        .map(|(index, r)| {
            let confidence = r
                .confidence
                .filter(|c| c.is_finite())
                .unwrap_or(DEFAULT_CONFIDENCE);
            (index, confidence, r)
        })
        .collect();

    // sort_by is stable, so equal confidences keep submission order
    candidates.sort_by(|a, b| b.1.total_cmp(&a.1));

    let ranking: Vec<RankedEntry> = candidates
        .into_iter()
        .enumerate()
        .map(|(pos, (index, confidence, r))| RankedEntry {
            rank: pos + 1,
            index,
            template_id: r.template_id.clone(),
            confidence,
            output: r.text().to_string(),
        })
        .collect();

    let top_result = ranking.first().map(|e| e.output.clone());
    let output = if ranking.is_empty() {
        NO_SUCCESSFUL_RESULTS.to_string()
    } else {
        ranking
            .iter()
            .map(|e| {
                format!(
                    "#{} {} (confidence {:.2})\n{}",
                    e.rank, e.template_id, e.confidence, e.output
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    };

    AggregateResult::new(
        AggregateMode::Rank,
        top_result.is_some(),
        output,
        results,
        AggregateDetails::Rank {
            ranking,
            top_result,
        },
    )
}

/// Per-result previews truncated to `preview_len` characters
pub fn diff(results: Vec<TaskResult>, preview_len: usize) -> AggregateResult {
    let previews: Vec<DiffPreview> = results
        .iter()
        .enumerate()
        .map(|(index, r)| DiffPreview {
            index,
            template_id: r.template_id.clone(),
            success: r.success,
            preview: crate::invoke::prefix(r.text(), preview_len),
        })
        .collect();

    let output = previews
        .iter()
        .map(|p| format!("--- {} ---\n{}", p.template_id, p.preview))
        .collect::<Vec<_>>()
        .join("\n\n");

    AggregateResult::new(
        AggregateMode::Diff,
        true,
        output,
        results,
        AggregateDetails::Diff {
            previews,
            agreements: Vec::new(),
            disagreements: Vec::new(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value as JsonValue;

    fn ok(template_id: &str, output: &str) -> TaskResult {
        TaskResult::success(template_id, "task", output, 10)
    }

    fn failed(template_id: &str, error: &str) -> TaskResult {
        TaskResult::failure(template_id, "task", error, 10)
    }

    struct BrokenSynthesizer;

    #[async_trait]
    impl Invoker for BrokenSynthesizer {
        fn name(&self) -> &str {
            "broken"
        }

        async fn invoke(
            &self,
            _template: &BehaviorTemplate,
            _task: &str,
            _input: Option<&str>,
            _context: Option<&JsonValue>,
        ) -> Result<String> {
            Err(Error::Invocation("backend down".to_string()))
        }
    }

    #[test]
    fn test_mode_parse_and_display() {
        for mode in AggregateMode::ALL {
            assert_eq!(mode.to_string().parse::<AggregateMode>().unwrap(), mode);
        }
        assert_eq!("VOTE".parse::<AggregateMode>().unwrap(), AggregateMode::Vote);
        assert!("majority".parse::<AggregateMode>().is_err());
        assert_eq!(AggregateMode::default(), AggregateMode::Synthesize);
    }

    #[test]
    fn test_concatenate_mixed() {
        let results = vec![
            ok("coder", "fn x()"),
            failed("reviewer", "timeout"),
            ok("writer", "docs"),
        ];
        let agg = concatenate(results);

        assert!(agg.success);
        assert_eq!(agg.success_count, 2);
        assert_eq!(agg.failure_count, 1);
        assert_eq!(agg.output, "coder: fn x()\n\nreviewer: timeout\n\nwriter: docs");
        for id in ["coder", "reviewer", "writer"] {
            assert!(agg.output.contains(id));
        }
    }

    #[test]
    fn test_concatenate_all_failed_still_succeeds() {
        let agg = concatenate(vec![failed("a", "x"), failed("b", "y")]);
        assert!(agg.success);
        assert_eq!(agg.failure_count, 2);
    }

    #[test]
    fn test_vote_majority() {
        let agg = vote(vec![ok("a", "first"), ok("b", "second"), failed("c", "no")]);
        match &agg.details {
            AggregateDetails::Vote {
                consensus,
                winning_output,
                votes,
            } => {
                assert!(*consensus);
                assert_eq!(winning_output, "first");
                assert_eq!(votes[0].confidence, VOTE_CONFIDENCE);
                assert_eq!(votes[2].confidence, 0.0);
            }
            other => panic!("unexpected details: {other:?}"),
        }
        assert!(agg.success);
    }

    #[test]
    fn test_vote_minority() {
        let agg = vote(vec![ok("a", "only"), failed("b", "x"), failed("c", "y")]);
        match &agg.details {
            AggregateDetails::Vote { consensus, .. } => assert!(!*consensus),
            other => panic!("unexpected details: {other:?}"),
        }
        assert!(agg.success);
    }

    #[test]
    fn test_vote_tie_is_not_consensus() {
        let agg = vote(vec![ok("a", "x"), failed("b", "y")]);
        assert!(matches!(
            agg.details,
            AggregateDetails::Vote { consensus: false, .. }
        ));
    }

    #[test]
    fn test_vote_ignores_content() {
        // Disagreeing outputs still count as agreement on success
        let agg = vote(vec![ok("a", "yes"), ok("b", "no")]);
        assert!(matches!(
            agg.details,
            AggregateDetails::Vote { consensus: true, .. }
        ));
    }

    #[test]
    fn test_vote_no_successes() {
        let agg = vote(vec![failed("a", "x")]);
        assert!(!agg.success);
        assert_eq!(agg.output, NO_SUCCESSFUL_RESULTS);
    }

    #[test]
    fn test_rank_by_confidence() {
        let results = vec![
            ok("a", "low").with_confidence(Some(0.3)),
            ok("b", "high").with_confidence(Some(0.9)),
            ok("c", "mid").with_confidence(Some(0.5)),
        ];
        let agg = rank(results);

        match &agg.details {
            AggregateDetails::Rank {
                ranking,
                top_result,
            } => {
                let order: Vec<usize> = ranking.iter().map(|e| e.index).collect();
                assert_eq!(order, vec![1, 2, 0]);
                assert_eq!(ranking[0].rank, 1);
                assert_eq!(top_result.as_deref(), Some("high"));
            }
            other => panic!("unexpected details: {other:?}"),
        }
        assert!(agg.success);
    }

    #[test]
    fn test_rank_ties_keep_order_and_skip_failures() {
        let results = vec![
            ok("a", "one"),
            failed("b", "x"),
            ok("c", "two"),
            ok("d", "three").with_confidence(Some(0.5)),
        ];
        let agg = rank(results);

        match &agg.details {
            AggregateDetails::Rank { ranking, .. } => {
                let order: Vec<usize> = ranking.iter().map(|e| e.index).collect();
                assert_eq!(order, vec![0, 2, 3]);
            }
            other => panic!("unexpected details: {other:?}"),
        }
    }

    #[test]
    fn test_rank_non_finite_confidence_uses_default() {
        let results = vec![
            ok("coder", "low").with_confidence(Some(0.3)),
            ok("writer", "unknown").with_confidence(Some(f64::NAN)),
            ok("analyst", "high").with_confidence(Some(0.9)),
        ];
        let agg = rank(results);

        match &agg.details {
            AggregateDetails::Rank { ranking, .. } => {
                let order: Vec<usize> = ranking.iter().map(|e| e.index).collect();
                assert_eq!(order, vec![2, 1, 0]);
                assert_eq!(ranking[1].confidence, DEFAULT_CONFIDENCE);

                // Ranked confidences must read back from JSON
                let json = serde_json::to_string(ranking).unwrap();
                let back: Vec<RankedEntry> = serde_json::from_str(&json).unwrap();
                assert_eq!(&back, ranking);
            }
            other => panic!("unexpected details: {other:?}"),
        }
    }

    #[test]
    fn test_rank_no_successes() {
        let agg = rank(vec![failed("a", "x"), failed("b", "y")]);
        assert!(!agg.success);
        assert!(matches!(
            agg.details,
            AggregateDetails::Rank { top_result: None, .. }
        ));
    }

    #[test]
    fn test_diff_previews() {
        let long = "y".repeat(50);
        let agg = diff(vec![ok("a", &long), failed("b", "bad")], 10);

        assert!(agg.success);
        match &agg.details {
            AggregateDetails::Diff {
                previews,
                agreements,
                disagreements,
            } => {
                assert_eq!(previews[0].preview, format!("{}...", "y".repeat(10)));
                assert_eq!(previews[1].preview, "bad");
                assert!(agreements.is_empty());
                assert!(disagreements.is_empty());
            }
            other => panic!("unexpected details: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_synthesize_offline() {
        let aggregator = ResultAggregator::offline();
        let agg = aggregator
            .combine(
                vec![
                    ok("coder", "code here"),
                    failed("reviewer", "timed out"),
                    ok("writer", "prose"),
                ],
                AggregateMode::Synthesize,
            )
            .await
            .unwrap();

        assert!(agg.success);
        assert_eq!(agg.success_count, 2);
        assert_eq!(agg.failure_count, 1);
        assert!(agg.output.contains("Synthesis of 2 successful results"));
        assert!(agg.output.contains("[coder] (10ms): code here"));
        assert!(agg.output.contains("Failed inputs:\n- reviewer: timed out"));
        match &agg.details {
            AggregateDetails::Synthesize {
                synthesized_by,
                failed,
            } => {
                assert_eq!(synthesized_by.as_deref(), Some("offline"));
                assert_eq!(failed.len(), 1);
                assert_eq!(failed[0].index, 1);
            }
            other => panic!("unexpected details: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_synthesize_no_successes() {
        let aggregator = ResultAggregator::offline();
        let agg = aggregator
            .combine(vec![failed("a", "x"), failed("b", "y")], AggregateMode::Synthesize)
            .await
            .unwrap();

        assert!(!agg.success);
        assert!(agg.output.starts_with("No successful inputs"));
        assert!(agg.output.contains("- a: x"));
    }

    #[tokio::test]
    async fn test_synthesize_backend_failure_is_error() {
        let aggregator = ResultAggregator::from_registry(
            Arc::new(BrokenSynthesizer),
            &TemplateRegistry::builtin(),
        )
        .unwrap();

        let err = aggregator
            .combine(vec![ok("a", "x"), ok("b", "y")], AggregateMode::Synthesize)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Aggregation(msg) if msg.contains("backend down")));
    }

    #[tokio::test]
    async fn test_counts_always_sum() {
        let aggregator = ResultAggregator::offline();
        let results = vec![ok("a", "1"), failed("b", "2"), ok("c", "3"), failed("d", "4")];

        for mode in AggregateMode::ALL {
            let agg = aggregator.combine(results.clone(), mode).await.unwrap();
            assert_eq!(agg.success_count + agg.failure_count, agg.raw_results.len());
            assert_eq!(agg.raw_results, results);
            assert_eq!(agg.mode, mode);
        }
    }
}
