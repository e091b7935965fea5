use indexmap::IndexMap;
use strum::IntoEnumIterator;

use crate::classification::taxonomy::{Category, ProviderStage};

use super::types::{ErrorStage, MessageReport, RunError, RunRecord, RunSummary};

/// Reduce everything a run produced into its summary. Every fetched message
/// yields exactly one row; messages that could not be fetched appear in
/// `fetch_failures`.
pub fn aggregate(record: &RunRecord) -> RunSummary {
    let mut errors = Vec::new();

    errors.extend(record.fetch_failures.iter().map(|f| RunError {
        message_id: Some(f.message_id.clone()),
        stage: ErrorStage::Fetch,
        error: f.error.clone(),
    }));
    if let Some(error) = &record.listing_error {
        errors.push(RunError {
            message_id: None,
            stage: ErrorStage::Fetch,
            error: format!("Listing stopped early: {error}"),
        });
    }

    errors.extend(
        record
            .classified
            .iter()
            .filter(|c| c.trace.is_exhausted())
            .map(|c| RunError {
                message_id: Some(c.message.id.clone()),
                stage: ErrorStage::Classification,
                error: c.trace.result.reasoning.clone(),
            }),
    );

    if let Some(error) = &record.labeling_error {
        errors.push(RunError {
            message_id: None,
            stage: ErrorStage::LabelMapping,
            error: error.clone(),
        });
    }
    errors.extend(record.label_failures.iter().map(|f| RunError {
        message_id: None,
        stage: ErrorStage::LabelMapping,
        error: format!("{}: {}", f.label_name, f.error),
    }));

    for (stage, summary) in [
        (ErrorStage::RemoveLabels, &record.removals),
        (ErrorStage::ApplyLabels, &record.applications),
    ] {
        errors.extend(summary.errors().into_iter().map(|o| RunError {
            message_id: Some(o.message_id.clone()),
            stage,
            error: o.error.clone().unwrap_or_default(),
        }));
    }

    let messages = record
        .classified
        .iter()
        .map(|c| {
            let result = &c.trace.result;
            let applied = record.applications.outcome_for(&c.message.id);
            let removal_error = record
                .removals
                .outcome_for(&c.message.id)
                .and_then(|o| o.error.clone());
            MessageReport {
                message_id: c.message.id.clone(),
                subject: c.message.subject.clone(),
                from: c.message.from.clone(),
                category: result.category,
                confidence: result.confidence,
                sentiment: result.sentiment,
                priority: result.priority,
                needs_follow_up: result.needs_follow_up,
                provider: result.provider,
                reasoning: result.reasoning.clone(),
                applied_labels: applied
                    .filter(|o| o.success)
                    .map(|o| o.applied_labels.clone())
                    .unwrap_or_default(),
                error: applied.and_then(|o| o.error.clone()).or(removal_error),
            }
        })
        .collect::<Vec<_>>();

    let category_breakdown = Category::iter()
        .map(|category| {
            let count = messages.iter().filter(|m| m.category == category).count();
            (category, count)
        })
        .filter(|(_, count)| *count > 0)
        .collect::<IndexMap<_, _>>();

    let provider_breakdown = [
        ProviderStage::Primary,
        ProviderStage::Secondary,
        ProviderStage::RuleBased,
        ProviderStage::CatchAll,
    ]
    .into_iter()
    .map(|stage| {
        let count = messages.iter().filter(|m| m.provider == stage).count();
        (stage, count)
    })
    .filter(|(_, count)| *count > 0)
    .collect::<IndexMap<_, _>>();

    RunSummary {
        run_id: record.run_id.clone(),
        dry_run: record.dry_run,
        total_processed: messages.len(),
        total_classified: messages
            .iter()
            .filter(|m| !m.category.is_catch_all())
            .count(),
        labels_applied: messages.iter().map(|m| m.applied_labels.len()).sum(),
        successful: record.applications.successful(),
        failed: record.applications.failed(),
        errors,
        category_breakdown,
        provider_breakdown,
        fetch_failures: record.fetch_failures.clone(),
        verification_warnings: record
            .removals
            .verification_warnings
            .iter()
            .chain(&record.applications.verification_warnings)
            .cloned()
            .collect(),
        duration_ms: record.duration_ms,
        messages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classification::taxonomy::ClassificationResult;
    use crate::classification::orchestrator::StageFailure;
    use crate::classification::ClassificationTrace;
    use crate::pipeline::types::{BatchOutcome, BulkSummary, ClassifiedMessage, FetchFailure};
    use crate::testing::common::message_with;

    fn classified(id: &str, category: Category, provider: ProviderStage) -> ClassifiedMessage {
        let mut result = ClassificationResult::catch_all("");
        result.category = category;
        result.provider = provider;
        result.confidence = 0.8;
        ClassifiedMessage {
            message: message_with(id, "Subject", "a@b.com", ""),
            trace: ClassificationTrace {
                result,
                failures: Vec::new(),
            },
        }
    }

    #[test]
    fn test_empty_run() {
        let summary = aggregate(&RunRecord::default());
        assert_eq!(summary.total_processed, 0);
        assert!(summary.category_breakdown.is_empty());
        assert!(summary.errors.is_empty());
    }

    #[test]
    fn test_counts_and_breakdowns() {
        let exhausted = ClassifiedMessage {
            message: message_with("m4", "", "", ""),
            trace: ClassificationTrace {
                result: ClassificationResult::catch_all("All stages failed (primary: timeout)"),
                failures: vec![StageFailure {
                    stage: ProviderStage::Primary,
                    error: "timeout".to_string(),
                }],
            },
        };
        let record = RunRecord {
            run_id: "run-1".to_string(),
            duration_ms: 42,
            classified: vec![
                classified("m1", Category::Finance, ProviderStage::Primary),
                classified("m2", Category::Finance, ProviderStage::RuleBased),
                classified("m3", Category::Work, ProviderStage::Secondary),
                exhausted,
            ],
            fetch_failures: vec![FetchFailure {
                message_id: "m5".to_string(),
                error: "500".to_string(),
            }],
            applications: BulkSummary {
                outcomes: vec![
                    BatchOutcome::succeeded("m1", vec!["Label_1".to_string()], 1),
                    BatchOutcome::failed("m2", "Upstream error 503", 3),
                    BatchOutcome::succeeded("m3", vec!["Label_2".to_string()], 2),
                ],
                verification_warnings: Vec::new(),
            },
            ..Default::default()
        };

        let summary = aggregate(&record);
        assert_eq!(summary.total_processed, 4);
        assert_eq!(summary.total_classified, 3);
        assert_eq!(summary.labels_applied, 2);
        assert_eq!(summary.successful, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.duration_ms, 42);
        assert_eq!(summary.category_breakdown.values().sum::<usize>(), 4);
        assert_eq!(summary.category_breakdown[&Category::Finance], 2);
        assert_eq!(summary.provider_breakdown[&ProviderStage::CatchAll], 1);

        let stages = summary.errors.iter().map(|e| e.stage).collect::<Vec<_>>();
        assert_eq!(
            stages,
            vec![
                ErrorStage::Fetch,
                ErrorStage::Classification,
                ErrorStage::ApplyLabels
            ]
        );

        let row = summary.messages.iter().find(|m| m.message_id == "m2").unwrap();
        assert!(row.applied_labels.is_empty());
        assert_eq!(row.error.as_deref(), Some("Upstream error 503"));
    }

    #[test]
    fn test_serializes_camel_case() {
        let record = RunRecord {
            classified: vec![classified("m1", Category::Social, ProviderStage::RuleBased)],
            ..Default::default()
        };
        let json = serde_json::to_value(aggregate(&record)).unwrap();

        assert_eq!(json["totalProcessed"], 1);
        assert_eq!(json["categoryBreakdown"]["Social"], 1);
        assert_eq!(json["providerBreakdown"]["rule_based"], 1);
        assert_eq!(json["messages"][0]["messageId"], "m1");
    }
}
