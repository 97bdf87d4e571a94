//! Assertion helpers for chaos scenarios.
//!
//! These are pure functions that check the outcome of a test flow. They take
//! collected state as input and return pass/fail with details.

use perf_core::Snapshot;
use perf_types::{TestCaseId, Verb};
use std::collections::BTreeMap;

/// Result of an assertion check.
#[derive(Debug, Clone)]
pub struct AssertionResult {
    /// Whether the assertion passed
    pub passed: bool,
    /// Description of what was checked
    pub description: String,
    /// Details on failure
    pub failure_details: Option<String>,
}

impl AssertionResult {
    /// Create a passing result.
    pub fn pass(description: &str) -> Self {
        Self {
            passed: true,
            description: description.into(),
            failure_details: None,
        }
    }

    /// Create a failing result.
    pub fn fail(description: &str, details: &str) -> Self {
        Self {
            passed: false,
            description: description.into(),
            failure_details: Some(details.into()),
        }
    }

    /// Panic with the failure details if the check failed.
    pub fn unwrap(self) {
        if !self.passed {
            panic!(
                "{}: {}",
                self.description,
                self.failure_details.unwrap_or_default()
            );
        }
    }
}

/// Assert that the counters of a snapshot are internally consistent.
///
/// Every verb must have `total >= successful`, and the `all` bucket must
/// equal the sum of the per-verb buckets.
pub fn assert_counts_consistent(snapshot: &Snapshot) -> AssertionResult {
    let description = format!("Counter consistency for {}", snapshot.test_case);

    for stats in &snapshot.verbs {
        if stats.successful > stats.total {
            return AssertionResult::fail(
                &description,
                &format!(
                    "{} has {} successful out of {} total",
                    stats.verb, stats.successful, stats.total
                ),
            );
        }
    }

    let Some(all) = snapshot.all() else {
        return AssertionResult::fail(&description, "snapshot has no `all` bucket");
    };
    let (total, successful) = snapshot
        .verbs
        .iter()
        .filter(|stats| stats.verb != Verb::All)
        .fold((0, 0), |(t, s), stats| (t + stats.total, s + stats.successful));
    if all.total != total || all.successful != successful {
        return AssertionResult::fail(
            &description,
            &format!(
                "`all` is {}/{} but verbs sum to {}/{}",
                all.successful, all.total, successful, total
            ),
        );
    }

    AssertionResult::pass(&description)
}

/// Assert that no worker has leftover objects.
///
/// # Arguments
/// * `remaining` - Objects still matching each worker's selector
pub fn assert_no_leftovers(remaining: &BTreeMap<String, usize>) -> AssertionResult {
    let dirty: Vec<String> = remaining
        .iter()
        .filter(|(_, count)| **count > 0)
        .map(|(selector, count)| format!("{selector} ({count})"))
        .collect();

    if dirty.is_empty() {
        AssertionResult::pass(&format!("No leftovers for {} workers", remaining.len()))
    } else {
        AssertionResult::fail(
            "No leftovers after cleanup",
            &format!("Objects remain for: {}", dirty.join(", ")),
        )
    }
}

/// Assert that test cases ran in exactly the expected order.
pub fn assert_case_order(actual: &[TestCaseId], expected: &[TestCaseId]) -> AssertionResult {
    if actual == expected {
        return AssertionResult::pass(&format!("{} test cases in order", expected.len()));
    }
    let render = |cases: &[TestCaseId]| {
        cases
            .iter()
            .map(|c| format!("({c})"))
            .collect::<Vec<_>>()
            .join(" ")
    };
    AssertionResult::fail(
        "Test case order",
        &format!("expected {} but ran {}", render(expected), render(actual)),
    )
}

/// Assert that one verb has the same total in every snapshot.
pub fn assert_verb_total(snapshots: &[Snapshot], verb: Verb, expected: u64) -> AssertionResult {
    for snapshot in snapshots {
        let total = snapshot.verb(verb).map(|s| s.total).unwrap_or(0);
        if total != expected {
            return AssertionResult::fail(
                &format!("{verb} total per test case"),
                &format!(
                    "{} has {} {verb} requests, expected {}",
                    snapshot.test_case, total, expected
                ),
            );
        }
    }
    AssertionResult::pass(&format!(
        "{} test cases have {expected} {verb} requests each",
        snapshots.len()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use perf_core::{Aggregator, MetricsSink, OperationRecord};
    use perf_types::{Latency, Percent};
    use std::time::Duration;

    fn case(ms: u64, percent: u8) -> TestCaseId {
        TestCaseId::new(Latency::from_millis(ms), Percent::new(percent).unwrap())
    }

    fn snapshot(records: &[(Verb, bool)]) -> Snapshot {
        let sink = Aggregator::new();
        for &(verb, success) in records {
            sink.record(OperationRecord {
                verb,
                success,
                latency: Duration::from_millis(1),
                test_case: case(0, 10),
            });
        }
        sink.snapshot(&case(0, 10))
    }

    #[test]
    fn consistent_counts_pass() {
        let snapshot = snapshot(&[(Verb::Create, true), (Verb::Get, false), (Verb::List, true)]);
        assert!(assert_counts_consistent(&snapshot).passed);
    }

    #[test]
    fn mismatched_all_bucket_fails() {
        let mut snapshot = snapshot(&[(Verb::Create, true)]);
        snapshot
            .verbs
            .iter_mut()
            .find(|s| s.verb == Verb::All)
            .unwrap()
            .total = 5;
        let result = assert_counts_consistent(&snapshot);
        assert!(!result.passed);
        assert!(result.failure_details.unwrap().contains("verbs sum to 1/1"));
    }

    #[test]
    fn more_successes_than_requests_fails() {
        let mut snapshot = snapshot(&[(Verb::Create, true)]);
        snapshot.verbs[0].successful = 2;
        assert!(!assert_counts_consistent(&snapshot).passed);
    }

    #[test]
    fn leftovers_are_named() {
        let remaining = BTreeMap::from([
            ("app=nginx,workerId=0".to_string(), 0),
            ("app=nginx,workerId=1".to_string(), 2),
        ]);
        let result = assert_no_leftovers(&remaining);
        assert!(!result.passed);
        assert!(result
            .failure_details
            .unwrap()
            .contains("app=nginx,workerId=1 (2)"));

        let clean = BTreeMap::from([("app=nginx,workerId=0".to_string(), 0)]);
        assert!(assert_no_leftovers(&clean).passed);
    }

    #[test]
    fn case_order_reports_both_sequences() {
        let expected = [case(0, 10), case(20, 10)];
        assert!(assert_case_order(&expected, &expected).passed);

        let result = assert_case_order(&[case(20, 10), case(0, 10)], &expected);
        assert!(!result.passed);
        assert!(result.failure_details.unwrap().starts_with("expected (latency=0ms"));
    }

    #[test]
    fn verb_total_checks_every_snapshot() {
        let snapshots = vec![
            snapshot(&[(Verb::Create, true), (Verb::Create, false)]),
            snapshot(&[(Verb::Create, true)]),
        ];
        assert!(!assert_verb_total(&snapshots, Verb::Create, 2).passed);
        assert!(assert_verb_total(&snapshots[..1], Verb::Create, 2).passed);
    }

    #[test]
    #[should_panic(expected = "Test case order")]
    fn failed_result_panics_on_unwrap() {
        assert_case_order(&[], &[case(0, 10)]).unwrap();
    }
}
