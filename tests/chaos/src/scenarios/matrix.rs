//! Matrix scenarios.
//!
//! A complete run over a small matrix: order of test cases, per-case
//! counters, reports and the state of the cluster afterwards.

#[cfg(test)]
mod tests {
    use crate::assertions::{
        assert_case_order, assert_counts_consistent, assert_no_leftovers, assert_verb_total,
    };
    use crate::harness::{CaseLog, Scenario};
    use perf_core::report::CsvExporter;
    use perf_core::Shutdown;
    use perf_types::{JobCount, Latency, Percent, TestCaseId, Verb};
    use std::time::Duration;

    fn case(ms: u64, percent: u8) -> TestCaseId {
        TestCaseId::new(Latency::from_millis(ms), Percent::new(percent).unwrap())
    }

    /// Two percents × two latencies, two workers × three jobs.
    #[tokio::test(start_paused = true)]
    async fn small_matrix_runs_in_order() {
        let scenario = Scenario::new(&[20, 0], &[50, 10], 2, JobCount::limited(3).unwrap())
            .with_drain(Duration::from_secs(10));
        let log = CaseLog::default();

        let report = scenario.flow(&log).run(&Shutdown::new()).await.unwrap();

        assert!(!report.interrupted);
        assert_case_order(
            &log.cases(),
            &[case(0, 10), case(20, 10), case(0, 50), case(20, 50)],
        )
        .unwrap();

        let snapshots = scenario.snapshots();
        assert_verb_total(&snapshots, Verb::Create, 6).unwrap();
        for verb in Verb::OPERATIONS {
            assert_verb_total(&snapshots, verb, 6).unwrap();
        }
        for snapshot in &snapshots {
            assert_counts_consistent(snapshot).unwrap();
            assert_eq!(snapshot.all().unwrap().success_rate(), Some(1.0));
        }
        assert_no_leftovers(&scenario.leftovers()).unwrap();
        assert_eq!(scenario.cluster.condition_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn counters_stay_consistent_under_failures() {
        let scenario = Scenario::new(&[0, 100], &[30], 3, JobCount::limited(4).unwrap());
        scenario.cluster.fail_resource_creates(5);
        scenario.cluster.fail_verb(Verb::Patch);
        let log = CaseLog::default();

        scenario.flow(&log).run(&Shutdown::new()).await.unwrap();

        let snapshots = scenario.snapshots();
        for snapshot in &snapshots {
            assert_counts_consistent(snapshot).unwrap();
        }
        let creates: u64 = snapshots
            .iter()
            .map(|s| s.verb(Verb::Create).unwrap().failed())
            .sum();
        assert_eq!(creates, 5);
        assert_eq!(snapshots[0].verb(Verb::Patch).unwrap().successful, 0);
        // Lists run every cycle, owned or not.
        assert_verb_total(&snapshots, Verb::List, 12).unwrap();
        assert_no_leftovers(&scenario.leftovers()).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn csv_report_covers_the_matrix() {
        let dir = tempfile::tempdir().unwrap();
        let scenario = Scenario::new(&[0, 20], &[10, 50], 1, JobCount::limited(2).unwrap());
        let log = CaseLog::default();

        let report = scenario
            .flow(&log)
            .with_reporter(CsvExporter::new(dir.path()))
            .run(&Shutdown::new())
            .await
            .unwrap();

        let path = dir.path().join(CsvExporter::file_name(&report));
        let csv = std::fs::read_to_string(path).unwrap();
        assert_eq!(csv.matches("% sample").count(), 2);
        assert_eq!(csv.matches("Quantile,Latency(0),Latency(20)").count(), 2);
        assert_eq!(csv.matches("Success Rate,100.00%,100.00%").count(), 2);
        assert_eq!(log.finished().unwrap().cases.len(), 4);
    }
}
