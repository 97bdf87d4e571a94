//! Stop-request scenarios.
//!
//! A first stop request lets the current test case finish its teardown and
//! skips the rest of the matrix. A second one aborts the teardown.

#[cfg(test)]
mod tests {
    use crate::assertions::{assert_counts_consistent, assert_no_leftovers};
    use crate::harness::{CaseLog, Scenario};
    use perf_core::api::mock::MockTarget;
    use perf_core::error::{ConditionError, FlowError};
    use perf_core::{Escalation, Shutdown};
    use perf_types::{JobCount, ResourceKind, Verb};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::{sleep, Instant};

    const DEPLOYMENT: MockTarget = MockTarget::Resource(ResourceKind::Deployment);

    #[tokio::test(start_paused = true)]
    async fn one_stop_during_run_tears_down_once() {
        let scenario = Scenario::new(&[0, 20], &[10, 50], 3, JobCount::Unbounded)
            .with_drain(Duration::from_secs(30));
        scenario.cluster.set_op_delay(Duration::from_millis(10));
        let log = CaseLog::default();
        let shutdown = Shutdown::new();

        let creates_at_stop = Arc::new(AtomicUsize::new(0));
        let trigger = shutdown.clone();
        let cluster = scenario.cluster.clone();
        let seen = creates_at_stop.clone();
        tokio::spawn(async move {
            // The condition is injected on the first poll, 2s in.
            sleep(Duration::from_secs(5)).await;
            assert_eq!(trigger.escalate(), Escalation::Graceful);
            seen.store(cluster.call_count(DEPLOYMENT, Verb::Create), Ordering::SeqCst);
        });

        let report = scenario.flow(&log).run(&shutdown).await.unwrap();

        assert!(report.interrupted);
        assert_eq!(report.cases.len(), 1);
        assert_eq!(log.cases().len(), 1);
        // No cycle started after the stop request.
        let creates = scenario.cluster.call_count(DEPLOYMENT, Verb::Create);
        assert!(creates > 0);
        assert_eq!(creates, creates_at_stop.load(Ordering::SeqCst));
        // Exactly one teardown.
        assert_eq!(scenario.cluster.call_count(MockTarget::Condition, Verb::Create), 1);
        assert_eq!(scenario.cluster.call_count(MockTarget::Condition, Verb::Delete), 1);
        assert_eq!(scenario.cluster.condition_count(), 0);
        assert_no_leftovers(&scenario.leftovers()).unwrap();
        assert_counts_consistent(&report.cases[0].snapshot).unwrap();
        assert!(!shutdown.process_token().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_the_first_case_runs_nothing() {
        let scenario = Scenario::new(&[0], &[10], 2, JobCount::limited(5).unwrap());
        let log = CaseLog::default();
        let shutdown = Shutdown::new();
        shutdown.escalate();

        let report = scenario.flow(&log).run(&shutdown).await.unwrap();

        assert!(report.interrupted);
        assert!(report.cases.is_empty());
        assert!(scenario.cluster.calls().is_empty());
        assert!(log.finished().unwrap().interrupted);
    }

    #[tokio::test(start_paused = true)]
    async fn second_stop_aborts_teardown_without_panic() {
        let drain = Duration::from_secs(60);
        let scenario = Scenario::new(&[0], &[10], 2, JobCount::Unbounded).with_drain(drain);
        scenario.cluster.set_op_delay(Duration::from_millis(10));
        let log = CaseLog::default();
        let shutdown = Shutdown::new();

        let trigger = shutdown.clone();
        let escalations = tokio::spawn(async move {
            sleep(Duration::from_secs(3)).await;
            let first = trigger.escalate();
            // Well inside the drain.
            sleep(Duration::from_secs(10)).await;
            let second = trigger.escalate();
            (first, second)
        });

        let started = Instant::now();
        let err = scenario.flow(&log).run(&shutdown).await.unwrap_err();

        assert_eq!(
            escalations.await.unwrap(),
            (Escalation::Graceful, Escalation::Forced)
        );
        assert!(shutdown.process_token().is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(3) + drain);
        assert!(matches!(
            err,
            FlowError::ConditionDelete {
                source: ConditionError::Cancelled { .. },
                ..
            }
        ));
        assert!(log.finished().is_none());
    }
}
