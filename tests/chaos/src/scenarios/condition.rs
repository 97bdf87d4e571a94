//! Condition lifecycle scenarios.
//!
//! Faults in creating, injecting and removing the condition object. Any of
//! them ends the matrix, but never before the cluster is cleaned up.

#[cfg(test)]
mod tests {
    use crate::assertions::assert_no_leftovers;
    use crate::harness::{CaseLog, Scenario};
    use perf_core::api::mock::MockTarget;
    use perf_core::error::{ConditionError, FlowError};
    use perf_core::Shutdown;
    use perf_types::{JobCount, Latency, Percent, ResourceKind, TestCaseId, Verb};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn case(ms: u64, percent: u8) -> TestCaseId {
        TestCaseId::new(Latency::from_millis(ms), Percent::new(percent).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn creating_twice_yields_one_condition() {
        let scenario = Scenario::new(&[20], &[10], 1, JobCount::limited(1).unwrap());
        let agent = scenario.agent();
        let spec = agent.instantiate(case(20, 10));
        let cancel = CancellationToken::new();

        agent.create(&cancel, &spec).await.unwrap();
        agent.create(&cancel, &spec).await.unwrap();

        assert_eq!(scenario.cluster.condition_count(), 1);
        assert_eq!(scenario.cluster.call_count(MockTarget::Condition, Verb::Create), 2);
        assert_eq!(spec.manifest["spec"]["delay"], "20ms");
        assert_eq!(spec.manifest["spec"]["percent"], 10);
    }

    #[tokio::test(start_paused = true)]
    async fn create_lost_in_flight_is_not_duplicated() {
        let scenario = Scenario::new(&[0], &[10], 1, JobCount::limited(1).unwrap());
        scenario.cluster.ambiguous_condition_create();
        let agent = scenario.agent();
        let spec = agent.instantiate(case(0, 10));

        agent.create(&CancellationToken::new(), &spec).await.unwrap();

        // The retry hit the stored object and counted it as created.
        assert_eq!(scenario.cluster.call_count(MockTarget::Condition, Verb::Create), 2);
        assert_eq!(scenario.cluster.condition_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_api_is_retried() {
        let scenario = Scenario::new(&[0], &[10], 2, JobCount::limited(2).unwrap());
        scenario.cluster.fail_condition_creates(3);
        let log = CaseLog::default();

        scenario.flow(&log).run(&Shutdown::new()).await.unwrap();

        assert_eq!(scenario.cluster.call_count(MockTarget::Condition, Verb::Create), 4);
        assert_eq!(log.cases(), vec![case(0, 10)]);
    }

    #[tokio::test(start_paused = true)]
    async fn never_injected_condition_stops_before_run() {
        let scenario = Scenario::new(&[0, 20], &[10], 2, JobCount::limited(3).unwrap())
            .with_polls(Duration::from_secs(2), Duration::from_secs(20));
        scenario.cluster.condition_never_ready();
        let log = CaseLog::default();

        let err = scenario.flow(&log).run(&Shutdown::new()).await.unwrap_err();

        match err {
            FlowError::ConditionCreate { test_case, source } => {
                assert_eq!(test_case, case(0, 10));
                let timeout = match source {
                    ConditionError::ReadyTimeout { timeout, .. } => timeout,
                    other => panic!("unexpected condition error: {other}"),
                };
                assert_eq!(timeout, Duration::from_secs(20));
            }
            other => panic!("unexpected error: {other}"),
        }
        let deployment = MockTarget::Resource(ResourceKind::Deployment);
        assert_eq!(scenario.cluster.call_count(deployment, Verb::Create), 0);
        assert!(log.cases().is_empty());
        assert_eq!(scenario.cluster.condition_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_condition_is_not_retried() {
        let scenario = Scenario::new(&[0], &[10], 1, JobCount::limited(1).unwrap());
        scenario.cluster.reject_conditions();
        let log = CaseLog::default();

        let err = scenario.flow(&log).run(&Shutdown::new()).await.unwrap_err();

        assert!(matches!(
            err,
            FlowError::ConditionCreate {
                source: ConditionError::Create { .. },
                ..
            }
        ));
        assert_eq!(scenario.cluster.call_count(MockTarget::Condition, Verb::Create), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn lingering_condition_stops_the_matrix_after_cleanup() {
        let scenario = Scenario::new(&[0, 20], &[10], 2, JobCount::limited(2).unwrap())
            .with_polls(Duration::from_secs(1), Duration::from_secs(5));
        scenario.cluster.condition_never_gone();
        let log = CaseLog::default();

        let err = scenario.flow(&log).run(&Shutdown::new()).await.unwrap_err();

        assert!(matches!(
            err,
            FlowError::ConditionDelete {
                source: ConditionError::GoneTimeout { .. },
                ..
            }
        ));
        // The first case ran and was reported; the second never started.
        assert_eq!(log.cases(), vec![case(0, 10)]);
        assert_eq!(scenario.cluster.call_count(MockTarget::Condition, Verb::Create), 1);
        assert_no_leftovers(&scenario.leftovers()).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn slow_delete_is_waited_out() {
        let scenario = Scenario::new(&[0, 20], &[10], 1, JobCount::limited(1).unwrap());
        scenario.cluster.condition_delete_lingers(3);
        let log = CaseLog::default();

        scenario.flow(&log).run(&Shutdown::new()).await.unwrap();

        assert_eq!(log.cases().len(), 2);
        assert_eq!(scenario.cluster.condition_count(), 0);
    }
}
