//! Worker scenarios.
//!
//! CRUD faults inside a cycle, and leftovers of interrupted earlier runs.

#[cfg(test)]
mod tests {
    use crate::assertions::{assert_counts_consistent, assert_no_leftovers};
    use crate::harness::{CaseLog, Scenario};
    use perf_core::api::mock::MockTarget;
    use perf_core::{MetricsSink, Shutdown};
    use perf_types::{JobCount, Latency, Percent, ResourceKind, TestCaseId, Verb, WorkerId};
    use tokio_util::sync::CancellationToken;

    const DEPLOYMENT: MockTarget = MockTarget::Resource(ResourceKind::Deployment);

    fn case(ms: u64, percent: u8) -> TestCaseId {
        TestCaseId::new(Latency::from_millis(ms), Percent::new(percent).unwrap())
    }

    #[tokio::test]
    async fn failed_create_records_one_failure_and_nothing_else() {
        let scenario = Scenario::new(&[0], &[10], 1, JobCount::limited(1).unwrap());
        scenario.cluster.fail_resource_creates(1);
        let mut worker = scenario.worker(0);

        worker.run_cycle(0, case(0, 10)).await;

        let snapshot = scenario.sink.snapshot(&case(0, 10));
        let create = snapshot.verb(Verb::Create).unwrap();
        assert_eq!((create.total, create.failed()), (1, 1));
        for verb in [Verb::Get, Verb::Update, Verb::Patch, Verb::Delete] {
            assert_eq!(scenario.cluster.call_count(DEPLOYMENT, verb), 0, "{verb}");
            assert_eq!(snapshot.verb(verb).unwrap().total, 0, "{verb}");
        }
        assert_eq!(snapshot.verb(Verb::List).unwrap().successful, 1);
        assert_eq!(snapshot.all().unwrap().failed(), 1);
        assert_counts_consistent(&snapshot).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn leftovers_of_an_earlier_run_are_swept_first() {
        let scenario = Scenario::new(&[0], &[10], 3, JobCount::limited(2).unwrap());
        scenario.cluster.spawn_pods();
        // An interrupted run left a deployment and its pod per worker.
        for id in 0..3 {
            let worker = scenario.worker(id);
            let deployment = scenario
                .workload
                .deployment(&format!("nginx-{id}-7"), worker.labels());
            perf_core::api::ResourceApi::create(&scenario.cluster, &deployment)
                .await
                .unwrap();
        }
        assert_eq!(scenario.cluster.resource_count(), 6);
        let log = CaseLog::default();

        scenario.flow(&log).run(&Shutdown::new()).await.unwrap();

        assert_no_leftovers(&scenario.leftovers()).unwrap();
        assert_eq!(scenario.cluster.resource_count(), 0);
        let snapshot = scenario.sink.snapshot(&case(0, 10));
        assert_eq!(snapshot.verb(Verb::Create).unwrap().successful, 6);
        assert_eq!(snapshot.verb(Verb::Delete).unwrap().successful, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn colliding_name_is_adopted_and_removed() {
        let scenario = Scenario::new(&[0], &[10], 1, JobCount::limited(1).unwrap());
        let mut worker = scenario.worker(0);
        let leftover = scenario
            .workload
            .deployment(&worker.resource_name(0), worker.labels());
        scenario.cluster.insert_resource(leftover);

        let completed = worker
            .run(JobCount::limited(1).unwrap(), case(0, 10), &CancellationToken::new())
            .await;

        assert_eq!(completed, 1);
        let snapshot = scenario.sink.snapshot(&case(0, 10));
        assert_eq!(snapshot.verb(Verb::Create).unwrap().total, 0);
        assert_eq!(snapshot.verb(Verb::Delete).unwrap().successful, 1);
        assert_eq!(scenario.cluster.resource_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_deletes_are_left_for_the_sweep() {
        let scenario = Scenario::new(&[0], &[10], 2, JobCount::limited(3).unwrap());
        scenario.cluster.fail_verb(Verb::Delete);
        let mut pool = scenario.pool();

        pool.run_all(JobCount::limited(3).unwrap(), case(0, 10), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(scenario.leftovers().values().sum::<usize>(), 6);

        // Still failing: the sweep reports it and leaves the objects.
        let summary = pool.cleanup_all(&CancellationToken::new()).await.unwrap();
        assert!(!summary.is_clean());
        assert!(!assert_no_leftovers(&scenario.leftovers()).passed);
        assert_eq!(pool.worker_ids(), vec![WorkerId(0), WorkerId(1)]);
    }
}
