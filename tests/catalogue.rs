//! Scenario catalogue against the in-memory backend
//!
//! Runs with paused time, so waits and hold windows cost nothing. The live
//! cluster test at the bottom is ignored unless explicitly requested.

use std::sync::Arc;

use lvm_conformance::{
    ClusterCli, FakeCluster, FakeFaults, Harness, HarnessConfig, Kubectl, ObjectKind, Outcome,
    ProcessShell, Scenario, ScenarioReport,
};

fn test_config() -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config.timing.wait_timeout_secs = 30;
    config.timing.poll_interval_ms = 100;
    config.timing.hold_window_secs = 5;
    config
}

fn fake_harness(config: HarnessConfig) -> (FakeCluster, Harness) {
    let fake = FakeCluster::new(&config);
    let harness = Harness::new(
        config,
        Arc::new(fake.clone()),
        Arc::new(fake.host_shell()),
    )
    .expect("valid config");
    (fake, harness)
}

async fn namespace_gone(fake: &FakeCluster, namespace: &str) -> bool {
    // get advances the simulation, so pending deletions land first
    match fake.get(ObjectKind::Namespace, None, namespace).await {
        Err(e) => e.is_not_found(),
        Ok(_) => false,
    }
}

fn failure(report: &ScenarioReport) -> String {
    match &report.outcome {
        Outcome::Failed { error, .. } => error.clone(),
        Outcome::Passed => panic!("{} passed", report.scenario),
    }
}

#[tokio::test(start_paused = true)]
async fn test_full_catalogue_passes() {
    let (fake, harness) = fake_harness(test_config());

    let run = harness.run_all(&Scenario::ALL, 4).await;

    assert_eq!(run.scenarios.len(), Scenario::ALL.len());
    for (report, scenario) in run.scenarios.iter().zip(Scenario::ALL) {
        assert_eq!(report.scenario, scenario, "reports keep input order");
        assert!(
            report.passed(),
            "{} failed: {:?}",
            report.scenario,
            report.outcome
        );
        assert!(report.namespace.starts_with(scenario.namespace_prefix()));
        assert!(report.cleanup.is_clean());
    }
    assert!(run.is_success());
    assert!(run.to_string().ends_with("10/10 scenarios passed"));

    for report in &run.scenarios {
        assert!(namespace_gone(&fake, &report.namespace).await);
    }
    assert_eq!(fake.volume_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_sequential_run_matches_concurrent() {
    let (_fake, harness) = fake_harness(test_config());

    let run = harness
        .run_all(
            &[Scenario::ThickRestoreIndependence, Scenario::ThinPoolOvercommit],
            1,
        )
        .await;

    assert!(run.is_success(), "{}", run);
}

#[tokio::test(start_paused = true)]
async fn test_misplaced_volume_fails_and_keeps_namespace() {
    let (fake, harness) = fake_harness(test_config());
    fake.set_faults(FakeFaults {
        misplace_volume_group: Some("rogue-vg".into()),
        ..Default::default()
    });

    let report = harness.run(Scenario::ThinSnapshotRestoreSameSize).await;

    let error = failure(&report);
    assert!(error.contains("rogue-vg"), "{}", error);
    assert!(!report.cleanup.retained.is_empty());
    assert!(report.cleanup.deleted.is_empty());
    assert!(fake.namespaces().contains(&report.namespace));
    assert!(!namespace_gone(&fake, &report.namespace).await);
}

#[tokio::test(start_paused = true)]
async fn test_claim_beyond_limit_must_stay_pending() {
    let (fake, harness) = fake_harness(test_config());
    fake.set_faults(FakeFaults {
        ignore_capacity: true,
        ..Default::default()
    });

    let report = harness.run(Scenario::ThickOverprovisionLimit).await;

    let error = failure(&report);
    assert!(error.contains("thickvol2"), "{}", error);
}

#[tokio::test(start_paused = true)]
async fn test_transient_api_errors_are_tolerated() {
    let (fake, harness) = fake_harness(test_config());
    fake.set_faults(FakeFaults {
        failing_gets: 5,
        ..Default::default()
    });

    let report = harness.run(Scenario::ThickProvision).await;

    assert!(report.passed(), "{:?}", report.outcome);
    assert!(namespace_gone(&fake, &report.namespace).await);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_reports_root_cause() {
    let mut config = test_config();
    config.timing.wait_timeout_secs = 2;
    let (fake, harness) = fake_harness(config);
    fake.set_faults(FakeFaults {
        failing_gets: u32::MAX,
        ..Default::default()
    });

    let report = harness.run(Scenario::ThickProvision).await;

    match &report.outcome {
        Outcome::Failed { root_cause, .. } => {
            assert!(root_cause.contains("connection refused"), "{}", root_cause)
        }
        Outcome::Passed => panic!("passed with an unreachable API server"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_teardown_never_deletes_a_claimed_volume() {
    let (fake, harness) = fake_harness(test_config());

    let report = harness.run(Scenario::ThinSnapshotRestoreLarger).await;

    assert!(report.passed(), "{:?}", report.outcome);
    assert!(report.cleanup.is_clean(), "{:?}", report.cleanup);
    assert!(report.cleanup.retained.is_empty());
    assert_eq!(
        report.cleanup.deleted.first().map(String::as_str),
        Some(format!("namespace/{}", report.namespace).as_str())
    );
    assert_eq!(fake.protected_deletes(), 0);
    assert!(namespace_gone(&fake, &report.namespace).await);
    assert_eq!(fake.volume_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_thick_volumes_beyond_limit_fail_overprovision() {
    let (fake, harness) = fake_harness(test_config());
    // five 3Gi claims become 5Gi volumes: 25Gi against a 20Gi limit
    fake.set_faults(FakeFaults {
        ignore_capacity: true,
        overallocate_gib: 2,
        ..Default::default()
    });

    let report = harness.run(Scenario::ThickOverprovision).await;

    let error = failure(&report);
    assert!(error.contains("exceed"), "{}", error);
    assert!(fake.namespaces().contains(&report.namespace));
}

#[tokio::test(start_paused = true)]
async fn test_oversized_restore_fails() {
    let (fake, harness) = fake_harness(test_config());
    fake.set_faults(FakeFaults {
        overallocate_gib: 8,
        ..Default::default()
    });

    let report = harness.run(Scenario::ThinSnapshotRestoreLarger).await;

    let error = failure(&report);
    assert!(error.contains("requested 2Gi"), "{}", error);
    assert!(!report.cleanup.retained.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_restore_lost_with_its_source_fails_independence() {
    let (fake, harness) = fake_harness(test_config());
    fake.set_faults(FakeFaults {
        cascade_restores: true,
        ..Default::default()
    });

    let report = harness.run(Scenario::ThinRestoreIndependence).await;

    assert!(!report.passed());
    assert!(!report.cleanup.retained.is_empty());
    assert!(report.cleanup.deleted.is_empty());
    assert!(fake.namespaces().contains(&report.namespace));
    assert!(!namespace_gone(&fake, &report.namespace).await);
}

#[tokio::test]
#[ignore = "needs a kind cluster with the LVM CSI driver installed"]
async fn test_live_cluster_catalogue() {
    let config = match std::env::var("LVM_CONFORMANCE_CONFIG") {
        Ok(path) => HarnessConfig::from_file(std::path::Path::new(&path)).expect("config loads"),
        Err(_) => HarnessConfig::default(),
    };
    let config = match std::env::var("TOPOLVM_DAEMONSET_NODE") {
        Ok(node) => config.with_daemonset_node(&node),
        Err(_) => config,
    };

    let cluster = Arc::new(Kubectl::new(config.kubectl.clone()));
    let shell = Arc::new(ProcessShell::new(config.lvm.command_prefix.clone()));
    let harness = Harness::new(config, cluster, shell).expect("valid config");

    let run = harness.run_all(&Scenario::ALL, 1).await;
    println!("{}", run);
    assert!(run.is_success());
}
