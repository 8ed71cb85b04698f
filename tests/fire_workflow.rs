//! End-to-end behaviour of the fire workflow against scripted collaborators.

use std::time::Duration;

use camino::Utf8PathBuf;
use gcpfire::test_support::{
    FakePlane, PlaneCall, RecordingConfirmation, ScriptedRunner, done_operation, instance_with,
    summary,
};
use gcpfire::{
    FireConfig, FireError, FireOptions, FireOrchestrator, InjectError, JobSpec, KeyStore,
    PollError, SshClient, SshConfig,
};

const IP: &str = "203.0.113.5";

struct Harness {
    plane: FakePlane,
    runner: ScriptedRunner,
    secrets: tempfile::TempDir,
}

impl Harness {
    fn new() -> Self {
        Self {
            plane: FakePlane::new(),
            runner: ScriptedRunner::new(),
            secrets: tempfile::tempdir().expect("tempdir"),
        }
    }

    fn config(&self) -> FireConfig {
        let mut config = FireConfig::new("proj", "us-east1-c", "gcpfire");
        config.image_project = String::from("img-proj");
        config.poll_interval = Duration::from_millis(1);
        config
    }

    fn orchestrator(&self) -> FireOrchestrator<&FakePlane, ScriptedRunner> {
        let secrets_dir = Utf8PathBuf::from_path_buf(self.secrets.path().join("secrets"))
            .expect("utf8 path");
        FireOrchestrator::new(
            &self.plane,
            SshClient::new(SshConfig::default(), self.runner.clone()),
            KeyStore::new(secrets_dir),
            self.config(),
        )
    }

    fn options(&self) -> FireOptions {
        FireOptions {
            wait_for_confirmation: false,
            retry_wait: Duration::from_millis(1),
            max_retry: 3,
        }
    }

    /// Queues provider responses for a full successful pass: cap check,
    /// create wait, post-create listing, credential injection, and the
    /// delete wait.
    fn script_provider_success(&self) {
        self.plane.push_list(Some(Vec::new())); // cap check
        self.plane.push_operation(done_operation("op-create"));
        self.plane.push_list(Some(vec![summary("t1")]));
        self.plane
            .push_instance(Some(instance_with("t1", Some("fp-1"), &[], Some(IP))));
        self.plane.push_operation(done_operation("op-set-metadata"));
        self.plane
            .push_instance(Some(instance_with("t1", Some("fp-2"), &[], Some(IP))));
        self.plane.push_operation(done_operation("op-delete"));
    }

    /// Queues transport responses for a successful remote run.
    fn script_ssh_success(&self, stdout: &str) {
        self.runner.push_success(); // known-hosts purge
        self.runner.push_success(); // probe
        self.runner.push_success(); // scp
        self.runner.push_output(Some(0), stdout, "");
    }

    fn deletes(&self) -> Vec<String> {
        self.plane
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                PlaneCall::Delete { name } => Some(name),
                _ => None,
            })
            .collect()
    }

    fn leftover_keys(&self) -> usize {
        std::fs::read_dir(self.secrets.path().join("secrets"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

fn job() -> JobSpec {
    JobSpec::builder()
        .name("t1")
        .script_path("run.sh")
        .image_family("fam-a")
        .machine_type("n1-standard-4")
        .preemptible(true)
        .build()
        .expect("job should validate")
}

#[tokio::test]
async fn successful_run_returns_script_output_and_deletes_once() {
    let harness = Harness::new();
    harness.script_provider_success();
    harness.script_ssh_success("rendered 42 frames\n");

    let output = harness
        .orchestrator()
        .fire(&job(), &harness.options())
        .await
        .expect("fire should succeed");

    assert_eq!(output, "rendered 42 frames\n");
    assert_eq!(harness.deletes(), ["t1"], "exactly one delete for t1");
    assert_eq!(harness.leftover_keys(), 0, "local key must be erased");
}

#[tokio::test]
async fn execution_failure_still_deletes_the_instance() {
    let harness = Harness::new();
    harness.script_provider_success();
    harness.runner.push_success(); // known-hosts purge
    harness.runner.push_success(); // probe
    harness.runner.push_success(); // scp
    harness.runner.push_output(Some(2), "", "run.sh: boom"); // script fails

    let err = harness
        .orchestrator()
        .fire(&job(), &harness.options())
        .await
        .expect_err("fire should fail");

    assert!(matches!(err, FireError::Exec(_)), "unexpected error: {err}");
    assert_eq!(harness.deletes(), ["t1"], "cleanup must still run");
    assert_eq!(harness.leftover_keys(), 0, "local key must be erased");
}

#[tokio::test]
async fn unreachable_host_still_deletes_the_instance() {
    let harness = Harness::new();
    harness.script_provider_success();
    harness.runner.push_success(); // known-hosts purge
    harness.runner.push_failure(255);
    harness.runner.push_failure(255);
    harness.runner.push_failure(255);

    let err = harness
        .orchestrator()
        .fire(&job(), &harness.options())
        .await
        .expect_err("fire should fail");

    assert!(
        matches!(err, FireError::Exec(gcpfire::ExecError::Unreachable { attempts: 3, .. })),
        "unexpected error: {err}"
    );
    assert_eq!(harness.deletes(), ["t1"]);
}

#[tokio::test]
async fn cap_breach_creates_nothing() {
    let harness = Harness::new();
    let listed: Vec<_> = (0..11).map(|idx| summary(&format!("busy-{idx}"))).collect();
    harness.plane.push_list(Some(listed));

    let err = harness
        .orchestrator()
        .fire(&job(), &harness.options())
        .await
        .expect_err("fire should fail");

    assert!(
        matches!(err, FireError::TooManyInstances { count: 11, cap: 10, .. }),
        "unexpected error: {err}"
    );
    let calls = harness.plane.calls();
    assert!(
        !calls
            .iter()
            .any(|call| matches!(call, PlaneCall::Create { .. })),
        "no instance may be created past the cap"
    );
    assert!(harness.deletes().is_empty(), "nothing to clean up");
}

#[tokio::test]
async fn empty_listing_after_create_is_fatal_but_cleaned_up() {
    let harness = Harness::new();
    harness.plane.push_list(Some(Vec::new())); // cap check
    harness.plane.push_operation(done_operation("op-create"));
    harness.plane.push_list(None); // provider reports no instances
    harness.plane.push_operation(done_operation("op-delete"));

    let err = harness
        .orchestrator()
        .fire(&job(), &harness.options())
        .await
        .expect_err("fire should fail");

    assert!(
        matches!(err, FireError::NoInstancesReported { .. }),
        "unexpected error: {err}"
    );
    assert_eq!(harness.deletes(), ["t1"], "consistency failures still clean up");
}

#[tokio::test]
async fn capacity_exhaustion_is_distinguishable() {
    let harness = Harness::new();
    harness.plane.push_list(Some(Vec::new()));
    harness.plane.push_operation(gcpfire::test_support::failed_operation(
        "op-create",
        "ZONE_RESOURCE_POOL_EXHAUSTED",
        "no capacity in us-east1-c",
    ));

    let err = harness
        .orchestrator()
        .fire(&job(), &harness.options())
        .await
        .expect_err("fire should fail");

    assert!(
        matches!(err, FireError::Wait(PollError::ResourceExhausted { .. })),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn missing_instance_during_injection_is_reported() {
    let harness = Harness::new();
    harness.plane.push_list(Some(Vec::new()));
    harness.plane.push_operation(done_operation("op-create"));
    harness.plane.push_list(Some(vec![summary("t1")]));
    harness.plane.push_instance(None); // injection get finds nothing
    harness.plane.push_operation(done_operation("op-delete"));

    let err = harness
        .orchestrator()
        .fire(&job(), &harness.options())
        .await
        .expect_err("fire should fail");

    assert!(
        matches!(err, FireError::Inject(InjectError::InstanceNotFound { .. })),
        "unexpected error: {err}"
    );
    assert_eq!(harness.deletes(), ["t1"]);
}

#[tokio::test]
async fn cleanup_failure_after_success_is_surfaced() {
    let harness = Harness::new();
    harness.script_provider_success();
    harness.script_ssh_success("done\n");
    harness.plane.fail_delete();

    let err = harness
        .orchestrator()
        .fire(&job(), &harness.options())
        .await
        .expect_err("fire should fail");

    assert!(matches!(err, FireError::Cleanup(_)), "unexpected error: {err}");
    assert_eq!(harness.leftover_keys(), 0, "key removal still runs");
}

#[tokio::test]
async fn cleanup_failure_does_not_mask_the_primary_error() {
    let harness = Harness::new();
    harness.script_provider_success();
    harness.runner.push_success(); // known-hosts purge
    harness.runner.push_success(); // probe
    harness.runner.push_failure(1); // scp fails
    harness.plane.fail_delete();

    let err = harness
        .orchestrator()
        .fire(&job(), &harness.options())
        .await
        .expect_err("fire should fail");

    match err {
        FireError::CleanupAfterFailure { primary, cleanup } => {
            assert!(matches!(*primary, FireError::Exec(_)));
            assert!(matches!(*cleanup, FireError::Plane(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn confirmation_hook_runs_before_deletion_when_requested() {
    let harness = Harness::new();
    harness.script_provider_success();
    harness.script_ssh_success("done\n");
    let prompt = RecordingConfirmation::default();

    let options = FireOptions {
        wait_for_confirmation: true,
        ..harness.options()
    };
    harness
        .orchestrator()
        .with_prompt(&prompt)
        .fire(&job(), &options)
        .await
        .expect("fire should succeed");

    assert_eq!(prompt.confirmed(), ["t1"]);
    assert_eq!(harness.deletes(), ["t1"]);
}

#[tokio::test]
async fn submitted_spec_carries_job_shape() {
    let harness = Harness::new();
    harness.script_provider_success();
    harness.script_ssh_success("done\n");

    harness
        .orchestrator()
        .fire(&job(), &harness.options())
        .await
        .expect("fire should succeed");

    let specs = harness.plane.created_specs();
    let spec = specs.first().expect("one creation");
    assert_eq!(spec.name, "t1");
    assert_eq!(spec.machine_type, "zones/us-east1-c/machineTypes/n1-standard-4");
    assert!(spec.scheduling.preemptible);
    assert!(spec.guest_accelerators.is_empty());
    assert_eq!(
        spec.disks
            .first()
            .map(|disk| disk.initialize_params.source_image.as_str()),
        Some("projects/p/global/images/image-1")
    );
}
