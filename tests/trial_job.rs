use pretty_assertions::assert_eq;
use serde_json::json;

use tunable::api::{
    Assignment, Duration, Experiment, PatchOperation, PatchType, Trial, LABEL_EXPERIMENT,
    LABEL_TRIAL, LABEL_TRIAL_ROLE,
};
use tunable::error::ErrorKind;
use tunable::job::{build_job, JobTemplateSpec, DEFAULT_CONTAINER_NAME, TRIAL_RUN_ROLE};
use tunable::patch::trial_job_reference;
use tunable::resource::ObjectReference;

fn trial() -> Trial {
    let mut exp = Experiment::new("postgres");
    exp.metadata.namespace = "bench".to_string();
    let mut trial = Trial::from_experiment(&exp);
    trial.metadata.name = "postgres-004".to_string();
    trial.spec.assignments = vec![
        Assignment {
            name: "shared_buffers".to_string(),
            value: 512.into(),
        },
        Assignment {
            name: "wal.level".to_string(),
            value: "replica".into(),
        },
    ];
    trial
}

#[test]
fn it_builds_a_placeholder_job_without_a_template() {
    let mut trial = trial();
    trial.spec.approximate_runtime = Some("5m".parse::<Duration>().unwrap());
    trial.spec.start_time_offset = Some("30s".parse::<Duration>().unwrap());

    let built = build_job(&trial);
    assert!(built.error().is_none());
    let job = built.into_job();

    assert_eq!(job.metadata.name, "postgres-004");
    assert_eq!(job.metadata.namespace, "bench");
    assert_eq!(job.metadata.labels.get(LABEL_EXPERIMENT), Some(&"postgres".to_string()));
    assert_eq!(job.metadata.labels.get(LABEL_TRIAL), Some(&"postgres-004".to_string()));
    assert_eq!(
        job.spec.template.metadata.labels.get(LABEL_TRIAL_ROLE),
        Some(&TRIAL_RUN_ROLE.to_string())
    );
    assert_eq!(job.spec.backoff_limit, Some(0));
    assert_eq!(job.spec.template.spec.restart_policy, "Never");

    let containers = &job.spec.template.spec.containers;
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].name, DEFAULT_CONTAINER_NAME);
    assert_eq!(
        containers[0].args[1],
        "echo 'Sleeping for 5m30s...' && sleep 330 && echo 'Done.'"
    );
}

#[test]
fn it_injects_assignments_into_template_containers() {
    let mut trial = trial();
    trial.spec.job_template = Some(
        serde_json::from_value::<JobTemplateSpec>(json!({
            "metadata": {"labels": {"app": "pgbench"}},
            "spec": {
                "activeDeadlineSeconds": 600,
                "template": {"spec": {
                    "restartPolicy": "OnFailure",
                    "containers": [{
                        "name": "pgbench",
                        "image": "postgres:16",
                        "env": [{"name": "PGHOST", "value": "postgres"}],
                        "volumeMounts": [{"name": "scripts", "mountPath": "/scripts"}]
                    }]
                }}
            }
        }))
        .unwrap(),
    );

    let job = build_job(&trial).into_job();
    let value = serde_json::to_value(&job).unwrap();

    assert_eq!(value["metadata"]["labels"]["app"], json!("pgbench"));
    assert_eq!(value["spec"]["activeDeadlineSeconds"], json!(600));
    assert_eq!(value["spec"]["backoffLimit"], json!(0));
    assert_eq!(value["spec"]["template"]["spec"]["restartPolicy"], json!("OnFailure"));

    let container = &value["spec"]["template"]["spec"]["containers"][0];
    assert_eq!(
        container["env"],
        json!([
            {"name": "PGHOST", "value": "postgres"},
            {"name": "SHARED_BUFFERS", "value": "512"},
            {"name": "WAL_LEVEL", "value": "replica"}
        ])
    );
    assert_eq!(container["volumeMounts"][0]["name"], json!("scripts"));
}

#[test]
fn it_applies_recorded_patches_to_the_job() {
    let mut trial = trial();
    trial.status.patch_operations = vec![
        PatchOperation {
            target_ref: trial_job_reference(&trial),
            patch_type: PatchType::Strategic,
            data: json!({"spec": {"template": {"spec": {"containers": [
                {"name": DEFAULT_CONTAINER_NAME, "image": "busybox:1.36"}
            ]}}}}),
        },
    ];

    let built = build_job(&trial);
    assert!(built.error().is_none());
    let job = built.into_job();
    assert_eq!(job.spec.template.spec.containers[0].image, "busybox:1.36");
    assert_eq!(job.spec.template.spec.containers[0].name, DEFAULT_CONTAINER_NAME);
}

#[test]
fn it_ignores_patches_recorded_for_other_jobs() {
    let mut trial = trial();
    trial.status.patch_operations = vec![PatchOperation {
        target_ref: ObjectReference::new("batch/v1", "Job", "bench", "postgres"),
        patch_type: PatchType::Strategic,
        data: json!({"spec": {"backoffLimit": 6}}),
    }];

    let built = build_job(&trial);
    assert!(built.error().is_none());
    assert_eq!(built.into_job().spec.backoff_limit, Some(0));
}

#[test]
fn it_keeps_the_unpatched_job_when_patching_fails() {
    let mut trial = trial();
    trial.status.patch_operations = vec![PatchOperation {
        target_ref: trial_job_reference(&trial),
        patch_type: PatchType::Strategic,
        data: json!({"spec": {"backoffLimit": "many"}}),
    }];

    let (job, error) = build_job(&trial).into_parts();
    assert_eq!(error.map(|e| e.kind()), Some(ErrorKind::Serialization));
    assert_eq!(job.spec.backoff_limit, Some(0));
    assert_eq!(job.spec.template.spec.containers.len(), 1);
}
