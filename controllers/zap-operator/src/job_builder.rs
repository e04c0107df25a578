//! Scan Job construction.
//!
//! A scan Job runs two containers that share an `emptyDir` work volume:
//!
//! - `zap`: runs `zap-full-scan.py` against the target and writes
//!   `/zap/wrk/zap.json` and `/zap/wrk/zap.html`. Exit codes 1-3 (findings
//!   present) are mapped to success; anything above 3 is a failure.
//! - `reporter`: waits for the JSON report and prints it to its own log
//!   between [`REPORT_BEGIN_MARKER`] and [`REPORT_END_MARKER`] so the report
//!   can be scraped after the pod has terminated.
//!
//! The Job never retries (`backoffLimit: 0`); retries belong to the reconciler.
//!
//! Scanner arguments reach `sh -c` as literal words: anything outside a small
//! safe character set is single-quoted. Targets such as `https://h/?a=1&b=2`
//! stay one argument, and user `args` are never subject to variable or glob
//! expansion (`$HOME`, `*.json` arrive verbatim).

use crds::ZapScanSpec;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, PodSpec, PodTemplateSpec, ResourceRequirements, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

pub const DEFAULT_SCANNER_IMAGE: &str = "ghcr.io/zaproxy/zaproxy:stable";
pub const DEFAULT_REPORTER_IMAGE: &str = "busybox:1.36";

pub const SCANNER_CONTAINER: &str = "zap";
pub const REPORTER_CONTAINER: &str = "reporter";

/// Report written by the scanner, readable from the scanner container while it runs
pub const REPORT_PATH: &str = "/zap/wrk/zap.json";
pub const REPORT_BEGIN_MARKER: &str = "zap-operator: begin zap.json";
pub const REPORT_END_MARKER: &str = "zap-operator: end zap.json";

/// Label the Job controller puts on every pod it creates
pub const JOB_NAME_LABEL: &str = "job-name";

/// Selector matching every Job this operator creates
pub const SCAN_JOB_SELECTOR: &str = "app.kubernetes.io/name=zap-operator";

const WORK_VOLUME: &str = "zap-wrk";
const WORK_DIR: &str = "/zap/wrk";
const HOME_VOLUME: &str = "zap-home";
const HOME_DIR: &str = "/home/zap/.ZAP";

/// Images used for the two containers of a scan Job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobImages {
    pub scanner: String,
    pub reporter: String,
}

impl Default for JobImages {
    fn default() -> Self {
        Self {
            scanner: DEFAULT_SCANNER_IMAGE.to_string(),
            reporter: DEFAULT_REPORTER_IMAGE.to_string(),
        }
    }
}

/// Identity of the Job to build
#[derive(Debug, Clone, Copy)]
pub struct ScanJobTarget<'a> {
    pub job_name: &'a str,
    pub job_namespace: &'a str,
    pub scan_name: &'a str,
    pub scan_namespace: &'a str,
}

/// Build the scan Job for `spec`. Pure and deterministic.
pub fn build_scan_job(target: ScanJobTarget<'_>, spec: &ZapScanSpec, images: &JobImages) -> Job {
    let image = spec
        .image
        .as_deref()
        .filter(|i| !i.is_empty())
        .unwrap_or(&images.scanner);

    let labels: BTreeMap<String, String> = [
        ("app.kubernetes.io/name", "zap-operator"),
        ("app.kubernetes.io/component", "zap-scan"),
        ("spaceship.com/scan-name", target.scan_name),
        ("spaceship.com/scan-ns", target.scan_namespace),
        ("spaceship.com/scan", "true"),
        ("spaceship.com/scan-owner", target.scan_name),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    let service_account_name = spec
        .service_account_name
        .clone()
        .filter(|sa| !sa.is_empty());

    Job {
        metadata: ObjectMeta {
            name: Some(target.job_name.to_string()),
            namespace: Some(target.job_namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(BTreeMap::from([(
                        "spaceship.com/scan".to_string(),
                        "true".to_string(),
                    )])),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    service_account_name,
                    volumes: Some(vec![empty_dir(WORK_VOLUME), empty_dir(HOME_VOLUME)]),
                    containers: vec![
                        Container {
                            name: SCANNER_CONTAINER.to_string(),
                            image: Some(image.to_string()),
                            image_pull_policy: Some("IfNotPresent".to_string()),
                            command: Some(vec!["/bin/sh".to_string(), "-c".to_string()]),
                            args: Some(vec![scanner_script(spec)]),
                            volume_mounts: Some(volume_mounts()),
                            resources: Some(resources(("500m", "1Gi"), ("2", "6Gi"))),
                            ..Default::default()
                        },
                        Container {
                            name: REPORTER_CONTAINER.to_string(),
                            image: Some(images.reporter.clone()),
                            image_pull_policy: Some("IfNotPresent".to_string()),
                            command: Some(vec!["/bin/sh".to_string(), "-c".to_string()]),
                            args: Some(vec![reporter_script()]),
                            volume_mounts: Some(volume_mounts()),
                            resources: Some(resources(("10m", "32Mi"), ("100m", "128Mi"))),
                            ..Default::default()
                        },
                    ],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

/// Arguments passed to `zap-full-scan.py`
pub fn scanner_args(spec: &ZapScanSpec) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "zap-full-scan.py".to_string(),
        "-t".to_string(),
        spec.target.clone(),
        "-J".to_string(),
        REPORT_PATH.to_string(),
        "-r".to_string(),
        format!("{WORK_DIR}/zap.html"),
        "-d".to_string(),
    ];
    if let Some(openapi) = spec.openapi.as_deref().filter(|o| !o.is_empty()) {
        args.push("-O".to_string());
        args.push(openapi.to_string());
    }
    args.extend(spec.args.iter().cloned());
    args
}

fn scanner_script(spec: &ZapScanSpec) -> String {
    format!(
        "mkdir -p {WORK_DIR} && python3 /zap/{}; ec=$?; if [ $ec -le 3 ]; then exit 0; else exit $ec; fi",
        join_shell(&scanner_args(spec))
    )
}

fn reporter_script() -> String {
    format!(
        "set -eu; echo 'zap-operator: waiting for {REPORT_PATH}'; \
         while [ ! -f {REPORT_PATH} ]; do sleep 2; done; \
         echo '{REPORT_BEGIN_MARKER}'; cat {REPORT_PATH}; echo; echo '{REPORT_END_MARKER}';"
    )
}

/// Join arguments into one shell command line, single-quoting where needed.
pub fn join_shell(args: &[String]) -> String {
    args.iter()
        .map(|arg| shell_quote(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '=' | ',' | '+' | '@' | '%')
        });
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

fn empty_dir(name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }
}

fn volume_mounts() -> Vec<VolumeMount> {
    vec![
        VolumeMount {
            name: WORK_VOLUME.to_string(),
            mount_path: WORK_DIR.to_string(),
            ..Default::default()
        },
        VolumeMount {
            name: HOME_VOLUME.to_string(),
            mount_path: HOME_DIR.to_string(),
            ..Default::default()
        },
    ]
}

fn resources(requests: (&str, &str), limits: (&str, &str)) -> ResourceRequirements {
    let list = |(cpu, memory): (&str, &str)| {
        BTreeMap::from([
            ("cpu".to_string(), Quantity(cpu.to_string())),
            ("memory".to_string(), Quantity(memory.to_string())),
        ])
    };
    ResourceRequirements {
        requests: Some(list(requests)),
        limits: Some(list(limits)),
        ..Default::default()
    }
}
