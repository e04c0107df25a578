//! Cluster capability seams for the ZAP operator
//!
//! The operator core never talks to `kube::Api` directly. It consumes three
//! narrow traits instead:
//!
//! - [`ClusterClient`]: get/list/create/delete/patch-status over ZapScan,
//!   ZapScheduledScan, Job, Pod and Secret resources
//! - [`PodLogs`]: fetch the full log of one container
//! - [`PodExec`]: run a command in one container and capture its output
//!
//! [`KubeClusterClient`] implements all three against a live API server.
//! With the `test-util` feature, [`MockClusterClient`] provides an in-memory
//! implementation for unit tests.
//!
//! # Example
//!
//! ```no_run
//! use cluster_client::{ClusterClient, KubeClusterClient, read_remote_file};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = KubeClusterClient::try_default().await?;
//! let pods = client.list_pods("scans", "job-name=zap-scan-1a2b3c4d-1700000000").await?;
//! if let Some(name) = pods.first().and_then(|p| p.metadata.name.as_deref()) {
//!     let report = read_remote_file(&client, "scans", name, "zap", "/zap/wrk/zap.json").await?;
//!     println!("{} bytes", report.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod kube_client;
pub mod time;
#[path = "trait.rs"]
pub mod cluster_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use cluster_trait::{ClusterClient, ExecOutput, PodExec, PodLogs, read_remote_file};
pub use error::ClusterError;
pub use kube_client::KubeClusterClient;
#[cfg(feature = "test-util")]
pub use mock::{MockClusterClient, MockOperation};
