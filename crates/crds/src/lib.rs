//! ZAP Operator CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the ZAP scan operator.

pub mod zap_scan;
pub mod zap_scheduled_scan;

pub use zap_scan::*;
pub use zap_scheduled_scan::*;
