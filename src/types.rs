use serde::{Deserialize, Serialize};
use std::fmt;

/// An absolute HTTP(S) origin found in a source literal.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct CandidateUrl {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
}

impl fmt::Display for CandidateUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}://{}:{}", self.scheme, self.host, port),
            None => write!(f, "{}://{}", self.scheme, self.host),
        }
    }
}

/// Host and port actually dialled when probing a host key.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProbeTarget {
    pub host: String,
    pub port: u16,
}

impl ProbeTarget {
    pub const DEFAULT_PORT: u16 = 443;

    /// Explicit ports other than 80/443 are kept; everything else dials 443.
    pub fn new(host: impl Into<String>, port: Option<u16>) -> Self {
        let port = match port {
            Some(p) if p != 80 && p != 443 => p,
            _ => Self::DEFAULT_PORT,
        };
        Self { host: host.into(), port }
    }
}

impl fmt::Display for ProbeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A host key queued for probing, with the target it was first seen as.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PendingHost {
    pub key: String,
    pub target: ProbeTarget,
}

/// Verdict of a single TLS capability probe.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProbeOutcome {
    Passing,
    Failing,
}

/// Status of a host key as kept by a result store.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    Pending,
    Passing,
    Failing,
}

impl From<ProbeOutcome> for HostStatus {
    fn from(outcome: ProbeOutcome) -> Self {
        match outcome {
            ProbeOutcome::Passing => HostStatus::Passing,
            ProbeOutcome::Failing => HostStatus::Failing,
        }
    }
}

/// One persisted row: the latest status of a host key.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanRecord {
    pub host_key: String,
    pub status: HostStatus,
    pub checked_at: String,
}

/// Cumulative progress returned after each batch.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub processed: u64,
    pub remaining: u64,
    pub passing: u64,
    pub failing: u64,
    pub failing_urls: Vec<String>,
}

/// Outcome of probing an explicit list of URLs.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlScanReport {
    pub processed: u64,
    pub passing: u64,
    pub failing: u64,
    pub failing_urls: Vec<String>,
}

/// Aggregate view of everything in the result store.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub has_data: bool,
    pub passing: u64,
    pub failing: u64,
    pub passing_urls: Vec<String>,
    pub failing_urls: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlsToScan {
    pub urls_to_scan: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ResetResponse {
    pub success: bool,
    pub message: String,
}
