//! Incremental scan state machine.
//!
//! `Idle -> Extracting -> Probing { batch } -> ... -> Complete`, with `reset`
//! returning to `Idle` from anywhere. Work is driven from outside: each
//! `process_batch` call probes one slice of the pending list and returns.
//!
//! Passing results are sticky (when `sticky_passing` is set): a host recorded
//! as passing is left out of every later scan until the store is reset.
//! Failing hosts are always queued again by the next `start_scan`.
//!
//! The state lock is never held across extraction or network probing, so
//! `state()` answers while a batch runs. Batches are serialized by a separate
//! gate. Each `start_scan`, `resume_scan` and `reset` bumps a generation
//! counter; a batch that finds the generation changed when it returns drops
//! its verdicts and reports [`ScanError::Superseded`].

use crate::config::ScanConfig;
use crate::error::{Result, ScanError};
use crate::extractor::{self, ExtractOptions};
use crate::normalize;
use crate::probe::Prober;
use crate::scanner;
use crate::store::ResultStore;
use crate::types::{
    BatchReport, CandidateUrl, HostStatus, PendingHost, ProbeOutcome, ProbeTarget, ScanSummary,
    UrlScanReport, UrlsToScan,
};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ScanState {
    Idle,
    Extracting,
    /// `batch` counts the batches already run in this session.
    Probing { batch: u64 },
    Complete,
}

/// Pending hosts of one scan and what each probe returned so far.
///
/// Outcomes are stored per pending index, so re-running a slice overwrites
/// instead of double counting.
#[derive(Debug, Clone, Default)]
struct ScanSession {
    pending: Vec<PendingHost>,
    outcomes: Vec<Option<ProbeOutcome>>,
    processed_count: u64,
    passing_count: u64,
    failing_count: u64,
    failing_keys: BTreeSet<String>,
    batches_run: u64,
}

impl ScanSession {
    fn new(pending: Vec<PendingHost>) -> Self {
        let outcomes = vec![None; pending.len()];
        Self {
            pending,
            outcomes,
            ..Self::default()
        }
    }

    fn record(&mut self, idx: usize, outcome: ProbeOutcome) {
        let key = &self.pending[idx].key;
        match self.outcomes[idx].replace(outcome) {
            None => self.processed_count += 1,
            Some(ProbeOutcome::Passing) => self.passing_count -= 1,
            Some(ProbeOutcome::Failing) => {
                self.failing_count -= 1;
                self.failing_keys.remove(key);
            }
        }
        match outcome {
            ProbeOutcome::Passing => self.passing_count += 1,
            ProbeOutcome::Failing => {
                self.failing_count += 1;
                self.failing_keys.insert(key.clone());
            }
        }
    }

    fn remaining(&self) -> u64 {
        self.pending.len() as u64 - self.processed_count
    }

    fn report(&self) -> BatchReport {
        BatchReport {
            processed: self.processed_count,
            remaining: self.remaining(),
            passing: self.passing_count,
            failing: self.failing_count,
            failing_urls: self.failing_keys.iter().cloned().collect(),
        }
    }
}

struct Inner {
    state: ScanState,
    session: Option<ScanSession>,
    generation: u64,
}

impl Inner {
    fn begin(&mut self, state: ScanState) -> u64 {
        self.generation += 1;
        self.session = None;
        self.state = state;
        self.generation
    }
}

/// Owns one scan session over a result store and a prober.
///
/// Both collaborators are passed in; events are emitted under `span`
/// (default `tls_checker`), which callers may replace with [`Self::with_span`].
pub struct ScanCoordinator {
    store: Arc<dyn ResultStore>,
    prober: Arc<dyn Prober>,
    config: ScanConfig,
    span: Span,
    inner: Mutex<Inner>,
    batch_gate: Mutex<()>,
}

impl ScanCoordinator {
    pub fn new(store: Arc<dyn ResultStore>, prober: Arc<dyn Prober>, config: ScanConfig) -> Self {
        Self {
            store,
            prober,
            config,
            span: info_span!("tls_checker"),
            inner: Mutex::new(Inner {
                state: ScanState::Idle,
                session: None,
                generation: 0,
            }),
            batch_gate: Mutex::new(()),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub async fn state(&self) -> ScanState {
        self.inner.lock().await.state
    }

    /// Extract from the configured roots and queue every host not already passing.
    /// Returns the number of pending hosts.
    pub async fn start_scan(&self) -> Result<usize> {
        let roots = self.config.roots.clone();
        self.start_scan_in(roots).await
    }

    pub async fn start_scan_in(&self, roots: Vec<PathBuf>) -> Result<usize> {
        async {
            let generation = self.inner.lock().await.begin(ScanState::Extracting);
            info!(roots = ?roots, "collecting URLs from codebase");
            let candidates = self.extract(roots).await;

            let mut inner = self.inner.lock().await;
            if inner.generation != generation {
                warn!("scan superseded during extraction");
                return Err(ScanError::Superseded);
            }
            let pending = match self.queue_pending(&candidates) {
                Ok(p) => p,
                Err(e) => {
                    inner.state = ScanState::Idle;
                    return Err(e);
                }
            };

            let total = pending.len();
            info!(candidates = candidates.len(), pending = total, "scan queued");
            inner.state = if total == 0 {
                ScanState::Complete
            } else {
                ScanState::Probing { batch: 0 }
            };
            inner.session = Some(ScanSession::new(pending));
            Ok::<_, ScanError>(total)
        }
        .instrument(self.span.clone())
        .await
    }

    /// Rebuild the session from hosts the store still marks as pending.
    pub async fn resume_scan(&self) -> Result<usize> {
        async {
            let mut inner = self.inner.lock().await;
            inner.begin(ScanState::Idle);
            let keys = self.store.select_by_status(HostStatus::Pending)?;
            let pending: Vec<PendingHost> = keys
                .into_iter()
                .filter_map(|key| match normalize::host_and_port(&key) {
                    Ok((host, port)) => Some(PendingHost {
                        key,
                        target: ProbeTarget::new(host, port),
                    }),
                    Err(e) => {
                        warn!(key = %key, error = %e, "dropping unparseable pending key");
                        None
                    }
                })
                .collect();

            let total = pending.len();
            info!(pending = total, "resumed scan from store");
            inner.state = if total == 0 {
                ScanState::Complete
            } else {
                ScanState::Probing { batch: 0 }
            };
            inner.session = Some(ScanSession::new(pending));
            Ok::<_, ScanError>(total)
        }
        .instrument(self.span.clone())
        .await
    }

    /// Probe `pending[offset..offset + batch_size]` and persist the verdicts.
    ///
    /// Counts in the report are cumulative for the session. An offset past the
    /// end is a no-op reporting `remaining == 0`. Store failures are errors, as
    /// is a restart or reset that lands while the batch is probing.
    pub async fn process_batch(&self, batch_size: usize, offset: usize) -> Result<BatchReport> {
        async {
            let _gate = self.batch_gate.lock().await;

            let (generation, batch, batch_no) = {
                let mut inner = self.inner.lock().await;
                let generation = inner.generation;
                let session = inner.session.as_mut().ok_or(ScanError::NoActiveScan)?;

                let len = session.pending.len();
                if offset >= len {
                    debug!(offset, len, "batch offset past end of pending list");
                    let mut report = session.report();
                    report.remaining = 0;
                    return Ok(report);
                }

                let end = offset.saturating_add(batch_size.max(1)).min(len);
                (generation, session.pending[offset..end].to_vec(), session.batches_run + 1)
            };
            info!(batch = batch_no, offset, size = batch.len(), "probing batch");

            let results = scanner::probe_hosts(&batch, self.prober.clone(), batch.len()).await;

            let mut inner = self.inner.lock().await;
            if inner.generation != generation {
                warn!(batch = batch_no, "scan restarted or reset mid-batch, verdicts dropped");
                return Err(ScanError::Superseded);
            }
            let rows: Vec<(String, HostStatus)> = results
                .iter()
                .map(|(host, outcome)| (host.key.clone(), HostStatus::from(*outcome)))
                .collect();
            if let Err(e) = self.store.upsert_many(&rows) {
                error!(batch = batch_no, error = %e, "error storing TLS scan results");
                return Err(e.into());
            }

            let session = inner.session.as_mut().ok_or(ScanError::NoActiveScan)?;
            for (i, (_, outcome)) in results.iter().enumerate() {
                session.record(offset + i, *outcome);
            }
            session.batches_run = batch_no;
            let report = session.report();
            inner.state = if report.remaining == 0 {
                ScanState::Complete
            } else {
                ScanState::Probing { batch: batch_no }
            };

            info!(
                processed = report.processed,
                remaining = report.remaining,
                passing = report.passing,
                failing = report.failing,
                "batch complete"
            );
            Ok::<_, ScanError>(report)
        }
        .instrument(self.span.clone())
        .await
    }

    /// Probe an explicit list of URLs outside of any session and persist the verdicts.
    pub async fn scan_urls(&self, urls: &[String]) -> Result<UrlScanReport> {
        async {
            let mut seen = HashSet::new();
            let mut hosts = Vec::new();
            for url in urls {
                let key = match normalize::normalize(url) {
                    Ok(k) => k,
                    Err(e) => {
                        warn!(url = %url, error = %e, "invalid URL skipped");
                        continue;
                    }
                };
                if !seen.insert(key.clone()) {
                    continue;
                }
                let (host, port) = normalize::host_and_port(url)?;
                hosts.push(PendingHost {
                    key,
                    target: ProbeTarget::new(host, port),
                });
            }
            debug!(hosts = hosts.len(), "scanning URL list");

            let results =
                scanner::probe_hosts(&hosts, self.prober.clone(), self.config.batch_size).await;

            let rows: Vec<(String, HostStatus)> = results
                .iter()
                .map(|(host, outcome)| (host.key.clone(), HostStatus::from(*outcome)))
                .collect();
            self.store.upsert_many(&rows).map_err(|e| {
                error!(error = %e, "error storing TLS scan results");
                e
            })?;

            let mut report = UrlScanReport {
                processed: urls.len() as u64,
                ..UrlScanReport::default()
            };
            for (host, outcome) in results {
                match outcome {
                    ProbeOutcome::Passing => report.passing += 1,
                    ProbeOutcome::Failing => {
                        report.failing += 1;
                        report.failing_urls.push(host.key);
                    }
                }
            }
            report.failing_urls.sort();
            Ok::<_, ScanError>(report)
        }
        .instrument(self.span.clone())
        .await
    }

    /// URLs a new scan would probe: extracted candidates minus sticky passing hosts.
    pub async fn discover_urls(&self) -> Result<UrlsToScan> {
        async {
            let candidates = self.extract(self.config.roots.clone()).await;
            let passing = self.sticky_passing_keys()?;
            let urls_to_scan = candidates
                .iter()
                .filter(|c| match normalize::normalize(&c.to_string()) {
                    Ok(key) => !passing.contains(&key),
                    Err(_) => false,
                })
                .map(|c| c.to_string())
                .collect();
            Ok::<_, ScanError>(UrlsToScan { urls_to_scan })
        }
        .instrument(self.span.clone())
        .await
    }

    /// Everything in the store; `has_data` is false when the table is missing.
    pub async fn get_results(&self) -> Result<ScanSummary> {
        if !self.store.table_exists()? {
            return Ok(ScanSummary::default());
        }
        let passing_urls = self.store.select_by_status(HostStatus::Passing)?;
        let failing_urls = self.store.select_by_status(HostStatus::Failing)?;
        Ok(ScanSummary {
            has_data: true,
            passing: passing_urls.len() as u64,
            failing: failing_urls.len() as u64,
            passing_urls,
            failing_urls,
        })
    }

    /// Drop and recreate the results table and forget the current session.
    pub async fn reset(&self) -> Result<()> {
        async {
            let mut inner = self.inner.lock().await;
            inner.begin(ScanState::Idle);
            if self.store.table_exists()? {
                self.store.drop_table()?;
                info!("TLS scan data has been fully reset");
            } else {
                warn!("reset requested but the results table does not exist");
            }
            self.store.create_table()?;
            Ok::<_, ScanError>(())
        }
        .instrument(self.span.clone())
        .await
    }

    async fn extract(&self, roots: Vec<PathBuf>) -> Vec<CandidateUrl> {
        let opts = ExtractOptions {
            extensions: self.config.extensions.clone(),
            max_file_bytes: self.config.max_file_bytes,
        };
        let span = Span::current();
        let walk = tokio::task::spawn_blocking(move || {
            span.in_scope(|| extractor::extract_urls(&roots, &opts))
        });
        match walk.await {
            Ok(urls) => urls,
            Err(e) => {
                error!(error = %e, "URL extraction task failed");
                Vec::new()
            }
        }
    }

    fn sticky_passing_keys(&self) -> Result<HashSet<String>> {
        if !self.config.sticky_passing {
            return Ok(HashSet::new());
        }
        Ok(self
            .store
            .select_by_status(HostStatus::Passing)?
            .into_iter()
            .collect())
    }

    /// Normalize and dedup candidates, drop sticky passing hosts, mark the rest pending.
    fn queue_pending(&self, candidates: &[CandidateUrl]) -> Result<Vec<PendingHost>> {
        if !self.store.table_exists()? {
            self.store.create_table()?;
        }
        let passing = self.sticky_passing_keys()?;
        let mut seen = HashSet::new();
        let mut pending = Vec::new();

        for candidate in candidates {
            let key = match normalize::normalize(&candidate.to_string()) {
                Ok(k) => k,
                Err(e) => {
                    warn!(url = %candidate, error = %e, "invalid candidate skipped");
                    continue;
                }
            };
            if passing.contains(&key) {
                debug!(key = %key, "already passing, not re-probed");
                continue;
            }
            if seen.insert(key.clone()) {
                pending.push(PendingHost {
                    key,
                    target: ProbeTarget::new(candidate.host.clone(), candidate.port),
                });
            }
        }

        let rows: Vec<(String, HostStatus)> = pending
            .iter()
            .map(|host| (host.key.clone(), HostStatus::Pending))
            .collect();
        self.store.upsert_many(&rows)?;
        Ok(pending)
    }
}
