use crate::probe::Prober;
use crate::types::{PendingHost, ProbeOutcome};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

/// Probe every host concurrently and return `(host, outcome)` in input order.
///
/// - At most `concurrency` probes are in flight (a `Semaphore` bounds them).
/// - Each host runs in its own task, so a stalled peer only holds its own permit
///   until its probe timeout elapses.
/// - Returns only after every task has finished. A task that panics counts as Failing.
pub async fn probe_hosts(
    hosts: &[PendingHost],
    prober: Arc<dyn Prober>,
    concurrency: usize,
) -> Vec<(PendingHost, ProbeOutcome)> {
    let sem = Arc::new(Semaphore::new(concurrency.clamp(1, 1_000)));
    let mut set = JoinSet::new();

    for (idx, host) in hosts.iter().enumerate() {
        let permit = sem
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore in scope");
        let prober = prober.clone();
        let target = host.target.clone();

        set.spawn(async move {
            let _permit = permit; // keep permit until task completes
            let outcome = prober.probe(&target).await;
            debug!(%target, ?outcome, "probe finished");
            (idx, outcome)
        });
    }

    let mut outcomes = vec![ProbeOutcome::Failing; hosts.len()];
    while let Some(res) = set.join_next().await {
        match res {
            Ok((idx, outcome)) => outcomes[idx] = outcome,
            Err(e) => error!(error = %e, "probe task aborted"),
        }
    }

    hosts.iter().cloned().zip(outcomes).collect()
}
