//! Kubernetes resource watcher.
//!
//! Watches SriovFecNodeConfig resources in the daemon's namespace, turns raw
//! watch events into create/update/delete events, filters them through the
//! node event filter and drives the reconciler. Passes run one at a time.
//! Besides events, a pass is also triggered by the resync timer or by the
//! error backoff.

use crate::backoff::FibonacciBackoff;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::predicate::{node_event_filter, EventPredicate, NodeEventFilter, ResourceEvent};
use crate::reconciler::{Reconciler, Requeue, RESYNC_PERIOD};
use crds::SriovFecNodeConfig;
use futures::StreamExt;
use kube::{Api, ResourceExt};
use kube_runtime::{watcher, WatchStreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Turns watch events into reconcile triggers.
///
/// Keeps the last seen copy of every object so an `Apply` can be told apart
/// as a create or an update, and so objects that vanished while the watch
/// was re-listing still produce a delete.
#[derive(Debug)]
pub struct EventTracker {
    filter: NodeEventFilter,
    last_seen: HashMap<String, SriovFecNodeConfig>,
    relisted: Option<HashSet<String>>,
}

impl EventTracker {
    pub fn new(filter: NodeEventFilter) -> Self {
        Self {
            filter,
            last_seen: HashMap::new(),
            relisted: None,
        }
    }

    /// Names to reconcile because of `event`.
    pub fn handle(&mut self, event: watcher::Event<SriovFecNodeConfig>) -> Vec<String> {
        match event {
            watcher::Event::Init => {
                debug!("SriovFecNodeConfig watcher (re)listing");
                self.relisted = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(obj) => {
                if let Some(relisted) = self.relisted.as_mut() {
                    relisted.insert(obj.name_any());
                }
                self.applied(obj).into_iter().collect()
            }
            watcher::Event::Apply(obj) => self.applied(obj).into_iter().collect(),
            watcher::Event::Delete(obj) => self.deleted(&obj).into_iter().collect(),
            watcher::Event::InitDone => {
                let relisted = self.relisted.take().unwrap_or_default();
                let gone: Vec<String> = self
                    .last_seen
                    .keys()
                    .filter(|name| !relisted.contains(*name))
                    .cloned()
                    .collect();
                let mut names = Vec::new();
                for name in gone {
                    if let Some(obj) = self.last_seen.get(&name).cloned() {
                        names.extend(self.deleted(&obj));
                    }
                }
                names
            }
        }
    }

    fn applied(&mut self, obj: SriovFecNodeConfig) -> Option<String> {
        let name = obj.name_any();
        let previous = self.last_seen.insert(name.clone(), obj);
        let current = self.last_seen.get(&name)?;
        let event = match previous.as_ref() {
            Some(old) => ResourceEvent::Update { old, new: current },
            None => ResourceEvent::Create(current),
        };
        self.filter.admits(&event).then_some(name)
    }

    fn deleted(&mut self, obj: &SriovFecNodeConfig) -> Option<String> {
        let name = obj.name_any();
        self.last_seen.remove(&name);
        self.filter
            .admits(&ResourceEvent::Delete(obj))
            .then_some(name)
    }
}

/// Watches SriovFecNodeConfig resources for changes.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    api: Api<SriovFecNodeConfig>,
    metrics: Arc<Metrics>,
    ready: Arc<AtomicBool>,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(
        reconciler: Arc<Reconciler>,
        api: Api<SriovFecNodeConfig>,
        metrics: Arc<Metrics>,
        ready: Arc<AtomicBool>,
    ) -> Self {
        Self {
            reconciler,
            api,
            metrics,
            ready,
        }
    }

    /// Watches until the stream ends.
    pub async fn watch(&self) -> Result<(), ControllerError> {
        let node_name = self.reconciler.node_name().to_string();
        info!(node = %node_name, "Starting SriovFecNodeConfig watcher");

        let mut stream = Box::pin(watcher(self.api.clone(), watcher::Config::default()).default_backoff());
        let mut tracker = EventTracker::new(node_event_filter(&node_name));
        let mut backoff = FibonacciBackoff::reconcile_default();
        let mut next_run: Option<Instant> = None;

        loop {
            // Placeholder deadline when nothing is scheduled; the branch is disabled then
            let deadline = next_run.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            let trigger = tokio::select! {
                event = stream.next() => match event {
                    Some(Ok(event)) => {
                        if matches!(event, watcher::Event::InitDone) {
                            self.ready.store(true, Ordering::SeqCst);
                            info!("SriovFecNodeConfig watcher initialization complete");
                        }
                        tracker.handle(event).into_iter().next()
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "SriovFecNodeConfig watch error - retrying");
                        None
                    }
                    None => {
                        return Err(ControllerError::Watch("SriovFecNodeConfig watch stream ended".to_string()));
                    }
                },
                () = tokio::time::sleep_until(deadline), if next_run.is_some() => {
                    debug!(node = %node_name, "resync");
                    Some(node_name.clone())
                }
            };

            if let Some(name) = trigger {
                next_run = Some(self.run_pass(&name, &mut backoff).await);
            }
        }
    }

    /// Runs one pass and returns when the next timed pass is due.
    async fn run_pass(&self, name: &str, backoff: &mut FibonacciBackoff) -> Instant {
        let started = Instant::now();
        let result = self.reconciler.reconcile(name).await;
        self.metrics
            .observe_reconcile(started.elapsed().as_secs_f64(), result.as_ref().err().map(ControllerError::class));

        let delay = next_delay(&result, backoff);
        if let Err(e) = &result {
            error!(
                node = %name,
                error = %e,
                class = e.class().as_str(),
                retry_in_secs = delay.as_secs(),
                "Reconciliation failed"
            );
        }
        Instant::now() + delay
    }
}

/// Delay until the next timed pass after `result`.
///
/// Every outcome schedules one, so the resync keeps running while no events
/// arrive (e.g. a node waiting for its reboot).
fn next_delay(result: &Result<Requeue, ControllerError>, backoff: &mut FibonacciBackoff) -> Duration {
    match result {
        Ok(Requeue::After(delay)) => {
            backoff.reset();
            *delay
        }
        Ok(Requeue::OnEvent) => {
            backoff.reset();
            RESYNC_PERIOD
        }
        Err(_) => backoff.next_backoff(),
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("reconciler", &self.reconciler)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{node_config, physical_function, TEST_PF};
    use crds::SriovFecNodeConfigStatus;

    fn tracker() -> EventTracker {
        EventTracker::new(node_event_filter("worker-1"))
    }

    #[test]
    fn test_initial_list_triggers_own_node_only() {
        let mut t = tracker();
        assert!(t.handle(watcher::Event::Init).is_empty());
        assert_eq!(t.handle(watcher::Event::InitApply(node_config("worker-1", 1, vec![]))), vec!["worker-1"]);
        assert!(t.handle(watcher::Event::InitApply(node_config("worker-2", 1, vec![]))).is_empty());
        assert!(t.handle(watcher::Event::InitDone).is_empty());
    }

    #[test]
    fn test_status_write_echo_is_ignored() {
        let mut t = tracker();
        t.handle(watcher::Event::Apply(node_config("worker-1", 1, vec![])));

        let mut echoed = node_config("worker-1", 1, vec![]);
        echoed.status = Some(SriovFecNodeConfigStatus::default());
        assert!(t.handle(watcher::Event::Apply(echoed)).is_empty());

        let edited = node_config("worker-1", 2, vec![physical_function(TEST_PF)]);
        assert_eq!(t.handle(watcher::Event::Apply(edited)), vec!["worker-1"]);
    }

    #[test]
    fn test_relist_without_changes_is_quiet() {
        let mut t = tracker();
        t.handle(watcher::Event::Apply(node_config("worker-1", 3, vec![])));

        t.handle(watcher::Event::Init);
        assert!(t.handle(watcher::Event::InitApply(node_config("worker-1", 3, vec![]))).is_empty());
        assert!(t.handle(watcher::Event::InitDone).is_empty());
    }

    #[test]
    fn test_delete_triggers_recreation() {
        let mut t = tracker();
        let config = node_config("worker-1", 1, vec![]);
        t.handle(watcher::Event::Apply(config.clone()));
        assert_eq!(t.handle(watcher::Event::Delete(config)), vec!["worker-1"]);
    }

    #[test]
    fn test_every_outcome_schedules_a_pass() {
        let mut backoff = FibonacciBackoff::reconcile_default();

        assert_eq!(next_delay(&Ok(Requeue::OnEvent), &mut backoff), RESYNC_PERIOD);
        assert_eq!(
            next_delay(&Ok(Requeue::After(Duration::from_secs(5))), &mut backoff),
            Duration::from_secs(5)
        );

        let failed = Err(ControllerError::Api("apiserver unavailable".to_string()));
        let delays: Vec<u64> = (0..3).map(|_| next_delay(&failed, &mut backoff).as_secs()).collect();
        assert_eq!(delays, vec![60, 60, 120]);

        // A successful pass starts the backoff over
        assert_eq!(next_delay(&Ok(Requeue::OnEvent), &mut backoff), RESYNC_PERIOD);
        assert_eq!(next_delay(&failed, &mut backoff), Duration::from_secs(60));
    }

    #[test]
    fn test_delete_missed_during_relist_is_detected() {
        let mut t = tracker();
        t.handle(watcher::Event::Apply(node_config("worker-1", 1, vec![])));

        t.handle(watcher::Event::Init);
        assert_eq!(t.handle(watcher::Event::InitDone), vec!["worker-1"]);
        // Recreated placeholder shows up as a create
        assert_eq!(t.handle(watcher::Event::Apply(node_config("worker-1", 1, vec![]))), vec!["worker-1"]);
    }
}
