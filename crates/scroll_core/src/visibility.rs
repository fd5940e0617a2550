//! Visibility signals: the capability that tells the controller when its
//! sentinel anchor comes close to the viewport.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use shared::domain::{AnchorId, WatchId};
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::debug;

pub const DEFAULT_THRESHOLD: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserveOptions {
    /// Fraction of the anchor that must be inside the viewport.
    pub threshold: f32,
    /// Extra pixels around the viewport counted as "inside".
    pub root_margin_px: u32,
}

impl Default for ObserveOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            root_margin_px: 0,
        }
    }
}

impl ObserveOptions {
    pub fn is_inside(&self, ratio: f32) -> bool {
        ratio > 0.0 && ratio >= self.threshold
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisibilityReport {
    pub anchor: AnchorId,
    pub is_intersecting: bool,
    pub intersection_ratio: f32,
}

pub struct VisibilityWatch {
    pub id: WatchId,
    pub reports: UnboundedReceiver<VisibilityReport>,
}

/// Source of visibility reports for one anchor at a time per watch.
///
/// Implementations may report the same entry more than once; consumers are
/// expected to de-duplicate.
pub trait VisibilitySignal: Send + Sync {
    fn observe(&self, anchor: AnchorId, options: &ObserveOptions) -> Result<VisibilityWatch>;
    fn unobserve(&self, watch: WatchId);
}

pub struct MissingVisibilitySignal;

impl VisibilitySignal for MissingVisibilitySignal {
    fn observe(&self, anchor: AnchorId, _options: &ObserveOptions) -> Result<VisibilityWatch> {
        Err(anyhow!(
            "visibility signal is unavailable for anchor {}",
            anchor
        ))
    }

    fn unobserve(&self, _watch: WatchId) {}
}

struct ManualWatch {
    anchor: AnchorId,
    options: ObserveOptions,
    tx: UnboundedSender<VisibilityReport>,
}

#[derive(Default)]
struct ManualState {
    next_id: u64,
    watches: HashMap<WatchId, ManualWatch>,
}

/// Signal driven by the host: whoever knows the layout calls [`notify`].
///
/// [`notify`]: ManualVisibilitySignal::notify
#[derive(Default)]
pub struct ManualVisibilitySignal {
    inner: Mutex<ManualState>,
}

impl ManualVisibilitySignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers a report for `anchor` to every live watch on it and returns
    /// how many watches received it.
    pub fn notify(&self, anchor: AnchorId, intersection_ratio: f32) -> usize {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.watches.retain(|_, watch| !watch.tx.is_closed());

        let mut delivered = 0;
        for watch in guard.watches.values().filter(|watch| watch.anchor == anchor) {
            let report = VisibilityReport {
                anchor,
                is_intersecting: watch.options.is_inside(intersection_ratio),
                intersection_ratio,
            };
            if watch.tx.send(report).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    pub fn active_watches(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .watches
            .len()
    }

    pub fn watched_anchors(&self) -> Vec<AnchorId> {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut anchors = guard
            .watches
            .values()
            .map(|watch| watch.anchor)
            .collect::<Vec<_>>();
        anchors.sort();
        anchors
    }
}

impl VisibilitySignal for ManualVisibilitySignal {
    fn observe(&self, anchor: AnchorId, options: &ObserveOptions) -> Result<VisibilityWatch> {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.next_id += 1;
        let id = WatchId(guard.next_id);
        let (tx, reports) = mpsc::unbounded_channel();
        guard.watches.insert(
            id,
            ManualWatch {
                anchor,
                options: *options,
                tx,
            },
        );
        Ok(VisibilityWatch { id, reports })
    }

    fn unobserve(&self, watch: WatchId) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .watches
            .remove(&watch);
    }
}

/// Answers how much of an anchor is currently inside the viewport,
/// expanded by `root_margin_px` on every side.
pub trait ViewportProbe: Send + Sync + 'static {
    fn intersection_ratio(&self, anchor: AnchorId, root_margin_px: u32) -> f32;
}

/// Signal that samples a [`ViewportProbe`] on a fixed interval.
///
/// Reports entries and exits of the threshold region. The first sample is
/// taken as soon as the watch starts, so an anchor that is already visible
/// gets an immediate report.
pub struct PollingVisibilitySignal<P: ViewportProbe> {
    probe: Arc<P>,
    poll_interval: Duration,
    next_id: AtomicU64,
    tasks: Mutex<HashMap<WatchId, JoinHandle<()>>>,
}

impl<P: ViewportProbe> PollingVisibilitySignal<P> {
    pub fn new(probe: Arc<P>, poll_interval: Duration) -> Self {
        Self {
            probe,
            poll_interval,
            next_id: AtomicU64::new(0),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn active_watches(&self) -> usize {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|_, task| !task.is_finished());
        tasks.len()
    }
}

impl<P: ViewportProbe> VisibilitySignal for PollingVisibilitySignal<P> {
    fn observe(&self, anchor: AnchorId, options: &ObserveOptions) -> Result<VisibilityWatch> {
        let runtime = tokio::runtime::Handle::try_current()
            .context("polling visibility signal needs a tokio runtime")?;
        if self.poll_interval.is_zero() {
            return Err(anyhow!("poll interval must be greater than zero"));
        }

        let id = WatchId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, reports) = mpsc::unbounded_channel();
        let probe = Arc::clone(&self.probe);
        let options = *options;
        let poll_interval = self.poll_interval;

        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut inside = false;
            loop {
                ticker.tick().await;
                if tx.is_closed() {
                    break;
                }
                let ratio = probe.intersection_ratio(anchor, options.root_margin_px);
                let now_inside = options.is_inside(ratio);
                if now_inside != inside {
                    let report = VisibilityReport {
                        anchor,
                        is_intersecting: now_inside,
                        intersection_ratio: ratio,
                    };
                    if tx.send(report).is_err() {
                        break;
                    }
                    inside = now_inside;
                }
            }
            debug!(anchor = anchor.0, watch = id.0, "visibility poller stopped");
        });

        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, task);
        Ok(VisibilityWatch { id, reports })
    }

    fn unobserve(&self, watch: WatchId) {
        if let Some(task) = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&watch)
        {
            task.abort();
        }
    }
}

impl<P: ViewportProbe> Drop for PollingVisibilitySignal<P> {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, task) in tasks.drain() {
            task.abort();
        }
    }
}

#[cfg(test)]
#[path = "tests/visibility_tests.rs"]
mod tests;
