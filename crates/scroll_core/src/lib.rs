use std::{
    future::Future,
    marker::PhantomData,
    sync::{Arc, Mutex as StdMutex, PoisonError, Weak},
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use shared::{
    domain::{AnchorId, Epoch, PageIndex, QueryParams, WatchId},
    error::FetchFailureReport,
    protocol::{FetchKind, Page},
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

pub mod config;
pub mod error;
pub mod state;
pub mod visibility;

pub use config::ControllerConfig;
pub use error::FetchFailure;
pub use state::{
    ControllerSnapshot, FetchTicket, IgnoreReason, PagingEvent, PagingPhase, PagingState,
    ParamsChange, Transition,
};
pub use visibility::{
    ManualVisibilitySignal, MissingVisibilitySignal, ObserveOptions, PollingVisibilitySignal,
    ViewportProbe, VisibilityReport, VisibilitySignal, VisibilityWatch,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[async_trait]
pub trait PageSource<T: Send>: Send + Sync {
    async fn fetch_page(&self, page: PageIndex, params: &QueryParams) -> Result<Page<T>>;
}

pub struct MissingPageSource;

#[async_trait]
impl<T: Send + 'static> PageSource<T> for MissingPageSource {
    async fn fetch_page(&self, page: PageIndex, _params: &QueryParams) -> Result<Page<T>> {
        Err(anyhow!("page source is unavailable for page {}", page))
    }
}

/// Adapts an async closure `(page, params) -> Result<Page<T>>` into a
/// [`PageSource`].
pub struct FnPageSource<F, T> {
    fetch: F,
    _item: PhantomData<fn() -> T>,
}

impl<F, T> FnPageSource<F, T> {
    pub fn new(fetch: F) -> Self {
        Self {
            fetch,
            _item: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut, T> PageSource<T> for FnPageSource<F, T>
where
    F: Fn(PageIndex, QueryParams) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Page<T>>> + Send + 'static,
    T: Send + 'static,
{
    async fn fetch_page(&self, page: PageIndex, params: &QueryParams) -> Result<Page<T>> {
        (self.fetch)(page, params.clone()).await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    EpochStarted {
        epoch: Epoch,
        params: QueryParams,
    },
    FetchStarted {
        epoch: Epoch,
        page: PageIndex,
        kind: FetchKind,
    },
    PageApplied {
        epoch: Epoch,
        page: PageIndex,
        kind: FetchKind,
        appended: usize,
        has_more: bool,
    },
    FetchFailed(FetchFailureReport),
    StaleResultDiscarded {
        ticket_epoch: Epoch,
        current_epoch: Epoch,
    },
    Exhausted {
        epoch: Epoch,
    },
    WatchChanged {
        anchor: Option<AnchorId>,
        watch: Option<WatchId>,
    },
    Disposed,
}

/// What a load request ended up doing. Fetch failures are reported through
/// tracing and [`ControllerEvent::FetchFailed`], never returned as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { appended: usize, has_more: bool },
    Failed,
    Skipped(IgnoreReason),
    Discarded,
}

struct ActiveWatch {
    id: WatchId,
    anchor: AnchorId,
    signal: Arc<dyn VisibilitySignal>,
    task: JoinHandle<()>,
}

impl Drop for ActiveWatch {
    fn drop(&mut self) {
        self.signal.unobserve(self.id);
        self.task.abort();
    }
}

#[derive(Default)]
struct WatchSlot {
    anchor: Option<AnchorId>,
    active: Option<ActiveWatch>,
}

/// Drives infinite-scroll pagination against a [`PageSource`].
///
/// Lock order is `state` before `watch`; the watch slot is never held across
/// an await.
pub struct PaginatedFetchController<T: Send + 'static> {
    source: Arc<dyn PageSource<T>>,
    signal: Arc<dyn VisibilitySignal>,
    config: ControllerConfig,
    state: Mutex<PagingState<T>>,
    watch: StdMutex<WatchSlot>,
    events: broadcast::Sender<ControllerEvent>,
}

impl<T> PaginatedFetchController<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(
        source: Arc<dyn PageSource<T>>,
        initial_params: QueryParams,
        config: ControllerConfig,
    ) -> Arc<Self> {
        Self::new_with_signal(
            source,
            Arc::new(MissingVisibilitySignal),
            initial_params,
            config,
        )
    }

    pub fn new_with_signal(
        source: Arc<dyn PageSource<T>>,
        signal: Arc<dyn VisibilitySignal>,
        initial_params: QueryParams,
        config: ControllerConfig,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            source,
            signal,
            state: Mutex::new(PagingState::new(config.initial_page, initial_params)),
            config,
            watch: StdMutex::new(WatchSlot::default()),
            events,
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    pub async fn fetch_initial(self: &Arc<Self>) -> LoadOutcome {
        self.request(FetchKind::Initial).await
    }

    /// Fetches the next page of the current epoch.
    ///
    /// Until the epoch's first page has loaded this performs that initial
    /// fetch instead: the state reports `initial_loading`, the initial page
    /// is requested and the cursor lands on the page after it.
    pub async fn load_more(self: &Arc<Self>) -> LoadOutcome {
        self.request(FetchKind::Continuation).await
    }

    /// Shallow-merges `partial` into the current parameters, starts a new
    /// epoch and fetches its first page.
    pub async fn update_params(self: &Arc<Self>, partial: QueryParams) -> LoadOutcome {
        self.restart(ParamsChange::Merge(partial)).await
    }

    pub async fn reset(self: &Arc<Self>) -> LoadOutcome {
        self.restart(ParamsChange::Keep).await
    }

    pub async fn restore_initial_params(self: &Arc<Self>) -> LoadOutcome {
        let initial = self.state.lock().await.initial_params().clone();
        self.restart(ParamsChange::Replace(initial)).await
    }

    /// Stops all pagination. Pending fetches are left to finish and their
    /// results dropped.
    pub async fn dispose(&self) {
        let transition = {
            let mut state = self.state.lock().await;
            let transition = state.update(PagingEvent::Disposed);
            self.lock_watch().active.take();
            transition
        };
        if transition == Transition::Disposed {
            info!("paginated fetch controller disposed");
            self.emit(ControllerEvent::WatchChanged {
                anchor: None,
                watch: None,
            });
            self.emit(ControllerEvent::Disposed);
        }
    }

    /// Binds the sentinel anchor. Any watch on a previous anchor is released
    /// before the new one is established.
    pub async fn attach_anchor(self: &Arc<Self>, anchor: AnchorId) -> Result<()> {
        let state = self.state.lock().await;
        if state.is_disposed() {
            return Err(anyhow!("controller is disposed"));
        }
        let mut slot = self.lock_watch();
        slot.active.take();
        slot.anchor = Some(anchor);
        if !state.wants_watch() {
            debug!(anchor = anchor.0, "anchor attached; pagination exhausted, not watching");
            return Ok(());
        }
        let active = self
            .observe_anchor(anchor)
            .with_context(|| format!("failed to watch anchor {anchor}"))?;
        let watch = active.id;
        slot.active = Some(active);
        drop(slot);
        drop(state);
        self.emit(ControllerEvent::WatchChanged {
            anchor: Some(anchor),
            watch: Some(watch),
        });
        Ok(())
    }

    pub async fn detach_anchor(&self) {
        let _state = self.state.lock().await;
        let mut slot = self.lock_watch();
        slot.anchor = None;
        if slot.active.take().is_some() {
            self.emit(ControllerEvent::WatchChanged {
                anchor: None,
                watch: None,
            });
        }
    }

    pub fn anchor(&self) -> Option<AnchorId> {
        self.lock_watch().anchor
    }

    pub fn active_watch(&self) -> Option<WatchId> {
        self.lock_watch().active.as_ref().map(|active| active.id)
    }

    pub async fn snapshot(&self) -> ControllerSnapshot<T> {
        self.state.lock().await.snapshot()
    }

    pub async fn items(&self) -> Vec<T> {
        self.state.lock().await.items().to_vec()
    }

    pub async fn has_more(&self) -> bool {
        self.state.lock().await.has_more()
    }

    pub async fn is_loading(&self) -> bool {
        self.state.lock().await.in_flight()
    }

    pub async fn params(&self) -> QueryParams {
        self.state.lock().await.params().clone()
    }

    async fn request(self: &Arc<Self>, kind: FetchKind) -> LoadOutcome {
        let claimed = self.state.lock().await.request(kind);
        match claimed {
            Ok(ticket) => self.spawn_run(ticket).await,
            Err(reason) => {
                debug!(?reason, %kind, "load request skipped");
                LoadOutcome::Skipped(reason)
            }
        }
    }

    async fn restart(self: &Arc<Self>, params: ParamsChange) -> LoadOutcome {
        let ticket = {
            let mut state = self.state.lock().await;
            let ticket = match state.restart(params) {
                Ok(ticket) => ticket,
                Err(reason) => return LoadOutcome::Skipped(reason),
            };
            self.rearm_watch(&state);
            ticket
        };

        let (epoch, params) = (ticket.epoch, ticket.params.clone());
        info!(epoch = epoch.0, params = ?params, "pagination epoch started");
        self.emit(ControllerEvent::EpochStarted { epoch, params });
        self.spawn_run(ticket).await
    }

    /// Runs the fetch on its own task so that dropping the caller's future
    /// cannot leave the in-flight slot claimed.
    async fn spawn_run(self: &Arc<Self>, ticket: FetchTicket) -> LoadOutcome {
        let controller = Arc::clone(self);
        match tokio::spawn(async move { controller.run(ticket).await }).await {
            Ok(outcome) => outcome,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(err) => {
                debug!(error = %err, "page fetch task cancelled");
                LoadOutcome::Discarded
            }
        }
    }

    async fn run(self: &Arc<Self>, ticket: FetchTicket) -> LoadOutcome {
        let FetchTicket {
            epoch, page, kind, ..
        } = ticket;
        debug!(epoch = epoch.0, page = page.0, %kind, "page fetch started");
        self.emit(ControllerEvent::FetchStarted { epoch, page, kind });

        let result = self.source.fetch_page(page, &ticket.params).await;

        let mut state = self.state.lock().await;
        match result {
            Ok(fetched) => match state.update(PagingEvent::FetchSucceeded {
                ticket,
                page: fetched,
            }) {
                Transition::Applied { appended, has_more } => {
                    self.rearm_watch(&state);
                    drop(state);
                    debug!(
                        epoch = epoch.0,
                        page = page.0,
                        %kind,
                        appended,
                        has_more,
                        "page applied"
                    );
                    self.emit(ControllerEvent::PageApplied {
                        epoch,
                        page,
                        kind,
                        appended,
                        has_more,
                    });
                    if !has_more {
                        info!(epoch = epoch.0, "pagination exhausted");
                        self.emit(ControllerEvent::Exhausted { epoch });
                    }
                    LoadOutcome::Loaded { appended, has_more }
                }
                transition => {
                    drop(state);
                    self.discarded(transition)
                }
            },
            Err(source) => {
                let failure = FetchFailure {
                    epoch,
                    page,
                    kind,
                    source,
                };
                match state.update(PagingEvent::FetchFailed { ticket }) {
                    Transition::Failed => {
                        self.rearm_watch(&state);
                        drop(state);
                        warn!(
                            epoch = epoch.0,
                            page = page.0,
                            %kind,
                            error = %format!("{:#}", failure.source),
                            "page fetch failed; pagination stopped for this epoch"
                        );
                        self.emit(ControllerEvent::FetchFailed(failure.report()));
                        self.emit(ControllerEvent::Exhausted { epoch });
                        LoadOutcome::Failed
                    }
                    transition => {
                        drop(state);
                        debug!(error = %failure, "stale fetch failure ignored");
                        self.discarded(transition)
                    }
                }
            }
        }
    }

    fn discarded(&self, transition: Transition) -> LoadOutcome {
        if let Transition::Stale {
            ticket_epoch,
            current_epoch,
        } = transition
        {
            debug!(
                ticket_epoch = ticket_epoch.0,
                current_epoch = current_epoch.0,
                "discarding result from a previous epoch"
            );
            self.emit(ControllerEvent::StaleResultDiscarded {
                ticket_epoch,
                current_epoch,
            });
        }
        LoadOutcome::Discarded
    }

    /// Replaces the active watch so the signal re-reports the anchor's current
    /// visibility, or releases it when pagination can no longer continue.
    /// Callers hold the state lock.
    fn rearm_watch(self: &Arc<Self>, state: &PagingState<T>) {
        let mut slot = self.lock_watch();
        let had_watch = slot.active.take().is_some();
        let anchor = match slot.anchor {
            Some(anchor) if state.wants_watch() => anchor,
            _ => {
                drop(slot);
                if had_watch {
                    debug!("visibility watch released");
                    self.emit(ControllerEvent::WatchChanged {
                        anchor: None,
                        watch: None,
                    });
                }
                return;
            }
        };

        match self.observe_anchor(anchor) {
            Ok(active) => {
                let watch = active.id;
                slot.active = Some(active);
                drop(slot);
                self.emit(ControllerEvent::WatchChanged {
                    anchor: Some(anchor),
                    watch: Some(watch),
                });
            }
            Err(err) => {
                drop(slot);
                warn!(anchor = anchor.0, error = %format!("{err:#}"), "failed to re-arm visibility watch");
            }
        }
    }

    fn observe_anchor(self: &Arc<Self>, anchor: AnchorId) -> Result<ActiveWatch> {
        let VisibilityWatch { id, mut reports } =
            self.signal.observe(anchor, &self.config.observe)?;
        let controller = Arc::downgrade(self);
        let task = tokio::runtime::Handle::try_current()
            .context("visibility watch needs a tokio runtime")
            .map(|runtime| {
                runtime.spawn(async move {
                    while let Some(report) = reports.recv().await {
                        let Some(controller) = Weak::upgrade(&controller) else {
                            break;
                        };
                        controller.on_visibility(report).await;
                    }
                })
            });
        let task = match task {
            Ok(task) => task,
            Err(err) => {
                self.signal.unobserve(id);
                return Err(err);
            }
        };
        debug!(anchor = anchor.0, watch = id.0, "visibility watch established");
        Ok(ActiveWatch {
            id,
            anchor,
            signal: Arc::clone(&self.signal),
            task,
        })
    }

    async fn on_visibility(self: &Arc<Self>, report: VisibilityReport) {
        if !report.is_intersecting {
            return;
        }
        let ticket = {
            let mut state = self.state.lock().await;
            let watching = self
                .lock_watch()
                .active
                .as_ref()
                .is_some_and(|active| active.anchor == report.anchor);
            if !watching || !state.accepts_trigger() {
                debug!(
                    anchor = report.anchor.0,
                    ratio = report.intersection_ratio,
                    "visibility report ignored"
                );
                return;
            }
            match state.request(FetchKind::Continuation) {
                Ok(ticket) => ticket,
                Err(_) => return,
            }
        };

        // Run the fetch outside the watch task so later reports keep being
        // drained (and refused) while it is in flight.
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            controller.run(ticket).await;
        });
    }

    fn lock_watch(&self) -> std::sync::MutexGuard<'_, WatchSlot> {
        self.watch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ControllerEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
