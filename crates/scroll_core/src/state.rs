//! Pagination bookkeeping as a reducer: every change to the collection, the
//! cursor or the loading flags goes through [`PagingState::update`] or one of
//! the narrower entry points it is built from.

use shared::{
    domain::{Epoch, PageIndex, QueryParams},
    protocol::{FetchKind, Page},
};

/// A fetch the state machine has agreed to start.
///
/// The ticket pins the epoch and parameters current at initiation; its
/// result is only applied while that epoch is still current.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchTicket {
    pub epoch: Epoch,
    pub page: PageIndex,
    pub kind: FetchKind,
    pub params: QueryParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingPhase {
    Idle,
    InitialLoading,
    ContinuationLoading,
    Exhausted,
    Disposed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    InFlight,
    Exhausted,
    Disposed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamsChange {
    Keep,
    Merge(QueryParams),
    Replace(QueryParams),
}

#[derive(Debug)]
pub enum PagingEvent<T> {
    InitialRequested,
    ContinuationRequested,
    FetchSucceeded { ticket: FetchTicket, page: Page<T> },
    FetchFailed { ticket: FetchTicket },
    EpochReset { params: ParamsChange },
    Disposed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Started(FetchTicket),
    Applied { appended: usize, has_more: bool },
    Failed,
    EpochStarted(Epoch),
    Ignored(IgnoreReason),
    Stale { ticket_epoch: Epoch, current_epoch: Epoch },
    Disposed,
}

/// Read-only copy of the state handed to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSnapshot<T> {
    pub items: Vec<T>,
    pub initial_loading: bool,
    pub continuation_loading: bool,
    pub has_more: bool,
    pub page: PageIndex,
    pub epoch: Epoch,
    pub params: QueryParams,
    pub phase: PagingPhase,
}

#[derive(Debug, Clone)]
pub struct PagingState<T> {
    items: Vec<T>,
    page: PageIndex,
    initial_page: PageIndex,
    params: QueryParams,
    initial_params: QueryParams,
    has_more: bool,
    initial_loading: bool,
    continuation_loading: bool,
    // Whether the current epoch's first page has landed.
    primed: bool,
    epoch: Epoch,
    disposed: bool,
}

impl<T> PagingState<T> {
    pub fn new(initial_page: PageIndex, initial_params: QueryParams) -> Self {
        Self {
            items: Vec::new(),
            page: initial_page,
            initial_page,
            params: initial_params.clone(),
            initial_params,
            has_more: true,
            initial_loading: false,
            continuation_loading: false,
            primed: false,
            epoch: Epoch::default(),
            disposed: false,
        }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn page(&self) -> PageIndex {
        self.page
    }

    pub fn initial_page(&self) -> PageIndex {
        self.initial_page
    }

    pub fn params(&self) -> &QueryParams {
        &self.params
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn initial_loading(&self) -> bool {
        self.initial_loading
    }

    pub fn continuation_loading(&self) -> bool {
        self.continuation_loading
    }

    pub fn in_flight(&self) -> bool {
        self.initial_loading || self.continuation_loading
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// True when a visibility report may start a continuation fetch.
    pub fn accepts_trigger(&self) -> bool {
        !self.disposed && self.has_more && !self.in_flight()
    }

    /// True when a visibility watch should be held at all.
    pub fn wants_watch(&self) -> bool {
        !self.disposed && self.has_more
    }

    pub fn phase(&self) -> PagingPhase {
        if self.disposed {
            PagingPhase::Disposed
        } else if self.initial_loading {
            PagingPhase::InitialLoading
        } else if self.continuation_loading {
            PagingPhase::ContinuationLoading
        } else if !self.has_more {
            PagingPhase::Exhausted
        } else {
            PagingPhase::Idle
        }
    }

    pub fn update(&mut self, event: PagingEvent<T>) -> Transition {
        match event {
            PagingEvent::InitialRequested => self
                .request(FetchKind::Initial)
                .map_or_else(Transition::Ignored, Transition::Started),
            PagingEvent::ContinuationRequested => self
                .request(FetchKind::Continuation)
                .map_or_else(Transition::Ignored, Transition::Started),
            PagingEvent::FetchSucceeded { ticket, page } => {
                if let Some(stale) = self.stale(&ticket) {
                    return stale;
                }
                let appended = page.items.len();
                self.has_more = page.has_more;
                match ticket.kind {
                    FetchKind::Initial => {
                        self.items = page.items;
                        self.page = self.initial_page.next();
                        self.initial_loading = false;
                        self.primed = true;
                    }
                    FetchKind::Continuation => {
                        self.items.extend(page.items);
                        if page.has_more {
                            self.page = ticket.page.next();
                        }
                        self.continuation_loading = false;
                    }
                }
                Transition::Applied {
                    appended,
                    has_more: self.has_more,
                }
            }
            PagingEvent::FetchFailed { ticket } => {
                if let Some(stale) = self.stale(&ticket) {
                    return stale;
                }
                self.has_more = false;
                match ticket.kind {
                    FetchKind::Initial => self.initial_loading = false,
                    FetchKind::Continuation => self.continuation_loading = false,
                }
                Transition::Failed
            }
            PagingEvent::EpochReset { params } => self
                .reset_epoch(params)
                .map_or_else(Transition::Ignored, Transition::EpochStarted),
            PagingEvent::Disposed => {
                if self.disposed {
                    return Transition::Ignored(IgnoreReason::Disposed);
                }
                self.start_epoch();
                self.has_more = false;
                self.disposed = true;
                Transition::Disposed
            }
        }
    }

    /// Claims the single in-flight slot for a fetch of `kind`.
    ///
    /// A continuation asked for before the epoch's first page has loaded
    /// becomes that first page: it is flagged as initial loading and fetches
    /// the initial page.
    pub fn request(&mut self, kind: FetchKind) -> Result<FetchTicket, IgnoreReason> {
        if let Some(reason) = self.refusal() {
            return Err(reason);
        }
        if kind == FetchKind::Continuation && self.primed {
            self.continuation_loading = true;
            return Ok(self.ticket(self.page, FetchKind::Continuation));
        }
        self.initial_loading = true;
        Ok(self.ticket(self.initial_page, FetchKind::Initial))
    }

    /// Applies `params` and opens a fresh, empty epoch.
    pub fn reset_epoch(&mut self, params: ParamsChange) -> Result<Epoch, IgnoreReason> {
        if self.disposed {
            return Err(IgnoreReason::Disposed);
        }
        match params {
            ParamsChange::Keep => {}
            ParamsChange::Merge(partial) => self.params.merge(partial),
            ParamsChange::Replace(params) => self.params = params,
        }
        self.start_epoch();
        Ok(self.epoch)
    }

    /// [`reset_epoch`](Self::reset_epoch) followed by the new epoch's initial
    /// fetch, in one step.
    pub fn restart(&mut self, params: ParamsChange) -> Result<FetchTicket, IgnoreReason> {
        self.reset_epoch(params)?;
        self.request(FetchKind::Initial)
    }

    pub fn snapshot(&self) -> ControllerSnapshot<T>
    where
        T: Clone,
    {
        ControllerSnapshot {
            items: self.items.clone(),
            initial_loading: self.initial_loading,
            continuation_loading: self.continuation_loading,
            has_more: self.has_more,
            page: self.page,
            epoch: self.epoch,
            params: self.params.clone(),
            phase: self.phase(),
        }
    }

    pub fn initial_params(&self) -> &QueryParams {
        &self.initial_params
    }

    fn refusal(&self) -> Option<IgnoreReason> {
        if self.disposed {
            Some(IgnoreReason::Disposed)
        } else if self.in_flight() {
            Some(IgnoreReason::InFlight)
        } else if !self.has_more {
            Some(IgnoreReason::Exhausted)
        } else {
            None
        }
    }

    fn stale(&self, ticket: &FetchTicket) -> Option<Transition> {
        (ticket.epoch != self.epoch).then_some(Transition::Stale {
            ticket_epoch: ticket.epoch,
            current_epoch: self.epoch,
        })
    }

    fn ticket(&self, page: PageIndex, kind: FetchKind) -> FetchTicket {
        FetchTicket {
            epoch: self.epoch,
            page,
            kind,
            params: self.params.clone(),
        }
    }

    fn start_epoch(&mut self) {
        self.epoch = self.epoch.next();
        self.items.clear();
        self.page = self.initial_page;
        self.has_more = true;
        self.initial_loading = false;
        self.continuation_loading = false;
        self.primed = false;
    }
}

#[cfg(test)]
#[path = "tests/state_tests.rs"]
mod tests;
