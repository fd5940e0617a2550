use super::*;

fn letters(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

fn start(state: &mut PagingState<String>, event: PagingEvent<String>) -> FetchTicket {
    match state.update(event) {
        Transition::Started(ticket) => ticket,
        other => panic!("expected a started fetch, got {other:?}"),
    }
}

fn primed(initial: &[&str], has_more: bool) -> PagingState<String> {
    let mut state = PagingState::new(PageIndex(0), QueryParams::new().with("q", "all"));
    let ticket = start(&mut state, PagingEvent::InitialRequested);
    state.update(PagingEvent::FetchSucceeded {
        ticket,
        page: Page::new(letters(initial), has_more),
    });
    state
}

#[test]
fn initial_fetch_uses_configured_page_and_current_params() {
    let mut state: PagingState<String> =
        PagingState::new(PageIndex(1), QueryParams::new().with("q", "rust"));

    let ticket = start(&mut state, PagingEvent::InitialRequested);

    assert_eq!(ticket.page, PageIndex(1));
    assert_eq!(ticket.kind, FetchKind::Initial);
    assert_eq!(ticket.params.get_str("q"), Some("rust"));
    assert_eq!(state.phase(), PagingPhase::InitialLoading);
}

#[test]
fn initial_success_replaces_items_and_advances_cursor_once() {
    let state = primed(&["a", "b"], true);

    assert_eq!(state.items(), letters(&["a", "b"]).as_slice());
    assert_eq!(state.page(), PageIndex(1));
    assert!(state.has_more());
    assert!(!state.initial_loading());
    assert_eq!(state.phase(), PagingPhase::Idle);
}

#[test]
fn continuation_pages_append_in_arrival_order() {
    let mut state = primed(&["a", "b"], true);

    for (expected_page, batch) in [(1, ["c", "d"]), (2, ["e", "f"])] {
        let ticket = start(&mut state, PagingEvent::ContinuationRequested);
        assert_eq!(ticket.page, PageIndex(expected_page));
        assert_eq!(ticket.kind, FetchKind::Continuation);
        assert_eq!(
            state.update(PagingEvent::FetchSucceeded {
                ticket,
                page: Page::new(letters(&batch), true),
            }),
            Transition::Applied {
                appended: 2,
                has_more: true
            }
        );
    }

    assert_eq!(
        state.items(),
        letters(&["a", "b", "c", "d", "e", "f"]).as_slice()
    );
    assert_eq!(state.page(), PageIndex(3));
}

#[test]
fn final_page_does_not_advance_cursor_and_blocks_further_fetches() {
    let mut state = primed(&["a"], true);
    let ticket = start(&mut state, PagingEvent::ContinuationRequested);
    state.update(PagingEvent::FetchSucceeded {
        ticket,
        page: Page::last(Vec::new()),
    });

    assert_eq!(state.page(), PageIndex(1));
    assert_eq!(state.phase(), PagingPhase::Exhausted);
    assert_eq!(
        state.update(PagingEvent::ContinuationRequested),
        Transition::Ignored(IgnoreReason::Exhausted)
    );
    assert_eq!(
        state.update(PagingEvent::InitialRequested),
        Transition::Ignored(IgnoreReason::Exhausted)
    );
}

#[test]
fn second_request_while_in_flight_is_refused() {
    let mut state = primed(&["a"], true);
    start(&mut state, PagingEvent::ContinuationRequested);

    assert_eq!(
        state.update(PagingEvent::ContinuationRequested),
        Transition::Ignored(IgnoreReason::InFlight)
    );
    assert_eq!(
        state.update(PagingEvent::InitialRequested),
        Transition::Ignored(IgnoreReason::InFlight)
    );
    assert!(!state.accepts_trigger());
}

#[test]
fn continuation_failure_keeps_last_good_items_and_cursor() {
    let mut state = primed(&["a", "b"], true);
    let ticket = start(&mut state, PagingEvent::ContinuationRequested);

    assert_eq!(
        state.update(PagingEvent::FetchFailed { ticket }),
        Transition::Failed
    );
    assert_eq!(state.items(), letters(&["a", "b"]).as_slice());
    assert_eq!(state.page(), PageIndex(1));
    assert!(!state.has_more());
    assert!(!state.continuation_loading());
}

#[test]
fn initial_failure_exhausts_epoch_with_empty_collection() {
    let mut state: PagingState<String> = PagingState::new(PageIndex(0), QueryParams::new());
    let ticket = start(&mut state, PagingEvent::InitialRequested);

    state.update(PagingEvent::FetchFailed { ticket });

    assert!(state.items().is_empty());
    assert_eq!(state.page(), PageIndex(0));
    assert_eq!(state.phase(), PagingPhase::Exhausted);
}

#[test]
fn continuation_before_first_page_performs_initial_fetch() {
    let mut state: PagingState<String> = PagingState::new(PageIndex(0), QueryParams::new());

    let ticket = start(&mut state, PagingEvent::ContinuationRequested);

    assert_eq!(ticket.kind, FetchKind::Initial);
    assert_eq!(ticket.page, PageIndex(0));
    assert!(state.initial_loading());
    assert!(!state.continuation_loading());

    state.update(PagingEvent::FetchSucceeded {
        ticket,
        page: Page::new(letters(&["a"]), true),
    });
    assert_eq!(state.page(), PageIndex(1));
    assert_eq!(
        state.request(FetchKind::Continuation).map(|ticket| ticket.kind),
        Ok(FetchKind::Continuation)
    );
}

#[test]
fn epoch_reset_merges_params_and_clears_progress() {
    let mut state = primed(&["a", "b"], false);

    let transition = state.update(PagingEvent::EpochReset {
        params: ParamsChange::Merge(QueryParams::new().with("q", "x").with("lang", "en")),
    });

    assert_eq!(transition, Transition::EpochStarted(Epoch(1)));
    assert!(state.items().is_empty());
    assert_eq!(state.page(), PageIndex(0));
    assert!(state.has_more());
    assert_eq!(state.params().get_str("q"), Some("x"));
    assert_eq!(state.params().get_str("lang"), Some("en"));
    assert_eq!(state.initial_params().get_str("q"), Some("all"));
}

#[test]
fn results_from_previous_epoch_are_discarded() {
    let mut state = primed(&["a", "b"], true);
    let old = start(&mut state, PagingEvent::ContinuationRequested);

    state.update(PagingEvent::EpochReset {
        params: ParamsChange::Merge(QueryParams::new().with("q", "x")),
    });
    let fresh = start(&mut state, PagingEvent::InitialRequested);
    assert_eq!(fresh.params.get_str("q"), Some("x"));
    state.update(PagingEvent::FetchSucceeded {
        ticket: fresh,
        page: Page::new(letters(&["x1"]), true),
    });

    assert_eq!(
        state.update(PagingEvent::FetchSucceeded {
            ticket: old.clone(),
            page: Page::new(letters(&["c", "d"]), true),
        }),
        Transition::Stale {
            ticket_epoch: Epoch(0),
            current_epoch: Epoch(1)
        }
    );
    assert!(matches!(
        state.update(PagingEvent::FetchFailed { ticket: old }),
        Transition::Stale { .. }
    ));
    assert_eq!(state.items(), letters(&["x1"]).as_slice());
    assert_eq!(state.page(), PageIndex(1));
    assert!(state.has_more());
}

#[test]
fn replace_restores_given_params() {
    let mut state = primed(&["a"], true);
    state.update(PagingEvent::EpochReset {
        params: ParamsChange::Merge(QueryParams::new().with("q", "x")),
    });

    let initial = state.initial_params().clone();
    state.update(PagingEvent::EpochReset {
        params: ParamsChange::Replace(initial),
    });

    assert_eq!(state.params().get_str("q"), Some("all"));
    assert_eq!(state.epoch(), Epoch(2));
}

#[test]
fn dispose_is_terminal() {
    let mut state = primed(&["a"], true);
    let pending = start(&mut state, PagingEvent::ContinuationRequested);

    assert_eq!(state.update(PagingEvent::Disposed), Transition::Disposed);
    assert_eq!(state.phase(), PagingPhase::Disposed);
    assert!(state.items().is_empty());
    assert!(matches!(
        state.update(PagingEvent::FetchSucceeded {
            ticket: pending,
            page: Page::new(letters(&["late"]), true),
        }),
        Transition::Stale { .. }
    ));
    assert_eq!(
        state.update(PagingEvent::EpochReset {
            params: ParamsChange::Keep
        }),
        Transition::Ignored(IgnoreReason::Disposed)
    );
    assert_eq!(
        state.update(PagingEvent::ContinuationRequested),
        Transition::Ignored(IgnoreReason::Disposed)
    );
    assert!(!state.wants_watch());
}

#[test]
fn restart_claims_the_new_epochs_initial_fetch_even_while_busy() {
    let mut state = primed(&["a", "b"], true);
    let old = start(&mut state, PagingEvent::ContinuationRequested);

    let ticket = state
        .restart(ParamsChange::Merge(QueryParams::new().with("q", "x")))
        .expect("restart");

    assert_eq!(ticket.epoch, old.epoch.next());
    assert_eq!(ticket.kind, FetchKind::Initial);
    assert_eq!(ticket.page, PageIndex(0));
    assert_eq!(ticket.params.get_str("q"), Some("x"));
    assert!(state.initial_loading());
    assert!(!state.continuation_loading());
    assert_eq!(
        state.request(FetchKind::Continuation),
        Err(IgnoreReason::InFlight)
    );

    state.update(PagingEvent::Disposed);
    assert_eq!(
        state.restart(ParamsChange::Keep),
        Err(IgnoreReason::Disposed)
    );
}
