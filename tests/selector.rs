//! Reconnect loop tests.

mod common;

use std::time::Duration;

use common::*;
use im_link::error::{AuthError, Error, TransportError};
use im_link::resilience::Backoff;
use im_link::sso::MemorySessionStore;
use im_link::{HandlerSelector, StateKind};

fn backoff() -> Backoff {
    Backoff::new(5, 20)
}

#[tokio::test]
async fn replaces_closed_handlers_until_connected() {
    let h = default_harness();
    h.transport.refuse(2);
    let selector = HandlerSelector::new(h.context.clone(), backoff());

    let handler = selector.resume().await.unwrap();

    assert_eq!(handler.state(), StateKind::Ok);
    assert_eq!(h.transport.connects(), 3);
    assert_eq!(selector.budget().remaining(), selector.budget().max());

    // both refused connects are kept after the third one succeeds
    let failures = selector.last_failures();
    assert_eq!(failures.len(), 2);
    for failure in &failures {
        assert!(
            matches!(failure.primary(), Error::Transport(TransportError::Connect { .. })),
            "unexpected failure: {failure}"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn first_reconnect_waits_for_the_base_delay() {
    let h = default_harness();
    h.transport.refuse(1);
    let selector = HandlerSelector::new(h.context.clone(), Backoff::new(1_000, 5_000));

    let started = tokio::time::Instant::now();
    selector.resume().await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(1_000));
    assert_eq!(h.transport.connects(), 2);
}

#[tokio::test]
async fn gives_up_when_budget_is_exhausted() {
    let mut config = test_config();
    config.retries.max_attempts = 2;
    let h = harness(config, ScriptedProvider::correct(), MemorySessionStore::new());
    h.transport.refuse(10);
    let selector = HandlerSelector::new(h.context.clone(), backoff());

    let err = selector.resume().await.unwrap_err();

    match err {
        Error::Suppressed(collected) => {
            assert!(matches!(collected.error(), Error::RetryBudgetExhausted(2)));
            assert_eq!(collected.suppressed().len(), 3);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.transport.connects(), 3);
}

#[tokio::test]
async fn unrecoverable_failure_is_not_retried() {
    let h = harness(
        test_config(),
        ScriptedProvider::new(&["wrong"]),
        MemorySessionStore::new(),
    );
    let selector = HandlerSelector::new(h.context.clone(), backoff());

    let err = selector.resume().await.unwrap_err();

    assert!(matches!(
        err.primary(),
        Error::Authentication(AuthError::Rejected { .. })
    ));
    assert_eq!(h.transport.connects(), 1);
}

#[tokio::test]
async fn login_and_reconnects_share_one_budget() {
    let mut config = test_config();
    config.retries.max_attempts = 3;
    let h = harness(config, ScriptedProvider::correct(), MemorySessionStore::new());
    h.server.throttle(10);
    let selector = HandlerSelector::new(h.context.clone(), backoff());

    let err = selector.resume().await.unwrap_err();

    // the login spent the whole budget, so the retry-later is not retried
    assert!(matches!(err.primary(), Error::RetryBudgetExhausted(3)));
    assert_eq!(h.transport.connects(), 1);
    assert_eq!(h.server.count("login.password"), 2);
}

#[tokio::test]
async fn reuses_a_live_handler() {
    let h = default_harness();
    let selector = HandlerSelector::new(h.context.clone(), backoff());

    let first = selector.resume().await.unwrap();
    let second = selector.resume().await.unwrap();

    assert_eq!(first.current().id(), second.current().id());
    assert_eq!(h.transport.connects(), 1);
}

#[tokio::test]
async fn closed_selector_refuses_to_resume() {
    let h = default_harness();
    let selector = HandlerSelector::new(h.context.clone(), backoff());
    let handler = selector.resume().await.unwrap();

    selector.close(None);

    assert_eq!(handler.state(), StateKind::Closed);
    assert!(matches!(selector.resume().await, Err(Error::Closed(_))));
}
