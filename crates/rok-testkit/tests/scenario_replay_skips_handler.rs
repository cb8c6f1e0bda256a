use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rok_core::{RecordStore, Request, RunStatus};
use rok_testkit::{memory_harness, CallCounter};

/// Once a key is completed, repeats replay the stored response: postprocess
/// runs with `already_completed = true` and the handler is never entered.
#[tokio::test]
async fn completed_key_replays_without_entering_the_handler() -> anyhow::Result<()> {
    let h = memory_harness();

    let first = h
        .coordinator
        .run_once(
            "report-12",
            Request::new(
                || async { Ok(()) },
                |_req: (), _retry| async { Ok("summary-v1".to_string()) },
                |resp, _replayed| async move { Ok(resp) },
            ),
        )
        .await?;
    assert_eq!(first, "summary-v1");

    let spy = CallCounter::default();
    let handler_spy = spy.clone();
    let replay_flag = Arc::new(AtomicBool::new(false));
    let replayed_seen = replay_flag.clone();

    let second = h
        .coordinator
        .run_once(
            "report-12",
            Request::new(
                || async { Ok(()) },
                move |_req: (), _retry| {
                    let spy = handler_spy.clone();
                    async move {
                        spy.bump();
                        Ok("should never be produced".to_string())
                    }
                },
                move |resp, replayed| {
                    let seen = replayed_seen.clone();
                    async move {
                        seen.store(replayed, Ordering::SeqCst);
                        Ok(resp)
                    }
                },
            ),
        )
        .await?;

    assert_eq!(second, "summary-v1");
    assert_eq!(spy.count(), 0, "replay must not re-run the handler");
    assert!(replay_flag.load(Ordering::SeqCst));

    let row = h.store.load("report-12").await?.expect("record missing");
    assert_eq!(row.status, RunStatus::Completed);
    assert!(h.log.events().contains(&"replay:report-12".to_string()));
    Ok(())
}

/// Replay is stable: every repeat yields the same value.
#[tokio::test]
async fn replay_is_idempotent_across_many_repeats() -> anyhow::Result<()> {
    let h = memory_harness();

    let mut first: Option<i64> = None;
    for _ in 0..6 {
        let value = h
            .coordinator
            .run_once(
                "seq",
                Request::new(
                    || async { Ok(()) },
                    |_req: (), _retry| async { Ok(271_828_i64) },
                    |resp, _replayed| async move { Ok(resp) },
                ),
            )
            .await?;
        match first {
            None => first = Some(value),
            Some(expected) => assert_eq!(value, expected),
        }
    }
    Ok(())
}
