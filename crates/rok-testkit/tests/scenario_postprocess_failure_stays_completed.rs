use rok_core::{RecordStore, Request, RunError, RunStatus};
use rok_testkit::{memory_harness, CallCounter};

/// Completion is durable before postprocess runs: a postprocess failure
/// surfaces to its caller but never re-classifies the key, and later
/// attempts replay the stored response through a fresh postprocess.
#[tokio::test]
async fn postprocess_failure_does_not_unseat_completion() -> anyhow::Result<()> {
    let h = memory_harness();

    let first = h
        .coordinator
        .run_once(
            "notify-4",
            Request::new(
                || async { Ok(()) },
                |_req: (), _retry| async { Ok(9_i64) },
                |_resp, _replayed| async {
                    Err::<i64, _>(anyhow::anyhow!("notification send failed"))
                },
            ),
        )
        .await;
    assert!(matches!(first, Err(RunError::NonRetryable { .. })));

    // The operation itself completed and stays completed.
    let row = h.store.load("notify-4").await?.expect("record missing");
    assert_eq!(row.status, RunStatus::Completed);
    assert_eq!(row.response.as_deref(), Some("9"));

    // Replay: the handler is skipped, postprocess gets another chance.
    let spy = CallCounter::default();
    let handler_spy = spy.clone();
    let second = h
        .coordinator
        .run_once(
            "notify-4",
            Request::new(
                || async { Ok(()) },
                move |_req: (), _retry| {
                    let spy = handler_spy.clone();
                    async move {
                        spy.bump();
                        Ok(0_i64)
                    }
                },
                |resp, replayed| async move {
                    assert!(replayed);
                    Ok(resp)
                },
            ),
        )
        .await?;

    assert_eq!(second, 9);
    assert_eq!(spy.count(), 0);
    Ok(())
}

/// A failure in a *replayed* postprocess likewise leaves the record alone.
#[tokio::test]
async fn replayed_postprocess_failure_leaves_the_record_alone() -> anyhow::Result<()> {
    let h = memory_harness();

    let first = h
        .coordinator
        .run_once(
            "k",
            Request::new(
                || async { Ok(()) },
                |_req: (), _retry| async { Ok(1_i64) },
                |resp, _replayed| async move { Ok(resp) },
            ),
        )
        .await?;
    assert_eq!(first, 1);

    let second = h
        .coordinator
        .run_once(
            "k",
            Request::new(
                || async { Ok(()) },
                |_req: (), _retry| async { Ok(0_i64) },
                |_resp, _replayed| async { Err::<i64, _>(anyhow::anyhow!("transform bug")) },
            ),
        )
        .await;
    assert!(matches!(second, Err(RunError::NonRetryable { .. })));

    let row = h.store.load("k").await?.expect("record missing");
    assert_eq!(row.status, RunStatus::Completed);
    assert_eq!(row.response.as_deref(), Some("1"));
    Ok(())
}
