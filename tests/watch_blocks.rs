//! End-to-end poll and push streaming over a scripted transport.

use std::time::Duration;

use chain_watcher::{
    BlockWatcherBuilder, StreamEvent, WatcherError,
    test_utils::{EventRecorder, MockTransport, canonical_block, wait_until},
};

const FAST_POLL: Duration = Duration::from_millis(10);

#[tokio::test]
async fn linear_chain_is_applied_in_order() -> anyhow::Result<()> {
    let transport = MockTransport::new();
    transport.push_head(canonical_block(1));
    transport.push_head(canonical_block(2));
    transport.push_head(canonical_block(3));

    let watcher = BlockWatcherBuilder::new().poll_interval(FAST_POLL).connect(transport)?;
    let recorder = EventRecorder::new();
    watcher.watch_blocks(recorder.callback());

    let handle = watcher.start().await?;
    wait_until("three applied blocks", || recorder.len() >= 3).await;
    handle.stop().await;

    assert_eq!(
        recorder.snapshot(),
        vec![
            StreamEvent::Applied(canonical_block(1)),
            StreamEvent::Applied(canonical_block(2)),
            StreamEvent::Applied(canonical_block(3)),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn gap_between_polls_is_caught_up_without_skips() -> anyhow::Result<()> {
    let transport = MockTransport::new();
    // blocks 2 and 3 land between two polls; they are only reachable via ancestry fetches
    transport.seed_chain(1..=4);
    transport.push_head(canonical_block(1));
    transport.push_head(canonical_block(4));

    let watcher = BlockWatcherBuilder::new().poll_interval(FAST_POLL).connect(transport)?;
    let recorder = EventRecorder::new();
    watcher.watch_blocks(recorder.callback());

    let handle = watcher.start().await?;
    wait_until("four applied blocks", || recorder.len() >= 4).await;
    handle.stop().await;

    let applied: Vec<u64> = recorder
        .snapshot()
        .iter()
        .map(|event| match event {
            StreamEvent::Applied(block) => block.number,
            other => panic!("unexpected event: {other:?}"),
        })
        .collect();
    assert_eq!(applied, vec![1, 2, 3, 4]);
    Ok(())
}

#[tokio::test]
async fn repeated_head_is_not_republished() -> anyhow::Result<()> {
    let transport = MockTransport::new();
    transport.push_head(canonical_block(5));

    let watcher = BlockWatcherBuilder::new().poll_interval(FAST_POLL).connect(transport)?;
    let recorder = EventRecorder::new();
    watcher.watch_blocks(recorder.callback());
    let transport = watcher.transport();

    let handle = watcher.start().await?;
    // the script is exhausted after the first poll, so later polls re-observe block 5
    wait_until("several polls past the script", || transport.head_calls() >= 4).await;
    handle.stop().await;

    assert_eq!(recorder.snapshot(), vec![StreamEvent::Applied(canonical_block(5))]);
    Ok(())
}

#[tokio::test]
async fn stale_head_from_a_lagging_node_produces_no_events() -> anyhow::Result<()> {
    let transport = MockTransport::new();
    transport.push_head(canonical_block(1));
    transport.push_head(canonical_block(2));
    transport.push_head(canonical_block(3));
    // a load-balanced endpoint answers one poll with an older canonical head
    transport.push_head(canonical_block(2));

    let watcher = BlockWatcherBuilder::new().poll_interval(FAST_POLL).connect(transport)?;
    let recorder = EventRecorder::new();
    watcher.watch_blocks(recorder.callback());
    let transport = watcher.transport();

    let handle = watcher.start().await?;
    wait_until("polls past the stale head", || transport.head_calls() >= 6).await;
    handle.stop().await;

    // no revert, no duplicate application
    assert_eq!(
        recorder.snapshot(),
        vec![
            StreamEvent::Applied(canonical_block(1)),
            StreamEvent::Applied(canonical_block(2)),
            StreamEvent::Applied(canonical_block(3)),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn head_fetch_failure_is_surfaced_and_polling_continues() -> anyhow::Result<()> {
    let transport = MockTransport::new();
    transport.fail_next_head(WatcherError::Timeout);
    transport.push_head(canonical_block(1));

    let watcher = BlockWatcherBuilder::new().poll_interval(FAST_POLL).connect(transport)?;
    let recorder = EventRecorder::new();
    watcher.watch_blocks(recorder.callback());

    let handle = watcher.start().await?;
    wait_until("failure then recovery", || recorder.len() >= 2).await;
    handle.stop().await;

    assert_eq!(
        recorder.snapshot(),
        vec![
            StreamEvent::TransportFailed(WatcherError::Timeout),
            StreamEvent::Applied(canonical_block(1)),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn unwatch_guarantees_no_further_deliveries() -> anyhow::Result<()> {
    let transport = MockTransport::new();
    transport.push_head(canonical_block(1));

    let watcher = BlockWatcherBuilder::new().poll_interval(FAST_POLL).connect(transport)?;
    let recorder = EventRecorder::new();
    let id = watcher.watch_blocks(recorder.callback());
    let transport = watcher.transport();

    let handle = watcher.start().await?;
    wait_until("first block delivered", || recorder.len() == 1).await;

    assert!(watcher.unwatch(id));
    transport.push_head(canonical_block(2));
    wait_until("second block observed", || transport.head_calls() >= 4).await;
    handle.stop().await;

    assert_eq!(recorder.len(), 1);
    // double unwatch is a no-op
    assert!(!watcher.unwatch(id));
    Ok(())
}

#[tokio::test]
async fn stop_halts_the_producer_loop() -> anyhow::Result<()> {
    let transport = MockTransport::new();
    transport.push_head(canonical_block(1));

    let watcher = BlockWatcherBuilder::new().poll_interval(FAST_POLL).connect(transport)?;
    let recorder = EventRecorder::new();
    watcher.watch_blocks(recorder.callback());
    let transport = watcher.transport();

    let handle = watcher.start().await?;
    wait_until("first block delivered", || recorder.len() == 1).await;
    handle.stop().await;

    let polls_at_stop = transport.head_calls();
    transport.push_head(canonical_block(2));
    tokio::time::sleep(Duration::from_millis(60)).await;

    assert_eq!(transport.head_calls(), polls_at_stop);
    assert_eq!(recorder.len(), 1);
    Ok(())
}

#[tokio::test]
async fn push_stream_delivers_heads_and_reports_closure() -> anyhow::Result<()> {
    let transport = MockTransport::new();

    let watcher = BlockWatcherBuilder::new().push().connect(transport)?;
    let recorder = EventRecorder::new();
    watcher.watch_blocks(recorder.callback());
    let transport = watcher.transport();

    let handle = watcher.start().await?;
    transport.send_push_head(canonical_block(1));
    transport.send_push_head(canonical_block(2));
    wait_until("two pushed blocks", || recorder.len() >= 2).await;

    transport.close_push();
    wait_until("closure notification", || recorder.len() >= 3).await;
    handle.stop().await;

    assert_eq!(
        recorder.snapshot(),
        vec![
            StreamEvent::Applied(canonical_block(1)),
            StreamEvent::Applied(canonical_block(2)),
            StreamEvent::StreamClosed(WatcherError::SubscriptionClosed),
        ]
    );
    Ok(())
}
