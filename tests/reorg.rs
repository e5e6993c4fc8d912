//! Reorg reconciliation through the full stream pipeline.

use std::time::Duration;

use chain_watcher::{
    BlockWatcherBuilder, StreamEvent, WatcherError,
    test_utils::{EventRecorder, MockTransport, canonical_block, test_block, wait_until},
};

const FAST_POLL: Duration = Duration::from_millis(10);

fn applied(events: &[StreamEvent]) -> Vec<u64> {
    events
        .iter()
        .filter_map(|event| match event {
            StreamEvent::Applied(block) => Some(block.number),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn single_block_reorg_reverts_before_applying() -> anyhow::Result<()> {
    let transport = MockTransport::new();
    transport.push_head(canonical_block(10));
    transport.push_head(canonical_block(11));
    transport.push_head(canonical_block(12));
    // competing block at height 12, built on canonical 11
    transport.push_head(test_block(12, 1, 0));

    let watcher = BlockWatcherBuilder::new().poll_interval(FAST_POLL).connect(transport)?;
    let recorder = EventRecorder::new();
    watcher.watch_blocks(recorder.callback());

    let handle = watcher.start().await?;
    wait_until("reorg published", || recorder.len() >= 5).await;
    handle.stop().await;

    assert_eq!(
        recorder.snapshot(),
        vec![
            StreamEvent::Applied(canonical_block(10)),
            StreamEvent::Applied(canonical_block(11)),
            StreamEvent::Applied(canonical_block(12)),
            StreamEvent::Reverted(canonical_block(12)),
            StreamEvent::Applied(test_block(12, 1, 0)),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn multi_block_reorg_reverts_newest_first_then_applies_ascending() -> anyhow::Result<()> {
    let transport = MockTransport::new();
    transport.push_head(canonical_block(10));
    transport.push_head(canonical_block(11));
    transport.push_head(canonical_block(12));
    transport.push_head(canonical_block(13));
    // the branch forks after 11; only its tip arrives as a head, the rest via ancestry fetches
    transport.insert_block(test_block(12, 1, 0));
    transport.insert_block(test_block(13, 1, 1));
    transport.push_head(test_block(14, 1, 1));

    let watcher = BlockWatcherBuilder::new().poll_interval(FAST_POLL).connect(transport)?;
    let recorder = EventRecorder::new();
    watcher.watch_blocks(recorder.callback());

    let handle = watcher.start().await?;
    wait_until("reorg published", || recorder.len() >= 9).await;
    handle.stop().await;

    assert_eq!(
        recorder.snapshot()[4..],
        vec![
            StreamEvent::Reverted(canonical_block(13)),
            StreamEvent::Reverted(canonical_block(12)),
            StreamEvent::Applied(test_block(12, 1, 0)),
            StreamEvent::Applied(test_block(13, 1, 1)),
            StreamEvent::Applied(test_block(14, 1, 1)),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn reorg_past_the_window_closes_the_stream() -> anyhow::Result<()> {
    let transport = MockTransport::new();
    transport.push_head(canonical_block(10));
    transport.push_head(canonical_block(11));
    transport.push_head(canonical_block(12));
    // a full replacement branch reaching below the tracked window
    transport.insert_block(test_block(10, 1, 1));
    transport.insert_block(test_block(11, 1, 1));
    transport.insert_block(test_block(12, 1, 1));
    transport.push_head(test_block(13, 1, 1));

    let watcher = BlockWatcherBuilder::new()
        .tracked_depth(3)
        .poll_interval(FAST_POLL)
        .connect(transport)?;
    let recorder = EventRecorder::new();
    let id = watcher.watch_blocks(recorder.callback());
    let transport = watcher.transport();

    let handle = watcher.start().await?;
    wait_until("terminal event", || recorder.len() >= 4).await;

    let events = recorder.snapshot();
    assert_eq!(applied(&events), vec![10, 11, 12]);
    assert_eq!(
        events[3],
        StreamEvent::StreamClosed(WatcherError::UnrecoverableReorg {
            observed_depth: 5,
            tracked_depth: 3,
        })
    );

    // the loop has exited and all subscriptions are closed
    let polls_at_close = transport.head_calls();
    transport.push_head(canonical_block(20));
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(transport.head_calls(), polls_at_close);
    assert_eq!(recorder.len(), 4);
    assert!(!watcher.unwatch(id));

    handle.stop().await;
    Ok(())
}
