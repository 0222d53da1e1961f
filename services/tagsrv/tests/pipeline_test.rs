//! Reader → aggregator → sink pipeline tests

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use support::{inventory_frame, Delivery, RecordingSink};
use tagsrv::aggregator::{AggregatorSettings, TagAggregator};
use tagsrv::config::{AggregatorMode, ReaderConfig, TagsrvConfig};
use tagsrv::poller::{PollExit, PollerSettings, ReaderPoller};
use tagsrv::simulator::{ReaderSimulator, DEFAULT_EPCS};
use tagsrv::sink::DeliveryStats;
use tagsrv::supervisor::ReaderSupervisor;
use uhf_link::mock::MockTransport;
use uhf_link::{Endpoint, LinkMetrics, ReaderLogger, ReaderSession, TagReport};

fn tag(epc: &[u8]) -> TagReport {
    TagReport {
        epc: epc.to_vec(),
        rssi: 0xC0,
        antenna: 1,
    }
}

fn aggregator(sink: &RecordingSink, mode: AggregatorMode) -> TagAggregator {
    let settings = AggregatorSettings {
        mode,
        debounce: Duration::from_secs(2),
        flush_idle: Duration::from_secs(1),
        ..AggregatorSettings::default()
    };
    TagAggregator::new(
        settings,
        "dock-1",
        Arc::new(sink.clone()),
        Arc::new(DeliveryStats::default()),
    )
}

// ============================================================================
// Aggregation timing
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_repeated_reads_become_one_batch() {
    let sink = RecordingSink::default();
    let mut agg = aggregator(&sink, AggregatorMode::Batch);

    assert_eq!(agg.observe(&[tag(&[0xAA, 0xAA])]).await, 1);
    tokio::time::advance(Duration::from_millis(200)).await;
    assert_eq!(agg.observe(&[tag(&[0xAA, 0xAA])]).await, 0);
    assert!(!agg.maybe_flush().await);
    tokio::time::advance(Duration::from_millis(200)).await;
    assert_eq!(agg.observe(&[tag(&[0xBB, 0xBB])]).await, 1);

    tokio::time::advance(Duration::from_millis(999)).await;
    assert!(!agg.maybe_flush().await);
    assert!(sink.deliveries().is_empty());

    tokio::time::advance(Duration::from_millis(1)).await;
    assert!(agg.maybe_flush().await);
    assert_eq!(
        sink.deliveries(),
        vec![Delivery::Batch {
            epcs: vec!["AAAA".to_string(), "BBBB".to_string()],
            source: "dock-1".to_string(),
        }]
    );

    // Nothing left to flush
    tokio::time::advance(Duration::from_secs(5)).await;
    assert!(!agg.maybe_flush().await);
    assert_eq!(sink.deliveries().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_per_tag_mode_delivers_each_debounced_epc() {
    let sink = RecordingSink::default();
    let mut agg = aggregator(&sink, AggregatorMode::PerTag);

    agg.observe(&[tag(&[0x01]), tag(&[0x01]), tag(&[0x02])]).await;
    tokio::time::advance(Duration::from_millis(1500)).await;
    agg.observe(&[tag(&[0x01])]).await;
    tokio::time::advance(Duration::from_millis(600)).await;
    agg.observe(&[tag(&[0x01])]).await;

    let epcs: Vec<_> = sink
        .deliveries()
        .into_iter()
        .map(|d| match d {
            Delivery::Tag { epc, .. } => epc,
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    assert_eq!(epcs, vec!["01", "02", "01"]);
    assert_eq!(agg.pending(), 0);
}

// ============================================================================
// Polling loop over a scripted reader
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_poller_batches_scripted_inventory() {
    let cycle = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&cycle);
    let (transport, handle) = MockTransport::with_responder(move |_request| {
        match counter.fetch_add(1, Ordering::SeqCst) {
            0 | 1 => vec![inventory_frame(&[0xAA, 0xAA])],
            2 => vec![inventory_frame(&[0xBB, 0xBB])],
            _ => vec![],
        }
    });

    let mut reader = ReaderConfig::new("dock-1", Endpoint::tcp("10.0.0.5", 6000));
    reader.inventory.listen_window_ms = 100;
    reader.poll_interval_ms = 100;

    let logger = ReaderLogger::new("dock-1");
    let mut session = ReaderSession::new(
        reader.session_config(),
        logger.clone(),
        Arc::new(LinkMetrics::default()),
    );
    session.connect_with(Box::new(transport)).unwrap();

    let sink = RecordingSink::default();
    let mut poller = ReaderPoller::new(
        session,
        aggregator(&sink, AggregatorMode::Batch),
        PollerSettings::from_reader(&reader),
        logger,
    );

    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(4)).await;
        stopper.cancel();
    });

    assert_eq!(poller.run(&cancel).await, PollExit::Cancelled);
    assert!(cycle.load(Ordering::SeqCst) >= 3);
    assert_eq!(
        sink.batches(),
        vec![vec!["AAAA".to_string(), "BBBB".to_string()]]
    );
    assert!(handle.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_flushes_pending_batch() {
    let (transport, _handle) =
        MockTransport::with_responder(|_request| vec![inventory_frame(&[0xCC, 0x01])]);

    let reader = ReaderConfig::new("dock-2", Endpoint::tcp("10.0.0.6", 6000));
    let logger = ReaderLogger::new("dock-2");
    let mut session = ReaderSession::new(
        reader.session_config(),
        logger.clone(),
        Arc::new(LinkMetrics::default()),
    );
    session.connect_with(Box::new(transport)).unwrap();

    // The tag keeps being re-read, so the idle flush never fires on its own
    let sink = RecordingSink::default();
    let settings = AggregatorSettings {
        debounce: Duration::from_millis(100),
        flush_idle: Duration::from_secs(30),
        ..AggregatorSettings::default()
    };
    let aggregator = TagAggregator::new(
        settings,
        "dock-2",
        Arc::new(sink.clone()),
        Arc::new(DeliveryStats::default()),
    );
    let mut poller = ReaderPoller::new(
        session,
        aggregator,
        PollerSettings::from_reader(&reader),
        logger,
    );

    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        stopper.cancel();
    });

    assert_eq!(poller.run(&cancel).await, PollExit::Cancelled);
    assert_eq!(sink.batches(), vec![vec!["CC01".to_string()]]);
}

// ============================================================================
// Supervisor against the simulator
// ============================================================================

#[tokio::test]
async fn test_supervisor_against_simulator() {
    let simulator = ReaderSimulator::bind("127.0.0.1:0", &[])
        .await
        .unwrap()
        .with_seed(42);
    let port = simulator.local_addr().unwrap().port();
    let sim_cancel = CancellationToken::new();
    tokio::spawn(simulator.run(sim_cancel.clone()));

    let mut reader = ReaderConfig::new("sim", Endpoint::tcp("127.0.0.1", port));
    reader.inventory.listen_window_ms = 200;
    reader.read_timeout_ms = 200;
    let mut config = TagsrvConfig::default();
    config.aggregator.flush_idle_ms = 300;
    config.readers = vec![reader.clone()];

    let sink = RecordingSink::default();
    let stats = Arc::new(DeliveryStats::default());
    let supervisor =
        ReaderSupervisor::from_config(&reader, &config, Arc::new(sink.clone()), Arc::clone(&stats));

    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1500)).await;
        stopper.cancel();
    });

    let poller = supervisor.run(cancel).await;
    sim_cancel.cancel();

    assert!(!poller.session().is_connected());
    let batches = sink.batches();
    assert!(!batches.is_empty());
    for epc in batches.iter().flatten() {
        assert!(DEFAULT_EPCS.contains(&epc.as_str()), "unexpected EPC {epc}");
    }
    assert_eq!(stats.batches_delivered(), batches.len() as u64);
    assert!(poller.session().metrics().snapshot().frames_decoded > 0);
}
