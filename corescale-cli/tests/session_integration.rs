//! Consumer attached directly to a producer's event session

mod common;

use corescale_core::consumer::{ConsumerReport, ConsumerStrategy};
use corescale_core::session::{EventStreamSource, IpcStreamSource, SessionRequest};
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stalled_reader_sees_losses() {
    let mut producer = common::start_producer(&[
        "--threads",
        "1",
        "--event-size",
        "4096",
        "--event-rate",
        "-1",
        "--burst-pattern",
        "none",
        "--event-count",
        "200000",
        "--duration",
        "30",
    ])
    .expect("Failed to start producer");

    let source = IpcStreamSource::at_path(producer.socket());
    let request = SessionRequest { buffer_size_mb: 1, request_rundown: true };
    let stream = source.try_attach(producer.pid(), &request).await.expect("Attach failed");

    producer.send_line("start");
    let strategy = ConsumerStrategy::Streaming { slow_reader_delay: Duration::from_millis(500) };
    let report = tokio::time::timeout(Duration::from_secs(60), strategy.consume(stream))
        .await
        .expect("Consumer did not finish")
        .expect("Consumer failed");

    println!("Report: {report:?}");
    assert!(report.complete);
    assert!(report.events_lost > 0, "a 1 MB buffer cannot hold 800 MB of events");
    assert_eq!(report.events_collected + report.events_lost, 200_000);
    assert!(report.rundown.iter().any(|line| line.contains("events_dropped")));
    assert!(producer.wait_success(Duration::from_secs(10)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_token_ends_run_early() {
    let mut producer = common::start_producer(&[
        "--threads",
        "2",
        "--event-rate",
        "100",
        "--burst-pattern",
        "drip",
        "--duration",
        "120",
    ])
    .expect("Failed to start producer");

    let source = IpcStreamSource::at_path(producer.socket());
    let stream = source
        .try_attach(producer.pid(), &SessionRequest::default())
        .await
        .expect("Attach failed");
    let consumer = tokio::spawn(ConsumerStrategy::Buffered.consume(stream));

    producer.send_line("start");
    tokio::time::sleep(Duration::from_millis(500)).await;
    producer.send_line("stop");

    let report = tokio::time::timeout(Duration::from_secs(10), consumer)
        .await
        .expect("Stop token was not honoured")
        .expect("Consumer task panicked")
        .expect("Consumer failed");

    assert!(report.complete);
    assert!(report.events_collected > 0);
    assert_eq!(report.events_lost, 0);
    assert!(producer.wait_success(Duration::from_secs(5)));
}

#[tokio::test]
async fn test_drip_session_delivers_every_event() {
    let args = ["--event-rate", "50", "--burst-pattern", "drip", "--duration", "1"];
    let mut producer = common::start_producer(&args).expect("Failed to start producer");

    let source = IpcStreamSource::at_path(producer.socket());
    let stream = source
        .try_attach(producer.pid(), &SessionRequest::default())
        .await
        .expect("Attach failed");

    producer.send_line("start");
    let report = ConsumerStrategy::Buffered.consume(stream).await.expect("Consumer failed");

    assert!(report.complete);
    assert!((49..=51).contains(&report.events_collected), "got {}", report.events_collected);
    assert!(producer.wait_success(Duration::from_secs(5)));
}

/// One bolus producer (800 events/s, 1 KiB events, 4 s) read live through a
/// 1 MB session buffer, which holds about 1000 events
async fn bolus_session(slow_reader_delay: Duration) -> ConsumerReport {
    let mut producer = common::start_producer(&[
        "--threads",
        "1",
        "--event-size",
        "1024",
        "--event-rate",
        "800",
        "--burst-pattern",
        "bolus",
        "--duration",
        "4",
    ])
    .expect("Failed to start producer");

    let source = IpcStreamSource::at_path(producer.socket());
    let request = SessionRequest { buffer_size_mb: 1, request_rundown: false };
    let stream = source.try_attach(producer.pid(), &request).await.expect("Attach failed");

    producer.send_line("start");
    let strategy = ConsumerStrategy::Streaming { slow_reader_delay };
    let report = tokio::time::timeout(Duration::from_secs(60), strategy.consume(stream))
        .await
        .expect("Consumer did not finish")
        .expect("Consumer failed");
    assert!(producer.wait_success(Duration::from_secs(10)));
    report
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_reader_increases_loss() {
    let prompt = bolus_session(Duration::ZERO).await;
    let slow = bolus_session(Duration::from_millis(2500)).await;

    println!("prompt reader: {prompt:?}");
    println!("slow reader:   {slow:?}");
    assert!(prompt.complete && slow.complete);
    // A bolus fits in the buffer, so a reader that keeps up loses nothing
    assert_eq!(prompt.events_lost, 0);
    assert!(
        slow.events_lost > prompt.events_lost,
        "stalling for 2.5s should overflow the buffer: {} lost",
        slow.events_lost
    );
}
