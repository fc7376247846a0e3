// Publisher/subscriber over a real POSIX shared memory segment
use std::io::ErrorKind;
use std::time::{Duration, Instant};

use telemetry_core::{
    ShmError, StartPosition, TelemetryMessage, TelemetryPublisher, TelemetrySubscriber,
};

/// Environments without a usable /dev/shm
fn skip(err: &ShmError, test: &str) -> bool {
    let unavailable = err.errno().is_some_and(|errno| {
        matches!(
            std::io::Error::from_raw_os_error(errno.raw_os_error()).kind(),
            ErrorKind::PermissionDenied | ErrorKind::NotFound
        )
    });
    if unavailable {
        eprintln!("Skipping {test}: {err}");
    }
    unavailable
}

#[test]
fn subscribers_see_every_message_in_order() {
    let path = "/telemetry-it-broadcast";
    let publisher = match TelemetryPublisher::create(path, true) {
        Ok(p) => p,
        Err(err) if skip(&err, "subscribers_see_every_message_in_order") => return,
        Err(err) => panic!("create failed: {err}"),
    };

    let mut logger = TelemetrySubscriber::open(path, StartPosition::Latest).unwrap();
    let mut dashboard = TelemetrySubscriber::open(path, StartPosition::Latest).unwrap();

    for i in 0..100u32 {
        publisher.push(TelemetryMessage::new(0x100 + i, i as u64, i as f64));
    }

    let mut seen = Vec::new();
    let stats = logger.drain(|m| seen.push(m.frame_id));
    assert_eq!(stats.delivered, 100);
    assert_eq!(seen, (0x100..0x164).collect::<Vec<u32>>());

    // The second subscriber is unaffected by the first one's drain
    let mut count = 0;
    dashboard.drain(|_| count += 1);
    assert_eq!(count, 100);

    // A subscriber attaching now skips the backlog
    let mut late = TelemetrySubscriber::open(path, StartPosition::Latest).unwrap();
    assert!(late.drain(|_| panic!("backlog must be skipped")).is_empty());
    assert_eq!(late.cursor().position(), 100);
}

#[test]
fn slow_subscriber_reports_drops() {
    let path = "/telemetry-it-slow";
    let publisher = match TelemetryPublisher::create(path, true) {
        Ok(p) => p,
        Err(err) if skip(&err, "slow_subscriber_reports_drops") => return,
        Err(err) => panic!("create failed: {err}"),
    };
    let mut slow = TelemetrySubscriber::open(path, StartPosition::Beginning).unwrap();

    let total = telemetry_core::QUEUE_CAPACITY as u64 + 10;
    for i in 0..total {
        publisher.push(TelemetryMessage::new(1, i, i as f64));
    }

    let mut first = None;
    let stats = slow.drain(|m| {
        first.get_or_insert(m.timestamp_ms);
    });
    assert_eq!(stats.dropped, 10);
    assert_eq!(stats.delivered, telemetry_core::QUEUE_CAPACITY as u64);
    assert_eq!(first, Some(10));
}

#[test]
fn concurrent_producer_and_subscriber_thread() {
    let path = "/telemetry-it-concurrent";
    let publisher = match TelemetryPublisher::create(path, true) {
        Ok(p) => p,
        Err(err) if skip(&err, "concurrent_producer_and_subscriber_thread") => return,
        Err(err) => panic!("create failed: {err}"),
    };
    const TOTAL: u64 = 50_000;

    let consumer = std::thread::spawn(move || {
        let mut sub = TelemetrySubscriber::open(path, StartPosition::Beginning).unwrap();
        let deadline = Instant::now() + Duration::from_secs(30);
        let mut last = None;
        let mut delivered = 0;
        while sub.cursor().position() < TOTAL && Instant::now() < deadline {
            let stats = sub.drain(|m| {
                if let Some(prev) = last {
                    assert!(m.timestamp_ms > prev);
                }
                last = Some(m.timestamp_ms);
            });
            delivered += stats.delivered;
            if stats.is_empty() {
                std::thread::sleep(Duration::from_micros(100));
            }
        }
        (delivered, sub.cursor().dropped_total())
    });

    for i in 0..TOTAL {
        publisher.push(TelemetryMessage::new(7, i, i as f64));
    }

    let (delivered, dropped) = consumer.join().unwrap();
    assert_eq!(delivered + dropped, TOTAL);
    drop(publisher);
}
