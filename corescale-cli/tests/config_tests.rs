//! Shipped profiles parse and validate

use corescale_cli::config::{self, Overrides, ProfileConfig};
use corescale_core::config::{BurstPattern, EventRate, ReaderKind, ThreadCount};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn profile_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../profiles").join(name)
}

#[test]
fn test_drip_profile() {
    let profile = ProfileConfig::from_file(profile_path("drip-sweep.toml")).unwrap();

    assert_eq!(profile.experiment.duration, Some(Duration::from_secs(30)));
    assert_eq!(profile.workload.event_rate, Some(EventRate::PerSecond(1000)));
    assert_eq!(profile.workload.burst_pattern, Some(BurstPattern::Drip));
    assert_eq!(profile.workload.threads, Some(ThreadCount::MatchCores));
    assert_eq!(profile.consumer.reader, Some(ReaderKind::Buffered));
    assert_eq!(profile.output.file, Some(PathBuf::from("drip-sweep.json")));
}

#[test]
fn test_bolus_profile() {
    let profile = ProfileConfig::from_file(profile_path("bolus-sweep.toml")).unwrap();

    assert_eq!(profile.experiment.duration, Some(Duration::from_secs(60)));
    assert_eq!(profile.experiment.attach_timeout, Some(Duration::from_secs(15)));
    assert_eq!(profile.workload.burst_pattern, Some(BurstPattern::Bolus));
    assert_eq!(profile.consumer.reader, Some(ReaderKind::Streaming));
}

#[test]
fn test_slow_reader_profile() {
    let profile = ProfileConfig::from_file(profile_path("slow-reader.toml")).unwrap();

    assert_eq!(profile.workload.event_rate, Some(EventRate::Unbounded));
    assert_eq!(profile.workload.threads, Some(ThreadCount::Fixed(2)));
    assert_eq!(profile.consumer.slow_reader, Some(Duration::from_millis(50)));
    assert_eq!(profile.consumer.rundown, Some(false));
}

#[test]
fn test_profile_resolves_with_cli_producer() {
    let producer = tempfile::NamedTempFile::new().unwrap();
    let profile = ProfileConfig::from_file(profile_path("slow-reader.toml")).unwrap();
    let cli = Overrides {
        producer: Some(producer.path().to_path_buf()),
        max_core: Some(1),
        ..Default::default()
    };

    let run = config::resolve(Some(profile), cli, 4).unwrap();

    assert_eq!(run.sweep.producer_path, producer.path());
    assert_eq!(run.sweep.core_range(), 1..=1);
    assert_eq!(run.sweep.event_count, Some(5_000_000));
    assert_eq!(run.sweep.buffer_size_mb, 16);
    assert!(!run.sweep.request_rundown);
}

#[test]
fn test_unknown_profile_key_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[workload]\nevent_sise = 100\n").unwrap();

    let err = ProfileConfig::from_file(&path).unwrap_err();
    assert!(format!("{err:#}").contains("Failed to parse profile"), "{err:#}");
}

#[test]
fn test_missing_profile_file() {
    let err = ProfileConfig::from_file("/nonexistent/profile.toml").unwrap_err();
    assert!(err.to_string().contains("Failed to read profile"));
}
