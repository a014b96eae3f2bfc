//! Integration tests for the change processor feeding the runtime.

mod helpers;

use std::time::Duration;

use hookhost_core::config::WatcherConfig;
use hookhost_runtime::watcher::{ChangeProcessor, WatchState};

use helpers::{TestHost, plain_unit};

fn processor(host: &TestHost) -> ChangeProcessor {
    let config = WatcherConfig {
        directory: host.dir.path().to_path_buf(),
        debounce_ms: 100,
        ..WatcherConfig::default()
    };
    ChangeProcessor::new(config, &host.runtime)
}

#[tokio::test(start_paused = true)]
async fn test_change_burst_loads_once() {
    let mut host = TestHost::new();
    let processor = processor(&host);
    let path = host.write("greeter.toml", &plain_unit("Greeter", "1.0.0"));

    for _ in 0..10 {
        processor.notify_change(&path);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(processor.state(&path), WatchState::Queued);
    assert_eq!(host.runtime.tick(), 1);
    assert_eq!(processor.state(&path), WatchState::Idle);
    assert!(host.runtime.unit("Greeter").is_some());
    assert_eq!(host.runtime.tick(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_edit_reloads_and_delete_unloads() {
    let mut host = TestHost::new();
    let processor = processor(&host);
    let path = host.write("greeter.toml", &plain_unit("Greeter", "1.0.0"));

    processor.notify_change(&path);
    tokio::time::sleep(Duration::from_millis(150)).await;
    host.runtime.tick();

    host.write("greeter.toml", &plain_unit("Greeter", "1.1.0"));
    processor.notify_change(&path);
    tokio::time::sleep(Duration::from_millis(150)).await;
    host.runtime.tick();
    assert_eq!(
        host.runtime.unit("Greeter").map(|v| v.info.version.to_string()),
        Some("1.1.0".to_string())
    );

    std::fs::remove_file(&path).expect("remove");
    processor.notify_change(&path);
    tokio::time::sleep(Duration::from_millis(150)).await;
    host.runtime.tick();
    assert!(host.runtime.unit("Greeter").is_none());
    assert!(host.runtime.packages().is_empty());
    assert_eq!(processor.tracked(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_operator_unload_silences_file_events() {
    let mut host = TestHost::new();
    let processor = processor(&host);
    let path = host.write("greeter.toml", &plain_unit("Greeter", "1.0.0"));
    host.runtime.load_unit(&path);

    host.runtime.unload_unit("Greeter");
    processor.notify_change(&path);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(host.runtime.tick(), 0);
    assert!(host.runtime.unit("Greeter").is_none());

    host.runtime.load_unit(&path);
    assert!(host.runtime.unit("Greeter").is_some());
    processor.notify_change(&path);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(host.runtime.tick(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_initial_scan_loads_existing_sources() {
    let mut host = TestHost::new();
    host.write("a.toml", &plain_unit("A", "1.0.0"));
    host.write("b.toml", &plain_unit("B", "1.0.0"));
    host.write("readme.md", "not a unit");
    let processor = processor(&host);

    assert_eq!(processor.scan(), 2);
    assert_eq!(host.runtime.tick(), 2);
    assert!(host.runtime.unit("A").is_some());
    assert!(host.runtime.unit("B").is_some());
}
