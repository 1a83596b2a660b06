use bindrt::sample::Sample;
use bindrt::{logging, RuntimeConfig};
use std::fs;
use std::thread;
use std::time::{Duration, Instant};

// Test helpers
fn wait_for_line(path: &std::path::Path, needle: &str) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if fs::read_to_string(path).map(|log| log.contains(needle)).unwrap_or(false) {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn test_init_applies_logging_section() {
    // The configured level is what this test checks
    std::env::remove_var("RUST_LOG");
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bindrt.log");
    let config = RuntimeConfig::parse(&format!(
        "[logging]\nlevel = \"debug\"\nfile = '{}'\n",
        path.display()
    ))
    .unwrap();
    let s = Sample::with_config(config).unwrap();

    assert!(!logging::is_initialized());
    bindrt::init(s.runtime.clone());
    assert!(logging::is_initialized());
    assert!(path.exists());

    // Timing events are debug level; the default would drop them
    let w = s.runtime.construct(s.types.object_type, Vec::new()).unwrap();
    drop(w);
    bindrt::cleanup();
    assert!(wait_for_line(&path, "operation completed"));
    assert!(fs::read_to_string(&path).unwrap().contains("runtime_shutdown"));
}
