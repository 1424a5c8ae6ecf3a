use std::process::Command;

const BIN: &str = env!("CARGO_BIN_EXE_sensor-sim");

fn kinds(path: &std::path::Path) -> Vec<(String, String)> {
    std::fs::read_to_string(path)
        .expect("store file should exist")
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            let record: serde_json::Value = serde_json::from_str(line).unwrap();
            let kind = record["kind"].as_str().unwrap().to_string();
            let payload: serde_json::Value =
                serde_json::from_str(record["payload"].as_str().unwrap()).unwrap();
            let device = payload["device_name"].as_str().unwrap().to_string();
            (kind, device)
        })
        .collect()
}

#[test]
fn timed_run_persists_every_lifecycle_message() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("run.jsonl");

    let status = Command::new(BIN)
        .args([
            "--run-seconds",
            "2",
            "--device",
            "Probe 01:200",
            "--device",
            "Probe 02:300",
            "--hub-tick-ms",
            "100",
            "--store",
            "transactional",
            "--store-path",
        ])
        .arg(&store)
        .status()
        .expect("failed to launch sensor-sim");
    assert!(status.success());

    let records = kinds(&store);
    for device in ["Probe 01", "Probe 02"] {
        let of_device: Vec<&str> = records
            .iter()
            .filter(|(_, d)| d == device)
            .map(|(k, _)| k.as_str())
            .collect();
        assert_eq!(of_device.first(), Some(&"DEVICE_ONLINE"), "{device}");
        assert_eq!(of_device.last(), Some(&"DEVICE_OFFLINE"), "{device}");
        let readings = of_device
            .iter()
            .filter(|k| **k == "DEVICE_READOUT" || **k == "DEVICE_OUT_OF_RANGE")
            .count();
        assert!(readings >= 4, "{device} produced only {readings} readings");
    }
}

#[test]
fn directory_store_path_uses_the_default_file() {
    let dir = tempfile::tempdir().unwrap();

    let status = Command::new(BIN)
        .args(["--run-seconds", "1", "--device", "Probe 01:250", "--store-path"])
        .arg(dir.path())
        .status()
        .expect("failed to launch sensor-sim");
    assert!(status.success());
    assert!(!kinds(&dir.path().join("default_file_repo.jsonl")).is_empty());
}

#[test]
fn bad_device_spec_fails_fast() {
    let output = Command::new(BIN)
        .args(["--device", "Probe 01"])
        .output()
        .expect("failed to launch sensor-sim");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Invalid device spec"), "{stderr}");
}
