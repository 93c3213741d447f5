//! Device scanning against a scripted stand-in for `bluetoothctl`.
//!
//! The stand-in is an `sh -c` script: the scanner's arguments arrive as
//! `$1`, `$2`, ... exactly as they would for the real tool.

#![cfg(unix)]

use std::path::Path;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;

use coreprint::error::ScanFailure;
use coreprint::transport::process::Tool;
use coreprint::transport::scan::{self, DiscoveredDevice, Scanner};
use coreprint::PrinterError;

fn fake_bluetoothctl(script: &str) -> Tool {
    Tool::new("sh").with_leading_args(["-c", script, "bluetoothctl"])
}

/// Known devices first; one more name appears once a scan has run.
fn three_pass_script(marker: &Path) -> String {
    let marker = marker.display();
    format!(
        r#"
case "$1" in
  devices)
    echo "Device 11:22:33:44:55:66 Headphones"
    echo "Device 77:00:00:00:00:09 77-00-00-00-00-09"
    if [ -f "{marker}" ]; then
      echo "Device 77:00:00:00:00:09 CorePrint-Late"
      echo "Device AA:BB:CC:DD:EE:01 Alpha Speaker"
    fi
    ;;
  --timeout)
    printf '\033[0;93m[NEW]\033[0m Device 66:22:B3:00:00:01 CorePrint-0001\n'
    echo "[CHG] Device 11:22:33:44:55:66 RSSI: -60"
    echo "[NEW] Device 11:22:33:44:55:66 Headphones"
    echo "[CHG] Device 99:88:77:66:55:44 Name: coreprint mini [bonded]"
    touch "{marker}"
    ;;
esac
"#
    )
}

#[test]
fn test_scan_merges_three_passes() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("scanned");
    let scanner = Scanner::new().with_tool(fake_bluetoothctl(&three_pass_script(&marker)));

    let devices = scanner.scan(Duration::from_secs(2)).unwrap();

    assert_eq!(
        devices,
        vec![
            DiscoveredDevice::new("66:22:B3:00:00:01", "CorePrint-0001"),
            DiscoveredDevice::new("77:00:00:00:00:09", "CorePrint-Late"),
            DiscoveredDevice::new("99:88:77:66:55:44", "coreprint mini"),
            DiscoveredDevice::new("AA:BB:CC:DD:EE:01", "Alpha Speaker"),
            DiscoveredDevice::new("11:22:33:44:55:66", "Headphones"),
        ]
    );
    assert!(devices[..3].iter().all(|d| d.is_target_printer));
    assert!(devices[3..].iter().all(|d| !d.is_target_printer));
}

#[test]
fn test_scan_stops_long_running_scan_process() {
    let script = r#"
case "$1" in
  devices) echo "Device 11:22:33:44:55:66 Headphones" ;;
  --timeout)
    echo "[NEW] Device 66:22:B3:00:00:01 CorePrint-0001"
    exec sleep 30
    ;;
esac
"#;
    let scanner = Scanner::new()
        .with_tool(fake_bluetoothctl(script))
        .with_stop_grace(Duration::from_millis(200));

    let started = Instant::now();
    let devices = scanner.scan(Duration::from_millis(500)).unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].display_name, "CorePrint-0001");
}

#[test]
fn test_scan_with_missing_tool() {
    let scanner = Scanner::new().with_tool(Tool::new("/nonexistent/bluetoothctl"));

    let err = scanner.scan(Duration::from_millis(100)).unwrap_err();

    assert!(
        matches!(err, PrinterError::Scan(ScanFailure::MissingTool("bluetoothctl"))),
        "{:?}",
        err
    );
    assert_eq!(err.to_string(), "Scan error: bluetoothctl not found. Is bluez installed?");
}

#[test]
fn test_hanging_device_listing_times_out() {
    let scanner = Scanner::new()
        .with_tool(fake_bluetoothctl("exec sleep 30"))
        .with_command_timeout(Duration::from_millis(200))
        .with_stop_grace(Duration::from_millis(100));

    let err = scanner.scan(Duration::from_millis(100)).unwrap_err();

    assert!(matches!(err, PrinterError::Scan(ScanFailure::TimedOut)), "{:?}", err);
}

#[test]
fn test_failing_tool_yields_empty_result() {
    let scanner = Scanner::new().with_tool(fake_bluetoothctl("echo 'No default controller available' >&2; exit 1"));

    let devices = scanner.scan(Duration::from_millis(200)).unwrap();

    assert!(devices.is_empty());
}

#[test]
fn test_scan_in_background() {
    let script = r#"[ "$1" = devices ] && echo "Device 66:22:B3:00:00:01 CorePrint-0001"; exit 0"#;
    let scanner = Scanner::new().with_tool(fake_bluetoothctl(script));
    let (tx, rx) = mpsc::channel();

    let handle = scan::scan_in_background(scanner, Duration::from_millis(200), move |result| {
        tx.send(result).unwrap();
    });

    let devices = rx.recv_timeout(Duration::from_secs(10)).unwrap().unwrap();
    handle.join().unwrap();
    assert_eq!(devices, vec![DiscoveredDevice::new("66:22:B3:00:00:01", "CorePrint-0001")]);
}

#[test]
fn test_adapter_powered() {
    let on = fake_bluetoothctl(r#"printf 'Controller 00:1A:7D:DA:71:13 (public)\n\tPowered: yes\n'"#);
    let off = fake_bluetoothctl(r#"printf 'Controller 00:1A:7D:DA:71:13 (public)\n\tPowered: no\n'"#);
    let broken = fake_bluetoothctl("exit 1");

    assert!(scan::adapter_powered(&on).unwrap());
    assert!(!scan::adapter_powered(&off).unwrap());
    assert!(!scan::adapter_powered(&broken).unwrap());
    assert!(matches!(
        scan::adapter_powered(&Tool::new("/nonexistent/bluetoothctl")),
        Err(PrinterError::Scan(ScanFailure::MissingTool(_)))
    ));
}
