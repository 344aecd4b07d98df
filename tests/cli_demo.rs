//! CLI integration tests for the demo and bench modes.

use std::process::Command;

fn summary_value<'a>(stdout: &'a str, key: &str) -> &'a str {
    let prefix = format!("{key}=");
    stdout
        .lines()
        .find_map(|line| line.strip_prefix(prefix.as_str()))
        .unwrap_or_else(|| panic!("{key} line missing"))
        .trim()
}

#[test]
fn demo_cli_reports_progress_and_clean_shutdown() {
    let bin = env!("CARGO_BIN_EXE_assembly_station");
    // Shrink time units so the full 5-worker demo finishes quickly.
    let output = Command::new(bin)
        .args([
            "demo",
            "--duration-ms",
            "800",
            "--time-unit-us",
            "10",
            "--seed",
            "3",
            "--validate",
        ])
        .output()
        .expect("failed to run demo binary");

    assert!(
        output.status.success(),
        "demo exited with non-zero status: {:?}",
        output.status
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("STATION SUMMARY"),
        "station summary missing from output"
    );
    assert_eq!(summary_value(&stdout, "workers"), "5");

    let mut sum = 0u64;
    for id in 0..5 {
        let units: u64 = summary_value(&stdout, &format!("worker_{id}_units"))
            .parse()
            .expect("unit count is a number");
        assert!(units > 0, "worker {id} assembled nothing");
        sum += units;
    }
    let total: u64 = summary_value(&stdout, "total_units")
        .parse()
        .expect("total is a number");
    assert_eq!(total, sum);

    assert_eq!(summary_value(&stdout, "leaked_resources"), "[]");
    assert_eq!(summary_value(&stdout, "exclusion_violation"), "false");
    assert_eq!(summary_value(&stdout, "ordering_violation"), "false");
    assert_eq!(summary_value(&stdout, "peak_holders"), "1");
}

#[test]
fn demo_without_validate_skips_the_order_audit() {
    let bin = env!("CARGO_BIN_EXE_assembly_station");
    // No subcommand: the top-level flags drive the default demo.
    let output = Command::new(bin)
        .args(["--workers", "3", "--duration-ms", "200", "--time-unit-us", "10"])
        .output()
        .expect("failed to run demo binary");

    assert!(output.status.success(), "demo failed: {:?}", output.status);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(summary_value(&stdout, "workers"), "3");
    assert_eq!(summary_value(&stdout, "ordering_violation"), "unchecked");
    assert_eq!(summary_value(&stdout, "stalled_workers"), "[]");
    assert_eq!(summary_value(&stdout, "exclusion_violation"), "false");
}

#[test]
fn bench_cli_prints_csv_row_without_violations() {
    let bin = env!("CARGO_BIN_EXE_assembly_station");
    let output = Command::new(bin)
        .args([
            "bench",
            "--workers",
            "2",
            "--duration-ms",
            "200",
            "--time-unit-us",
            "10",
            "--validate",
        ])
        .output()
        .expect("failed to run bench binary");

    assert!(output.status.success(), "bench failed: {:?}", output.status);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut lines = stdout.lines();
    let header = lines.next().expect("csv header");
    let row = lines.next().expect("csv row");
    assert!(header.starts_with("workers,duration_ms,total_units"));
    assert_eq!(header.split(',').count(), row.split(',').count());
    assert!(row.starts_with("2,200,"));

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!stderr.contains("# violation"), "violations reported: {stderr}");
}

#[test]
fn zero_workers_is_rejected() {
    let bin = env!("CARGO_BIN_EXE_assembly_station");
    let output = Command::new(bin)
        .args(["demo", "--workers", "0", "--duration-ms", "10"])
        .output()
        .expect("failed to run demo binary");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("at least one worker"), "stderr: {stderr}");
}
