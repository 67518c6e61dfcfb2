mod common;

use assert_cmd::Command;
use predicates::str::contains;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn cmd(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("edgescan").unwrap();
    cmd.current_dir(dir).arg("--accessible");
    cmd
}

/// A working directory holding the default input files.
fn workdir(config: &str, ranges: &str) -> TempDir {
    let tmp = TempDir::new().expect("create temp dir");
    fs::write(tmp.path().join("config.json"), config).unwrap();
    fs::write(tmp.path().join("iprange.txt"), ranges).unwrap();
    fs::write(tmp.path().join("cacert.pem"), "").unwrap();
    tmp
}

#[test]
fn missing_config_is_fatal() {
    let tmp = TempDir::new().unwrap();

    cmd(tmp.path())
        .assert()
        .failure()
        .stdout(contains("could not read config file"));

    assert!(!tmp.path().join("okip.txt").exists());
}

#[test]
fn malformed_config_is_fatal() {
    let tmp = workdir(r#"{"concurrency": "many"}"#, "10.0.0.1\n");

    cmd(tmp.path())
        .assert()
        .failure()
        .stdout(contains("malformed config file"));
}

#[test]
fn zero_concurrency_is_fatal() {
    let tmp = workdir(r#"{"concurrency": 0, "server": ["gws"]}"#, "10.0.0.1\n");

    cmd(tmp.path())
        .assert()
        .failure()
        .stdout(contains("concurrency must be a positive integer"));
}

#[test]
fn malformed_range_is_fatal() {
    let tmp = workdir(
        r#"{"concurrency": 4, "server": ["gws"]}"#,
        "10.0.0.0/30\n10.0.0.9-10.0.0.1\n",
    );

    cmd(tmp.path())
        .assert()
        .failure()
        .stdout(contains("start address is greater than end address"));

    assert!(!tmp.path().join("okip.txt").exists());
}

#[test]
fn missing_trust_bundle_is_fatal() {
    let tmp = workdir(r#"{"concurrency": 4, "server": ["gws"]}"#, "10.0.0.1\n");
    fs::remove_file(tmp.path().join("cacert.pem")).unwrap();

    cmd(tmp.path())
        .assert()
        .failure()
        .stdout(contains("could not read trust bundle"));
}

#[test]
fn prints_run_summary() {
    let tmp = workdir(
        r#"{"concurrency": 4, "server": ["gws", "gvs 1.0"]}"#,
        "127.0.0.1\n\n127.0.0.1\n",
    );

    cmd(tmp.path())
        .assert()
        .success()
        .stdout(contains("Concurrency: 4"))
        .stdout(contains(r#""gws", "gvs 1.0""#))
        .stdout(contains("Addresses to be checked: 2"))
        .stdout(contains("Accepted 0 candidates"));

    assert!(!tmp.path().join("okip.txt").exists());
}

#[test]
fn cli_flags_apply_without_config() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("ranges.txt"), "127.0.0.0/30\n").unwrap();
    fs::write(tmp.path().join("roots.pem"), "").unwrap();

    cmd(tmp.path())
        .args([
            "--no-config",
            "--ranges",
            "ranges.txt",
            "--cacert",
            "roots.pem",
            "--concurrency",
            "2",
            "--server",
            "gws",
            "--mode",
            "http",
            "--http-timeout",
            "500",
        ])
        .assert()
        .success()
        .stdout(contains("Concurrency: 2"))
        .stdout(contains("Addresses to be checked: 2"));
}

#[test]
fn greppable_mode_is_quiet() {
    let tmp = workdir(r#"{"concurrency": 2, "server": ["gws"]}"#, "127.0.0.1\n");

    cmd(tmp.path())
        .arg("--greppable")
        .assert()
        .success()
        .stdout("");
}

#[cfg(target_os = "linux")]
#[tokio::test(flavor = "multi_thread")]
async fn interrupt_writes_candidates_found_so_far() {
    use std::process::Stdio;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::time;

    let hit = common::responder("127.0.0.1:0", None).await;
    common::stall(&format!("127.0.0.2:{}", hit.port())).await;
    let tmp = workdir(
        r#"{"concurrency": 4, "server": ["gws"]}"#,
        "127.0.0.1\n127.0.0.2\n",
    );

    let mut child = tokio::process::Command::new(env!("CARGO_BIN_EXE_edgescan"))
        .current_dir(tmp.path())
        .args(["--accessible", "--port", &hit.port().to_string()])
        .stdout(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .unwrap();
    let mut lines = BufReader::new(child.stdout.take().unwrap()).lines();

    // The stalled handshake keeps the run going well past this point.
    let mut stdout = String::new();
    loop {
        let line = time::timeout(Duration::from_secs(5), lines.next_line())
            .await
            .expect("accepted line within five seconds")
            .unwrap()
            .expect("stdout still open");
        stdout.push_str(&line);
        stdout.push('\n');
        if line.starts_with("Found ") {
            break;
        }
    }

    let pid = child.id().unwrap().to_string();
    let killed = std::process::Command::new("kill")
        .args(["-INT", &pid])
        .status()
        .unwrap();
    assert!(killed.success());

    while let Some(line) = lines.next_line().await.unwrap() {
        stdout.push_str(&line);
        stdout.push('\n');
    }
    let status = child.wait().await.unwrap();

    assert_eq!(status.code(), Some(1));
    assert!(stdout.contains("Found 127.0.0.1 "));
    assert!(stdout.contains("Interrupted, writing 1 candidates found so far"));
    assert!(!stdout.contains("Accepted"));

    let written = fs::read_to_string(tmp.path().join("okip.txt")).unwrap();
    let fields: Vec<&str> = written.split_whitespace().collect();
    assert_eq!(written.lines().count(), 1);
    assert!(written.ends_with('\n'));
    assert_eq!(fields[0], "127.0.0.1");
    assert!(fields[1].parse::<u64>().is_ok());
    assert_eq!(fields[2..], ["google.com", "gws"]);
}

#[test]
fn oversized_range_is_fatal() {
    let tmp = workdir(r#"{"concurrency": 4, "server": ["gws"]}"#, "2001:db8::/64\n");

    cmd(tmp.path())
        .assert()
        .failure()
        .stdout(contains("holds more than 16777216 addresses"));

    assert!(!tmp.path().join("okip.txt").exists());
}
