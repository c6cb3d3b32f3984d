#![cfg(all(unix, feature = "cli"))]

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/hubtunnel-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn hubtunnel() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_hubtunnel"));
    command
        .env_remove("HUBTUNNEL_PIPE")
        .env_remove("HUBTUNNEL_URL")
        .env_remove("HUBTUNNEL_TOKEN")
        .env_remove("RUST_LOG")
        .arg("--log-level")
        .arg("error");
    command
}

fn run(args: &[&str]) -> Output {
    hubtunnel()
        .args(args)
        .output()
        .expect("hubtunnel should run")
}

fn wait_for_path(path: &Path, timeout: Duration) {
    let start = Instant::now();
    while !path.exists() {
        assert!(
            start.elapsed() < timeout,
            "{} did not appear",
            path.display()
        );
        thread::sleep(Duration::from_millis(25));
    }
}

struct MockServer {
    child: Child,
    socket: PathBuf,
}

impl MockServer {
    fn start(tag: &str) -> Self {
        let socket = unique_temp_dir(tag).join("hub.sock");
        let child = hubtunnel()
            .arg("serve-mock")
            .arg(&socket)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("serve-mock should start");
        wait_for_path(&socket, Duration::from_secs(5));
        Self { child, socket }
    }

    fn pipe(&self) -> &str {
        self.socket.to_str().expect("socket path should be UTF-8")
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[test]
fn version_prints_package_version() {
    let output = run(&["version"]);
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("hubtunnel "), "{stdout}");
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")), "{stdout}");
}

#[test]
fn extended_version_reports_protocol() {
    let output = run(&["version", "--extended"]);
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("protocol: messagepack v1"), "{stdout}");
}

#[test]
fn missing_target_is_a_usage_error() {
    let output = run(&["invoke", "Echo"]);
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no hub given"), "{stderr}");
}

#[test]
fn invalid_json_arguments_are_a_usage_error() {
    let output = run(&["--pipe", "unused", "invoke", "Echo", "--args", "[1,"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn conflicting_targets_are_rejected() {
    let output = run(&["--pipe", "a", "--url", "tcp://127.0.0.1:9", "send", "Ping"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn missing_pipe_is_a_connect_error() {
    let socket = unique_temp_dir("missing").join("absent.sock");
    let output = run(&[
        "--pipe",
        socket.to_str().expect("path should be UTF-8"),
        "--timeout",
        "2s",
        "invoke",
        "Echo",
    ]);
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn invoke_against_mock_hub_prints_result() {
    let server = MockServer::start("invoke");
    let output = run(&[
        "--pipe",
        server.pipe(),
        "--format",
        "json",
        "invoke",
        "Echo",
        "--args",
        "[42]",
    ]);

    assert_eq!(
        output.status.code(),
        Some(0),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "42");
}

#[test]
fn invoke_without_arguments_prints_null() {
    let server = MockServer::start("void");
    let output = run(&["--pipe", server.pipe(), "--format", "json", "invoke", "Ping"]);

    assert_eq!(output.status.code(), Some(0));
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "null");
}

#[test]
fn send_against_mock_hub_succeeds() {
    let server = MockServer::start("send");
    let output = run(&["--pipe", server.pipe(), "send", "Notify", "--args", "\"hi\""]);
    assert_eq!(output.status.code(), Some(0));
    assert!(output.stdout.is_empty());
}

#[test]
fn unix_url_reaches_mock_hub() {
    let server = MockServer::start("url");
    let url = format!("unix://{}", server.pipe());
    let output = run(&[
        "--url", &url, "--format", "json", "invoke", "Echo", "--args", "\"hello\"",
    ]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "\"hello\"");
}
