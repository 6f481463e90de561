#![cfg(all(unix, feature = "cli"))]

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/jrpc-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn jrpc(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_jrpc"))
        .arg("--dir")
        .arg(dir)
        .arg("--log-level")
        .arg("error")
        .arg("--format")
        .arg("json")
        .args(args)
        .output()
        .expect("jrpc should run")
}

fn start_demo(dir: &Path) -> Child {
    let child = Command::new(env!("CARGO_BIN_EXE_jrpc"))
        .arg("--dir")
        .arg(dir)
        .arg("--log-level")
        .arg("error")
        .arg("serve")
        .arg("--port")
        .arg("demo")
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .expect("serve should start");

    let socket = dir.join("demo*.sock");
    let start = Instant::now();
    while !socket.exists() {
        if start.elapsed() >= Duration::from_secs(3) {
            panic!("demo router did not come up");
        }
        thread::sleep(Duration::from_millis(25));
    }
    child
}

fn stop(mut child: Child, dir: &Path) {
    let _ = child.kill();
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn call_prints_replies_as_json() {
    let dir = unique_temp_dir("call");
    let child = start_demo(&dir);

    let output = jrpc(&dir, &["call", "demo.add 2 3"]);
    assert!(output.status.success(), "{output:?}");
    let reply: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("call should emit json");
    assert_eq!(reply["value"], serde_json::json!(5.0));
    assert_eq!(reply["seq"], 1);

    let output = jrpc(&dir, &["call", "demo.ticks 3", "--count", "3"]);
    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.lines().count(), 3);

    stop(child, &dir);
}

#[test]
fn api_lists_demo_routes() {
    let dir = unique_temp_dir("api");
    let child = start_demo(&dir);

    let output = jrpc(&dir, &["api", "demo"]);
    assert!(output.status.success(), "{output:?}");
    let routes: Vec<String> =
        serde_json::from_slice(&output.stdout).expect("api should emit json");
    for route in ["add", "admin.stop", "echo", "ping", "ticks", "whoami"] {
        assert!(routes.contains(&route.to_string()), "missing {route}");
    }

    stop(child, &dir);
}

#[test]
fn handler_failure_exits_with_failure() {
    let dir = unique_temp_dir("fail");
    let child = start_demo(&dir);

    let output = jrpc(&dir, &["call", "demo.add x y"]);
    assert_eq!(output.status.code(), Some(1));

    stop(child, &dir);
}

#[test]
fn owner_can_stop_the_router() {
    let dir = unique_temp_dir("stop");
    let mut child = start_demo(&dir);

    let output = jrpc(&dir, &["call", "demo.admin.stop"]);
    assert!(output.status.success(), "{output:?}");

    let start = Instant::now();
    loop {
        if child.try_wait().expect("child should be waitable").is_some() {
            break;
        }
        if start.elapsed() >= Duration::from_secs(3) {
            panic!("router did not stop");
        }
        thread::sleep(Duration::from_millis(25));
    }
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn missing_router_returns_transport_error() {
    let dir = unique_temp_dir("missing");
    let output = jrpc(&dir, &["call", "nobody.home", "--timeout", "1s"]);
    assert_eq!(output.status.code(), Some(3));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn ports_lists_registered_sockets() {
    let dir = unique_temp_dir("ports");
    let child = start_demo(&dir);

    let output = jrpc(&dir, &["ports"]);
    assert!(output.status.success(), "{output:?}");
    let ports: Vec<String> = serde_json::from_slice(&output.stdout).expect("ports json");
    assert_eq!(ports, vec!["demo*".to_string()]);

    stop(child, &dir);
}
