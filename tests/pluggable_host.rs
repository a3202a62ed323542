//! End-to-end tests against a fake plugin process speaking the framed-JSON
//! contract over a real unix socket.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;

use capsock::component::{ComponentKind, Descriptor};
use capsock::config::{ComponentSpec, HostConfig};
use capsock::connector::socket_path_for;
use capsock::connector::PluggableClient;
use capsock::middleware::{HttpContext, Next};
use capsock::registry::Registry;
use capsock::runtime::{load_pluggables, RuntimeOptions};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn send_frame(write: &mut OwnedWriteHalf, frame: Value) {
    let mut line = serde_json::to_vec(&frame).unwrap();
    line.push(b'\n');
    write.write_all(&line).await.unwrap();
    write.flush().await.unwrap();
}

fn ok_response(id: u64) -> Value {
    json!({"frame": "response", "id": id, "result": {}})
}

/// Serves ping/init and, per `handle` stream: rewrites a request header,
/// asks the host to run its own chain, reads the downstream body, uppercases
/// it, and closes.
async fn run_uppercase_middleware_plugin(listener: UnixListener) {
    let (stream, _) = listener.accept().await.unwrap();
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    let mut handle_id: Option<u64> = None;

    while let Ok(Some(line)) = lines.next_line().await {
        let frame: Value = serde_json::from_str(&line).unwrap();
        match frame["frame"].as_str().unwrap() {
            "request" => {
                let id = frame["id"].as_u64().unwrap();
                match frame["method"].as_str().unwrap() {
                    "ping" | "init" => send_frame(&mut write, ok_response(id)).await,
                    "handle" => {
                        handle_id = Some(id);
                        for payload in [
                            json!({"command": "set_request_headers",
                                   "headers": {"x-plugin": "uppercase"}}),
                            json!({"command": "execute_next"}),
                            json!({"command": "get_response_body"}),
                        ] {
                            send_frame(
                                &mut write,
                                json!({"frame": "stream_item", "id": id, "payload": payload}),
                            )
                            .await;
                        }
                    }
                    other => panic!("unexpected method {other}"),
                }
            }
            "stream_item" => {
                let id = frame["id"].as_u64().unwrap();
                assert_eq!(Some(id), handle_id);
                let payload = &frame["payload"];
                assert_eq!(payload["response"], "response_body");

                let data: Vec<u8> = payload["data"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .map(|v| v.as_u64().unwrap() as u8)
                    .collect();
                let upper: Vec<u8> = data.iter().map(|b| b.to_ascii_uppercase()).collect();

                send_frame(
                    &mut write,
                    json!({"frame": "stream_item", "id": id,
                           "payload": {"command": "set_response_body", "data": upper}}),
                )
                .await;
                send_frame(&mut write, json!({"frame": "stream_close", "id": id})).await;
            }
            "stream_close" => {}
            other => panic!("unexpected frame {other}"),
        }
    }
}

/// Serves ping/init and echoes capability calls back under `"echo"`.
async fn run_echo_plugin(listener: UnixListener) {
    let (stream, _) = listener.accept().await.unwrap();
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let frame: Value = serde_json::from_str(&line).unwrap();
        if frame["frame"] != "request" {
            continue;
        }
        let id = frame["id"].as_u64().unwrap();
        match frame["method"].as_str().unwrap() {
            "ping" | "init" => send_frame(&mut write, ok_response(id)).await,
            method => {
                let reply = json!({"frame": "response", "id": id,
                                   "result": {"echo": method, "params": frame["params"]}});
                send_frame(&mut write, reply).await;
            }
        }
    }
}

fn host_config(folder: &Path, components: Vec<ComponentSpec>) -> HostConfig {
    HostConfig {
        sockets_folder: folder.to_path_buf(),
        dial_timeout_ms: 2_000,
        components,
    }
}

fn downstream(body: &'static [u8]) -> Next<'static> {
    Box::new(move |ctx: &mut HttpContext| {
        Box::pin(async move {
            ctx.response.body = bytes::Bytes::from_static(body);
            Ok::<(), String>(())
        })
    })
}

#[tokio::test]
async fn middleware_plugin_participates_in_request_processing() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let descriptor = Descriptor::new(ComponentKind::HttpMiddleware, "upper", "v1");
    let socket = socket_path_for(dir.path(), &descriptor, "upper");

    let listener = UnixListener::bind(&socket).unwrap();
    tokio::spawn(run_uppercase_middleware_plugin(listener));

    let config = host_config(
        dir.path(),
        vec![ComponentSpec {
            kind: ComponentKind::HttpMiddleware,
            name: "upper".into(),
            version: "v1".into(),
            instance: None,
            properties: HashMap::from([("mode".into(), "loud".into())]),
        }],
    );

    let registry = Registry::with_defaults(&config);
    let mut options = RuntimeOptions::new();
    let report = load_pluggables(&registry, &config.descriptors(), &mut options)
        .await
        .unwrap();
    assert_eq!(report.applied, 1);

    let middleware = &options.http_middleware[0];
    assert_eq!(middleware.name(), "upper");

    let mut ctx = HttpContext::new("GET", "/greeting");
    middleware
        .handle(&mut ctx, downstream(b"hello"), &CancellationToken::new())
        .await;

    assert_eq!(&ctx.response.body[..], b"HELLO");
    assert_eq!(ctx.request_header("x-plugin"), Some("uppercase"));
}

#[tokio::test]
async fn state_plugin_loads_and_answers_capability_calls() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let descriptor = Descriptor::new(ComponentKind::State, "kv", "v1");
    let socket = socket_path_for(dir.path(), &descriptor, "kv");

    let listener = UnixListener::bind(&socket).unwrap();
    tokio::spawn(run_echo_plugin(listener));

    let config = host_config(
        dir.path(),
        vec![ComponentSpec {
            kind: ComponentKind::State,
            name: "kv".into(),
            version: "v1".into(),
            instance: None,
            properties: HashMap::new(),
        }],
    );

    let registry = Registry::with_defaults(&config);
    let mut options = RuntimeOptions::new();
    load_pluggables(&registry, &config.descriptors(), &mut options)
        .await
        .unwrap();

    let state = &options.states[0];
    let result = state
        .client()
        .expect("loaded state component is dialed")
        .invoke("get", json!({"key": "answer"}))
        .await
        .unwrap();
    assert_eq!(result["echo"], "get");
    assert_eq!(result["params"]["key"], "answer");
}

#[tokio::test]
async fn dial_waits_for_a_socket_bound_late() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let descriptor = Descriptor::new(ComponentKind::State, "slowpoke", "v1");
    let socket = socket_path_for(dir.path(), &descriptor, "slowpoke");

    // Plugin binds only after the host has started dialing.
    let socket_for_plugin = socket.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        let listener = UnixListener::bind(&socket_for_plugin).unwrap();
        run_echo_plugin(listener).await;
    });

    let config = host_config(
        dir.path(),
        vec![ComponentSpec {
            kind: ComponentKind::State,
            name: "slowpoke".into(),
            version: "v1".into(),
            instance: None,
            properties: HashMap::new(),
        }],
    );

    let registry = Registry::with_defaults(&config);
    let mut options = RuntimeOptions::new();
    let report = load_pluggables(&registry, &config.descriptors(), &mut options)
        .await
        .unwrap();
    assert_eq!(report.applied, 1);
}

#[tokio::test]
async fn stalled_middleware_times_out_with_a_named_error_response() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let descriptor = Descriptor::new(ComponentKind::HttpMiddleware, "tarpit", "v1");
    let socket = socket_path_for(dir.path(), &descriptor, "tarpit");

    // Answers ping/init and accepts the handle stream, then goes silent.
    let listener = UnixListener::bind(&socket).unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let frame: Value = serde_json::from_str(&line).unwrap();
            if frame["frame"] == "request" {
                let id = frame["id"].as_u64().unwrap();
                match frame["method"].as_str().unwrap() {
                    "ping" | "init" => send_frame(&mut write, ok_response(id)).await,
                    "handle" => {} // never respond, never close
                    _ => {}
                }
            }
        }
    });

    let config = host_config(
        dir.path(),
        vec![ComponentSpec {
            kind: ComponentKind::HttpMiddleware,
            name: "tarpit".into(),
            version: "v1".into(),
            instance: None,
            properties: HashMap::new(),
        }],
    );

    let registry = Registry::with_defaults(&config);
    let mut options = RuntimeOptions::new();
    load_pluggables(&registry, &config.descriptors(), &mut options)
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let mut ctx = HttpContext::new("GET", "/");
    options.http_middleware[0]
        .handle(&mut ctx, downstream(b"unreached"), &cancel)
        .await;

    assert_eq!(ctx.response.status, http::StatusCode::INTERNAL_SERVER_ERROR);
    let body = String::from_utf8(ctx.response.body.to_vec()).unwrap();
    assert!(body.contains("tarpit"), "body was: {body}");
}

#[tokio::test]
async fn unknown_kind_in_a_batch_is_skipped_without_failing_startup() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let descriptor = Descriptor::new(ComponentKind::State, "kv", "v1");
    let socket = socket_path_for(dir.path(), &descriptor, "kv");

    let listener = UnixListener::bind(&socket).unwrap();
    tokio::spawn(run_echo_plugin(listener));

    let config = host_config(
        dir.path(),
        vec![ComponentSpec {
            kind: ComponentKind::State,
            name: "kv".into(),
            version: "v1".into(),
            instance: None,
            properties: HashMap::new(),
        }],
    );

    // A host build that only supports state stores: delegate the state
    // builder to a fully-populated registry, register nothing else.
    let full = std::sync::Arc::new(Registry::with_defaults(&config));
    let mut registry = Registry::new();
    let delegate = full.clone();
    registry.register(ComponentKind::State, move |d: Descriptor| {
        let delegate = delegate.clone();
        async move {
            delegate
                .resolve(&d)
                .await
                .expect("state builder registered")
        }
    });

    let descriptors = vec![
        Descriptor::new(ComponentKind::State, "kv", "v1"),
        Descriptor::new(ComponentKind::Lock, "mutex", "v1"),
    ];

    let mut options = RuntimeOptions::new();
    let report = load_pluggables(&registry, &descriptors, &mut options)
        .await
        .unwrap();

    assert_eq!(report.applied, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(options.states.len(), 1);
    assert!(options.locks.is_empty());
}
