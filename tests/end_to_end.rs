//! End-to-end tests over real sockets on ephemeral ports.

use parking_lot::Mutex;
use postbird::{
    Client, ClientConfig, ClientError, Config, Endpoint, EndpointError, FunctionRegistry, Mode,
    TransportKind,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

type Calls = Arc<Mutex<Vec<(String, Vec<Value>)>>>;

async fn wait_until(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn server_config(transport: TransportKind) -> Config {
    let mut config = Config::default();
    config.mode = Mode::Server;
    config.transport = transport;
    config.network.bind_address = "127.0.0.1".into();
    config.network.bind_port = 0;
    config
}

fn client_config(endpoint: &Endpoint, transport: TransportKind) -> ClientConfig {
    let addr = endpoint.local_addr().expect("server endpoint has an address");
    ClientConfig::new(addr.to_string()).with_transport(transport)
}

/// Registry whose `echo` records every invocation.
fn recording_registry() -> (FunctionRegistry, Calls) {
    let calls: Calls = Arc::new(Mutex::new(Vec::new()));
    let registry = FunctionRegistry::new()
        .with("echo", {
            let calls = calls.clone();
            move |s: String| {
                calls.lock().push(("echo".into(), vec![json!(s.clone())]));
                s
            }
        })
        .with("add", {
            let calls = calls.clone();
            move |a: i64, b: i64| {
                calls.lock().push(("add".into(), vec![json!(a), json!(b)]));
                a + b
            }
        });
    (registry, calls)
}

async fn echo_scenario(transport: TransportKind) {
    let (registry, calls) = recording_registry();
    let server = Endpoint::start(server_config(transport), registry)
        .await
        .unwrap();

    let client = Client::new(client_config(&server, transport));
    client.connect().await.unwrap();
    client.call("echo", vec![json!("hi")]).await.unwrap();

    wait_until(|| !calls.lock().is_empty()).await;
    // Give a stray duplicate time to show up.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        calls.lock().clone(),
        vec![("echo".to_string(), vec![json!("hi")])]
    );

    client.close().await.unwrap();
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn echo_is_invoked_once_over_raw_tcp() {
    echo_scenario(TransportKind::RawTcp).await;
}

#[tokio::test]
async fn echo_is_invoked_once_over_push_channel() {
    echo_scenario(TransportKind::PushChannel).await;
}

#[tokio::test]
async fn wrong_arity_and_unknown_names_invoke_nothing() {
    let (registry, calls) = recording_registry();
    let server = Endpoint::start(server_config(TransportKind::RawTcp), registry)
        .await
        .unwrap();
    let stats_server = server.server().unwrap().clone();

    let client = Client::new(client_config(&server, TransportKind::RawTcp));
    client.connect().await.unwrap();
    client.call("add", vec![json!(1)]).await.unwrap();
    client.call("missing", vec![]).await.unwrap();
    client.call("add", vec![json!("one"), json!(2)]).await.unwrap();
    client.call("add", vec![json!(1), json!(2)]).await.unwrap();

    wait_until(|| {
        let stats = stats_server.stats();
        stats.calls_succeeded.load(std::sync::atomic::Ordering::Relaxed)
            + stats.calls_failed.load(std::sync::atomic::Ordering::Relaxed)
            == 4
    })
    .await;
    assert_eq!(
        calls.lock().clone(),
        vec![("add".to_string(), vec![json!(1), json!(2)])]
    );
    // The failed calls did not cost the connection.
    assert_eq!(stats_server.peer_count(), 1);

    client.close().await.unwrap();
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn disconnecting_one_client_leaves_the_others() {
    let (registry, _calls) = recording_registry();
    let server = Endpoint::start(server_config(TransportKind::PushChannel), registry)
        .await
        .unwrap();
    let srv = server.server().unwrap().clone();

    let mut clients = Vec::new();
    for _ in 0..5 {
        let client = Client::new(client_config(&server, TransportKind::PushChannel));
        client.connect().await.unwrap();
        clients.push(client);
    }
    wait_until(|| srv.peer_count() == 5).await;

    let mut before = srv.peers();
    before.sort_by(|a, b| a.id.cmp(&b.id));

    let leaving = clients.remove(2);
    let leaving_id = leaving.session_id().unwrap();
    leaving.close().await.unwrap();
    wait_until(|| srv.peer_count() == 4).await;

    let mut after = srv.peers();
    after.sort_by(|a, b| a.id.cmp(&b.id));
    let expected: Vec<_> = before.into_iter().filter(|p| p.id != leaving_id).collect();
    assert_eq!(after, expected);

    // Remaining clients still reach the server.
    assert_eq!(server.call("echo", vec![json!("still")]).await.unwrap(), 4);

    for client in clients {
        client.close().await.unwrap();
    }
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn broadcast_without_peers_is_a_no_op() {
    let (registry, _calls) = recording_registry();
    let server = Endpoint::start(server_config(TransportKind::RawTcp), registry)
        .await
        .unwrap();
    assert_eq!(server.call("echo", vec![json!("nobody")]).await.unwrap(), 0);
    let stats = server.server().unwrap().stats();
    assert_eq!(stats.broadcasts.load(std::sync::atomic::Ordering::Relaxed), 0);
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn garbage_on_one_connection_does_not_affect_another() {
    let (registry, calls) = recording_registry();
    let server = Endpoint::start(server_config(TransportKind::RawTcp), registry)
        .await
        .unwrap();
    let srv = server.server().unwrap().clone();
    let addr = server.local_addr().unwrap();

    let good = Client::new(client_config(&server, TransportKind::RawTcp));
    good.connect().await.unwrap();
    let mut bad = TcpStream::connect(addr).await.unwrap();
    wait_until(|| srv.peer_count() == 2).await;
    let good_peer = srv
        .peers()
        .into_iter()
        .find(|p| p.addr != bad.local_addr().unwrap())
        .unwrap();

    bad.write_all(b"{\"FunctionName\": 12}\n").await.unwrap();
    let mut buf = [0u8; 8];
    assert_eq!(bad.read(&mut buf).await.unwrap(), 0);
    wait_until(|| srv.peer_count() == 1).await;
    assert_eq!(srv.peers(), vec![good_peer]);

    good.call("echo", vec![json!("fine")]).await.unwrap();
    wait_until(|| !calls.lock().is_empty()).await;
    assert_eq!(calls.lock()[0].1, vec![json!("fine")]);

    good.close().await.unwrap();
    server.shutdown().await.unwrap();
}

async fn broadcast_reaches_client(transport: TransportKind) {
    let (registry, _calls) = recording_registry();
    let server = Endpoint::start(server_config(transport), registry)
        .await
        .unwrap();
    let srv = server.server().unwrap().clone();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let client_registry = FunctionRegistry::new().with("notify", move |msg: String| {
        let _ = tx.send(msg);
    });

    let mut config = Config::default();
    config.mode = Mode::Client;
    config.transport = transport;
    config.network.remote_address = "127.0.0.1".into();
    config.network.remote_port = server.local_addr().unwrap().port();
    let client = Endpoint::start(config, client_registry).await.unwrap();
    assert_eq!(client.mode(), Mode::Client);

    wait_until(|| srv.peer_count() == 1).await;
    assert_eq!(server.call("notify", vec![json!("hello")]).await.unwrap(), 1);
    let got = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got, "hello");

    client.shutdown().await.unwrap();
    wait_until(|| srv.peer_count() == 0).await;
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn server_broadcast_reaches_client_over_raw_tcp() {
    broadcast_reaches_client(TransportKind::RawTcp).await;
}

#[tokio::test]
async fn server_broadcast_reaches_client_over_push_channel() {
    broadcast_reaches_client(TransportKind::PushChannel).await;
}

#[tokio::test]
async fn client_call_without_connection_fails() {
    let (registry, _calls) = recording_registry();
    let server = Endpoint::start(server_config(TransportKind::RawTcp), registry)
        .await
        .unwrap();

    let client = Client::new(client_config(&server, TransportKind::RawTcp));
    let err = client.call("echo", vec![json!("hi")]).await.unwrap_err();
    assert!(matches!(err, ClientError::NotConnected));

    client.connect().await.unwrap();
    client.close().await.unwrap();
    let err = client.call("echo", vec![json!("hi")]).await.unwrap_err();
    assert!(matches!(err, ClientError::NotConnected));

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn client_endpoint_reports_refused_connection() {
    let spare = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = spare.local_addr().unwrap().port();
    drop(spare);

    let mut config = Config::default();
    config.mode = Mode::Client;
    config.network.remote_port = port;
    let err = Endpoint::start(config, FunctionRegistry::new())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, EndpointError::Client(ClientError::Io(_))));
}

#[tokio::test]
async fn shutdown_closes_every_connection() {
    let (registry, _calls) = recording_registry();
    let server = Endpoint::start(server_config(TransportKind::RawTcp), registry)
        .await
        .unwrap();
    let srv = server.server().unwrap().clone();
    let addr = server.local_addr().unwrap();

    let mut streams = Vec::new();
    for _ in 0..3 {
        streams.push(TcpStream::connect(addr).await.unwrap());
    }
    wait_until(|| srv.peer_count() == 3).await;

    server.shutdown().await.unwrap();
    assert_eq!(srv.peer_count(), 0);
    assert!(!srv.is_running());
    for mut stream in streams {
        let mut buf = [0u8; 8];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
    }
    assert!(TcpStream::connect(addr).await.is_err());
}
