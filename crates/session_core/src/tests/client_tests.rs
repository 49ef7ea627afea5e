use std::sync::Arc;

use super::*;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use serde_json::json;
use shared::{
    domain::{PartySymbol, PeerId},
    protocol::{Binding, InputDecl},
};
use tokio::{net::TcpListener, sync::oneshot};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct RoomState {
    baseline: String,
    first: Arc<Mutex<Option<oneshot::Sender<String>>>>,
}

fn baseline_json(peer: &str) -> String {
    json!({
        "type": "baseline",
        "payload": {
            "chain": {
                "chainId": "0x1",
                "chainName": "local",
                "nativeCurrency": {"name": "Nil", "symbol": "NIL", "decimals": 6},
                "rpcUrls": []
            },
            "config": {
                "clusterId": "cluster-1",
                "bootnodes": [],
                "paymentsConfig": {
                    "rpcEndpoint": "http://127.0.0.1:48102",
                    "chainId": 1,
                    "paymentsAddress": "0x1",
                    "blindingFactorsManagerAddress": "0x2"
                }
            },
            "peers": {
                peer: {"handle": "brave-teal-otter", "peerId": peer}
            }
        }
    })
    .to_string()
}

async fn room(ws: WebSocketUpgrade, State(state): State<RoomState>) -> Response {
    ws.on_upgrade(move |socket| echo_room(socket, state))
}

async fn echo_room(mut socket: WebSocket, state: RoomState) {
    let _ = socket.send(WsMessage::Text(state.baseline.clone())).await;
    while let Some(Ok(msg)) = socket.recv().await {
        if let WsMessage::Text(text) = msg {
            if let Some(tx) = state.first.lock().await.take() {
                let _ = tx.send(text.clone());
            }
            if socket.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    }
}

async fn spawn_room(peer: &str) -> (String, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (tx, rx) = oneshot::channel();
    let state = RoomState {
        baseline: baseline_json(peer),
        first: Arc::new(Mutex::new(Some(tx))),
    };
    let app = Router::new()
        .route("/parties/:room", get(room))
        .with_state(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), rx)
}

#[test]
fn room_url_switches_scheme_and_path() {
    let url = room_url("https://hub.example.com/ignored?x=1", "lobby", true).expect("url");
    assert_eq!(url.as_str(), "wss://hub.example.com/parties/lobby");

    let url = room_url("ws://127.0.0.1:1999", "main", false).expect("url");
    assert_eq!(url.as_str(), "http://127.0.0.1:1999/parties/main");

    assert!(matches!(
        room_url("ftp://hub", "main", true),
        Err(ClientError::InvalidUrl(_))
    ));
}

#[test]
fn room_names_are_percent_encoded() {
    let url = room_url("http://hub", "team a/b", true).expect("url");
    assert_eq!(url.path(), "/parties/team%20a%2Fb");
}

#[tokio::test]
async fn connect_registers_and_applies_baseline() {
    let (server_url, first) = spawn_room("alice").await;
    let client = PeerClient::connect(
        &server_url,
        "main",
        Handle::from("brave-teal-otter"),
        PeerId::from("alice"),
    )
    .await
    .expect("connect");

    let register = first.await.expect("register observed");
    assert_eq!(
        Envelope::from_json(&register).expect("decode"),
        Envelope::Register(client.me().clone())
    );

    client
        .wait_until(WAIT, |store| store.registry().contains(&PeerId::from("alice")))
        .await
        .expect("baseline applied");
    let snapshot = client.snapshot().await;
    assert_eq!(
        snapshot.cluster().map(|config| config.cluster_id.as_str()),
        Some("cluster-1")
    );
    client.close();
}

#[tokio::test]
async fn echoed_task_opens_the_prompt() {
    let (server_url, _first) = spawn_room("bob").await;
    let client = PeerClient::connect(&server_url, "main", Handle::from("bob"), PeerId::from("bob"))
        .await
        .expect("connect");

    client
        .send(&Envelope::CodePartyTask(Binding {
            owner_peer_id: PeerId::from("alice"),
            peer_id: PeerId::from("bob"),
            party_symbol: PartySymbol::from("party2"),
            party_name: "Party2".into(),
            program_id: ProgramId::from("p1"),
            inputs: vec![InputDecl {
                ty: "SecretInteger".into(),
                name: "B".into(),
            }],
            output_name: None,
        }))
        .expect("send");

    client
        .wait_until(WAIT, |store| store.prompt().is_some())
        .await
        .expect("prompt opened");
    assert_eq!(
        client.with_store(|store| store.active_program().cloned()).await,
        Some(ProgramId::from("p1"))
    );
    client.close();
}

#[tokio::test]
async fn baseline_is_readable_over_plain_http() {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let body = baseline_json("carol");
    let app = Router::new().route("/parties/:room", get(move || async move { body }));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let baseline = fetch_baseline(&format!("http://{addr}"), "main")
        .await
        .expect("baseline");
    assert!(baseline.peers.contains(&PeerId::from("carol")));
}
