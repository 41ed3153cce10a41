#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use metaverse_core::grid::Position;
use metaverse_core::net::messages::{ClientMessage, JoinMsg, MoveMsg, ServerMessage, SpaceJoinedMsg};
use metaverse_core::net::protocol::{decode_server_message, encode_client_message};
use metaverse_core::spawn::{FixedSpawn, UniformSpawn};

use metaverse_server::auth::JwtIdentity;
use metaverse_server::config::{AuthFileConfig, ServerConfig, SpaceEntry};
use metaverse_server::oracle::SpaceCatalog;
use metaverse_server::router;
use metaverse_server::state::AppState;

pub const SECRET: &str = "integration-test-secret";
pub const LOBBY: &str = "lobby";
pub const GARDEN: &str = "garden";

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const READ_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    _shutdown: tokio::task::JoinHandle<()>,
}

/// Config with a signing secret and two spaces: `lobby` (100x200) and `garden` (10x10).
pub fn test_config() -> ServerConfig {
    ServerConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        auth: AuthFileConfig {
            jwt_secret: Some(SECRET.to_string()),
        },
        spaces: vec![
            SpaceEntry {
                id: LOBBY.to_string(),
                width: 100,
                height: 200,
            },
            SpaceEntry {
                id: GARDEN.to_string(),
                width: 10,
                height: 10,
            },
        ],
        ..ServerConfig::default()
    }
}

impl TestServer {
    /// Start a test server with uniform spawn placement.
    pub async fn new() -> Self {
        Self::from_config(test_config()).await
    }

    /// Start a test server where every session spawns at `spawn`.
    pub async fn with_fixed_spawn(spawn: Position) -> Self {
        Self::from_config_and_spawn(test_config(), Arc::new(FixedSpawn(spawn))).await
    }

    pub async fn from_config(config: ServerConfig) -> Self {
        Self::from_config_and_spawn(config, Arc::new(UniformSpawn)).await
    }

    pub async fn from_config_and_spawn(
        config: ServerConfig,
        spawn: Arc<dyn metaverse_core::spawn::SpawnPolicy>,
    ) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let catalog = SpaceCatalog::from_entries(&config.spaces);
        let identity = JwtIdentity::new(SECRET);
        let state =
            AppState::with_collaborators(config, Arc::new(identity), Arc::new(catalog), spawn);
        let app = router(state.clone());

        let handle = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        // Give the server a moment to start accepting
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            state,
            _shutdown: handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Poll the registry until `space_id` has `count` members (5s timeout).
    pub async fn wait_for_member_count(&self, space_id: &str, count: usize) {
        let result = tokio::time::timeout(READ_TIMEOUT, async {
            while self.state.rooms.member_count(space_id).await != count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(
            result.is_ok(),
            "space {space_id} never reached {count} members"
        );
    }
}

/// Sign a credential for `user_id` the way the user service would.
pub fn token(user_id: &str) -> String {
    JwtIdentity::new(SECRET).issue(user_id, None).unwrap()
}

/// Connect a WebSocket client to the given URL.
pub async fn ws_connect(url: &str) -> WsStream {
    let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    stream
}

pub async fn ws_send(stream: &mut WsStream, msg: &ClientMessage) {
    let encoded = encode_client_message(msg).unwrap();
    ws_send_text(stream, &encoded).await;
}

pub async fn ws_send_text(stream: &mut WsStream, text: &str) {
    stream.send(Message::Text(text.into())).await.unwrap();
}

pub async fn ws_send_join(stream: &mut WsStream, space_id: &str, token: String) {
    let msg = ClientMessage::Join(JoinMsg {
        space_id: space_id.to_string(),
        token,
    });
    ws_send(stream, &msg).await;
}

/// Join `space_id` as `user_id` and return the `space-joined` acknowledgement.
pub async fn ws_join(stream: &mut WsStream, space_id: &str, user_id: &str) -> SpaceJoinedMsg {
    ws_send_join(stream, space_id, token(user_id)).await;
    match ws_read_server_msg(stream).await {
        ServerMessage::SpaceJoined(joined) => joined,
        other => panic!("Expected SpaceJoined, got: {other:?}"),
    }
}

/// Connect and join in one step.
pub async fn connect_and_join(
    server: &TestServer,
    space_id: &str,
    user_id: &str,
) -> (WsStream, SpaceJoinedMsg) {
    let mut stream = ws_connect(&server.ws_url()).await;
    let joined = ws_join(&mut stream, space_id, user_id).await;
    (stream, joined)
}

pub async fn ws_send_move(stream: &mut WsStream, x: i64, y: i64) {
    ws_send(stream, &ClientMessage::Move(MoveMsg { x, y })).await;
}

/// Read the next server event from a WebSocket stream (5s timeout).
pub async fn ws_read_server_msg(stream: &mut WsStream) -> ServerMessage {
    tokio::time::timeout(READ_TIMEOUT, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return decode_server_message(text.as_str()).unwrap();
                },
                Some(Ok(Message::Close(_))) => panic!("WebSocket closed unexpectedly"),
                Some(Err(e)) => panic!("WebSocket error: {e}"),
                None => panic!("WebSocket stream ended"),
                _ => continue,
            }
        }
    })
    .await
    .expect("Timed out waiting for server message")
}

/// Assert the server closes the connection without sending any event (5s timeout).
pub async fn ws_expect_closed(stream: &mut WsStream) {
    tokio::time::timeout(READ_TIMEOUT, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(Message::Text(text))) => {
                    panic!("Expected close, got event: {text}")
                },
                _ => continue,
            }
        }
    })
    .await
    .expect("Timed out waiting for the server to close the connection");
}

/// Assert no event arrives within `wait`.
pub async fn ws_expect_silence(stream: &mut WsStream, wait: Duration) {
    let result = tokio::time::timeout(wait, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return text.to_string(),
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {
                    return "<connection closed>".to_string();
                },
                _ => continue,
            }
        }
    })
    .await;
    if let Ok(unexpected) = result {
        panic!("Expected silence, got: {unexpected}");
    }
}
