//! End to end: real server, `ClientSession` over WebSocket, REST through reqwest.

mod common;

use std::{net::SocketAddr, time::Duration};

use carechat::{
    AppState,
    chat::{ChatPeer, model::{Message, MessageKind}},
    client::{ClientConfig, ClientSession, SendOutcome, SessionState},
    directory::{Role, User},
    protocol::ServerFrame,
};
use common::{PASSWORD, Relay, fixture, serve};
use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::{client::IntoClientRequest, handshake::client::Request};

const WAIT: Duration = Duration::from_secs(5);

fn client_for(addr: SocketAddr) -> ClientSession {
    ClientSession::new(ClientConfig::new(format!("ws://{addr}/ws")).with_reconnect_delay(Duration::from_millis(50)))
}

async fn connected(session: &ClientSession, state: &AppState, user: &User) {
    let mut states = session.watch_state();
    tokio::time::timeout(WAIT, states.wait_for(|s| *s == SessionState::Connected))
        .await
        .unwrap()
        .unwrap();

    // the server registers right after the handshake; wait until it has
    tokio::time::timeout(WAIT, async {
        while !state.presence().is_online(&user.id) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

async fn next_frame(events: &mut broadcast::Receiver<ServerFrame>) -> ServerFrame {
    tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap()
}

async fn login(addr: SocketAddr, user: &User) -> reqwest::Client {
    let http = reqwest::Client::builder().cookie_store(true).build().unwrap();
    let response = http
        .post(format!("http://{addr}/api/login"))
        .json(&json!({ "username": user.username, "password": PASSWORD }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    http
}

#[tokio::test]
async fn offline_message_is_acked_and_found_later() {
    let f = fixture().await;
    let addr = serve(f.state.clone()).await;

    let mut nurse = client_for(addr);
    let mut nurse_events = nurse.subscribe();
    nurse.connect(&f.nurse.id);
    connected(&nurse, &f.state, &f.nurse).await;

    let outcome = nurse.send(&f.daughter.id, "Hello", MessageKind::Text).unwrap();
    assert_eq!(outcome, SendOutcome::Sent);

    let ServerFrame::ChatSent { message: x } = next_frame(&mut nurse_events).await else {
        panic!("expected an ack");
    };
    assert_eq!(x.message, "Hello");
    assert_eq!(nurse.live_messages(), vec![x.clone()]);

    // the daughter shows up afterwards and reads history
    let http = login(addr, &f.daughter).await;
    let history: Vec<Message> = http
        .get(format!("http://{addr}/api/chat/{}", f.nurse.id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history, vec![x]);

    nurse.disconnect();
}

#[tokio::test]
async fn online_receiver_gets_the_push() {
    let f = fixture().await;
    let addr = serve(f.state.clone()).await;

    let mut son = client_for(addr);
    let mut son_events = son.subscribe();
    son.connect(&f.son.id);
    connected(&son, &f.state, &f.son).await;

    let mut daughter = client_for(addr);
    daughter.connect(&f.daughter.id);
    connected(&daughter, &f.state, &f.daughter).await;

    daughter.send_image(&f.son.id, "mum smiling").unwrap();

    let ServerFrame::Chat { message } = next_frame(&mut son_events).await else {
        panic!("expected a live push");
    };
    assert_eq!(message.sender_id, f.daughter.id);
    assert_eq!(message.image_description(), Some("mum smiling"));

    // history plus the live copy collapse into one entry
    let history = f.state.router.fetch_conversation(&f.son.id, &f.daughter.id).await.unwrap();
    assert_eq!(son.conversation(&f.daughter.id, history), vec![message]);

    son.disconnect();
    daughter.disconnect();
}

#[tokio::test]
async fn client_disconnect_clears_server_presence() {
    let f = fixture().await;
    let addr = serve(f.state.clone()).await;

    let mut admin = client_for(addr);
    admin.connect(&f.admin.id);
    connected(&admin, &f.state, &f.admin).await;

    admin.disconnect();
    assert_eq!(admin.state(), SessionState::Disconnected);

    tokio::time::timeout(WAIT, async {
        while f.state.presence().is_online(&f.admin.id) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn unknown_users_cannot_open_a_socket() {
    let f = fixture().await;
    let addr = serve(f.state.clone()).await;

    let result = tokio_tungstenite::connect_async(format!("ws://{addr}/ws?userId=ghost")).await;
    assert!(result.is_err());
    assert_eq!(f.state.presence().online_count(), 0);
}

async fn session_cookie(addr: SocketAddr, user: &User) -> String {
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/api/login"))
        .json(&json!({ "username": user.username, "password": PASSWORD }))
        .send()
        .await
        .unwrap();
    response.headers()["set-cookie"].to_str().unwrap().split(';').next().unwrap().to_owned()
}

fn socket_request(addr: SocketAddr, user_id: &str, cookie: Option<&str>) -> Request {
    let mut request = format!("ws://{addr}/ws?userId={user_id}").into_client_request().unwrap();
    if let Some(cookie) = cookie {
        request.headers_mut().insert("cookie", cookie.parse().unwrap());
    }
    request
}

#[tokio::test]
async fn socket_user_must_match_the_session() {
    let f = fixture().await;
    let addr = serve(f.state.clone()).await;
    let cookie = session_cookie(addr, &f.son).await;

    // logged in as the son, claiming to be the admin
    assert!(tokio_tungstenite::connect_async(socket_request(addr, &f.admin.id, Some(&cookie))).await.is_err());
    assert!(!f.state.presence().is_online(&f.admin.id));

    let (socket, _) = tokio_tungstenite::connect_async(socket_request(addr, &f.son.id, Some(&cookie))).await.unwrap();
    drop(socket);
}

#[tokio::test]
async fn bare_user_ids_are_refused_when_a_session_is_required() {
    let f = fixture().await;
    let addr = serve(f.state.clone().with_socket_session_required(true)).await;

    assert!(tokio_tungstenite::connect_async(socket_request(addr, &f.admin.id, None)).await.is_err());
    assert!(!f.state.presence().is_online(&f.admin.id));

    let cookie = session_cookie(addr, &f.admin).await;
    let (socket, _) = tokio_tungstenite::connect_async(socket_request(addr, &f.admin.id, Some(&cookie))).await.unwrap();
    drop(socket);
}

#[tokio::test]
async fn client_recovers_after_the_server_drops_it() {
    let f = fixture().await;
    let addr = serve(f.state.clone()).await;
    let relay = Relay::start(addr).await;

    let mut son = client_for(addr);
    let mut son_events = son.subscribe();
    son.connect(&f.son.id);
    connected(&son, &f.state, &f.son).await;

    let mut nurse = client_for(relay.addr);
    nurse.connect(&f.nurse.id);
    connected(&nurse, &f.state, &f.nurse).await;
    let first = f.state.presence().lookup(&f.nurse.id).unwrap();

    let mut states = nurse.watch_state();
    relay.sever();

    tokio::time::timeout(WAIT, states.wait_for(|s| *s != SessionState::Connected))
        .await
        .unwrap()
        .unwrap();
    tokio::time::timeout(WAIT, states.wait_for(|s| *s == SessionState::Connected))
        .await
        .unwrap()
        .unwrap();

    // the server has bound the new connection
    tokio::time::timeout(WAIT, async {
        while f.state.presence().lookup(&f.nurse.id).is_none_or(|handle| handle == first) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(nurse.send(&f.son.id, "back again", MessageKind::Text).unwrap(), SendOutcome::Sent);
    let ServerFrame::Chat { message } = next_frame(&mut son_events).await else {
        panic!("expected a live push");
    };
    assert_eq!(message.message, "back again");
    assert_eq!(message.sender_id, f.nurse.id);

    son.disconnect();
    nurse.disconnect();
}

#[tokio::test]
async fn refetched_history_drops_messages_deleted_by_the_peer() {
    let f = fixture().await;
    let addr = serve(f.state.clone()).await;

    let mut son = client_for(addr);
    let mut son_events = son.subscribe();
    son.connect(&f.son.id);
    connected(&son, &f.state, &f.son).await;

    let oops = f.state.router.send(&f.nurse.id, &f.son.id, "oops", MessageKind::Text).await.unwrap();
    assert!(matches!(next_frame(&mut son_events).await, ServerFrame::Chat { .. }));
    assert_eq!(son.live_messages(), vec![oops.clone()]);

    f.state.router.soft_delete(oops.id, &f.nurse.id).await.unwrap();

    let mark = son.history_mark();
    let history = f.state.router.fetch_conversation(&f.son.id, &f.nurse.id).await.unwrap();
    assert!(son.conversation_since(&f.nurse.id, history, mark).is_empty());
    assert!(son.live_messages().is_empty());

    son.disconnect();
}

#[tokio::test]
async fn login_rejects_bad_passwords() {
    let f = fixture().await;
    let addr = serve(f.state.clone()).await;
    let http = reqwest::Client::builder().cookie_store(true).build().unwrap();

    let response = http
        .post(format!("http://{addr}/api/login"))
        .json(&json!({ "username": f.nurse.username, "password": "wrong" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = http.get(format!("http://{addr}/api/chat/users")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn peer_list_is_filtered_and_shows_presence() {
    let f = fixture().await;
    let addr = serve(f.state.clone()).await;

    let mut carer = client_for(addr);
    carer.connect(&f.carer.id);
    connected(&carer, &f.state, &f.carer).await;

    let http = login(addr, &f.cousin).await;
    let peers: Vec<ChatPeer> = http
        .get(format!("http://{addr}/api/chat/users"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let mut seen: Vec<(&str, Role, bool)> = peers.iter().map(|p| (p.id.as_str(), p.role, p.online)).collect();
    seen.sort_by_key(|(id, ..)| *id);
    let mut expected = vec![
        (f.admin.id.as_str(), Role::Admin, false),
        (f.carer.id.as_str(), Role::Employee, true),
    ];
    expected.sort_by_key(|(id, ..)| *id);
    assert_eq!(seen, expected);

    carer.disconnect();
}

#[tokio::test]
async fn delete_over_rest_and_admin_audit() {
    let f = fixture().await;
    let addr = serve(f.state.clone()).await;

    let message = f.state.router.send(&f.nurse.id, &f.son.id, "wrong chat", MessageKind::Text).await.unwrap();

    let son = login(addr, &f.son).await;
    let response = son
        .delete(format!("http://{addr}/api/chat/messages/{}", message.id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "cannot delete message");

    let nurse = login(addr, &f.nurse).await;
    let response = nurse
        .delete(format!("http://{addr}/api/chat/messages/{}", message.id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let history: Vec<Message> = son
        .get(format!("http://{addr}/api/chat/{}", f.nurse.id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(history.is_empty());

    let admin = login(addr, &f.admin).await;
    let audit: Vec<Message> = admin
        .get(format!("http://{addr}/api/admin/chat/{}/{}", f.nurse.id, f.son.id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(audit.len(), 1);
    assert!(audit[0].is_deleted);

    let response = son
        .get(format!("http://{addr}/api/admin/chat/{}/{}", f.nurse.id, f.son.id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn logout_ends_the_session() {
    let f = fixture().await;
    let addr = serve(f.state.clone()).await;
    let http = login(addr, &f.admin).await;

    let me: User = http.get(format!("http://{addr}/api/me")).send().await.unwrap().json().await.unwrap();
    assert_eq!(me.id, f.admin.id);

    let response = http.post(format!("http://{addr}/api/logout")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = http.get(format!("http://{addr}/api/me")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn health_reports_database_and_presence() {
    let f = fixture().await;
    let addr = serve(f.state.clone()).await;

    let mut son = client_for(addr);
    son.connect(&f.son.id);
    connected(&son, &f.state, &f.son).await;

    let health: Value = reqwest::get(format!("http://{addr}/api/health")).await.unwrap().json().await.unwrap();
    assert_eq!(health, json!({ "database": true, "websocket": true, "online": 1 }));

    son.disconnect();
}
