#![allow(dead_code)]

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use carechat::{
    AppState, app,
    chat::DEFAULT_DELETE_WINDOW,
    clock::ManualClock,
    db,
    directory::{NewUser, Role, User},
    session_layer,
};
use time::{Duration, OffsetDateTime, macros::datetime};
use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

pub const PASSWORD: &str = "correct horse";

/// Two patients: p1 (nurse, daughter, son) and p2 (carer, cousin).
pub struct Fixture {
    pub state: AppState,
    pub clock: ManualClock,
    pub admin: User,
    pub nurse: User,
    pub carer: User,
    pub daughter: User,
    pub son: User,
    pub cousin: User,
}

pub fn start_time() -> OffsetDateTime {
    datetime!(2024-03-01 09:00 UTC)
}

pub async fn fixture() -> Fixture {
    fixture_with_clock(ManualClock::new(start_time())).await
}

pub async fn fixture_with_clock(clock: ManualClock) -> Fixture {
    let db_pool = db::connect_in_memory().await.unwrap();
    let state = AppState::new(db_pool, Arc::new(clock.clone()), DEFAULT_DELETE_WINDOW);
    let directory = &state.directory;

    let admin = user(&state, "admin", Role::Admin).await;
    let nurse = user(&state, "nurse", Role::Employee).await;
    let carer = user(&state, "carer", Role::Employee).await;
    let daughter = user(&state, "daughter", Role::Family).await;
    let son = user(&state, "son", Role::Family).await;
    let cousin = user(&state, "cousin", Role::Family).await;

    directory.assign_employee(&nurse.id, "p1").await.unwrap();
    directory.assign_employee(&carer.id, "p2").await.unwrap();
    directory.link_family(&daughter.id, "p1").await.unwrap();
    directory.link_family(&son.id, "p1").await.unwrap();
    directory.link_family(&cousin.id, "p2").await.unwrap();

    Fixture { state, clock, admin, nurse, carer, daughter, son, cousin }
}

async fn user(state: &AppState, username: &str, role: Role) -> User {
    state
        .directory
        .create_user(NewUser {
            username: username.to_owned(),
            password: PASSWORD.to_owned(),
            display_name: format!("{username} (display)"),
            role,
        })
        .await
        .unwrap()
}

pub fn advance(fixture: &Fixture, seconds: i64) {
    fixture.clock.advance(Duration::seconds(seconds));
}

/// Serves the full app on a random local port.
pub async fn serve(state: AppState) -> SocketAddr {
    let app = app(state, session_layer(false, Duration::minutes(30)));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// TCP relay in front of a server whose live links can be cut from outside.
pub struct Relay {
    pub addr: SocketAddr,
    links: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Relay {
    pub async fn start(upstream: SocketAddr) -> Relay {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let links = Arc::new(Mutex::new(Vec::new()));

        let accepted = links.clone();
        tokio::spawn(async move {
            while let Ok((mut inbound, _)) = listener.accept().await {
                let link = tokio::spawn(async move {
                    if let Ok(mut outbound) = TcpStream::connect(upstream).await {
                        let _ = tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await;
                    }
                });
                accepted.lock().unwrap().push(link);
            }
        });

        Relay { addr, links }
    }

    /// Drops every open link on both sides. New connections still get through.
    pub fn sever(&self) {
        for link in self.links.lock().unwrap().drain(..) {
            link.abort();
        }
    }
}
