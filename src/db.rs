use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        role TEXT NOT NULL,
        display_name TEXT NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS family_members (
        user_id TEXT NOT NULL REFERENCES users(id),
        patient_id TEXT NOT NULL,
        PRIMARY KEY (user_id, patient_id)
    )",
    "CREATE TABLE IF NOT EXISTS employee_assignments (
        user_id TEXT NOT NULL REFERENCES users(id),
        patient_id TEXT NOT NULL,
        PRIMARY KEY (user_id, patient_id)
    )",
    // rows are never removed; is_deleted only hides them from conversations
    "CREATE TABLE IF NOT EXISTS chat_messages (
        id TEXT PRIMARY KEY,
        sender_id TEXT NOT NULL REFERENCES users(id),
        receiver_id TEXT NOT NULL REFERENCES users(id),
        message TEXT NOT NULL,
        message_type TEXT NOT NULL DEFAULT 'text',
        is_deleted INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS chat_messages_pair
        ON chat_messages (sender_id, receiver_id, created_at)",
];

pub async fn connect(database_url: &str, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    let db_pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    init_schema(&db_pool).await?;
    Ok(db_pool)
}

/// Single-connection in-memory database. Every connection to `sqlite::memory:`
/// is its own database, so the pool must never open a second one.
pub async fn connect_in_memory() -> Result<SqlitePool, sqlx::Error> {
    let db_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    init_schema(&db_pool).await?;
    Ok(db_pool)
}

pub async fn init_schema(db_pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(db_pool).await?;
    }
    Ok(())
}

pub async fn ping(db_pool: &SqlitePool) -> bool {
    sqlx::query("SELECT 1").execute(db_pool).await.is_ok()
}
