use rusqlite::{Connection, OptionalExtension, Result};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Conversation store shared by the whole process. rusqlite is synchronous;
/// calls are short enough that holding the mutex inside async tasks is fine at
/// personal scale.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Clone, Debug)]
pub struct StoredMessage {
    pub id: i64,
    pub role: String,
    pub content: String,
}

#[derive(Clone, Debug)]
pub struct EmbeddingRow {
    pub message_id: i64,
    pub embedding: Vec<u8>,
    pub content: String,
    pub role: String,
    pub timestamp: String,
}

#[derive(Clone, Debug, Default)]
pub struct UserProfile {
    pub name: Option<String>,
    pub interests: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Stats {
    pub total_messages: u64,
    pub unique_users: u64,
}

impl Database {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn execute_init(&self) -> anyhow::Result<()> {
        info!("Database: Initializing schema...");
        let sql = "
            CREATE TABLE IF NOT EXISTS conversations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                platform TEXT NOT NULL,
                user_id TEXT NOT NULL,
                channel_id TEXT,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp DATETIME DEFAULT CURRENT_TIMESTAMP,
                metadata TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_conversations_user
                ON conversations (platform, user_id, timestamp DESC);

            CREATE TABLE IF NOT EXISTS vector_memory (
                message_id INTEGER PRIMARY KEY,
                embedding BLOB NOT NULL,
                FOREIGN KEY (message_id) REFERENCES conversations (id)
            );

            CREATE TABLE IF NOT EXISTS user_profiles (
                platform TEXT NOT NULL,
                user_id TEXT NOT NULL,
                name TEXT,
                interests TEXT,
                last_updated DATETIME DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (platform, user_id)
            );

            CREATE TABLE IF NOT EXISTS user_secrets (
                platform TEXT NOT NULL,
                user_id TEXT NOT NULL,
                secret_key TEXT NOT NULL,
                secret_value TEXT,
                last_updated DATETIME DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (platform, user_id, secret_key)
            );
        ";
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(sql)?;
        debug!("Database: Schema initialized successfully");
        Ok(())
    }

    /// Append a conversation turn and return its row id. Rows are immutable
    /// once written.
    pub fn append_message(
        &self,
        platform: &str,
        user_id: &str,
        channel_id: Option<&str>,
        role: &str,
        content: &str,
        metadata: Option<&Value>,
    ) -> anyhow::Result<i64> {
        let metadata_json = metadata.map(|m| m.to_string());
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO conversations (platform, user_id, channel_id, role, content, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            (platform, user_id, channel_id, role, content, metadata_json),
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent messages for a user in chronological order. Ties on
    /// timestamp break by row id.
    pub fn recent_messages(
        &self,
        platform: &str,
        user_id: &str,
        channel_id: Option<&str>,
        limit: usize,
    ) -> anyhow::Result<Vec<StoredMessage>> {
        let conn = self.conn.lock().unwrap();
        let mut messages = match channel_id {
            Some(channel) => {
                let mut stmt = conn.prepare(
                    "SELECT id, role, content FROM conversations
                     WHERE platform = ?1 AND user_id = ?2 AND channel_id = ?3
                     ORDER BY timestamp DESC, id DESC LIMIT ?4",
                )?;
                let rows = stmt.query_map((platform, user_id, channel, limit), row_to_message)?;
                rows.collect::<Result<Vec<_>>>()?
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, role, content FROM conversations
                     WHERE platform = ?1 AND user_id = ?2
                     ORDER BY timestamp DESC, id DESC LIMIT ?3",
                )?;
                let rows = stmt.query_map((platform, user_id, limit), row_to_message)?;
                rows.collect::<Result<Vec<_>>>()?
            }
        };
        messages.reverse();
        Ok(messages)
    }

    pub fn clear_conversation(
        &self,
        platform: &str,
        user_id: &str,
        channel_id: Option<&str>,
    ) -> anyhow::Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count = match channel_id {
            Some(channel) => conn.execute(
                "DELETE FROM conversations WHERE platform = ?1 AND user_id = ?2 AND channel_id = ?3",
                (platform, user_id, channel),
            )?,
            None => conn.execute(
                "DELETE FROM conversations WHERE platform = ?1 AND user_id = ?2",
                (platform, user_id),
            )?,
        };
        info!("Cleared {} messages for {}:{}", count, platform, user_id);
        Ok(count)
    }

    pub fn save_embedding(&self, message_id: i64, blob: &[u8]) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO vector_memory (message_id, embedding) VALUES (?1, ?2)",
            (message_id, blob),
        )?;
        Ok(())
    }

    /// Every stored embedding joined with its parent message. The semantic
    /// store scans the full set per query.
    pub fn load_embeddings(&self) -> anyhow::Result<Vec<EmbeddingRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT vm.message_id, vm.embedding, c.content, c.role, c.timestamp
             FROM vector_memory vm
             JOIN conversations c ON vm.message_id = c.id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(EmbeddingRow {
                message_id: row.get(0)?,
                embedding: row.get(1)?,
                content: row.get(2)?,
                role: row.get(3)?,
                timestamp: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>>>()?)
    }

    pub fn get_user_profile(&self, platform: &str, user_id: &str) -> anyhow::Result<UserProfile> {
        let conn = self.conn.lock().unwrap();
        let profile = conn
            .query_row(
                "SELECT name, interests FROM user_profiles WHERE platform = ?1 AND user_id = ?2",
                (platform, user_id),
                |row| {
                    Ok(UserProfile {
                        name: row.get(0)?,
                        interests: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(profile.unwrap_or_default())
    }

    /// Upsert profile fields; `None` leaves the existing value untouched.
    pub fn update_user_profile(
        &self,
        platform: &str,
        user_id: &str,
        name: Option<&str>,
        interests: Option<&str>,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO user_profiles (platform, user_id, name, interests)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(platform, user_id) DO UPDATE SET
                 name = COALESCE(?3, name),
                 interests = COALESCE(?4, interests),
                 last_updated = CURRENT_TIMESTAMP",
            (platform, user_id, name, interests),
        )?;
        Ok(())
    }

    pub fn set_user_secret(
        &self,
        platform: &str,
        user_id: &str,
        key: &str,
        value: &str,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO user_secrets
                 (platform, user_id, secret_key, secret_value, last_updated)
             VALUES (?1, ?2, ?3, ?4, CURRENT_TIMESTAMP)",
            (platform, user_id, key, value),
        )?;
        Ok(())
    }

    pub fn get_user_secret(
        &self,
        platform: &str,
        user_id: &str,
        key: &str,
    ) -> anyhow::Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row(
                "SELECT secret_value FROM user_secrets
                 WHERE platform = ?1 AND user_id = ?2 AND secret_key = ?3",
                (platform, user_id, key),
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn stats(&self) -> anyhow::Result<Stats> {
        let conn = self.conn.lock().unwrap();
        let total_messages =
            conn.query_row("SELECT COUNT(*) FROM conversations", [], |row| row.get(0))?;
        let unique_users = conn.query_row(
            "SELECT COUNT(DISTINCT user_id) FROM conversations",
            [],
            |row| row.get(0),
        )?;
        Ok(Stats {
            total_messages,
            unique_users,
        })
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<StoredMessage> {
    Ok(StoredMessage {
        id: row.get(0)?,
        role: row.get(1)?,
        content: row.get(2)?,
    })
}
