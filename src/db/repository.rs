use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::Result;
use crate::models::{Attachment, Post, StoreCounts, Thread};
use crate::traits::{DownloadLedger, EntityStore};

use super::schema::{Tables, DEAD, LIVE, SCHEMA};

const THREAD_COLUMNS: &str = "board, number, subject, unique_posters, views, timestamp, processed";
const POST_COLUMNS: &str = "board, thread, number, position, timestamp, op, message, files";

/// SQLite database holding both entity stores and the download ledger.
pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        let repository = Self { conn };
        repository.live().ensure_indexes().await?;
        repository.dead().ensure_indexes().await?;
        Ok(repository)
    }

    pub fn live(&self) -> EntityTables {
        EntityTables {
            conn: self.conn.clone(),
            tables: LIVE,
        }
    }

    pub fn dead(&self) -> EntityTables {
        EntityTables {
            conn: self.conn.clone(),
            tables: DEAD,
        }
    }
}

/// [`EntityStore`] over one pair of thread/post tables.
#[derive(Clone)]
pub struct EntityTables {
    conn: Connection,
    tables: Tables,
}

#[async_trait]
impl EntityStore for EntityTables {
    fn label(&self) -> &'static str {
        self.tables.label
    }

    async fn ensure_indexes(&self) -> Result<()> {
        let sql = self.tables.unique_indexes();
        self.conn
            .call(move |conn| {
                conn.execute_batch(&sql)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // Thread operations

    async fn find_thread(&self, board: &str, number: i64) -> Result<Option<Thread>> {
        let sql = format!(
            "SELECT {THREAD_COLUMNS} FROM {} WHERE board = ?1 AND number = ?2",
            self.tables.threads
        );
        let board = board.to_string();
        let thread = self
            .conn
            .call(move |conn| {
                let thread = conn
                    .query_row(&sql, params![board, number], thread_from_row)
                    .optional()?;
                Ok(thread)
            })
            .await?;
        Ok(thread)
    }

    async fn insert_thread_if_absent(&self, thread: &Thread) -> Result<bool> {
        let sql = format!(
            r#"INSERT INTO {} ({THREAD_COLUMNS})
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
               ON CONFLICT(board, number) DO NOTHING"#,
            self.tables.threads
        );
        let thread = thread.clone();
        let inserted = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    &sql,
                    params![
                        thread.board,
                        thread.number,
                        thread.subject,
                        thread.unique_posters,
                        thread.views,
                        thread.timestamp,
                        thread.processed,
                    ],
                )?;
                Ok(changed > 0)
            })
            .await?;
        Ok(inserted)
    }

    async fn update_thread_counters(
        &self,
        board: &str,
        number: i64,
        views: i64,
        unique_posters: i64,
    ) -> Result<bool> {
        let sql = format!(
            "UPDATE {} SET views = ?1, unique_posters = ?2 WHERE board = ?3 AND number = ?4",
            self.tables.threads
        );
        let board = board.to_string();
        let updated = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(&sql, params![views, unique_posters, board, number])?;
                Ok(changed > 0)
            })
            .await?;
        Ok(updated)
    }

    async fn delete_thread(&self, board: &str, number: i64) -> Result<bool> {
        let sql = format!(
            "DELETE FROM {} WHERE board = ?1 AND number = ?2",
            self.tables.threads
        );
        let board = board.to_string();
        let deleted = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(&sql, params![board, number])?;
                Ok(changed > 0)
            })
            .await?;
        Ok(deleted)
    }

    async fn thread_numbers(&self, board: &str) -> Result<Vec<i64>> {
        let sql = format!(
            "SELECT number FROM {} WHERE board = ?1 ORDER BY number",
            self.tables.threads
        );
        let board = board.to_string();
        let numbers = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let numbers = stmt
                    .query_map(params![board], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<i64>, _>>()?;
                Ok(numbers)
            })
            .await?;
        Ok(numbers)
    }

    // Post operations

    async fn insert_post_if_absent(&self, post: &Post) -> Result<bool> {
        let sql = format!(
            r#"INSERT INTO {} ({POST_COLUMNS})
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
               ON CONFLICT(board, number) DO NOTHING"#,
            self.tables.posts
        );
        let files_json = serde_json::to_string(&post.files)?;
        let post = post.clone();
        let inserted = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    &sql,
                    params![
                        post.board,
                        post.thread,
                        post.number,
                        post.index,
                        post.timestamp,
                        post.op,
                        post.message,
                        files_json,
                    ],
                )?;
                Ok(changed > 0)
            })
            .await?;
        Ok(inserted)
    }

    async fn delete_post(&self, board: &str, number: i64) -> Result<bool> {
        let sql = format!(
            "DELETE FROM {} WHERE board = ?1 AND number = ?2",
            self.tables.posts
        );
        let board = board.to_string();
        let deleted = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(&sql, params![board, number])?;
                Ok(changed > 0)
            })
            .await?;
        Ok(deleted)
    }

    async fn posts_for_thread(&self, board: &str, thread: i64) -> Result<Vec<Post>> {
        let sql = format!(
            "SELECT {POST_COLUMNS} FROM {} WHERE board = ?1 AND thread = ?2 ORDER BY number",
            self.tables.posts
        );
        let board = board.to_string();
        let posts = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let posts = stmt
                    .query_map(params![board, thread], post_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(posts)
            })
            .await?;
        Ok(posts)
    }

    async fn orphaned_post_threads(&self, board: &str) -> Result<Vec<i64>> {
        let sql = format!(
            r#"SELECT DISTINCT p.thread FROM {posts} p
               WHERE p.board = ?1
                 AND NOT EXISTS (
                     SELECT 1 FROM {threads} t WHERE t.board = p.board AND t.number = p.thread
                 )
               ORDER BY p.thread"#,
            posts = self.tables.posts,
            threads = self.tables.threads,
        );
        let board = board.to_string();
        let numbers = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let numbers = stmt
                    .query_map(params![board], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<i64>, _>>()?;
                Ok(numbers)
            })
            .await?;
        Ok(numbers)
    }

    async fn counts(&self) -> Result<StoreCounts> {
        let sql = format!(
            "SELECT (SELECT COUNT(*) FROM {}), (SELECT COUNT(*) FROM {})",
            self.tables.threads, self.tables.posts
        );
        let counts = self
            .conn
            .call(move |conn| {
                let counts = conn.query_row(&sql, [], |row| {
                    Ok(StoreCounts {
                        threads: row.get(0)?,
                        posts: row.get(1)?,
                    })
                })?;
                Ok(counts)
            })
            .await?;
        Ok(counts)
    }
}

#[async_trait]
impl DownloadLedger for Repository {
    async fn has(&self, hash: &str) -> Result<bool> {
        let hash = hash.to_string();
        let exists = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM files WHERE hash = ?1",
                    params![hash],
                    |row| row.get(0),
                )?;
                Ok(count > 0)
            })
            .await?;
        Ok(exists)
    }

    async fn record(&self, hash: &str, at: DateTime<Utc>) -> Result<bool> {
        let hash = hash.to_string();
        let inserted = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "INSERT INTO files (hash, downloaded_at) VALUES (?1, ?2) ON CONFLICT(hash) DO NOTHING",
                    params![hash, at.to_rfc3339()],
                )?;
                Ok(changed > 0)
            })
            .await?;
        Ok(inserted)
    }

    async fn recorded_count(&self) -> Result<i64> {
        let count = self
            .conn
            .call(|conn| {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
                Ok(count)
            })
            .await?;
        Ok(count)
    }
}

fn thread_from_row(row: &Row) -> rusqlite::Result<Thread> {
    Ok(Thread {
        board: row.get(0)?,
        number: row.get(1)?,
        subject: row.get(2)?,
        unique_posters: row.get(3)?,
        views: row.get(4)?,
        timestamp: row.get(5)?,
        processed: row.get::<_, i64>(6)? != 0,
    })
}

fn post_from_row(row: &Row) -> rusqlite::Result<Post> {
    let files_json: String = row.get(7)?;
    let files: Vec<Attachment> = serde_json::from_str(&files_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?;
    Ok(Post {
        board: row.get(0)?,
        thread: row.get(1)?,
        number: row.get(2)?,
        index: row.get(3)?,
        timestamp: row.get(4)?,
        op: row.get::<_, i64>(5)? != 0,
        message: row.get(6)?,
        files,
    })
}
