pub const SCHEMA: &str = r#"
-- live threads
CREATE TABLE IF NOT EXISTS threads (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    board TEXT NOT NULL,
    number INTEGER NOT NULL,
    subject TEXT NOT NULL,
    unique_posters INTEGER NOT NULL DEFAULT 0,
    views INTEGER NOT NULL DEFAULT 0,
    timestamp INTEGER NOT NULL,
    processed INTEGER NOT NULL DEFAULT 0,
    stored_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- live posts
CREATE TABLE IF NOT EXISTS posts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    board TEXT NOT NULL,
    thread INTEGER NOT NULL,
    number INTEGER NOT NULL,
    position INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    op INTEGER NOT NULL DEFAULT 0,
    message TEXT NOT NULL,
    files TEXT NOT NULL DEFAULT '[]',
    stored_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_posts_board_thread ON posts(board, thread);

-- threads that vanished from the live snapshot
CREATE TABLE IF NOT EXISTS dead_threads (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    board TEXT NOT NULL,
    number INTEGER NOT NULL,
    subject TEXT NOT NULL,
    unique_posters INTEGER NOT NULL DEFAULT 0,
    views INTEGER NOT NULL DEFAULT 0,
    timestamp INTEGER NOT NULL,
    processed INTEGER NOT NULL DEFAULT 0,
    stored_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- posts of archived threads
CREATE TABLE IF NOT EXISTS dead_posts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    board TEXT NOT NULL,
    thread INTEGER NOT NULL,
    number INTEGER NOT NULL,
    position INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    op INTEGER NOT NULL DEFAULT 0,
    message TEXT NOT NULL,
    files TEXT NOT NULL DEFAULT '[]',
    stored_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_dead_posts_board_thread ON dead_posts(board, thread);

-- download ledger, keyed by content hash
CREATE TABLE IF NOT EXISTS files (
    hash TEXT PRIMARY KEY,
    downloaded_at TEXT NOT NULL
);
"#;

/// Table pair backing one entity store.
#[derive(Debug, Clone, Copy)]
pub struct Tables {
    pub label: &'static str,
    pub threads: &'static str,
    pub posts: &'static str,
}

pub const LIVE: Tables = Tables {
    label: "live",
    threads: "threads",
    posts: "posts",
};

pub const DEAD: Tables = Tables {
    label: "dead",
    threads: "dead_threads",
    posts: "dead_posts",
};

impl Tables {
    /// Uniqueness constraints on the identifier fields. These are what make
    /// `ON CONFLICT DO NOTHING` inserts safe against duplicate records.
    pub fn unique_indexes(&self) -> String {
        format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_{t}_board_number ON {t}(board, number);\n\
             CREATE UNIQUE INDEX IF NOT EXISTS idx_{p}_board_number ON {p}(board, number);",
            t = self.threads,
            p = self.posts,
        )
    }
}
