//! SQLite schema definition

/// SQL schema for the link database
pub const SCHEMA_SQL: &str = r#"
-- Links: one row per indexable resource
CREATE TABLE IF NOT EXISTS links (
    link_type TEXT NOT NULL,
    id INTEGER NOT NULL,
    subtype TEXT NOT NULL DEFAULT '',
    loc TEXT NOT NULL,
    language TEXT NOT NULL DEFAULT 'und',
    access INTEGER NOT NULL DEFAULT 1,
    status INTEGER NOT NULL DEFAULT 1,
    status_override INTEGER NOT NULL DEFAULT 0,
    lastmod INTEGER NOT NULL DEFAULT 0,
    priority REAL NOT NULL DEFAULT 0.5,
    priority_override INTEGER NOT NULL DEFAULT 0,
    changefreq INTEGER NOT NULL DEFAULT 0,
    changecount INTEGER NOT NULL DEFAULT 0,
    extra_json TEXT,
    PRIMARY KEY (link_type, id)
);

-- Sitemaps: one per context (e.g. per language)
CREATE TABLE IF NOT EXISTS sitemaps (
    id TEXT PRIMARY KEY,
    context_json TEXT NOT NULL,
    chunks INTEGER NOT NULL DEFAULT 0,
    links INTEGER NOT NULL DEFAULT 0,
    max_filesize INTEGER NOT NULL DEFAULT 0,
    updated INTEGER NOT NULL DEFAULT 0
);

-- URL aliases: internal path -> public path, per language
CREATE TABLE IF NOT EXISTS url_aliases (
    pid INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    alias TEXT NOT NULL,
    language TEXT NOT NULL DEFAULT 'und'
);

-- State: small key/value store (regeneration flag, last generation)
CREATE TABLE IF NOT EXISTS state (
    name TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Batch runs: tracking history
CREATE TABLE IF NOT EXISTS batch_runs (
    id TEXT PRIMARY KEY,
    operation TEXT NOT NULL,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    status TEXT NOT NULL,
    items_processed INTEGER NOT NULL DEFAULT 0,
    summary TEXT
);

-- Indexes for performance
CREATE INDEX IF NOT EXISTS idx_links_visible ON links(access, status, language, loc);
CREATE INDEX IF NOT EXISTS idx_links_type_subtype ON links(link_type, subtype);
CREATE INDEX IF NOT EXISTS idx_aliases_language ON url_aliases(language, source);
CREATE INDEX IF NOT EXISTS idx_runs_started ON batch_runs(started_at);
"#;
