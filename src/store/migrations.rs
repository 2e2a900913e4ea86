//! Database migrations for vulnmirror
//!
//! This module contains SQL migrations for the SQLite database schema.

/// SQL statement to create the initial database schema
pub const CREATE_SCHEMA: &str = r#"
-- Mirrored vulnerability records
CREATE TABLE IF NOT EXISTS records (
    id TEXT PRIMARY KEY,
    source TEXT NOT NULL,
    payload BLOB NOT NULL,
    modified_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_records_source ON records(source);
CREATE INDEX IF NOT EXISTS idx_records_modified ON records(modified_at);

-- Resume cursor, one row per sync stream
CREATE TABLE IF NOT EXISTS sync_cursor (
    source TEXT PRIMARY KEY,
    last_synced_until TEXT NOT NULL
);

-- Package-vulnerability lookup cache for the enrichment collaborators
CREATE TABLE IF NOT EXISTS osv_cache (
    ecosystem TEXT NOT NULL,
    package TEXT NOT NULL,
    version TEXT NOT NULL,
    fetched_at TEXT NOT NULL,
    payload BLOB NOT NULL,
    PRIMARY KEY (ecosystem, package, version)
);

-- Known-exploited catalog entries
CREATE TABLE IF NOT EXISTS kev (
    cve_id TEXT PRIMARY KEY,
    payload BLOB NOT NULL,
    fetched_at TEXT NOT NULL
);

-- Exploitability scores
CREATE TABLE IF NOT EXISTS epss (
    cve_id TEXT PRIMARY KEY,
    score REAL NOT NULL,
    percentile REAL NOT NULL,
    fetched_at TEXT NOT NULL
);
"#;

/// Get the migration version
pub fn migration_version() -> i32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_create_schema_valid_sql() {
        let conn = Connection::open_in_memory().unwrap();

        conn.execute_batch(CREATE_SCHEMA).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(Result::ok)
            .collect();

        assert!(tables.contains(&"records".to_string()));
        assert!(tables.contains(&"sync_cursor".to_string()));
        assert!(tables.contains(&"osv_cache".to_string()));
        assert!(tables.contains(&"kev".to_string()));
        assert!(tables.contains(&"epss".to_string()));
    }

    #[test]
    fn test_records_primary_key_conflict() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(CREATE_SCHEMA).unwrap();

        conn.execute(
            "INSERT INTO records (id, source, payload, modified_at) VALUES (?, ?, ?, ?)",
            ["CVE-2024-0001", "nvd", "{}", "2024-01-01T00:00:00.000Z"],
        )
        .unwrap();

        // Plain insert of the same id must violate the primary key
        let result = conn.execute(
            "INSERT INTO records (id, source, payload, modified_at) VALUES (?, ?, ?, ?)",
            ["CVE-2024-0001", "nvd", "{}", "2024-01-02T00:00:00.000Z"],
        );

        assert!(result.is_err());
    }

    #[test]
    fn test_osv_cache_composite_key() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(CREATE_SCHEMA).unwrap();

        conn.execute(
            "INSERT INTO osv_cache (ecosystem, package, version, fetched_at, payload)
             VALUES (?, ?, ?, ?, ?)",
            ["PyPI", "requests", "2.31.0", "2024-01-01T00:00:00.000Z", "{}"],
        )
        .unwrap();

        // Same package, different version is a distinct row
        conn.execute(
            "INSERT INTO osv_cache (ecosystem, package, version, fetched_at, payload)
             VALUES (?, ?, ?, ?, ?)",
            ["PyPI", "requests", "2.32.0", "2024-01-01T00:00:00.000Z", "{}"],
        )
        .unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM osv_cache", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_migration_version() {
        assert_eq!(migration_version(), 1);
    }
}
