//! SQLite persistence for synchronized files.
//!
//! Two tables: `files` is the content store (path → bytes + stat), and
//! `directories` is the directory index (path markers only). Paths are
//! absolute virtual-filesystem strings and are the primary keys.

use regex::Regex;
use rusqlite::{Connection, OptionalExtension, Result as SqliteResult, params};
use std::path::Path;

use crate::vfs::FileStat;

/// A persisted file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: String,
    pub content: Vec<u8>,
    pub stat: FileStat,
}

impl FileRecord {
    /// Build a record, forcing `stat.size` to the content length.
    pub fn new(path: impl Into<String>, content: Vec<u8>, mut stat: FileStat) -> Self {
        stat.size = content.len() as u64;
        Self {
            path: path.into(),
            content,
            stat,
        }
    }
}

const SCHEMA: &str = r#"
-- Content store
CREATE TABLE IF NOT EXISTS files (
    path TEXT PRIMARY KEY,
    content BLOB NOT NULL,
    size INTEGER NOT NULL,
    mtime INTEGER NOT NULL,
    atime INTEGER NOT NULL,
    mode INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_files_mtime ON files(mtime);

-- Directory index
CREATE TABLE IF NOT EXISTS directories (
    path TEXT PRIMARY KEY
);
"#;

/// Prefix predicate. Avoids LIKE, whose `%` and `_` would need escaping.
const PREFIX_MATCH: &str = "substr(path, 1, length(?1)) = ?1";

/// Database handle for the content store and directory index.
pub struct ContentDb {
    conn: Connection,
}

impl ContentDb {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> SqliteResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> SqliteResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    // =========================================================================
    // Content store
    // =========================================================================

    /// Insert or replace a file. The write is a single transaction.
    pub fn put_file(&mut self, record: &FileRecord) -> SqliteResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO files (path, content, size, mtime, atime, mode)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.path,
                record.content,
                record.content.len() as i64,
                record.stat.mtime_ms,
                record.stat.atime_ms,
                record.stat.mode,
            ],
        )?;
        tx.commit()
    }

    /// Get a file by path. Absence is `Ok(None)`.
    pub fn get_file(&self, path: &str) -> SqliteResult<Option<FileRecord>> {
        self.conn
            .query_row(
                "SELECT path, content, size, mtime, atime, mode FROM files WHERE path = ?1",
                params![path],
                Self::row_to_record,
            )
            .optional()
    }

    /// All files whose path starts with `prefix`. Order is unspecified.
    pub fn list_by_prefix(&self, prefix: &str) -> SqliteResult<Vec<FileRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT path, content, size, mtime, atime, mode FROM files WHERE {PREFIX_MATCH}"
        ))?;
        let rows = stmt.query_map(params![prefix], Self::row_to_record)?;
        rows.collect()
    }

    /// Paths only, for deletion reconciliation.
    pub fn list_paths_by_prefix(&self, prefix: &str) -> SqliteResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT path FROM files WHERE {PREFIX_MATCH}"))?;
        let rows = stmt.query_map(params![prefix], |row| row.get(0))?;
        rows.collect()
    }

    /// File count and summed byte size under a prefix.
    pub fn usage_by_prefix(&self, prefix: &str) -> SqliteResult<(u64, u64)> {
        self.conn.query_row(
            &format!("SELECT COUNT(*), COALESCE(SUM(length(content)), 0) FROM files WHERE {PREFIX_MATCH}"),
            params![prefix],
            |row| {
                let count: i64 = row.get(0)?;
                let bytes: i64 = row.get(1)?;
                Ok((count as u64, bytes as u64))
            },
        )
    }

    /// Delete a file. Deleting a missing path is not an error.
    pub fn delete_file(&self, path: &str) -> SqliteResult<()> {
        self.conn
            .execute("DELETE FROM files WHERE path = ?1", params![path])?;
        Ok(())
    }

    /// Delete every file and directory record under a prefix.
    pub fn delete_prefix(&mut self, prefix: &str) -> SqliteResult<usize> {
        let tx = self.conn.transaction()?;
        let files = tx.execute(
            &format!("DELETE FROM files WHERE {PREFIX_MATCH}"),
            params![prefix],
        )?;
        tx.execute(
            &format!("DELETE FROM directories WHERE {PREFIX_MATCH}"),
            params![prefix],
        )?;
        tx.commit()?;
        Ok(files)
    }

    /// Wipe all records.
    pub fn clear(&mut self) -> SqliteResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM files", [])?;
        tx.execute("DELETE FROM directories", [])?;
        tx.commit()
    }

    // =========================================================================
    // Directory index
    // =========================================================================

    /// Record that a directory exists.
    pub fn store_directory(&self, path: &str) -> SqliteResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO directories (path) VALUES (?1)",
            params![path],
        )?;
        Ok(())
    }

    /// Whether a directory marker exists.
    pub fn has_directory(&self, path: &str) -> SqliteResult<bool> {
        self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM directories WHERE path = ?1)",
            params![path],
            |row| row.get(0),
        )
    }

    /// Delete a directory and cascade to every file and directory under
    /// `path + "/"`. Records outside that prefix are untouched.
    pub fn delete_directory(&mut self, path: &str) -> SqliteResult<usize> {
        let descendants = format!("{}/", path.trim_end_matches('/'));
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM directories WHERE path = ?1", params![path])?;
        let files = tx.execute(
            &format!("DELETE FROM files WHERE {PREFIX_MATCH}"),
            params![descendants],
        )?;
        tx.execute(
            &format!("DELETE FROM directories WHERE {PREFIX_MATCH}"),
            params![descendants],
        )?;
        tx.commit()?;
        Ok(files)
    }

    /// Every directory marker whose path starts with `prefix`, sorted.
    pub fn list_directories_by_prefix(&self, prefix: &str) -> SqliteResult<Vec<String>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT path FROM directories WHERE {PREFIX_MATCH} ORDER BY path"
        ))?;
        let rows = stmt.query_map(params![prefix], |row| row.get(0))?;
        rows.collect()
    }

    /// Directories exactly one segment below `path`.
    pub fn list_direct_children(&self, path: &str) -> SqliteResult<Vec<String>> {
        let base = path.trim_end_matches('/');
        let prefix = format!("{base}/");
        let pattern = Regex::new(&format!("^{}/[^/]+$", regex::escape(base)))
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

        let mut stmt = self
            .conn
            .prepare(&format!("SELECT path FROM directories WHERE {PREFIX_MATCH}"))?;
        let rows = stmt.query_map(params![prefix], |row| row.get::<_, String>(0))?;

        let mut children = Vec::new();
        for row in rows {
            let dir = row?;
            if pattern.is_match(&dir) {
                children.push(dir);
            }
        }
        children.sort();
        Ok(children)
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> SqliteResult<FileRecord> {
        let size: i64 = row.get(2)?;
        Ok(FileRecord {
            path: row.get(0)?,
            content: row.get(1)?,
            stat: FileStat {
                mode: row.get(5)?,
                size: size as u64,
                mtime_ms: row.get(3)?,
                atime_ms: row.get(4)?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::S_IFREG;

    fn stat(mtime: i64) -> FileStat {
        FileStat {
            mode: S_IFREG | 0o644,
            size: 0,
            mtime_ms: mtime,
            atime_ms: mtime,
        }
    }

    fn record(path: &str, content: &[u8], mtime: i64) -> FileRecord {
        FileRecord::new(path, content.to_vec(), stat(mtime))
    }

    #[test]
    fn test_put_get_replace() {
        let mut db = ContentDb::in_memory().unwrap();
        db.put_file(&record("/minetest/worlds/w1/map.sqlite", b"B1", 100))
            .unwrap();

        let got = db.get_file("/minetest/worlds/w1/map.sqlite").unwrap().unwrap();
        assert_eq!(got.content, b"B1");
        assert_eq!(got.stat.size, 2);
        assert_eq!(got.stat.mtime_ms, 100);

        db.put_file(&record("/minetest/worlds/w1/map.sqlite", b"B2-longer", 200))
            .unwrap();
        let got = db.get_file("/minetest/worlds/w1/map.sqlite").unwrap().unwrap();
        assert_eq!(got.content, b"B2-longer");
        assert_eq!(got.stat.size, 9);
    }

    #[test]
    fn test_get_missing_is_none() {
        let db = ContentDb::in_memory().unwrap();
        assert!(db.get_file("/nope").unwrap().is_none());
    }

    #[test]
    fn test_list_by_prefix() {
        let mut db = ContentDb::in_memory().unwrap();
        db.put_file(&record("/minetest/worlds/a/1", b"x", 1)).unwrap();
        db.put_file(&record("/minetest/worlds/b/2", b"yy", 1)).unwrap();
        db.put_file(&record("/minetest/mods/m/init.lua", b"z", 1)).unwrap();
        db.put_file(&record("/minetest/worlds_x/3", b"w", 1)).unwrap();

        let mut worlds: Vec<_> = db
            .list_by_prefix("/minetest/worlds/")
            .unwrap()
            .into_iter()
            .map(|r| r.path)
            .collect();
        worlds.sort();
        assert_eq!(worlds, vec!["/minetest/worlds/a/1", "/minetest/worlds/b/2"]);

        assert_eq!(db.usage_by_prefix("/minetest/worlds/").unwrap(), (2, 3));
        assert_eq!(db.usage_by_prefix("/nothing/").unwrap(), (0, 0));
    }

    #[test]
    fn test_prefix_with_like_metacharacters() {
        let mut db = ContentDb::in_memory().unwrap();
        db.put_file(&record("/w/a_b/f", b"1", 1)).unwrap();
        db.put_file(&record("/w/axb/f", b"2", 1)).unwrap();
        assert_eq!(db.list_paths_by_prefix("/w/a_b/").unwrap(), vec!["/w/a_b/f"]);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let mut db = ContentDb::in_memory().unwrap();
        db.put_file(&record("/a/f", b"1", 1)).unwrap();
        db.delete_file("/a/f").unwrap();
        db.delete_file("/a/f").unwrap();
        assert!(db.get_file("/a/f").unwrap().is_none());
    }

    #[test]
    fn test_directory_cascade() {
        let mut db = ContentDb::in_memory().unwrap();
        db.store_directory("/minetest/worlds/w1").unwrap();
        db.store_directory("/minetest/worlds/w1/sub").unwrap();
        db.store_directory("/minetest/worlds/w10").unwrap();
        db.put_file(&record("/minetest/worlds/w1/map.sqlite", b"1", 1)).unwrap();
        db.put_file(&record("/minetest/worlds/w1/sub/x", b"2", 1)).unwrap();
        db.put_file(&record("/minetest/worlds/w10/map.sqlite", b"3", 1)).unwrap();

        let deleted = db.delete_directory("/minetest/worlds/w1").unwrap();
        assert_eq!(deleted, 2);

        assert!(!db.has_directory("/minetest/worlds/w1").unwrap());
        assert!(!db.has_directory("/minetest/worlds/w1/sub").unwrap());
        assert!(db.has_directory("/minetest/worlds/w10").unwrap());
        assert!(db.get_file("/minetest/worlds/w10/map.sqlite").unwrap().is_some());
    }

    #[test]
    fn test_list_direct_children() {
        let db = ContentDb::in_memory().unwrap();
        db.store_directory("/minetest/worlds/alpha").unwrap();
        db.store_directory("/minetest/worlds/beta").unwrap();
        db.store_directory("/minetest/worlds/alpha/players").unwrap();
        db.store_directory("/minetest/mods/m").unwrap();

        let children = db.list_direct_children("/minetest/worlds").unwrap();
        assert_eq!(
            children,
            vec!["/minetest/worlds/alpha", "/minetest/worlds/beta"]
        );

        assert_eq!(
            db.list_directories_by_prefix("/minetest/worlds/").unwrap(),
            vec![
                "/minetest/worlds/alpha",
                "/minetest/worlds/alpha/players",
                "/minetest/worlds/beta"
            ]
        );
    }

    #[test]
    fn test_clear_and_delete_prefix() {
        let mut db = ContentDb::in_memory().unwrap();
        db.put_file(&record("/minetest/worlds/a", b"1", 1)).unwrap();
        db.put_file(&record("/minetest/mods/b", b"2", 1)).unwrap();
        db.store_directory("/minetest/worlds/w").unwrap();

        assert_eq!(db.delete_prefix("/minetest/worlds/").unwrap(), 1);
        assert!(!db.has_directory("/minetest/worlds/w").unwrap());
        assert_eq!(db.usage_by_prefix("/minetest/mods/").unwrap().0, 1);

        db.clear().unwrap();
        assert_eq!(db.usage_by_prefix("/").unwrap(), (0, 0));
    }
}
