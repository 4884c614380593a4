//! SQLite-backed face sample store.
//!
//! One table of immutable rows. Patches are stored as JSON arrays of numbers
//! so the file stays inspectable with the sqlite3 shell.

use crate::types::{FaceSample, Patch};
use rusqlite::{params, Connection};
use std::path::Path;
use thiserror::Error;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS face_samples (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL,
    patch       TEXT NOT NULL,
    created_at  TEXT NOT NULL
);
"#;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("patch serialization: {0}")]
    Json(#[from] serde_json::Error),
    #[error("sample {id} has a corrupt patch: {reason}")]
    CorruptPatch { id: i64, reason: String },
}

/// Persistent gallery of named face patches.
pub struct SampleStore {
    conn: Connection,
}

impl SampleStore {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self::init(conn)?;
        tracing::info!(path = %path.display(), samples = store.count()?, "sample store opened");
        Ok(store)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Insert a sample and hand the new row plus the full listing to `f`.
    ///
    /// Runs in one transaction: the insert is committed only if `f` succeeds,
    /// otherwise it is rolled back and `f`'s error returned.
    pub fn insert_with<T, E, F>(&mut self, name: &str, patch: &Patch, f: F) -> Result<T, E>
    where
        E: From<StoreError>,
        F: FnOnce(&FaceSample, &[FaceSample]) -> Result<T, E>,
    {
        let tx = self.conn.transaction().map_err(StoreError::from)?;
        let sample = insert_row(&tx, name, patch)?;
        let all = list_rows(&tx)?;
        let out = f(&sample, &all)?;
        tx.commit().map_err(StoreError::from)?;

        tracing::debug!(sample_id = sample.id, name = %sample.name, "sample committed");
        Ok(out)
    }

    /// Insert a sample without any follow-up work.
    pub fn insert(&mut self, name: &str, patch: &Patch) -> Result<FaceSample, StoreError> {
        self.insert_with(name, patch, |sample, _| Ok::<_, StoreError>(sample.clone()))
    }

    /// All samples in insertion order.
    pub fn list_all(&self) -> Result<Vec<FaceSample>, StoreError> {
        list_rows(&self.conn)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM face_samples", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

fn insert_row(conn: &Connection, name: &str, patch: &Patch) -> Result<FaceSample, StoreError> {
    let encoded = serde_json::to_string(patch.pixels())?;
    let created_at = chrono::Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO face_samples (name, patch, created_at) VALUES (?1, ?2, ?3)",
        params![name, encoded, created_at],
    )?;

    Ok(FaceSample {
        id: conn.last_insert_rowid(),
        name: name.to_string(),
        patch: patch.clone(),
        created_at,
    })
}

fn list_rows(conn: &Connection) -> Result<Vec<FaceSample>, StoreError> {
    let mut stmt =
        conn.prepare("SELECT id, name, patch, created_at FROM face_samples ORDER BY id ASC")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;

    let mut samples = Vec::new();
    for row in rows {
        let (id, name, encoded, created_at) = row?;
        samples.push(FaceSample {
            id,
            name,
            patch: decode_patch(id, &encoded)?,
            created_at,
        });
    }
    Ok(samples)
}

/// Decode a stored JSON pixel array.
///
/// Accepts integer or float elements; values are rounded and clamped to u8.
fn decode_patch(id: i64, encoded: &str) -> Result<Patch, StoreError> {
    let values: Vec<f64> = serde_json::from_str(encoded).map_err(|e| StoreError::CorruptPatch {
        id,
        reason: e.to_string(),
    })?;
    let len = values.len();
    let pixels = values
        .into_iter()
        .map(|v| v.round().clamp(0.0, 255.0) as u8)
        .collect();

    Patch::from_flat(pixels).ok_or_else(|| StoreError::CorruptPatch {
        id,
        reason: format!("{len} values do not form a square patch"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patch(size: u32, value: u8) -> Patch {
        Patch::new(size, vec![value; (size * size) as usize]).unwrap()
    }

    #[test]
    fn test_insert_and_list_in_order() {
        let mut store = SampleStore::open_in_memory().unwrap();
        let a = store.insert("alice", &patch(4, 10)).unwrap();
        let b = store.insert("bob", &patch(4, 20)).unwrap();
        assert!(b.id > a.id);

        let all = store.list_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "alice");
        assert_eq!(all[1].name, "bob");
        assert_eq!(all[1].patch, patch(4, 20));
        assert!(!all[0].created_at.is_empty());
    }

    #[test]
    fn test_duplicate_names_allowed() {
        let mut store = SampleStore::open_in_memory().unwrap();
        store.insert("alice", &patch(4, 1)).unwrap();
        store.insert("alice", &patch(4, 2)).unwrap();
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_insert_with_sees_new_row() {
        let mut store = SampleStore::open_in_memory().unwrap();
        store.insert("first", &patch(4, 1)).unwrap();

        let seen = store
            .insert_with("second", &patch(4, 2), |sample, all| {
                assert_eq!(all.last().map(|s| s.id), Some(sample.id));
                Ok::<_, StoreError>(all.len())
            })
            .unwrap();
        assert_eq!(seen, 2);
    }

    #[test]
    fn test_insert_with_rolls_back_on_error() {
        let mut store = SampleStore::open_in_memory().unwrap();
        store.insert("keep", &patch(4, 1)).unwrap();

        let result: Result<(), StoreError> = store.insert_with("drop", &patch(4, 2), |sample, _| {
            Err(StoreError::CorruptPatch {
                id: sample.id,
                reason: "rejected".into(),
            })
        });
        assert!(result.is_err());

        let all = store.list_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "keep");
    }

    #[test]
    fn test_decode_float_patch() {
        let decoded = decode_patch(1, "[0.0, 12.4, 254.6, 300.0]").unwrap();
        assert_eq!(decoded.pixels(), &[0, 12, 255, 255]);
    }

    #[test]
    fn test_decode_non_square_patch() {
        let err = decode_patch(5, "[1, 2, 3]").unwrap_err();
        assert!(matches!(err, StoreError::CorruptPatch { id: 5, .. }));
    }

    #[test]
    fn test_corrupt_row_surfaces_on_list() {
        let store = SampleStore::open_in_memory().unwrap();
        store
            .conn
            .execute(
                "INSERT INTO face_samples (name, patch, created_at) VALUES ('x', 'not json', '')",
                [],
            )
            .unwrap();
        assert!(matches!(
            store.list_all(),
            Err(StoreError::CorruptPatch { .. })
        ));
    }

    #[test]
    fn test_open_creates_file_and_persists() {
        let dir = std::env::temp_dir().join(format!("facegate-store-{}", std::process::id()));
        let path = dir.join("nested").join("faces.db");
        let _ = std::fs::remove_dir_all(&dir);

        {
            let mut store = SampleStore::open(&path).unwrap();
            store.insert("alice", &patch(4, 9)).unwrap();
        }
        let store = SampleStore::open(&path).unwrap();
        assert_eq!(store.list_all().unwrap()[0].name, "alice");

        let _ = std::fs::remove_dir_all(&dir);
    }
}
