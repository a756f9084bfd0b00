// Shared fixtures: a temp directory holding both the local storage root and
// the source files to upload, plus an in-memory SQLite repository with a
// `posts` owner table.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use mep_db::{Database, SqliteDatabase};
use mep_service::{FileStorageManager, ProcessorPipeline};
use mep_store::{LocalDriver, LocalDriverConfig, StorageDriver};
use tempfile::TempDir;

pub struct Fixture {
    pub tmp: TempDir,
    pub sqlite: SqliteDatabase,
    pub db: Arc<dyn Database>,
    pub driver: Arc<dyn StorageDriver>,
}

impl Fixture {
    pub fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let sqlite = SqliteDatabase::open_in_memory().unwrap();
        sqlite
            .execute_batch(
                "CREATE TABLE posts (id INTEGER PRIMARY KEY, cover_id TEXT);
                 CREATE TABLE image_blocks (id INTEGER PRIMARY KEY, image_id TEXT);",
            )
            .unwrap();
        let driver = LocalDriver::new(LocalDriverConfig {
            storage_path: tmp.path().join("storage"),
            public_url_path_prefix: "/attachments".into(),
            public_url_prefix: Some("https://media.example.com".into()),
        });
        Self {
            db: Arc::new(sqlite.clone()),
            sqlite,
            driver: Arc::new(driver),
            tmp,
        }
    }

    pub fn manager(&self, pipeline: ProcessorPipeline) -> FileStorageManager {
        FileStorageManager::new(self.driver.clone(), self.db.clone(), pipeline)
    }

    /// Write `len` bytes to a source file and return its path.
    pub fn source(&self, name: &str, len: usize) -> PathBuf {
        let path = self.tmp.path().join("sources").join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, vec![0xAB; len]).unwrap();
        path
    }

    pub fn reference_cover(&self, post_id: i64, attachment_id: &str) {
        self.sqlite
            .execute_batch(&format!(
                "INSERT INTO posts (id, cover_id) VALUES ({post_id}, '{attachment_id}')"
            ))
            .unwrap();
    }
}
