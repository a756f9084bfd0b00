use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use mep_core::constraints::FileConstraints;
use mep_db::{Database, SqliteDatabase};
use mep_service::processor::{TinifyConfig, TinifyProcessor, UploadedFileNameProcessor};
use mep_service::{FileStorageManager, ProcessorPipeline};
use mep_store::{LocalDriver, LocalDriverConfig};
use tempfile::TempDir;
use tokio::net::TcpListener;

use crate::InnerAppState;

/// A router over in-memory SQLite and a temp local store, with handles for
/// asserting on what the requests did.
pub struct TestApp {
    pub router: Router,
    pub db: Arc<dyn Database>,
    pub storage_root: PathBuf,
    _tmp: TempDir,
}

pub async fn test_app() -> TestApp {
    test_app_with(FileConstraints::default()).await
}

pub async fn test_app_with(constraints: FileConstraints) -> TestApp {
    let tmp = tempfile::tempdir().unwrap();
    let storage_root = tmp.path().join("attachments");
    let db: Arc<dyn Database> = Arc::new(SqliteDatabase::open_in_memory().unwrap());
    let driver = LocalDriver::new(LocalDriverConfig {
        storage_path: storage_root.clone(),
        public_url_path_prefix: "/attachments".into(),
        public_url_prefix: None,
    });
    let pipeline = ProcessorPipeline::builder()
        .with(UploadedFileNameProcessor)
        .with(TinifyProcessor::new(TinifyConfig::dummy()).unwrap())
        .build();
    let manager = FileStorageManager::new(Arc::new(driver), db.clone(), pipeline);
    let router = crate::build_router(Arc::new(InnerAppState {
        manager,
        constraints,
    }));
    TestApp {
        router,
        db,
        storage_root,
        _tmp: tmp,
    }
}

/// A running test server with base_url and background task handle.
pub struct TestServer {
    pub base_url: String,
    pub db: Arc<dyn Database>,
    _app: TestApp,
    _handle: tokio::task::JoinHandle<()>,
}

/// Spawn an axum test server on a random port.
pub async fn spawn_test_server() -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = test_app().await;
    let router = app.router.clone();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    TestServer {
        base_url: format!("http://{addr}"),
        db: app.db.clone(),
        _app: app,
        _handle: handle,
    }
}
