//! Test helpers: build AppState and router for integration tests.
//!
//! Run from workspace root: `cargo test -p intake-api --test upload_test`.

pub mod fixtures;

use axum_test::TestServer;
use intake_api::setup::routes;
use intake_api::AppState;
use intake_core::{Config, IntakeConfig};
use intake_storage::{LocalStorage, MemoryStorage, Storage};
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;

/// Test application: server plus the storage it writes to.
pub struct TestApp {
    pub server: TestServer,
    pub storage: MemoryStorage,
}

impl TestApp {
    pub fn client(&self) -> &TestServer {
        &self.server
    }
}

/// Test application backed by a temporary upload directory.
pub struct LocalTestApp {
    pub server: TestServer,
    pub upload_dir: TempDir,
}

impl LocalTestApp {
    pub fn stored_file_count(&self) -> usize {
        std::fs::read_dir(self.upload_dir.path()).unwrap().count()
    }
}

fn test_config(vars: &[(&str, &str)]) -> Config {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let config = IntakeConfig::from_lookup(|key| vars.get(key).cloned()).unwrap();
    Config(Box::new(config))
}

fn build_server(config: Config, storage: Arc<dyn Storage>) -> TestServer {
    let state = Arc::new(AppState::new(config.clone(), storage).unwrap());
    let router = routes::setup_routes(&config, state).unwrap();
    TestServer::new(router).unwrap()
}

/// Setup test app with the default policy and in-memory storage.
pub fn setup_test_app() -> TestApp {
    setup_test_app_with(&[])
}

/// Setup test app with extra configuration variables.
pub fn setup_test_app_with(vars: &[(&str, &str)]) -> TestApp {
    let mut all = vec![("STORAGE_BACKEND", "memory")];
    all.extend_from_slice(vars);
    let config = test_config(&all);

    let storage = MemoryStorage::new();
    let server = build_server(config, Arc::new(storage.clone()));
    TestApp { server, storage }
}

/// Setup test app writing to a temporary directory.
pub async fn setup_local_test_app() -> LocalTestApp {
    setup_local_test_app_with(&[]).await
}

/// Setup local-storage test app with extra configuration variables.
pub async fn setup_local_test_app_with(vars: &[(&str, &str)]) -> LocalTestApp {
    let upload_dir = tempfile::tempdir().unwrap();
    let path = upload_dir.path().to_str().unwrap().to_string();
    let mut all = vec![("LOCAL_STORAGE_PATH", path.as_str())];
    all.extend_from_slice(vars);
    let config = test_config(&all);

    let storage = LocalStorage::new(upload_dir.path()).await.unwrap();
    let server = build_server(config, Arc::new(storage));
    LocalTestApp { server, upload_dir }
}
