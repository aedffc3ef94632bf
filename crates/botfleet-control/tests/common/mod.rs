//! Common test utilities for botfleet-control integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use botfleet_control::cloud::{CloudClients, CloudConfig, CloudProvider, MemoryFunctions, MemoryRouting};
use botfleet_control::config::ControlConfig;
use botfleet_control::package::PackageConfig;
use botfleet_control::{DeploymentManager, DeploymentRequest, MemoryStore};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

pub const API_ID: &str = "abc123";
pub const PROXY_PATH: &str = "/user/{proxy+}";
pub const HANDLER_SOURCE: &[u8] = b"def handler(event, context):\n    return {}\n";

/// Orchestrator wired to in-memory control planes and a real base archive.
pub struct TestFleet {
    pub dir: TempDir,
    pub config: ControlConfig,
    pub functions: Arc<MemoryFunctions>,
    pub routing: Arc<MemoryRouting>,
    pub store: Arc<MemoryStore>,
    pub manager: Arc<DeploymentManager>,
}

impl TestFleet {
    /// Creates a fleet whose functions settle immediately.
    pub fn new() -> Self {
        Self::with_functions(MemoryFunctions::default())
    }

    /// Creates a fleet around a preconfigured function control plane.
    pub fn with_functions(functions: MemoryFunctions) -> Self {
        let dir = TempDir::new().unwrap();
        let base_archive = write_base_archive(dir.path());
        let work_dir = dir.path().join("scratch");
        std::fs::create_dir(&work_dir).unwrap();

        let config = ControlConfig {
            cloud: CloudConfig {
                provider: CloudProvider::Memory,
                account_id: "123456789012".to_owned(),
                execution_role: "arn:aws:iam::123456789012:role/bot-exec".to_owned(),
                api_gateway_id: API_ID.to_owned(),
                ..CloudConfig::default()
            },
            package: PackageConfig {
                base_archive,
                work_dir: Some(work_dir),
                ..PackageConfig::default()
            },
            ..ControlConfig::default()
        };

        let functions = Arc::new(functions);
        let routing = Arc::new(MemoryRouting::with_proxy(API_ID, PROXY_PATH));
        let store = Arc::new(MemoryStore::new());
        let clients = CloudClients {
            functions: functions.clone(),
            routing: routing.clone(),
        };
        let manager = Arc::new(DeploymentManager::new(&config, clients, store.clone()));

        Self {
            dir,
            config,
            functions,
            routing,
            store,
            manager,
        }
    }

    /// Resource id of the shared proxy route.
    pub fn proxy_resource(&self) -> String {
        self.routing.resource_id(API_ID, PROXY_PATH).unwrap()
    }

    /// Number of scratch directories left behind by packaging.
    pub fn leftover_scratch_dirs(&self) -> usize {
        std::fs::read_dir(self.dir.path().join("scratch"))
            .unwrap()
            .filter_map(Result::ok)
            .count()
    }
}

/// Deploy request for a config naming `bot_name`.
pub fn bot_config(bot_name: &str) -> DeploymentRequest {
    DeploymentRequest::new(format!("bot_name: {bot_name}\nmodel: gpt-4o\n").into_bytes())
}

fn write_base_archive(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("lambda_base.zip");
    write_archive(
        &path,
        &[
            ("lambda_function.py", HANDLER_SOURCE),
            ("app/__init__.py", b"".as_slice()),
            ("app/config/config.yaml", b"bot_name: template\n".as_slice()),
        ],
    );
    path
}

/// Write a zip archive holding `entries` to `path`.
pub fn write_archive(path: &Path, entries: &[(&str, &[u8])]) {
    let mut writer = ZipWriter::new(File::create(path).unwrap());
    for (name, contents) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(contents).unwrap();
    }
    writer.finish().unwrap();
}
