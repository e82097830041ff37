//! Configuration loaders for scenarios covering success and failure paths.

use std::ffi::OsString;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoError;
use tempfile::TempDir;

use pipechat_config::{Config, OrthoConfig};

use crate::bootstrap::ConfigLoader;

/// Loader that points the FIFO directory at a temporary directory.
#[derive(Clone)]
pub struct TestConfigLoader {
    _dir: Arc<TempDir>,
    root: Utf8PathBuf,
}

impl TestConfigLoader {
    #[must_use]
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temporary fifo directory");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
            .expect("temporary fifo directory was not valid UTF-8");
        Self {
            _dir: Arc::new(dir),
            root,
        }
    }

    pub fn fifo_dir(&self) -> &Utf8Path {
        &self.root
    }
}

impl ConfigLoader for TestConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(Config {
            fifo_dir: self.root.clone(),
            connect_attempts: 20,
            connect_backoff_ms: 5,
            poll_timeout_ms: 50,
            log_filter: "warn".to_owned(),
            ..Config::default()
        })
    }
}

/// Loader that fails by passing an unparsable flag value.
#[derive(Clone, Copy)]
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("pipechatd"),
            OsString::from("--report-threshold"),
            OsString::from("nope"),
        ];
        Config::load_from_iter(args)
    }
}
