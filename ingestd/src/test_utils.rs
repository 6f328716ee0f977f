//! Shared helpers for tests.

use std::path::Path;

use crate::config::Config;
use crate::{AppState, Application};

/// Default config with storage beneath `root`, never created up front.
pub fn create_test_config(root: &Path) -> Config {
    let mut config = Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..Default::default()
    };
    config.uploads.upload_directory = root.join("uploads");
    config
}

pub fn create_test_state(root: &Path, configure: impl FnOnce(&mut Config)) -> AppState {
    let mut config = create_test_config(root);
    configure(&mut config);
    AppState::from_config(config)
}

pub fn create_test_app(root: &Path, configure: impl FnOnce(&mut Config)) -> axum_test::TestServer {
    let mut config = create_test_config(root);
    configure(&mut config);
    Application::new(config).into_test_server()
}
