use std::path::Path;
use std::sync::Arc;

use tracing::{error, info};

use crate::domain::error::Result;
use crate::infrastructure::config::ClientConfig;
use crate::infrastructure::qa_pilot::{HttpQaPilotClient, QaPilotApi};

/// Everything a command needs, built once per process.
pub struct AppContext {
    pub config: ClientConfig,
    pub api: Arc<dyn QaPilotApi>,
}

pub fn setup(config_path: Option<&Path>, server_override: Option<&str>) -> Result<AppContext> {
    let mut config = ClientConfig::load(config_path).map_err(|err| {
        error!(error = %err, "Failed to load configuration");
        err
    })?;
    if let Some(server) = server_override {
        config.base_url = server.to_string();
    }

    let client = HttpQaPilotClient::new(&config.base_url, config.request_timeout()).map_err(|err| {
        error!(error = %err, base_url = %config.base_url, "Failed to build QA Pilot client");
        err
    })?;
    info!(
        base_url = %client.base_url(),
        timeout_secs = config.request_timeout_secs,
        "QA Pilot client ready"
    );

    Ok(AppContext {
        config,
        api: Arc::new(client),
    })
}
