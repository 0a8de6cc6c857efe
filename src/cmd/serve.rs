//! HTTP service command: `pageforge serve`.

use anyhow::Result;

use pageforge::config::ServiceConfig;

pub async fn cmd_serve(mut config: ServiceConfig, host: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    pageforge::service::server::start_server(config).await
}
