//! Completes the handshake but offers no `scheme` service.

use scheme_integration_tests::TestScheme;
use scheme_plugin_api::{PluginServer, SchemeService, HANDSHAKE};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    PluginServer::new(HANDSHAKE)
        .service("attestation", SchemeService::new(TestScheme::from_env()))
        .run()
        .await
}
