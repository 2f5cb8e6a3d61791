//! Announces an application protocol version the host does not speak.

use scheme_integration_tests::TestScheme;
use scheme_plugin_api::{HandshakeConfig, PluginServer, SchemeService, HANDSHAKE, SCHEME_SERVICE};
use std::process::ExitCode;

const NEXT_VERSION: HandshakeConfig = HandshakeConfig {
    protocol_version: 2,
    ..HANDSHAKE
};

#[tokio::main]
async fn main() -> ExitCode {
    PluginServer::new(NEXT_VERSION)
        .service(SCHEME_SERVICE, SchemeService::new(TestScheme::from_env()))
        .run()
        .await
}
