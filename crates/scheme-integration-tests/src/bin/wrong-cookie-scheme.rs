//! Expects a cookie value the host never sends, so it refuses to start.

use scheme_integration_tests::TestScheme;
use scheme_plugin_api::{HandshakeConfig, PluginServer, SchemeService, HANDSHAKE, SCHEME_SERVICE};
use std::process::ExitCode;

const FOREIGN_HANDSHAKE: HandshakeConfig = HandshakeConfig {
    magic_cookie_value: "SOMETHING-ELSE",
    ..HANDSHAKE
};

#[tokio::main]
async fn main() -> ExitCode {
    PluginServer::new(FOREIGN_HANDSHAKE)
        .service(SCHEME_SERVICE, SchemeService::new(TestScheme::from_env()))
        .run()
        .await
}
