//! A well-behaved scheme plugin. Metadata can be overridden through the
//! environment so one binary can stand in for several schemes.

use scheme_integration_tests::TestScheme;
use scheme_plugin_api::{
    init_plugin_logging, PluginServer, SchemeService, HANDSHAKE, SCHEME_SERVICE,
};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    init_plugin_logging();

    PluginServer::new(HANDSHAKE)
        .service(SCHEME_SERVICE, SchemeService::new(TestScheme::from_env()))
        .run()
        .await
}
