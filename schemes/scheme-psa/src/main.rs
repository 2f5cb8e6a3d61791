use scheme_plugin_api::{
    init_plugin_logging, PluginServer, SchemeService, HANDSHAKE, SCHEME_SERVICE,
};
use scheme_psa::PsaScheme;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    init_plugin_logging();
    tracing::info!(scheme = scheme_psa::SCHEME_NAME, "Starting scheme plugin");

    PluginServer::new(HANDSHAKE)
        .service(SCHEME_SERVICE, SchemeService::new(PsaScheme))
        .run()
        .await
}
