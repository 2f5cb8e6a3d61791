//! Dispenses a `scheme` object that only answers `get_name`.

use async_trait::async_trait;
use scheme_integration_tests::TestScheme;
use scheme_plugin_api::server::method_not_found;
use scheme_plugin_api::{
    PluginServer, SchemeService, ServiceHandler, HANDSHAKE, SCHEME_SERVICE,
};
use scheme_runtime::protocol::RpcErrorObject;
use serde_json::Value;
use std::process::ExitCode;

struct NameOnly(SchemeService<TestScheme>);

#[async_trait]
impl ServiceHandler for NameOnly {
    fn methods(&self) -> Vec<String> {
        vec!["get_name".to_string()]
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcErrorObject> {
        match method {
            "get_name" => self.0.call(method, params).await,
            other => Err(method_not_found(other)),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    PluginServer::new(HANDSHAKE)
        .service(
            SCHEME_SERVICE,
            NameOnly(SchemeService::new(TestScheme::from_env())),
        )
        .run()
        .await
}
