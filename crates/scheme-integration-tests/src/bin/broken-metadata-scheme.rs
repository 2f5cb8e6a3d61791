//! Dispenses a complete `scheme` object whose identity cannot be used.
//!
//! `BROKEN_METADATA_MODE=empty-name` reports an empty name; any other value
//! makes `get_name` fail.

use async_trait::async_trait;
use scheme_plugin_api::{
    ClassAttributes, Measurement, PluginServer, Scheme, SchemeError, SchemeResult, SchemeService,
    SwAttributes, HANDSHAKE, SCHEME_SERVICE,
};
use std::process::ExitCode;

struct BrokenMetadata {
    empty_name: bool,
}

#[async_trait]
impl Scheme for BrokenMetadata {
    async fn get_name(&self) -> SchemeResult<String> {
        if self.empty_name {
            Ok(String::new())
        } else {
            Err(SchemeError::InvalidMetadata(
                "identity store unavailable".to_string(),
            ))
        }
    }

    async fn get_supported_media_types(&self) -> SchemeResult<Vec<String>> {
        Ok(vec!["application/vnd.broken+json".to_string()])
    }

    async fn synth_sw_attributes(
        &self,
        _class: &ClassAttributes,
        _measurements: &[Measurement],
    ) -> SchemeResult<Vec<SwAttributes>> {
        Ok(Vec::new())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let empty_name = std::env::var("BROKEN_METADATA_MODE").as_deref() == Ok("empty-name");

    PluginServer::new(HANDSHAKE)
        .service(SCHEME_SERVICE, SchemeService::new(BrokenMetadata { empty_name }))
        .run()
        .await
}
