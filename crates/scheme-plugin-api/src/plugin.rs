//! The host-side handle to a running scheme plugin.

use crate::host::{PluginProcess, SHUTDOWN_GRACE_PERIOD};
use crate::scheme::{
    ClassAttributes, Measurement, Scheme, SchemeResult, SwAttributes, SynthRequest, SCHEME_SERVICE,
};
use async_trait::async_trait;
use scheme_runtime::{service_method, RpcConnection};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Connection to a plugin over its stdio.
pub(crate) type PluginConnection = RpcConnection<ChildStdout, ChildStdin>;

/// Client stub for a dispensed `scheme` service.
///
/// Calls are serialized: the connection carries one request at a time.
/// Clones share the same connection.
#[derive(Clone)]
pub struct RemoteScheme {
    conn: Arc<Mutex<PluginConnection>>,
    timeout: Duration,
}

impl RemoteScheme {
    pub(crate) fn new(conn: PluginConnection, timeout: Duration) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            timeout,
        }
    }

    async fn invoke<P, T>(&self, method: &str, params: &P) -> SchemeResult<T>
    where
        P: Serialize + Sync,
        T: DeserializeOwned,
    {
        let wire_method = service_method(SCHEME_SERVICE, method);
        let mut conn = self.conn.lock().await;
        let result = conn.call_typed(&wire_method, params, self.timeout).await?;
        Ok(result)
    }
}

#[async_trait]
impl Scheme for RemoteScheme {
    async fn get_name(&self) -> SchemeResult<String> {
        self.invoke("get_name", &Value::Null).await
    }

    async fn get_supported_media_types(&self) -> SchemeResult<Vec<String>> {
        self.invoke("get_supported_media_types", &Value::Null).await
    }

    async fn synth_sw_attributes(
        &self,
        class: &ClassAttributes,
        measurements: &[Measurement],
    ) -> SchemeResult<Vec<SwAttributes>> {
        let request = SynthRequest {
            class: class.clone(),
            measurements: measurements.to_vec(),
        };
        self.invoke("synth_sw_attributes", &request).await
    }
}

impl std::fmt::Debug for RemoteScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteScheme")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// A successfully bootstrapped scheme plugin.
///
/// Name and media types were fetched once at bootstrap, so answering "what
/// does this plugin do" never touches the plugin process. The handle owns the
/// process: dropping it kills the child, [`shutdown`](Self::shutdown) lets it
/// exit cleanly first.
#[derive(Debug)]
pub struct SchemePlugin {
    path: PathBuf,
    name: String,
    supported_media_types: Vec<String>,
    remote: RemoteScheme,
    process: PluginProcess,
}

impl SchemePlugin {
    pub(crate) fn new(
        path: PathBuf,
        name: String,
        supported_media_types: Vec<String>,
        remote: RemoteScheme,
        process: PluginProcess,
    ) -> Self {
        Self {
            path,
            name,
            supported_media_types,
            remote,
            process,
        }
    }

    /// Executable the plugin was launched from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Self-reported scheme name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn supported_media_types(&self) -> &[String] {
        &self.supported_media_types
    }

    pub fn supports_media_type(&self, media_type: &str) -> bool {
        self.supported_media_types.iter().any(|m| m == media_type)
    }

    /// The bound remote object; every verification call goes through it.
    pub fn scheme(&self) -> &RemoteScheme {
        &self.remote
    }

    /// OS process id of the plugin.
    pub fn pid(&self) -> Option<u32> {
        self.process.id()
    }

    /// Forcibly terminate the plugin. Later calls through [`scheme`](Self::scheme)
    /// fail with a connection error.
    pub async fn kill(&mut self) {
        info!(plugin = %self.path.display(), scheme = %self.name, "Killing scheme plugin");
        self.process.kill().await;
    }

    /// Close the connection and wait for the plugin to exit, killing it if
    /// it does not do so within a grace period.
    pub async fn shutdown(self) {
        let Self {
            path,
            name,
            remote,
            process,
            ..
        } = self;

        // Closing stdin is the plugin's signal to stop serving.
        drop(remote);
        let status = process.shutdown(SHUTDOWN_GRACE_PERIOD).await;
        debug!(plugin = %path.display(), scheme = %name, status = ?status, "Scheme plugin stopped");
    }
}
