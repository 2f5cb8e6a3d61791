//! Host-side plugin bootstrap.
//!
//! Bootstrapping runs strictly in order: spawn, handshake, dispense,
//! capability check, metadata fetch. The spawned process is owned by a
//! [`PluginProcess`] from the moment it exists; if any later step fails the
//! process is killed and reaped before the error is returned, and on success
//! ownership moves into the returned [`SchemePlugin`].

use crate::logging::forward_plugin_logs;
use crate::plugin::{PluginConnection, RemoteScheme, SchemePlugin};
use crate::registry::PluginRegistry;
use crate::scheme::{Scheme, SchemeError, SCHEME_SERVICE};
use scheme_runtime::protocol::SERVICE_NOT_OFFERED;
use scheme_runtime::{
    read_handshake, CapabilitySet, DispenseReply, DispenseRequest, HandshakeConfig, HandshakeError,
    LineReader, RpcConnection, RpcError, DISPENSE_METHOD, HANDSHAKE, MAX_FRAME_LEN,
};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

/// Default bound on how long a plugin may take to print its handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on dispense and on each call made through a handle.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a plugin gets to exit on its own after its connection closes.
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Errors returned by [`Bootstrapper::bootstrap`].
///
/// Every variant names the executable. By the time one is returned the
/// spawned process, if any, has been terminated.
#[derive(Error, Debug)]
pub enum BootstrapError {
    /// The executable could not be started.
    #[error("unable to start plugin {}: {source}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The process did not complete a compatible handshake.
    #[error("unable to create the RPC client for {}: {source}", path.display())]
    Handshake {
        path: PathBuf,
        #[source]
        source: HandshakeError,
    },

    /// The named service could not be obtained.
    #[error("unable to dispense service {service:?} from plugin {}: {source}", path.display())]
    Dispense {
        path: PathBuf,
        service: String,
        #[source]
        source: DispenseFailure,
    },

    /// The dispensed object does not implement the required interface.
    #[error(
        "plugin {} does not provide an implementation of the {service} interface (missing: {})",
        path.display(),
        missing.join(", ")
    )]
    CapabilityMismatch {
        path: PathBuf,
        service: String,
        missing: Vec<String>,
    },

    /// The identity or media-type accessors failed.
    #[error("unable to fetch metadata from plugin {}: {source}", path.display())]
    MetadataFetch {
        path: PathBuf,
        #[source]
        source: SchemeError,
    },
}

impl BootstrapError {
    /// Executable the failed bootstrap was attempted on.
    pub fn path(&self) -> &Path {
        match self {
            BootstrapError::Spawn { path, .. }
            | BootstrapError::Handshake { path, .. }
            | BootstrapError::Dispense { path, .. }
            | BootstrapError::CapabilityMismatch { path, .. }
            | BootstrapError::MetadataFetch { path, .. } => path,
        }
    }
}

/// Why a dispense request failed.
#[derive(Error, Debug)]
pub enum DispenseFailure {
    /// The host registry has no descriptor for the service.
    #[error("service is not registered with the host")]
    NotRegistered,

    /// The plugin refused the request.
    #[error("service not offered by plugin: {0}")]
    NotOffered(String),

    #[error(transparent)]
    Transport(RpcError),
}

/// Tunables for a bootstrap.
#[derive(Debug, Clone)]
pub struct BootstrapOptions {
    /// Handshake values the host presents and expects.
    pub handshake: HandshakeConfig,
    pub handshake_timeout: Duration,
    /// Applied to dispense and every call on the resulting handle.
    pub call_timeout: Duration,
    /// Extra environment for the child process.
    pub envs: Vec<(String, String)>,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            handshake: HANDSHAKE,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            envs: Vec::new(),
        }
    }
}

/// Bootstraps scheme plugins against a fixed registry and options.
#[derive(Debug, Clone, Default)]
pub struct Bootstrapper {
    registry: Arc<PluginRegistry>,
    options: BootstrapOptions,
}

/// Bootstrap a scheme plugin with the default registry and options.
pub async fn bootstrap(path: impl AsRef<Path>) -> Result<SchemePlugin, BootstrapError> {
    Bootstrapper::default().bootstrap(path).await
}

impl Bootstrapper {
    pub fn new(registry: Arc<PluginRegistry>, options: BootstrapOptions) -> Self {
        Self { registry, options }
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn options(&self) -> &BootstrapOptions {
        &self.options
    }

    /// Launch `path` and bind it as a scheme plugin.
    pub async fn bootstrap(&self, path: impl AsRef<Path>) -> Result<SchemePlugin, BootstrapError> {
        let path = path.as_ref().to_path_buf();
        info!(plugin = %path.display(), "Bootstrapping scheme plugin");

        let (mut process, stdin, stdout) = PluginProcess::spawn(&path, &self.options).await?;

        match self.bind(&path, &mut process, stdin, stdout).await {
            Ok((remote, name, media_types)) => {
                info!(
                    plugin = %path.display(),
                    scheme = %name,
                    pid = ?process.id(),
                    media_types = ?media_types,
                    "Scheme plugin ready"
                );
                Ok(SchemePlugin::new(path, name, media_types, remote, process))
            }
            Err(err) => {
                warn!(
                    plugin = %path.display(),
                    error = %err,
                    "Bootstrap failed, terminating plugin"
                );
                process.kill().await;
                Err(err)
            }
        }
    }

    /// Steps after spawn. Never leaves the process running on its own: the
    /// caller kills it if this returns an error.
    async fn bind(
        &self,
        path: &Path,
        process: &mut PluginProcess,
        stdin: ChildStdin,
        stdout: ChildStdout,
    ) -> Result<(RemoteScheme, String, Vec<String>), BootstrapError> {
        let mut reader = LineReader::new(stdout, MAX_FRAME_LEN);
        let handshake = read_handshake(
            &mut reader,
            &self.options.handshake,
            self.options.handshake_timeout,
        )
        .await;

        if let Err(source) = handshake {
            let source = match source {
                HandshakeError::ProcessExited { .. } => HandshakeError::ProcessExited {
                    status: process.exit_description().await,
                },
                other => other,
            };
            return Err(BootstrapError::Handshake {
                path: path.to_path_buf(),
                source,
            });
        }
        debug!(plugin = %path.display(), "Handshake complete");

        let mut conn: PluginConnection = RpcConnection::from_reader(reader, stdin);
        let offered = self.dispense(path, &mut conn, SCHEME_SERVICE).await?;

        let remote = RemoteScheme::new(conn, self.options.call_timeout);
        let metadata_error = |source| BootstrapError::MetadataFetch {
            path: path.to_path_buf(),
            source,
        };

        let name = remote.get_name().await.map_err(metadata_error)?;
        if name.trim().is_empty() {
            return Err(metadata_error(SchemeError::InvalidMetadata(
                "scheme reported an empty name".to_string(),
            )));
        }

        let media_types = remote
            .get_supported_media_types()
            .await
            .map_err(metadata_error)?;
        if media_types.is_empty() {
            warn!(plugin = %path.display(), scheme = %name, "Scheme declares no media types");
        }

        debug!(plugin = %path.display(), methods = ?offered.method_names(), "Remote scheme bound");
        Ok((remote, name, media_types))
    }

    /// Request `service` and check the advertised methods against the
    /// registry's descriptor.
    async fn dispense(
        &self,
        path: &Path,
        conn: &mut PluginConnection,
        service: &str,
    ) -> Result<CapabilitySet, BootstrapError> {
        let dispense_error = |source| BootstrapError::Dispense {
            path: path.to_path_buf(),
            service: service.to_string(),
            source,
        };

        let descriptor = self
            .registry
            .lookup(service)
            .ok_or_else(|| dispense_error(DispenseFailure::NotRegistered))?;

        let request = DispenseRequest {
            service: service.to_string(),
        };
        let reply: DispenseReply = conn
            .call_typed(DISPENSE_METHOD, &request, self.options.call_timeout)
            .await
            .map_err(|err| match err {
                RpcError::Remote { code, message } => {
                    if code != SERVICE_NOT_OFFERED {
                        debug!(code, "Dispense refused with unexpected error code");
                    }
                    dispense_error(DispenseFailure::NotOffered(message))
                }
                other => dispense_error(DispenseFailure::Transport(other)),
            })?;

        if reply.service != service {
            return Err(dispense_error(DispenseFailure::NotOffered(format!(
                "plugin dispensed {:?} instead",
                reply.service
            ))));
        }

        let offered = CapabilitySet::from_strings(&reply.methods);
        let missing = offered.missing_from(&descriptor.required_capabilities());
        if !missing.is_empty() {
            return Err(BootstrapError::CapabilityMismatch {
                path: path.to_path_buf(),
                service: service.to_string(),
                missing: missing.iter().map(|c| c.as_str().to_string()).collect(),
            });
        }

        Ok(offered)
    }
}

/// Owner of a spawned plugin process.
///
/// The child is spawned with `kill_on_drop`, so dropping this without calling
/// [`kill`](Self::kill) or [`shutdown`](Self::shutdown) still signals the
/// process; the explicit methods additionally reap it.
pub struct PluginProcess {
    child: Child,
    pid: Option<u32>,
}

impl PluginProcess {
    async fn spawn(
        path: &Path,
        options: &BootstrapOptions,
    ) -> Result<(Self, ChildStdin, ChildStdout), BootstrapError> {
        let spawn_error = |source| BootstrapError::Spawn {
            path: path.to_path_buf(),
            source,
        };

        let mut command = Command::new(path);
        command
            .envs(options.handshake.child_env())
            .envs(options.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = spawn_with_retry(&mut command).await.map_err(spawn_error)?;
        let pid = child.id();
        debug!(plugin = %path.display(), pid = ?pid, "Plugin process spawned");

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_plugin_logs(stderr, path.display().to_string()));
        }

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let mut process = Self { child, pid };

        match (stdin, stdout) {
            (Some(stdin), Some(stdout)) => Ok((process, stdin, stdout)),
            _ => {
                process.kill().await;
                Err(spawn_error(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "plugin stdio was not captured",
                )))
            }
        }
    }

    /// OS process id, as observed at spawn time.
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Exit status if the process has already exited.
    pub fn try_status(&mut self) -> Option<ExitStatus> {
        self.child.try_wait().ok().flatten()
    }

    /// Forcibly terminate and reap the process.
    pub async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            debug!(pid = ?self.pid, error = %e, "Kill on plugin process failed");
        }
    }

    /// Give the process a grace period to exit, then kill it.
    pub async fn shutdown(mut self, grace: Duration) -> Option<ExitStatus> {
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                debug!(pid = ?self.pid, error = %e, "Waiting on plugin process failed");
                self.kill().await;
                None
            }
            Err(_) => {
                warn!(pid = ?self.pid, "Plugin did not exit within grace period, killing");
                self.kill().await;
                self.try_status()
            }
        }
    }

    /// Describe how the process exited, waiting briefly for it to finish.
    async fn exit_description(&mut self) -> String {
        match tokio::time::timeout(Duration::from_millis(500), self.child.wait()).await {
            Ok(Ok(status)) => status.to_string(),
            _ => "unknown".to_string(),
        }
    }
}

/// `ETXTBSY` is transient: a file that was just written can still be held
/// open by a sibling fork that has not reached `exec` yet.
async fn spawn_with_retry(command: &mut Command) -> std::io::Result<Child> {
    const TEXT_FILE_BUSY: i32 = 26;
    let mut attempts = 0;
    loop {
        match command.spawn() {
            Err(e) if cfg!(unix) && e.raw_os_error() == Some(TEXT_FILE_BUSY) && attempts < 5 => {
                attempts += 1;
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            other => return other,
        }
    }
}

impl std::fmt::Debug for PluginProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginProcess").field("pid", &self.pid).finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn write_script(dir: &Path, name: &str, body: &str, mode: u32) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).unwrap();
        path
    }

    fn fast_options() -> BootstrapOptions {
        BootstrapOptions {
            handshake_timeout: Duration::from_millis(500),
            call_timeout: Duration::from_millis(500),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_missing_executable_is_spawn_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("does-not-exist");

        let err = bootstrap(&path).await.unwrap_err();
        assert!(matches!(err, BootstrapError::Spawn { .. }));
        assert_eq!(err.path(), path.as_path());
    }

    #[tokio::test]
    async fn test_non_executable_is_spawn_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_script(temp_dir.path(), "plain", "exit 0", 0o644);

        let err = bootstrap(&path).await.unwrap_err();
        assert!(matches!(err, BootstrapError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_immediate_exit_is_handshake_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_script(temp_dir.path(), "exits", "exit 3", 0o755);

        let err = Bootstrapper::new(Arc::default(), fast_options())
            .bootstrap(&path)
            .await
            .unwrap_err();
        match err {
            BootstrapError::Handshake {
                source: HandshakeError::ProcessExited { status },
                ..
            } => assert!(status.contains('3'), "status was {status}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_garbage_handshake_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_script(temp_dir.path(), "chatty", "echo hello; exec sleep 30", 0o755);

        let err = Bootstrapper::new(Arc::default(), fast_options())
            .bootstrap(&path)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BootstrapError::Handshake {
                source: HandshakeError::Malformed(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_silent_process_times_out() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_script(temp_dir.path(), "silent", "exec sleep 30", 0o755);

        let err = Bootstrapper::new(Arc::default(), fast_options())
            .bootstrap(&path)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BootstrapError::Handshake {
                source: HandshakeError::Timeout(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_dispense_refused() {
        let temp_dir = TempDir::new().unwrap();
        let body = r#"echo '1|1|stdio|jsonrpc'
read line
echo '{"id":1,"error":{"code":-32001,"message":"unknown service"}}'
exec sleep 30"#;
        let path = write_script(temp_dir.path(), "refuses", body, 0o755);

        let err = Bootstrapper::new(Arc::default(), fast_options())
            .bootstrap(&path)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BootstrapError::Dispense {
                source: DispenseFailure::NotOffered(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unregistered_service_is_dispense_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_script(
            temp_dir.path(),
            "handshake-only",
            "echo '1|1|stdio|jsonrpc'; exec sleep 30",
            0o755,
        );

        let registry = Arc::new(PluginRegistry::builder().build());
        let err = Bootstrapper::new(registry, fast_options())
            .bootstrap(&path)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BootstrapError::Dispense {
                source: DispenseFailure::NotRegistered,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_missing_methods_is_capability_mismatch() {
        let temp_dir = TempDir::new().unwrap();
        let body = r#"echo '1|1|stdio|jsonrpc'
read line
echo '{"id":1,"result":{"service":"scheme","methods":["get_name"]}}'
exec sleep 30"#;
        let path = write_script(temp_dir.path(), "partial", body, 0o755);

        let err = Bootstrapper::new(Arc::default(), fast_options())
            .bootstrap(&path)
            .await
            .unwrap_err();
        match err {
            BootstrapError::CapabilityMismatch {
                service, missing, ..
            } => {
                assert_eq!(service, "scheme");
                assert_eq!(missing, vec!["get_supported_media_types", "synth_sw_attributes"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_kill_leaves_no_process_behind() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_script(
            temp_dir.path(),
            "lingering",
            "echo '1|1|stdio|jsonrpc'; exec sleep 30",
            0o755,
        );

        let (mut process, _stdin, _stdout) = PluginProcess::spawn(&path, &fast_options())
            .await
            .unwrap();
        let pid = process.id().unwrap();
        process.kill().await;

        // The script replaced itself with `sleep`, so its pid is the only process.
        assert!(!Path::new(&format!("/proc/{pid}")).exists());
    }

    #[test]
    fn test_error_messages_name_the_path() {
        let err = BootstrapError::CapabilityMismatch {
            path: PathBuf::from("/plugins/psa"),
            service: "scheme".to_string(),
            missing: vec!["get_name".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "plugin /plugins/psa does not provide an implementation of the scheme interface (missing: get_name)"
        );
    }
}
