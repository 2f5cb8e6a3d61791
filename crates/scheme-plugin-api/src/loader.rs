//! Loading every scheme plugin found in a directory.

use crate::host::{BootstrapError, Bootstrapper};
use crate::plugin::SchemePlugin;
use scheme_runtime::{discover_executables, RuntimeError};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Reasons a bootstrapped plugin was not admitted.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("plugin discovery failed: {0}")]
    Discovery(#[from] RuntimeError),

    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    /// Another plugin already registered this scheme name.
    #[error(
        "scheme {name:?} from {} is already provided by {}",
        path.display(),
        existing.display()
    )]
    DuplicateName {
        name: String,
        path: PathBuf,
        existing: PathBuf,
    },

    /// Another scheme already claims this media type.
    #[error(
        "media type {media_type:?} of scheme {name:?} is already handled by scheme {existing:?}"
    )]
    MediaTypeConflict {
        media_type: String,
        name: String,
        existing: String,
    },
}

/// Outcome of [`SchemeLoader::load_dir`].
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Names of schemes admitted by this call.
    pub loaded: Vec<String>,
    /// Executables that were rejected, with the reason.
    pub failed: Vec<(PathBuf, String)>,
}

/// Owns the bootstrapped scheme plugins and indexes them by name and media
/// type.
pub struct SchemeLoader {
    bootstrapper: Arc<Bootstrapper>,
    plugins: BTreeMap<String, SchemePlugin>,
    by_media_type: HashMap<String, String>,
}

impl SchemeLoader {
    pub fn new(bootstrapper: Bootstrapper) -> Self {
        Self {
            bootstrapper: Arc::new(bootstrapper),
            plugins: BTreeMap::new(),
            by_media_type: HashMap::new(),
        }
    }

    /// Bootstrap every executable in `dir` concurrently and admit the ones
    /// that succeed. Individual failures are reported, not returned.
    pub async fn load_dir(&mut self, dir: &Path) -> Result<LoadReport, LoaderError> {
        let executables = discover_executables(dir)?;
        info!(dir = %dir.display(), count = executables.len(), "Loading scheme plugins");

        let mut tasks = JoinSet::new();
        for path in executables {
            let bootstrapper = Arc::clone(&self.bootstrapper);
            tasks.spawn(async move {
                let result = bootstrapper.bootstrap(&path).await;
                (path, result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => error!(error = %e, "Bootstrap task panicked"),
            }
        }
        // Admission order decides which plugin wins a conflict.
        results.sort_by(|a, b| a.0.cmp(&b.0));

        let mut report = LoadReport::default();
        for (path, result) in results {
            let admitted = match result {
                Ok(plugin) => self.register(plugin).await,
                Err(e) => Err(LoaderError::Bootstrap(e)),
            };
            match admitted {
                Ok(name) => report.loaded.push(name),
                Err(e) => {
                    warn!(plugin = %path.display(), error = %e, "Scheme plugin rejected");
                    report.failed.push((path, e.to_string()));
                }
            }
        }

        Ok(report)
    }

    /// Admit an already bootstrapped plugin. On conflict the plugin is shut
    /// down and the error returned.
    pub async fn register(&mut self, plugin: SchemePlugin) -> Result<String, LoaderError> {
        if let Some(conflict) = self.conflict(&plugin) {
            plugin.shutdown().await;
            return Err(conflict);
        }

        let name = plugin.name().to_string();
        for media_type in plugin.supported_media_types() {
            self.by_media_type.insert(media_type.clone(), name.clone());
        }
        debug!(scheme = %name, plugin = %plugin.path().display(), "Scheme registered");
        self.plugins.insert(name.clone(), plugin);
        Ok(name)
    }

    fn conflict(&self, plugin: &SchemePlugin) -> Option<LoaderError> {
        if let Some(existing) = self.plugins.get(plugin.name()) {
            return Some(LoaderError::DuplicateName {
                name: plugin.name().to_string(),
                path: plugin.path().to_path_buf(),
                existing: existing.path().to_path_buf(),
            });
        }

        plugin.supported_media_types().iter().find_map(|media_type| {
            self.by_media_type
                .get(media_type)
                .map(|existing| LoaderError::MediaTypeConflict {
                    media_type: media_type.clone(),
                    name: plugin.name().to_string(),
                    existing: existing.clone(),
                })
        })
    }

    pub fn by_name(&self, name: &str) -> Option<&SchemePlugin> {
        self.plugins.get(name)
    }

    /// The scheme that decodes `media_type`, if any.
    pub fn by_media_type(&self, media_type: &str) -> Option<&SchemePlugin> {
        self.by_media_type
            .get(media_type)
            .and_then(|name| self.plugins.get(name))
    }

    /// Loaded scheme names, sorted.
    pub fn scheme_names(&self) -> Vec<&str> {
        self.plugins.keys().map(|s| s.as_str()).collect()
    }

    /// Every media type served, sorted.
    pub fn media_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.by_media_type.keys().map(|s| s.as_str()).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Shut every plugin down and empty the loader.
    pub async fn shutdown_all(&mut self) {
        self.by_media_type.clear();
        let plugins = std::mem::take(&mut self.plugins);
        info!(count = plugins.len(), "Shutting down scheme plugins");

        let mut tasks = JoinSet::new();
        for plugin in plugins.into_values() {
            tasks.spawn(plugin.shutdown());
        }
        while tasks.join_next().await.is_some() {}
    }
}

impl std::fmt::Debug for SchemeLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemeLoader")
            .field("schemes", &self.scheme_names())
            .field("media_types", &self.media_types())
            .finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_dir_is_discovery_error() {
        let temp_dir = TempDir::new().unwrap();
        let mut loader = SchemeLoader::new(Bootstrapper::default());

        let err = loader
            .load_dir(&temp_dir.path().join("absent"))
            .await
            .unwrap_err();
        assert!(matches!(err, LoaderError::Discovery(RuntimeError::PluginNotFound(_))));
    }

    #[tokio::test]
    async fn test_failures_are_reported() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken");
        std::fs::write(&path, "#!/bin/sh\nexit 1\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        // Not executable, so discovery skips it.
        std::fs::write(temp_dir.path().join("README"), "docs").unwrap();

        let mut loader = SchemeLoader::new(Bootstrapper::default());
        let report = loader.load_dir(temp_dir.path()).await.unwrap();

        assert!(report.loaded.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, path);
        assert!(loader.is_empty());
        assert!(loader.by_media_type("application/psa-attestation-token").is_none());
    }
}
