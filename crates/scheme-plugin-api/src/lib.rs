//! # scheme-plugin-api
//!
//! Out-of-process attestation scheme plugins.
//!
//! A scheme knows how to interpret evidence for one attestation format. Each
//! scheme is built as its own executable; the host launches it, checks the
//! handshake, dispenses the `scheme` service and verifies that the dispensed
//! object answers every method of the [`Scheme`] interface before handing a
//! [`SchemePlugin`] to the caller.
//!
//! ## Host side
//!
//! ```no_run
//! # async fn run() -> Result<(), scheme_plugin_api::BootstrapError> {
//! let plugin = scheme_plugin_api::bootstrap("/usr/libexec/veraison/scheme-psa").await?;
//! println!("{} decodes {:?}", plugin.name(), plugin.supported_media_types());
//! plugin.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Plugin side
//!
//! A plugin binary wraps its [`Scheme`] implementation in a [`SchemeService`]
//! and hands it to a [`PluginServer`].

pub mod host;
pub mod loader;
pub mod logging;
pub mod plugin;
pub mod registry;
pub mod scheme;
pub mod server;

pub use host::{bootstrap, BootstrapError, BootstrapOptions, Bootstrapper, DispenseFailure};
pub use loader::{LoadReport, LoaderError, SchemeLoader};
pub use logging::init_plugin_logging;
pub use plugin::{RemoteScheme, SchemePlugin};
pub use registry::{PluginRegistry, PluginRegistryBuilder, ServiceDescriptor};
pub use scheme::{
    ClassAttributes, HashEntry, Measurement, MeasurementKey, MeasurementKeyValue, MeasurementValue,
    PsaRefValId, Scheme, SchemeDescriptor, SchemeError, SchemeResult, SwAttributes, SynthRequest,
    SCHEME_SERVICE,
};
pub use server::{PluginServer, SchemeService, ServeError, ServiceHandler};

pub use scheme_runtime::{HandshakeConfig, HANDSHAKE};
