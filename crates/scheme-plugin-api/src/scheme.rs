//! The capability interface every scheme plugin implements.
//!
//! The same trait is implemented by concrete schemes inside plugin binaries
//! and by [`RemoteScheme`](crate::plugin::RemoteScheme) on the host, which
//! forwards every call over the plugin connection.

use crate::registry::ServiceDescriptor;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use scheme_runtime::{Capability, CapabilitySet, RpcError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Name under which plugins offer their scheme implementation.
pub const SCHEME_SERVICE: &str = "scheme";

/// Errors returned by scheme operations.
#[derive(Error, Debug)]
pub enum SchemeError {
    /// The measurement handed to the scheme cannot be interpreted.
    #[error("invalid measurement: {0}")]
    InvalidMeasurement(String),

    /// Identity or media-type metadata is unusable.
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    /// The plugin reported a failure while serving the call.
    #[error("plugin error: {0}")]
    Plugin(String),

    /// The call never completed.
    #[error(transparent)]
    Rpc(RpcError),
}

impl From<RpcError> for SchemeError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Remote { message, .. } => SchemeError::Plugin(message),
            other => SchemeError::Rpc(other),
        }
    }
}

/// Result type for scheme operations.
pub type SchemeResult<T> = std::result::Result<T, SchemeError>;

/// An attestation scheme.
#[async_trait]
pub trait Scheme: Send + Sync {
    /// Self-reported identity of the scheme.
    async fn get_name(&self) -> SchemeResult<String>;

    /// Media types of evidence the scheme can decode, in preference order.
    async fn get_supported_media_types(&self) -> SchemeResult<Vec<String>>;

    /// Build software-component attributes from reference measurements.
    async fn synth_sw_attributes(
        &self,
        class: &ClassAttributes,
        measurements: &[Measurement],
    ) -> SchemeResult<Vec<SwAttributes>>;
}

/// Methods a dispensed `scheme` object must answer.
pub fn scheme_capabilities() -> CapabilitySet {
    [
        Capability::GetName,
        Capability::GetSupportedMediaTypes,
        Capability::SynthSwAttributes,
    ]
    .into_iter()
    .collect()
}

/// Registry entry for the `scheme` service.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemeDescriptor;

impl ServiceDescriptor for SchemeDescriptor {
    fn required_capabilities(&self) -> CapabilitySet {
        scheme_capabilities()
    }
}

/// Params of `scheme.synth_sw_attributes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthRequest {
    pub class: ClassAttributes,
    pub measurements: Vec<Measurement>,
}

/// Identifying attributes of the hardware class a measurement belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassAttributes {
    #[serde(with = "b64")]
    pub impl_id: Vec<u8>,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub model: String,
}

/// One reference measurement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Measurement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<MeasurementKey>,
    #[serde(default)]
    pub val: MeasurementValue,
}

/// Identifies what was measured. A key may be present but not set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementKey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<MeasurementKeyValue>,
}

/// The typed content of a measurement key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum MeasurementKeyValue {
    PsaRefValId(PsaRefValId),
    Uuid(String),
    Oid(String),
}

impl MeasurementKey {
    pub fn is_set(&self) -> bool {
        self.value.is_some()
    }

    /// The PSA software component id carried by this key.
    pub fn psa_ref_val_id(&self) -> SchemeResult<&PsaRefValId> {
        match &self.value {
            Some(MeasurementKeyValue::PsaRefValId(id)) => Ok(id),
            Some(other) => Err(SchemeError::InvalidMeasurement(format!(
                "key is not a psa.refval-id: {other:?}"
            ))),
            None => Err(SchemeError::InvalidMeasurement(
                "measurement key is not set".to_string(),
            )),
        }
    }
}

/// PSA software component identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PsaRefValId {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(with = "b64")]
    pub signer_id: Vec<u8>,
}

/// Measured values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digests: Option<Vec<HashEntry>>,
}

/// A digest tagged with its IANA hash algorithm id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashEntry {
    pub hash_alg_id: u64,
    #[serde(with = "b64")]
    pub hash_value: Vec<u8>,
}

/// Software-component attributes as a generic key/value map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SwAttributes(pub Map<String, Value>);

impl SwAttributes {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Byte strings are carried as standard base64 text.
    pub fn insert_bytes(&mut self, key: impl Into<String>, bytes: &[u8]) {
        self.0.insert(key.into(), Value::String(STANDARD.encode(bytes)));
    }

    /// Insert only when `value` is non-empty.
    pub fn insert_non_empty(&mut self, key: impl Into<String>, value: &str) {
        if !value.is_empty() {
            self.insert(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
