//! # scheme-psa
//!
//! The PSA IoT attestation scheme.
//!
//! Turns PSA reference-value measurements into the software-component
//! attributes the verifier stores. The binary in this crate serves the
//! scheme to a host over the plugin protocol.

use async_trait::async_trait;
use scheme_plugin_api::{
    ClassAttributes, Measurement, Scheme, SchemeError, SchemeResult, SwAttributes,
};
use tracing::debug;

/// Scheme name reported to the host.
pub const SCHEME_NAME: &str = "PSA_IOT";

/// Evidence formats this scheme decodes.
pub const SUPPORTED_MEDIA_TYPES: [&str; 2] = [
    "application/psa-attestation-token",
    r#"application/eat-cwt; profile="http://arm.com/psa/2.0.0""#,
];

/// Software-component attributes extracted from one measurement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PsaSwCompAttributes {
    pub measurement_type: String,
    pub version: String,
    pub signer_id: Vec<u8>,
    pub alg_id: u64,
    pub measurement_value: Vec<u8>,
}

impl PsaSwCompAttributes {
    /// Extract the attributes from a measurement.
    pub fn from_measurement(m: &Measurement) -> SchemeResult<Self> {
        let key = m
            .key
            .as_ref()
            .ok_or_else(|| invalid("measurement key is not present"))?;

        if !key.is_set() {
            return Err(invalid("measurement key is not set"));
        }

        let id = key
            .psa_ref_val_id()
            .map_err(|e| invalid(format!("failed extracting psa-swcomp-id: {e}")))?;

        let digests = m
            .val
            .digests
            .as_ref()
            .ok_or_else(|| invalid("measurement value has no digests"))?;

        let [digest] = digests.as_slice() else {
            return Err(invalid("expecting exactly one digest"));
        };

        Ok(Self {
            measurement_type: id.label.clone().unwrap_or_default(),
            version: id.version.clone().unwrap_or_default(),
            signer_id: id.signer_id.clone(),
            alg_id: digest.hash_alg_id,
            measurement_value: digest.hash_value.clone(),
        })
    }

    /// Build the attribute map for this component of hardware `class`.
    pub fn make_sw_attrs(&self, class: &ClassAttributes) -> SwAttributes {
        let mut attrs = SwAttributes::new();
        attrs.insert_bytes("psa.impl-id", &class.impl_id);
        attrs.insert_bytes("psa.signer-id", &self.signer_id);
        attrs.insert_bytes("psa.measurement-value", &self.measurement_value);
        attrs.insert("psa.measurement-desc", self.alg_id);

        attrs.insert_non_empty("psa.hw-vendor", &class.vendor);
        attrs.insert_non_empty("psa.hw-model", &class.model);
        attrs.insert_non_empty("psa.measurement-type", &self.measurement_type);
        attrs.insert_non_empty("psa.version", &self.version);
        attrs
    }
}

fn invalid(message: impl Into<String>) -> SchemeError {
    SchemeError::InvalidMeasurement(message.into())
}

/// The PSA IoT scheme.
#[derive(Debug, Clone, Copy, Default)]
pub struct PsaScheme;

#[async_trait]
impl Scheme for PsaScheme {
    async fn get_name(&self) -> SchemeResult<String> {
        Ok(SCHEME_NAME.to_string())
    }

    async fn get_supported_media_types(&self) -> SchemeResult<Vec<String>> {
        Ok(SUPPORTED_MEDIA_TYPES.iter().map(|s| s.to_string()).collect())
    }

    async fn synth_sw_attributes(
        &self,
        class: &ClassAttributes,
        measurements: &[Measurement],
    ) -> SchemeResult<Vec<SwAttributes>> {
        debug!(count = measurements.len(), "Synthesizing PSA software attributes");
        measurements
            .iter()
            .map(|m| PsaSwCompAttributes::from_measurement(m).map(|a| a.make_sw_attrs(class)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheme_plugin_api::{
        HashEntry, MeasurementKey, MeasurementKeyValue, MeasurementValue, PsaRefValId,
    };
    use serde_json::json;

    fn measurement(
        label: Option<&str>,
        version: Option<&str>,
        digests: Option<Vec<HashEntry>>,
    ) -> Measurement {
        Measurement {
            key: Some(MeasurementKey {
                value: Some(MeasurementKeyValue::PsaRefValId(PsaRefValId {
                    label: label.map(String::from),
                    version: version.map(String::from),
                    signer_id: vec![0xac, 0xbb],
                })),
            }),
            val: MeasurementValue { digests },
        }
    }

    fn sha256(value: &[u8]) -> HashEntry {
        HashEntry {
            hash_alg_id: 1,
            hash_value: value.to_vec(),
        }
    }

    fn class() -> ClassAttributes {
        ClassAttributes {
            impl_id: vec![0x61, 0x63, 0x6d, 0x65],
            vendor: "ACME".to_string(),
            model: "RoadRunner".to_string(),
        }
    }

    fn error_message(m: &Measurement) -> String {
        match PsaSwCompAttributes::from_measurement(m) {
            Err(SchemeError::InvalidMeasurement(msg)) => msg,
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_from_measurement() {
        let m = measurement(Some("BL"), Some("2.1.0"), Some(vec![sha256(&[0x01, 0x02])]));
        let attrs = PsaSwCompAttributes::from_measurement(&m).unwrap();

        assert_eq!(attrs.measurement_type, "BL");
        assert_eq!(attrs.version, "2.1.0");
        assert_eq!(attrs.signer_id, vec![0xac, 0xbb]);
        assert_eq!(attrs.alg_id, 1);
        assert_eq!(attrs.measurement_value, vec![0x01, 0x02]);
    }

    #[test]
    fn test_measurement_errors() {
        let mut m = measurement(None, None, Some(vec![sha256(&[0x01])]));

        m.key = None;
        assert_eq!(error_message(&m), "measurement key is not present");

        m.key = Some(MeasurementKey::default());
        assert_eq!(error_message(&m), "measurement key is not set");

        m.key = Some(MeasurementKey {
            value: Some(MeasurementKeyValue::Uuid(
                "31fb5abf-023e-4992-aa4e-95f9c1503bfa".to_string(),
            )),
        });
        assert!(error_message(&m).starts_with("failed extracting psa-swcomp-id"));

        let m = measurement(None, None, None);
        assert_eq!(error_message(&m), "measurement value has no digests");

        let m = measurement(None, None, Some(vec![]));
        assert_eq!(error_message(&m), "expecting exactly one digest");

        let m = measurement(None, None, Some(vec![sha256(&[0x01]), sha256(&[0x02])]));
        assert_eq!(error_message(&m), "expecting exactly one digest");
    }

    #[test]
    fn test_make_sw_attrs_full() {
        let m = measurement(Some("BL"), Some("2.1.0"), Some(vec![sha256(&[0x01, 0x02])]));
        let attrs = PsaSwCompAttributes::from_measurement(&m)
            .unwrap()
            .make_sw_attrs(&class());

        assert_eq!(
            serde_json::to_value(&attrs).unwrap(),
            json!({
                "psa.impl-id": "YWNtZQ==",
                "psa.signer-id": "rLs=",
                "psa.measurement-value": "AQI=",
                "psa.measurement-desc": 1,
                "psa.hw-vendor": "ACME",
                "psa.hw-model": "RoadRunner",
                "psa.measurement-type": "BL",
                "psa.version": "2.1.0"
            })
        );
    }

    #[test]
    fn test_make_sw_attrs_omits_empty_optionals() {
        let m = measurement(None, None, Some(vec![sha256(&[0x01])]));
        let class = ClassAttributes {
            impl_id: vec![0x00],
            ..Default::default()
        };
        let attrs = PsaSwCompAttributes::from_measurement(&m)
            .unwrap()
            .make_sw_attrs(&class);

        assert_eq!(attrs.len(), 4);
        for key in ["psa.hw-vendor", "psa.hw-model", "psa.measurement-type", "psa.version"] {
            assert!(!attrs.contains_key(key), "{key} should be absent");
        }
    }

    #[tokio::test]
    async fn test_scheme_metadata() {
        let scheme = PsaScheme;
        assert_eq!(scheme.get_name().await.unwrap(), "PSA_IOT");
        assert_eq!(
            scheme.get_supported_media_types().await.unwrap(),
            vec![
                "application/psa-attestation-token",
                "application/eat-cwt; profile=\"http://arm.com/psa/2.0.0\"",
            ]
        );
    }

    #[tokio::test]
    async fn test_synth_fails_on_first_bad_measurement() {
        let good = measurement(None, None, Some(vec![sha256(&[0x01])]));
        let bad = measurement(None, None, None);

        let attrs = PsaScheme
            .synth_sw_attributes(&class(), &[good.clone(), good.clone()])
            .await
            .unwrap();
        assert_eq!(attrs.len(), 2);

        let err = PsaScheme
            .synth_sw_attributes(&class(), &[good, bad])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("has no digests"));
    }
}
