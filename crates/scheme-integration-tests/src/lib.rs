//! Fixture plugins for end-to-end bootstrap tests.
//!
//! Each binary under `src/bin` is a small plugin that either conforms to the
//! protocol or breaks it in one specific way. Tests locate them through
//! `CARGO_BIN_EXE_<name>`.

use async_trait::async_trait;
use scheme_plugin_api::{
    ClassAttributes, Measurement, Scheme, SchemeError, SchemeResult, SwAttributes,
};

/// Overrides the name reported by the `conformant-scheme` fixture.
pub const NAME_ENV: &str = "TEST_SCHEME_NAME";
/// Comma-separated media types for the `conformant-scheme` fixture.
pub const MEDIA_TYPES_ENV: &str = "TEST_SCHEME_MEDIA_TYPES";

pub const DEFAULT_NAME: &str = "test-scheme";
pub const DEFAULT_MEDIA_TYPE: &str = "application/vnd.test+json";

/// A scheme with fixed metadata that echoes class attributes back.
#[derive(Debug, Clone)]
pub struct TestScheme {
    name: String,
    media_types: Vec<String>,
}

impl TestScheme {
    pub fn new(name: impl Into<String>, media_types: Vec<String>) -> Self {
        Self {
            name: name.into(),
            media_types,
        }
    }

    /// Metadata from [`NAME_ENV`] and [`MEDIA_TYPES_ENV`], with defaults.
    pub fn from_env() -> Self {
        let name = std::env::var(NAME_ENV).unwrap_or_else(|_| DEFAULT_NAME.to_string());
        let media_types = match std::env::var(MEDIA_TYPES_ENV) {
            Ok(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            Err(_) => vec![DEFAULT_MEDIA_TYPE.to_string()],
        };
        Self::new(name, media_types)
    }
}

#[async_trait]
impl Scheme for TestScheme {
    async fn get_name(&self) -> SchemeResult<String> {
        Ok(self.name.clone())
    }

    async fn get_supported_media_types(&self) -> SchemeResult<Vec<String>> {
        Ok(self.media_types.clone())
    }

    async fn synth_sw_attributes(
        &self,
        class: &ClassAttributes,
        measurements: &[Measurement],
    ) -> SchemeResult<Vec<SwAttributes>> {
        if measurements.is_empty() {
            return Err(SchemeError::InvalidMeasurement(
                "no measurements supplied".to_string(),
            ));
        }

        Ok((0..measurements.len())
            .map(|index| {
                let mut attrs = SwAttributes::new();
                attrs.insert("test.index", index as u64);
                attrs.insert_non_empty("test.vendor", &class.vendor);
                attrs.insert_bytes("test.impl-id", &class.impl_id);
                attrs
            })
            .collect())
    }
}

/// Number of processes whose parent is this process, zombies included.
#[cfg(target_os = "linux")]
pub fn live_children() -> usize {
    let me = std::process::id();
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return 0;
    };

    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| std::fs::read_to_string(entry.path().join("stat")).ok())
        .filter(|stat| parent_pid(stat) == Some(me))
        .count()
}

/// Parent pid from the contents of `/proc/<pid>/stat`.
///
/// The command name is parenthesised and may itself contain spaces or
/// parentheses, so fields are counted from the last `)`.
pub fn parent_pid(stat: &str) -> Option<u32> {
    let rest = stat.get(stat.rfind(')')? + 1..)?;
    rest.split_whitespace().nth(1)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_pid() {
        assert_eq!(parent_pid("4242 (sh) S 17 4242 4242 0 -1"), Some(17));
        assert_eq!(parent_pid("99 (weird) name)) Z 1 99 99"), Some(1));
        assert_eq!(parent_pid("garbage"), None);
    }

    #[tokio::test]
    async fn test_scheme_echoes_class() {
        let scheme = TestScheme::new("t", vec![]);
        let class = ClassAttributes {
            impl_id: vec![0x01],
            vendor: "ACME".to_string(),
            model: String::new(),
        };

        let attrs = scheme
            .synth_sw_attributes(&class, &[Measurement::default(), Measurement::default()])
            .await
            .unwrap();
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs[1].get("test.index"), Some(&1u64.into()));
        assert!(scheme.synth_sw_attributes(&class, &[]).await.is_err());
    }
}
