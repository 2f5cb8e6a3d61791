//! Logging across the process boundary.
//!
//! Plugins log JSON records to stderr; the host reads each line back and
//! re-emits it through its own subscriber, tagged with the plugin path.

use serde::Deserialize;
use serde_json::{Map, Value};
use scheme_runtime::{FrameError, LineReader};
use tokio::io::AsyncRead;
use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::EnvFilter;

/// Install the subscriber a plugin binary should log through.
///
/// Records go to stderr as JSON; stdout is reserved for the protocol.
pub fn init_plugin_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}

#[derive(Debug, Deserialize)]
struct PluginRecord {
    level: String,
    #[serde(default)]
    target: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

impl PluginRecord {
    fn message(&self) -> String {
        match self.fields.get("message") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }

    /// Fields other than the message, rendered `key=value`.
    fn extra_fields(&self) -> String {
        self.fields
            .iter()
            .filter(|(k, _)| k.as_str() != "message")
            .map(|(k, v)| match v {
                Value::String(s) => format!("{k}={s}"),
                other => format!("{k}={other}"),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Longest stderr line re-emitted; longer lines are dropped.
const MAX_LOG_LINE: usize = 64 * 1024;

/// Forward a plugin's stderr into the host's tracing output until EOF.
///
/// Bytes that are not UTF-8 are replaced rather than ending the stream, so
/// the pipe keeps draining for as long as the plugin writes to it. Returns
/// the number of lines read.
pub(crate) async fn forward_plugin_logs<R>(stderr: R, plugin: String) -> usize
where
    R: AsyncRead + Unpin,
{
    let mut reader = LineReader::new(stderr, MAX_LOG_LINE);
    let mut forwarded = 0;
    loop {
        match reader.next_frame().await {
            Ok(Some(line)) => {
                forward_line(&plugin, &String::from_utf8_lossy(&line));
                forwarded += 1;
            }
            Ok(None) => break,
            Err(FrameError::TooLong { max }) => {
                debug!(plugin = %plugin, max, "Dropped overlong plugin log line");
            }
            Err(FrameError::Io(e)) => {
                debug!(plugin = %plugin, error = %e, "Plugin stderr closed");
                break;
            }
        }
    }
    forwarded
}

fn forward_line(plugin: &str, line: &str) {
    let line = line.trim_end();
    if line.is_empty() {
        return;
    }

    let Ok(record) = serde_json::from_str::<PluginRecord>(line) else {
        debug!(plugin = %plugin, "{}", line);
        return;
    };

    let message = record.message();
    let fields = record.extra_fields();
    let source_target = record.target.as_str();
    match record.level.to_ascii_uppercase().as_str() {
        "ERROR" => error!(plugin = %plugin, source_target, fields = %fields, "{}", message),
        "WARN" => warn!(plugin = %plugin, source_target, fields = %fields, "{}", message),
        "INFO" => info!(plugin = %plugin, source_target, fields = %fields, "{}", message),
        "DEBUG" => debug!(plugin = %plugin, source_target, fields = %fields, "{}", message),
        _ => trace!(plugin = %plugin, source_target, fields = %fields, "{}", message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_parse_plugin_record() {
        let line = r#"{"timestamp":"2026-01-01T00:00:00Z","level":"WARN","fields":{"message":"Scheme declares no media types","count":0},"target":"scheme_psa"}"#;
        let record: PluginRecord = serde_json::from_str(line).unwrap();

        assert_eq!(record.level, "WARN");
        assert_eq!(record.target, "scheme_psa");
        assert_eq!(record.message(), "Scheme declares no media types");
        assert_eq!(record.extra_fields(), "count=0");
    }

    #[test]
    fn test_plain_lines_are_not_records() {
        assert!(serde_json::from_str::<PluginRecord>("panicked at src/main.rs:10").is_err());
        assert!(serde_json::from_str::<PluginRecord>(r#"{"msg":"no level"}"#).is_err());
    }

    #[tokio::test]
    async fn test_forward_reads_until_eof() {
        let input: &[u8] = b"{\"level\":\"INFO\",\"fields\":{\"message\":\"ready\"}}\nplain text\n\n";
        let forwarded = forward_plugin_logs(input, "/plugins/test".to_string()).await;
        assert_eq!(forwarded, 3);
    }

    #[tokio::test]
    async fn test_forward_survives_invalid_utf8() {
        let mut input = b"first line\n\xff\xfe bad bytes\n".to_vec();
        for i in 0..1000 {
            input.extend_from_slice(format!("line {i}\n").as_bytes());
        }

        let forwarded = forward_plugin_logs(input.as_slice(), "/plugins/test".to_string()).await;
        assert_eq!(forwarded, 1002);
    }

    #[tokio::test]
    async fn test_forward_skips_overlong_lines() {
        let mut input = vec![b'x'; MAX_LOG_LINE + 10];
        input.extend_from_slice(b"\nafter\n");

        let forwarded = forward_plugin_logs(input.as_slice(), "/plugins/test".to_string()).await;
        assert_eq!(forwarded, 1);
    }

    #[tokio::test]
    async fn test_forward_keeps_pipe_drained() {
        // A writer that outlives a bad line must never block on a full pipe.
        let (reader, mut writer) = tokio::io::duplex(256);
        let forwarder = tokio::spawn(forward_plugin_logs(reader, "/plugins/test".to_string()));

        writer.write_all(b"\xc3\x28 not utf-8\n").await.unwrap();
        for i in 0..2000 {
            writer
                .write_all(format!("record {i}\n").as_bytes())
                .await
                .unwrap();
        }
        drop(writer);

        let forwarded = tokio::time::timeout(std::time::Duration::from_secs(5), forwarder)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(forwarded, 2001);
    }
}
