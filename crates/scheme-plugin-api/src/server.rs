//! Plugin-side server.
//!
//! A plugin binary builds a [`PluginServer`] with the services it offers and
//! calls [`PluginServer::run`] from `main`. The server refuses to start when
//! it was not launched by a host presenting the expected cookie, announces
//! the handshake line, then answers requests until the host closes stdin.

use crate::scheme::{scheme_capabilities, Scheme, SchemeError, SynthRequest};
use async_trait::async_trait;
use scheme_runtime::protocol::{
    RpcErrorObject, INVALID_PARAMS, METHOD_NOT_FOUND, PARSE_ERROR, SERVICE_ERROR,
    SERVICE_NOT_OFFERED,
};
use scheme_runtime::{
    DispenseReply, DispenseRequest, FrameError, HandshakeConfig, LineReader, RpcRequest,
    RpcResponse, DISPENSE_METHOD, MAX_FRAME_LEN,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::process::ExitCode;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, warn};

const NOT_LAUNCHED_BY_HOST: &str = "This binary is a scheme plugin. It is not meant to be \
executed directly; run the host service that loads it instead.";

/// Errors that stop a plugin server.
#[derive(Error, Debug)]
pub enum ServeError {
    /// The magic cookie in the environment is missing or wrong.
    #[error("magic cookie {key} missing or mismatched")]
    CookieMismatch { key: &'static str },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A service a plugin can dispense.
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    /// Methods advertised in the dispense reply.
    fn methods(&self) -> Vec<String>;

    /// Answer one method call.
    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcErrorObject>;
}

/// Exposes any [`Scheme`] as the `scheme` service.
pub struct SchemeService<S> {
    scheme: S,
}

impl<S: Scheme> SchemeService<S> {
    pub fn new(scheme: S) -> Self {
        Self { scheme }
    }
}

#[async_trait]
impl<S: Scheme> ServiceHandler for SchemeService<S> {
    fn methods(&self) -> Vec<String> {
        scheme_capabilities().method_names()
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcErrorObject> {
        match method {
            "get_name" => encode(self.scheme.get_name().await),
            "get_supported_media_types" => encode(self.scheme.get_supported_media_types().await),
            "synth_sw_attributes" => {
                let request: SynthRequest = decode_params(params)?;
                encode(
                    self.scheme
                        .synth_sw_attributes(&request.class, &request.measurements)
                        .await,
                )
            }
            other => Err(method_not_found(other)),
        }
    }
}

/// Decode call params, mapping failures to an invalid-params error.
pub fn decode_params<T: DeserializeOwned>(params: Value) -> Result<T, RpcErrorObject> {
    serde_json::from_value(params).map_err(|e| RpcErrorObject {
        code: INVALID_PARAMS,
        message: format!("invalid params: {e}"),
    })
}

/// Encode a scheme result as a response payload.
pub fn encode<T: Serialize>(result: Result<T, SchemeError>) -> Result<Value, RpcErrorObject> {
    let value = result.map_err(|e| RpcErrorObject {
        code: SERVICE_ERROR,
        message: e.to_string(),
    })?;
    serde_json::to_value(value).map_err(|e| RpcErrorObject {
        code: SERVICE_ERROR,
        message: e.to_string(),
    })
}

pub fn method_not_found(method: &str) -> RpcErrorObject {
    RpcErrorObject {
        code: METHOD_NOT_FOUND,
        message: format!("unknown method {method:?}"),
    }
}

async fn write_frame<W>(writer: &mut W, response: &RpcResponse) -> Result<(), ServeError>
where
    W: AsyncWrite + Unpin,
{
    let mut frame = serde_json::to_vec(response)?;
    frame.push(b'\n');
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Serves dispensable services over stdin/stdout.
pub struct PluginServer {
    handshake: HandshakeConfig,
    services: HashMap<String, Arc<dyn ServiceHandler>>,
    max_frame_len: usize,
}

impl PluginServer {
    pub fn new(handshake: HandshakeConfig) -> Self {
        Self {
            handshake,
            services: HashMap::new(),
            max_frame_len: MAX_FRAME_LEN,
        }
    }

    /// Cap on the length of one request line. Longer requests are answered
    /// with a parse error and skipped.
    pub fn max_frame_len(mut self, max: usize) -> Self {
        self.max_frame_len = max;
        self
    }

    /// Offer `handler` under `name`.
    pub fn service<H>(mut self, name: impl Into<String>, handler: H) -> Self
    where
        H: ServiceHandler + 'static,
    {
        self.services.insert(name.into(), Arc::new(handler));
        self
    }

    /// Check the cookie the host is expected to have set.
    pub fn check_cookie(&self) -> Result<(), ServeError> {
        let value = std::env::var(self.handshake.magic_cookie_key).ok();
        if self.handshake.cookie_matches(value.as_deref()) {
            Ok(())
        } else {
            Err(ServeError::CookieMismatch {
                key: self.handshake.magic_cookie_key,
            })
        }
    }

    /// Serve on the process's stdio until the host disconnects.
    pub async fn serve(self) -> Result<(), ServeError> {
        self.check_cookie()?;
        self.serve_on(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Entry point for plugin `main` functions.
    pub async fn run(self) -> ExitCode {
        match self.serve().await {
            Ok(()) => ExitCode::SUCCESS,
            Err(ServeError::CookieMismatch { .. }) => {
                eprintln!("{NOT_LAUNCHED_BY_HOST}");
                ExitCode::from(1)
            }
            Err(e) => {
                error!(error = %e, "Plugin server failed");
                ExitCode::FAILURE
            }
        }
    }

    /// Announce the handshake on `writer`, then answer requests read from
    /// `reader` until it reaches EOF.
    pub async fn serve_on<R, W>(self, reader: R, mut writer: W) -> Result<(), ServeError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let announce = format!("{}\n", self.handshake.announce());
        writer.write_all(announce.as_bytes()).await?;
        writer.flush().await?;
        info!(services = ?self.services.keys().collect::<Vec<_>>(), "Plugin serving");

        let mut dispensed = HashSet::new();
        let mut reader = LineReader::new(reader, self.max_frame_len);
        loop {
            let line = match reader.next_frame().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(FrameError::TooLong { max }) => {
                    warn!(max, "Request frame too long");
                    let message = format!("request exceeds {max} bytes");
                    write_frame(&mut writer, &RpcResponse::failure(0, PARSE_ERROR, message))
                        .await?;
                    continue;
                }
                Err(FrameError::Io(e)) => return Err(e.into()),
            };
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let response = match serde_json::from_slice::<RpcRequest>(&line) {
                Ok(request) => self.handle(request, &mut dispensed).await,
                Err(e) => {
                    warn!(error = %e, "Unparseable request");
                    RpcResponse::failure(0, PARSE_ERROR, e.to_string())
                }
            };
            write_frame(&mut writer, &response).await?;
        }

        info!("Host closed the connection");
        Ok(())
    }

    async fn handle(&self, request: RpcRequest, dispensed: &mut HashSet<String>) -> RpcResponse {
        debug!(id = request.id, method = %request.method, "Handling request");

        if request.method == DISPENSE_METHOD {
            return self.dispense(request, dispensed);
        }

        let Some((service, method)) = request.method.split_once('.') else {
            return RpcResponse::failure(
                request.id,
                METHOD_NOT_FOUND,
                format!("unknown method {:?}", request.method),
            );
        };

        let handler = match self.services.get(service) {
            Some(handler) if dispensed.contains(service) => handler,
            _ => {
                return RpcResponse::failure(
                    request.id,
                    METHOD_NOT_FOUND,
                    format!("service {service:?} has not been dispensed"),
                )
            }
        };

        match handler.call(method, request.params).await {
            Ok(result) => RpcResponse::success(request.id, result),
            Err(error) => RpcResponse {
                id: request.id,
                result: None,
                error: Some(error),
            },
        }
    }

    fn dispense(&self, request: RpcRequest, dispensed: &mut HashSet<String>) -> RpcResponse {
        let params: DispenseRequest = match decode_params(request.params) {
            Ok(params) => params,
            Err(error) => {
                return RpcResponse {
                    id: request.id,
                    result: None,
                    error: Some(error),
                }
            }
        };

        let Some(handler) = self.services.get(&params.service) else {
            return RpcResponse::failure(
                request.id,
                SERVICE_NOT_OFFERED,
                format!("unknown service {:?}", params.service),
            );
        };

        let reply = DispenseReply {
            service: params.service.clone(),
            methods: handler.methods(),
        };
        dispensed.insert(params.service);

        match serde_json::to_value(reply) {
            Ok(value) => RpcResponse::success(request.id, value),
            Err(e) => RpcResponse::failure(request.id, SERVICE_ERROR, e.to_string()),
        }
    }
}
