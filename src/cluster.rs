//! Remote session construction.
//!
//! [`ClusterClient`] turns a pod name and a command (or a port) into a
//! WebSocket session against the cluster API server and wraps it in the
//! matching transport:
//!
//! ```text
//! exec          GET /api/v1/namespaces/{ns}/pods/{pod}/exec?command=..&stdout=true..
//!               -> Process over ExecTransport/ExecStdin
//! port_forward  GET /api/v1/namespaces/{ns}/pods/{pod}/portforward?ports={port}
//!               -> PortForward
//! ```
//!
//! Both offer the `v4.channel.k8s.io` subprotocol and send the configured
//! bearer token.

// Rust guideline compliant 2026-02

use log::info;
use url::Url;

use crate::config::Config;
use crate::constants::CHANNEL_SUBPROTOCOL;
use crate::error::{ProcessError, Result};
use crate::port_forward::PortForward;
use crate::process::Process;
use crate::transport::exec::{ExecStdin, ExecTransport};
use crate::ws;

/// Options for a remote exec session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecOptions {
    /// Attach standard input to the remote command.
    pub stdin: bool,
}

/// Opens exec and port-forward sessions against one cluster.
#[derive(Debug, Clone)]
pub struct ClusterClient {
    config: Config,
}

impl ClusterClient {
    /// Create a client from a loaded configuration.
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// The configuration this client connects with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run `command` in `pod` (optionally in a specific `container`).
    ///
    /// # Errors
    ///
    /// - [`ProcessError::InvalidRequest`] for an empty command or bad server URL
    /// - connection errors from [`ws::connect`]
    pub async fn exec<S: AsRef<str>>(
        &self,
        pod: &str,
        container: Option<&str>,
        command: &[S],
        options: ExecOptions,
    ) -> Result<Process> {
        let url = self.exec_url(pod, container, command, options)?;
        info!(
            "[Exec] Starting {:?} in {}/{pod}",
            command.iter().map(AsRef::as_ref).collect::<Vec<_>>(),
            self.config.namespace
        );
        let (writer, reader) = self.connect(&url).await?;
        Ok(Process::new(
            Box::new(ExecTransport::new(reader)),
            Box::new(ExecStdin::new(writer)),
        )
        .with_read_buffer_size(self.config.read_buffer_size))
    }

    /// Open a forwarded connection to `port` in `pod`.
    pub async fn port_forward(&self, pod: &str, port: u16) -> Result<PortForward> {
        let url = self.port_forward_url(pod, port)?;
        info!("[PortForward] Forwarding to {}/{pod}:{port}", self.config.namespace);
        let (writer, reader) = self.connect(&url).await?;
        Ok(PortForward::new(reader, writer))
    }

    /// Build the WebSocket URL for an exec session.
    pub fn exec_url<S: AsRef<str>>(
        &self,
        pod: &str,
        container: Option<&str>,
        command: &[S],
        options: ExecOptions,
    ) -> Result<Url> {
        if command.is_empty() {
            return Err(ProcessError::InvalidRequest("command must not be empty".into()));
        }
        let mut url = self.pod_url(pod, "exec")?;
        {
            let mut query = url.query_pairs_mut();
            for arg in command {
                query.append_pair("command", arg.as_ref());
            }
            if let Some(container) = container {
                query.append_pair("container", container);
            }
            query
                .append_pair("stdin", if options.stdin { "true" } else { "false" })
                .append_pair("stdout", "true")
                .append_pair("stderr", "true");
        }
        Ok(url)
    }

    /// Build the WebSocket URL for a port-forward session.
    pub fn port_forward_url(&self, pod: &str, port: u16) -> Result<Url> {
        let mut url = self.pod_url(pod, "portforward")?;
        url.query_pairs_mut().append_pair("ports", &port.to_string());
        Ok(url)
    }

    fn pod_url(&self, pod: &str, subresource: &str) -> Result<Url> {
        if pod.is_empty() {
            return Err(ProcessError::InvalidRequest("pod name must not be empty".into()));
        }
        let mut url = Url::parse(&self.config.server_url).map_err(|e| {
            ProcessError::InvalidRequest(format!("invalid server URL {}: {e}", self.config.server_url))
        })?;
        ws::http_to_ws_scheme(&mut url)?;
        url.path_segments_mut()
            .map_err(|()| {
                ProcessError::InvalidRequest(format!(
                    "server URL cannot be a base: {}",
                    self.config.server_url
                ))
            })?
            .pop_if_empty()
            .extend([
                "api",
                "v1",
                "namespaces",
                self.config.namespace.as_str(),
                "pods",
                pod,
                subresource,
            ]);
        Ok(url)
    }

    async fn connect(&self, url: &Url) -> Result<(ws::WsWriter, ws::WsReader)> {
        let authorization = format!("Bearer {}", self.config.token);
        let mut headers = Vec::new();
        if self.config.has_token() {
            headers.push(("Authorization", authorization.as_str()));
        }
        ws::connect(url, CHANNEL_SUBPROTOCOL, &headers, self.config.connect_timeout()).await
    }
}
