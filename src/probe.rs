//! Connection probe.
//!
//! Finds the remote application by trying each port of a small fixed range
//! with `GetProductInfo` and accepting the first one that succeeds.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde_json::{json, Value};

use crate::bindings::CommandFacade;
use crate::error::{ConnectionError, Error, TransportError};
use crate::transport::Transport;
use crate::types::{BASE_PORT, COMMAND_NAMESPACE, DEFAULT_HOST, MAX_PORT_OFFSET};
use crate::utilities::ProductInfo;
use crate::versions::{BindingSet, ReleaseLayout, Version};

#[cfg(feature = "remote")]
use crate::transport::HttpTransport;

/// Default per-request timeout while probing (5 seconds).
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Options for locating the remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOptions {
    /// Scheme and host, without port.
    pub host: String,
    base_port: u16,
    max_offset: u16,
    /// Only this port is tried when set.
    pub port: Option<u16>,
    pub timeout: Duration,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            base_port: BASE_PORT,
            max_offset: MAX_PORT_OFFSET,
            port: None,
            timeout: PROBE_TIMEOUT,
        }
    }
}

impl ProbeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try only `port`.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Apply a `--port <n>` override from an argument vector.
    ///
    /// `args[0]` is the program name. Other arguments are ignored, so the
    /// host application's own flags may be passed through unchanged.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Some(port) = port_override(args) {
            tracing::debug!(port, "port taken from argument vector");
            self.port = Some(port);
        }
        self
    }

    pub fn first_port(&self) -> u16 {
        self.base_port
    }

    pub fn last_port(&self) -> u16 {
        self.base_port.saturating_add(self.max_offset)
    }

    /// Ports to try, in order.
    ///
    /// # Errors
    ///
    /// `PortOutOfRange` when an explicit port lies outside the range.
    pub fn candidate_ports(&self) -> Result<Vec<u16>, ConnectionError> {
        let (first, last) = (self.first_port(), self.last_port());
        match self.port {
            Some(port) if (first..=last).contains(&port) => Ok(vec![port]),
            Some(port) => Err(ConnectionError::PortOutOfRange { port, first, last }),
            None => Ok((first..=last).collect()),
        }
    }

    pub fn url(&self, port: u16) -> String {
        format!("{}:{}", self.host.trim_end_matches('/'), port)
    }
}

#[derive(Parser, Debug)]
struct PortArgs {
    #[arg(long)]
    port: Option<u16>,
}

fn port_override<I, S>(args: I) -> Option<u16>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut args = args.into_iter().map(Into::into);
    let mut relevant = vec![args.next().unwrap_or_default()];
    while let Some(arg) = args.next() {
        if arg == "--port" {
            relevant.push(arg);
            relevant.extend(args.next());
        } else if arg.starts_with("--port=") {
            relevant.push(arg);
        }
    }
    PortArgs::try_parse_from(relevant).ok()?.port
}

/// A port that answered the liveness command.
#[derive(Debug)]
pub struct Endpoint<T> {
    pub port: u16,
    pub product: ProductInfo,
    pub transport: T,
}

/// Try each candidate port in order and return the first live endpoint.
///
/// `open` builds a transport for a URL. Ports whose transport cannot be
/// built, or which do not answer `GetProductInfo` successfully, are skipped.
/// Returns `Ok(None)` when no port answers.
///
/// # Errors
///
/// `PortOutOfRange` for an explicit port outside the range; no request is
/// made in that case.
pub fn probe<T, F>(options: &ProbeOptions, mut open: F) -> Result<Option<Endpoint<T>>, ConnectionError>
where
    T: Transport,
    F: FnMut(&str) -> Result<T, TransportError>,
{
    for port in options.candidate_ports()? {
        let url = options.url(port);
        let transport = match open(&url) {
            Ok(transport) => transport,
            Err(e) => {
                tracing::debug!(port, error = %e, "cannot open transport");
                continue;
            }
        };
        match product_info(&transport) {
            Some(product) => {
                tracing::info!(port, version = product.version, build = product.build_number, "found live endpoint");
                return Ok(Some(Endpoint {
                    port,
                    product,
                    transport,
                }));
            }
            None => tracing::debug!(port, "no answer"),
        }
    }
    Ok(None)
}

/// Raw `GetProductInfo` call, independent of any binding set.
fn product_info<T: Transport>(transport: &T) -> Option<ProductInfo> {
    let body = json!({"command": format!("{}.GetProductInfo", COMMAND_NAMESPACE)}).to_string();
    let response = transport.post(&body).ok()?;
    if response.get("succeeded").and_then(Value::as_bool) != Some(true) {
        return None;
    }
    let result = response.get("result")?;
    ProductInfo::from_result(result).ok()
}

/// A live endpoint with the binding set chosen for it.
#[derive(Debug)]
pub struct Connection<T> {
    pub port: u16,
    pub product: ProductInfo,
    pub binding_set: BindingSet,
    pub facade: CommandFacade<T>,
}

/// Probe with HTTP transports, then resolve and load a binding set.
///
/// # Errors
///
/// `NoLivePort` when nothing answers, plus any probe or version error.
#[cfg(feature = "remote")]
pub fn connect(
    options: &ProbeOptions,
    layout: &ReleaseLayout,
) -> Result<Connection<HttpTransport>, Error> {
    let timeout = options.timeout;
    connect_with(options, layout, |url| {
        HttpTransport::with_timeout(url, timeout)
    })
}

/// [`connect`] with a caller-supplied transport factory.
pub fn connect_with<T, F>(
    options: &ProbeOptions,
    layout: &ReleaseLayout,
    open: F,
) -> Result<Connection<T>, Error>
where
    T: Transport,
    F: FnMut(&str) -> Result<T, TransportError>,
{
    let endpoint = probe(options, open)?.ok_or(ConnectionError::NoLivePort {
        first: options.first_port(),
        last: options.last_port(),
    })?;

    let target = Version::new(endpoint.product.version, endpoint.product.build_number);
    let binding_set = layout.load(target)?;
    let facade = CommandFacade::new(endpoint.transport, Arc::clone(&binding_set.bindings));

    Ok(Connection {
        port: endpoint.port,
        product: endpoint.product,
        binding_set,
        facade,
    })
}
