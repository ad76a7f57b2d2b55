//! Translates the readiness probe of the user container for the queue sidecar.
//!
//! The user probe is translated twice:
//!
//! - [`localize_readiness_probe`] rewrites it to target the user container on the loopback
//!   address. The queue sidecar executes it itself, so it is handed over in encoded form, see
//!   [`encode_probe`].
//! - [`sidecar_readiness_probe`] turns it into an HTTP probe of the queue sidecar's own serving
//!   port. This is what the kubelet executes.
use k8s_openapi::{
    api::core::v1::{ExecAction, GRPCAction, HTTPGetAction, HTTPHeader, Probe, TCPSocketAction},
    apimachinery::pkg::util::intstr::IntOrString,
};
use snafu::{ResultExt as _, Snafu};

use crate::constants::{
    KUBELET_PROBE_HEADER_NAME, LOCAL_ADDRESS, NETWORK_PROBE_HEADER_NAME, QUEUE_NAME,
};

type Result<T, E = Error> = std::result::Result<T, E>;

const HTTP_SCHEME: &str = "HTTP";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to serialize readiness probe"))]
    EncodeProbe { source: serde_json::Error },

    #[snafu(display("failed to deserialize readiness probe"))]
    DecodeProbe { source: serde_json::Error },
}

/// The handler of a [`Probe`]. A probe executes exactly one of these.
#[derive(Clone, Debug, PartialEq)]
pub enum ProbeAction {
    Exec(ExecAction),
    Grpc(GRPCAction),
    HttpGet(HTTPGetAction),
    TcpSocket(TCPSocketAction),
}

impl ProbeAction {
    /// Returns the handler of `probe`.
    ///
    /// Should a probe carry more than one handler, HTTP wins over TCP, TCP over exec and exec
    /// over gRPC.
    pub fn from_probe(probe: &Probe) -> Option<Self> {
        if let Some(action) = &probe.http_get {
            Some(Self::HttpGet(action.clone()))
        } else if let Some(action) = &probe.tcp_socket {
            Some(Self::TcpSocket(action.clone()))
        } else if let Some(action) = &probe.exec {
            Some(Self::Exec(action.clone()))
        } else {
            probe.grpc.clone().map(Self::Grpc)
        }
    }

    /// Makes this the only handler of `probe`.
    pub fn apply_to(self, probe: &mut Probe) {
        probe.exec = None;
        probe.grpc = None;
        probe.http_get = None;
        probe.tcp_socket = None;

        match self {
            Self::Exec(action) => probe.exec = Some(action),
            Self::Grpc(action) => probe.grpc = Some(action),
            Self::HttpGet(action) => probe.http_get = Some(action),
            Self::TcpSocket(action) => probe.tcp_socket = Some(action),
        }
    }
}

/// Both translations of a user readiness probe.
#[derive(Clone, Debug, PartialEq)]
pub struct TranslatedProbe {
    /// The encoded localized probe, see [`localize_readiness_probe`].
    pub encoded: String,

    /// The readiness probe of the queue sidecar itself, see [`sidecar_readiness_probe`].
    pub sidecar: Probe,
}

/// Translates the user readiness probe, if there is one.
///
/// `user_port` is the port the user container serves on, `serving_port` the port the queue
/// sidecar serves on. Fails only if the localized probe cannot be encoded.
pub fn translate_readiness_probe(
    probe: Option<&Probe>,
    user_port: i32,
    serving_port: i32,
) -> Result<Option<TranslatedProbe>> {
    let Some(probe) = probe else {
        return Ok(None);
    };

    let encoded = encode_probe(&localize_readiness_probe(probe, user_port))?;

    Ok(Some(TranslatedProbe {
        encoded,
        sidecar: sidecar_readiness_probe(probe, serving_port),
    }))
}

/// Rewrites `probe` to target the user container at `127.0.0.1:<port>`.
///
/// - HTTP probes default to the `HTTP` scheme and get a `K-Kubelet-Probe` header appended.
/// - TCP probes only get host and port rewritten.
/// - Exec probes can't be executed from the queue sidecar and become TCP probes instead. The
///   kubelet still executes the original exec probe against the user container.
/// - gRPC probes are kept as they are.
///
/// A probe with a period but without a positive timeout gets a timeout of one second.
pub fn localize_readiness_probe(probe: &Probe, port: i32) -> Probe {
    let mut probe = probe.clone();

    match ProbeAction::from_probe(&probe) {
        Some(ProbeAction::HttpGet(mut action)) => {
            action.host = Some(LOCAL_ADDRESS.to_owned());
            action.port = IntOrString::Int(port);
            if action.scheme.as_deref().unwrap_or_default().is_empty() {
                action.scheme = Some(HTTP_SCHEME.to_owned());
            }
            action.http_headers.get_or_insert_with(Vec::new).push(HTTPHeader {
                name: KUBELET_PROBE_HEADER_NAME.to_owned(),
                value: QUEUE_NAME.to_owned(),
            });

            ProbeAction::HttpGet(action).apply_to(&mut probe);
        }
        Some(ProbeAction::TcpSocket(mut action)) => {
            action.host = Some(LOCAL_ADDRESS.to_owned());
            action.port = IntOrString::Int(port);

            ProbeAction::TcpSocket(action).apply_to(&mut probe);
        }
        Some(ProbeAction::Exec(_)) => ProbeAction::TcpSocket(TCPSocketAction {
            host: Some(LOCAL_ADDRESS.to_owned()),
            port: IntOrString::Int(port),
        })
        .apply_to(&mut probe),
        Some(ProbeAction::Grpc(_)) | None => {}
    }

    if probe.period_seconds.unwrap_or_default() > 0 && probe.timeout_seconds.unwrap_or_default() < 1
    {
        probe.timeout_seconds = Some(1);
    }

    probe
}

/// Returns `probe` with its handler replaced by an HTTP probe of the queue sidecar serving port,
/// identified by a `K-Network-Probe` header. Timings and thresholds are kept.
pub fn sidecar_readiness_probe(probe: &Probe, serving_port: i32) -> Probe {
    let mut probe = probe.clone();

    ProbeAction::HttpGet(HTTPGetAction {
        port: IntOrString::Int(serving_port),
        http_headers: Some(vec![HTTPHeader {
            name: NETWORK_PROBE_HEADER_NAME.to_owned(),
            value: QUEUE_NAME.to_owned(),
        }]),
        ..HTTPGetAction::default()
    })
    .apply_to(&mut probe);

    probe
}

pub fn encode_probe(probe: &Probe) -> Result<String> {
    serde_json::to_string(probe).context(EncodeProbeSnafu)
}

pub fn decode_probe(encoded: &str) -> Result<Probe> {
    serde_json::from_str(encoded).context(DecodeProbeSnafu)
}
