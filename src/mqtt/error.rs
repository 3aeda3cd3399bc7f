//! Error definitions for the IoT Ignite connector

use rumqttc::ConnectReturnCode;
use thiserror::Error;

/// Outcome of a connection attempt as recorded in the client status.
///
/// `Success` is the only code that leaves the client in `Connected`; every other
/// code corresponds to a [`ConnectionError`] variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectResultCode {
    Success,
    BadCredentials,
    NotAuthorized,
    ServerUnavailable,
    ProtocolError,
    NetworkUnreachable,
    TlsFailure,
    Timeout,
    Cancelled,
    UnspecifiedError,
}

/// Errors raised while establishing a broker session
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Broker answered the CONNECT with a refusal code
    #[error("Broker rejected credentials: {0:?}")]
    AuthenticationRejected(ConnectReturnCode),

    /// Broker refused for a reason other than credentials
    #[error("Protocol negotiation failed: {0}")]
    ProtocolNegotiation(String),

    /// TCP level failure (DNS, refused, reset, ...)
    #[error("Network unreachable: {0}")]
    NetworkUnreachable(String),

    /// TLS handshake or certificate failure
    #[error("TLS negotiation failed: {0}")]
    Tls(String),

    /// No CONNACK within the configured connect timeout
    #[error("Timed out waiting for CONNACK")]
    Timeout,

    /// The connection scope was cancelled while connecting
    #[error("Connect cancelled")]
    Cancelled,

    /// Any other transport failure
    #[error("Transport error: {0}")]
    Transport(String),
}

impl ConnectionError {
    /// Maps the error onto the result code stored in the connection status.
    pub fn result_code(&self) -> ConnectResultCode {
        match self {
            ConnectionError::AuthenticationRejected(ConnectReturnCode::NotAuthorized) => {
                ConnectResultCode::NotAuthorized
            }
            ConnectionError::AuthenticationRejected(_) => ConnectResultCode::BadCredentials,
            ConnectionError::ProtocolNegotiation(_) => ConnectResultCode::ProtocolError,
            ConnectionError::NetworkUnreachable(_) => ConnectResultCode::NetworkUnreachable,
            ConnectionError::Tls(_) => ConnectResultCode::TlsFailure,
            ConnectionError::Timeout => ConnectResultCode::Timeout,
            ConnectionError::Cancelled => ConnectResultCode::Cancelled,
            ConnectionError::Transport(_) => ConnectResultCode::UnspecifiedError,
        }
    }

    /// Classifies a refusal code carried by a CONNACK.
    pub fn from_return_code(code: ConnectReturnCode) -> Self {
        match code {
            ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized => {
                ConnectionError::AuthenticationRejected(code)
            }
            ConnectReturnCode::ServiceUnavailable => {
                ConnectionError::NetworkUnreachable("broker service unavailable".to_string())
            }
            other => ConnectionError::ProtocolNegotiation(format!("{:?}", other)),
        }
    }
}

impl From<rumqttc::ConnectionError> for ConnectionError {
    fn from(err: rumqttc::ConnectionError) -> Self {
        match err {
            rumqttc::ConnectionError::ConnectionRefused(code) => Self::from_return_code(code),
            rumqttc::ConnectionError::Io(e) => ConnectionError::NetworkUnreachable(e.to_string()),
            rumqttc::ConnectionError::Tls(e) => ConnectionError::Tls(e.to_string()),
            rumqttc::ConnectionError::NetworkTimeout => ConnectionError::Timeout,
            rumqttc::ConnectionError::NotConnAck(packet) => {
                ConnectionError::ProtocolNegotiation(format!("expected CONNACK, got {:?}", packet))
            }
            other => ConnectionError::Transport(other.to_string()),
        }
    }
}

/// Errors raised by the outbound publishing path
#[derive(Debug, Error)]
pub enum PublishError {
    /// No live session; nothing was sent
    #[error("Client is not connected")]
    NotConnected,

    /// The request could not be handed to the event loop
    #[error("Failed to enqueue publish: {0}")]
    Client(#[from] rumqttc::ClientError),

    /// Session ended before the broker completed the delivery
    #[error("Connection lost before delivery was acknowledged")]
    ConnectionLost,

    /// Broker did not complete the QoS 2 handshake in time
    #[error("Timed out waiting for delivery acknowledgement")]
    AckTimeout,

    /// Payload could not be rendered
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),
}

/// Errors raised while rendering a payload to its wire form
#[derive(Debug, Error)]
pub enum SerializationError {
    /// NaN or infinity among the sample values
    #[error("Value at index {index} is not a finite number")]
    NonFiniteValue { index: usize },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refusal_codes_map_to_result_codes() {
        let bad = ConnectionError::from_return_code(ConnectReturnCode::BadUserNamePassword);
        assert_eq!(bad.result_code(), ConnectResultCode::BadCredentials);

        let denied = ConnectionError::from_return_code(ConnectReturnCode::NotAuthorized);
        assert_eq!(denied.result_code(), ConnectResultCode::NotAuthorized);

        let version = ConnectionError::from_return_code(ConnectReturnCode::RefusedProtocolVersion);
        assert_eq!(version.result_code(), ConnectResultCode::ProtocolError);

        let unavailable = ConnectionError::from_return_code(ConnectReturnCode::ServiceUnavailable);
        assert_eq!(
            unavailable.result_code(),
            ConnectResultCode::NetworkUnreachable
        );
    }

    #[test]
    fn io_errors_are_network_failures() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: ConnectionError = rumqttc::ConnectionError::Io(io).into();
        assert_eq!(err.result_code(), ConnectResultCode::NetworkUnreachable);
    }
}
