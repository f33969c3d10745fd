//! Error taxonomy for the router, codec, and configuration surface.

use thiserror::Error;

/// Reason a validator or the built-in signature check rejected a message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationReason {
    #[error("signature missing or malformed")]
    SignatureError,
    #[error("message failed the registered validator")]
    ValidationFailed,
    #[error("message originated from ourselves")]
    SelfOrigin,
    #[error("peer is graylisted")]
    BlacklistedPeer,
    #[error("message source is blacklisted")]
    BlacklistedSource,
}

/// Outcome of running a message through the validation pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Accept,
    Reject(ValidationReason),
    Ignore,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("mesh bounds invalid: require dlo ({dlo}) <= d ({d}) <= dhi ({dhi})")]
    MeshBounds { dlo: usize, d: usize, dhi: usize },
    #[error("dout ({dout}) must be < dlo ({dlo})")]
    DoutTooLarge { dout: usize, dlo: usize },
    #[error("dout ({dout}) must be <= d/2 ({half})")]
    DoutExceedsHalfD { dout: usize, half: usize },
    #[error("score threshold order violated: graylist ({graylist}) <= publish ({publish}) <= gossip ({gossip}) <= 0.0")]
    ThresholdOrder {
        graylist: f64,
        publish: f64,
        gossip: f64,
    },
    #[error("accept_px threshold must be >= 0.0, got {0}")]
    NegativeAcceptPx(f64),
    #[error("opportunistic_graft threshold must be >= 0.0, got {0}")]
    NegativeOpportunisticGraft(f64),
    #[error("heartbeat_interval must be non-zero")]
    ZeroHeartbeatInterval,
    #[error("decay_interval must be non-zero")]
    ZeroDecayInterval,
}

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("frame exceeds max_transmission_size: {size} > {limit}")]
    FrameTooLarge { size: usize, limit: usize },
    #[error("length-prefix varint malformed or truncated")]
    BadLengthPrefix,
    #[error("postcard decode failed: {0}")]
    Decode(#[from] postcard::Error),
    #[error("underlying stream error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to open stream to {peer}: {reason}")]
    OpenStreamFailed { peer: String, reason: String },
    #[error("stream to {peer} closed unexpectedly")]
    StreamClosed { peer: String },
}

/// Top-level error type returned synchronously to callers of `Network`.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("publish failed: no peers for topic \"{0}\" and with_publish_if_no_peers is disabled")]
    PublishNoPeers(String),
    #[error("already subscribed to topic \"{0}\" with incompatible validator")]
    IncompatibleSubscribe(String),
    #[error("event loop is no longer running")]
    LoopShutDown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_outcome_equality() {
        assert_eq!(ValidationOutcome::Accept, ValidationOutcome::Accept);
        assert_ne!(
            ValidationOutcome::Ignore,
            ValidationOutcome::Reject(ValidationReason::SelfOrigin)
        );
    }

    #[test]
    fn config_error_messages_are_stable() {
        let e = ConfigError::MeshBounds { dlo: 6, d: 4, dhi: 12 };
        assert!(e.to_string().contains("dlo"));
    }
}
