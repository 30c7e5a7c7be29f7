use crate::rlp::DecoderError;

/// Failures from the signing and recovery primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    InvalidSignature,
    InvalidPublicKey,
    SigningFailed,
}

/// Failures while framing or un-framing a discovery packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    /// The datagram is not longer than the 98-byte header.
    TooSmall,
    /// The leading hash does not match the rest of the packet.
    HashMismatch,
    /// The packet kind byte is not a known message type.
    UnknownKind(u8),
    /// The signature did not recover a valid public key.
    Crypto(CryptoError),
}

impl From<CryptoError> for PacketError {
    fn from(e: CryptoError) -> Self {
        PacketError::Crypto(e)
    }
}

/// Failures while marshalling or parsing a node record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrError {
    Decoder(DecoderError),
    /// A required key/value pair is absent.
    MissingField(&'static str),
    /// The record's `id` entry is not the "v4" scheme.
    UnsupportedIdentityScheme,
    /// The record signature does not verify against its key.
    InvalidSignature,
    /// The embedded public key is malformed.
    InvalidPublicKey,
    SigningFailed,
}

impl From<DecoderError> for EnrError {
    fn from(e: DecoderError) -> Self {
        EnrError::Decoder(e)
    }
}

/// Errors surfaced by the discovery engine. Per-datagram instances are
/// logged and swallowed at the serve-loop boundary; probe errors return to
/// the caller.
#[derive(Debug)]
pub enum DiscoveryError {
    Decoder(DecoderError),
    Packet(PacketError),
    Enr(EnrError),
    Crypto(CryptoError),
    /// A ping's self-reported endpoint disagrees with the wire source.
    EndpointMismatch,
    /// A pong arrived from a node we never pinged.
    MissingPeer,
    /// A pong's ping-hash does not match the outstanding ping.
    InvalidPingHash,
    /// A pong arrived outside the correlation window of its ping.
    ExpiredPingHash,
    /// An inbound request carried an expiration in the past.
    ExpiredRequest,
    /// The provided key does not match the local record's public key.
    KeyMismatch,
    ServiceNotStarted,
    ServiceAlreadyStarted,
    Io(std::io::Error),
}

impl From<DecoderError> for DiscoveryError {
    fn from(e: DecoderError) -> Self {
        DiscoveryError::Decoder(e)
    }
}

impl From<PacketError> for DiscoveryError {
    fn from(e: PacketError) -> Self {
        DiscoveryError::Packet(e)
    }
}

impl From<EnrError> for DiscoveryError {
    fn from(e: EnrError) -> Self {
        DiscoveryError::Enr(e)
    }
}

impl From<CryptoError> for DiscoveryError {
    fn from(e: CryptoError) -> Self {
        DiscoveryError::Crypto(e)
    }
}

impl From<std::io::Error> for DiscoveryError {
    fn from(e: std::io::Error) -> Self {
        DiscoveryError::Io(e)
    }
}
