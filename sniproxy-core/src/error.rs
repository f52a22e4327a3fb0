//! Shared error codes for the QUIC session and QPACK encoder.
//!
//! HTTP/3 and QPACK both report failures to their peer as a numeric error
//! code carried by the transport (a `CONNECTION_CLOSE` or `STOP_SENDING`
//! frame in the real protocol — construction of those frames is the
//! transport's job, out of scope here). `H3ErrorCode` just gives the small
//! set of codes this crate actually raises a name.

/// A QUIC/HTTP3 application error code, as defined by RFC 9114 / RFC 9204.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct H3ErrorCode(pub u64);

impl H3ErrorCode {
    pub const H3_GENERAL_PROTOCOL_ERROR: H3ErrorCode = H3ErrorCode(0x0101);
    pub const H3_CLOSED_CRITICAL_STREAM: H3ErrorCode = H3ErrorCode(0x0104);
    pub const QPACK_DECOMPRESSION_FAILED: H3ErrorCode = H3ErrorCode(0x0200);
    pub const QPACK_ENCODER_STREAM_ERROR: H3ErrorCode = H3ErrorCode(0x0201);
    pub const QPACK_DECODER_STREAM_ERROR: H3ErrorCode = H3ErrorCode(0x0202);
}

impl std::fmt::Display for H3ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}
