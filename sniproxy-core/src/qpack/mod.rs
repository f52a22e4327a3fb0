//! QPACK header compression (RFC 9204) for HTTP/3.
//!
//! Implements the encoder half only: a dynamic header table (C1), per-stream
//! section bookkeeping (C2), and the encoder itself (C3), which serializes
//! field sections, emits encoder-stream instructions, and processes
//! decoder-stream acknowledgements. The static table (RFC 9204 Appendix A),
//! Huffman coding, and decoding are either out of scope or deliberately
//! simplified — see each submodule's doc comment.
//!
//! ```text
//! Encoder::encode(buf, stream_id, fields)
//!     -> field section prefix + field lines written into `buf`
//!     -> encoder-stream instructions queued, drained via
//!        take_pending_instructions()
//! Encoder::parse_instruction_buffer(decoder_stream_bytes)
//!     -> applies SectionAcknowledgement / StreamCancellation /
//!        InsertCountIncrement from the peer decoder
//! ```

mod dynamic_table;
mod encoder;
pub mod error;
mod instruction;
mod section;
mod static_table;
mod varint;

pub use dynamic_table::{DynamicEntry, DynamicTable};
pub use encoder::{DO_NOT_HUFFMAN, DO_NOT_INDEX, Encoder, EncoderConfig, NEVER_INDEX};
pub use error::QpackError;
pub use instruction::{DecoderInstruction, EncoderInstruction};
pub use section::{SectionInfo, StreamInfo};
pub use static_table::STATIC_TABLE;

/// One header field, as the upper protocol layer hands it to the encoder.
///
/// Names are ASCII; the first byte must be greater than `0x20` (checked by
/// `encode`, not by the constructor, since batch validation happens once per
/// section per the spec's error contract). A missing value is normalized to
/// the empty string before it ever touches the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: String,
    pub value: String,
}

impl HeaderField {
    pub fn new(name: impl Into<String>, value: Option<impl Into<String>>) -> Result<Self, QpackError> {
        let name = name.into();
        if !name.is_ascii() {
            return Err(QpackError::stream(crate::error::H3ErrorCode::H3_GENERAL_PROTOCOL_ERROR));
        }
        Ok(Self {
            name,
            value: value.map(Into::into).unwrap_or_default(),
        })
    }

    /// `size = name.len() + value.len() + 32`, per RFC 9204 §3.2.1.
    pub fn size(&self) -> usize {
        self.name.len() + self.value.len() + 32
    }
}
