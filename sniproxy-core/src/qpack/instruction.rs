//! Wire encoding for the encoder stream, and parsing for the decoder stream
//! (spec §6, "bit-exact per RFC 9204").

use super::varint;

/// An instruction the encoder emits on the (unidirectional) encoder stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderInstruction {
    SetCapacity(u64),
    /// `on_static` selects the static (true) or dynamic (false) name table.
    InsertWithNameReference {
        on_static: bool,
        index: u64,
        value: String,
    },
    InsertWithLiteralName {
        name: String,
        value: String,
    },
    /// Relative index (distance from the most recently inserted entry).
    Duplicate(u64),
}

/// No Huffman coding: out of scope (§1's "Huffman coding tables" are an
/// external collaborator this crate never instantiates), so the `H` bit is
/// always clear and string bytes are written verbatim.
pub(super) fn write_string(buf: &mut Vec<u8>, s: &str) {
    varint::encode(buf, 0x00, 7, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

impl EncoderInstruction {
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        match self {
            EncoderInstruction::SetCapacity(capacity) => {
                varint::encode(buf, 0b001_00000, 5, *capacity);
            }
            EncoderInstruction::InsertWithNameReference {
                on_static,
                index,
                value,
            } => {
                let flag = 0b1000_0000 | if *on_static { 0b0100_0000 } else { 0 };
                varint::encode(buf, flag, 6, *index);
                write_string(buf, value);
            }
            EncoderInstruction::InsertWithLiteralName { name, value } => {
                varint::encode(buf, 0b0100_0000, 5, name.len() as u64);
                buf.extend_from_slice(name.as_bytes());
                write_string(buf, value);
            }
            EncoderInstruction::Duplicate(relative_index) => {
                varint::encode(buf, 0b000_00000, 5, *relative_index);
            }
        }
    }
}

/// An instruction parsed off the decoder stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderInstruction {
    SectionAcknowledgement(u64),
    StreamCancellation(u64),
    InsertCountIncrement(u64),
}

/// Parses every complete instruction in `buf`, in order. A `DecoderInstruction`
/// stream never has an "unrecognized prefix" case (the two leading bits
/// exhaustively select one of the three shapes); the only failure mode here
/// is a truncated prefix integer at the end of the buffer.
pub fn parse_decoder_stream(buf: &[u8]) -> Result<Vec<DecoderInstruction>, ()> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < buf.len() {
        let first = buf[pos];
        if first & 0x80 != 0 {
            let (stream_id, len) = varint::decode(buf, pos, 7).ok_or(())?;
            out.push(DecoderInstruction::SectionAcknowledgement(stream_id));
            pos += len;
        } else if first & 0x40 != 0 {
            let (stream_id, len) = varint::decode(buf, pos, 6).ok_or(())?;
            out.push(DecoderInstruction::StreamCancellation(stream_id));
            pos += len;
        } else {
            let (increment, len) = varint::decode(buf, pos, 6).ok_or(())?;
            out.push(DecoderInstruction::InsertCountIncrement(increment));
            pos += len;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_capacity_wire_shape() {
        let mut buf = Vec::new();
        EncoderInstruction::SetCapacity(17).write_to(&mut buf);
        assert_eq!(buf[0] & 0b1110_0000, 0b0010_0000);
    }

    #[test]
    fn duplicate_wire_shape() {
        let mut buf = Vec::new();
        EncoderInstruction::Duplicate(3).write_to(&mut buf);
        assert_eq!(buf[0] & 0b1110_0000, 0);
        assert_eq!(buf[0] & 0b0001_1111, 3);
    }

    #[test]
    fn decoder_stream_round_trips_all_three_shapes() {
        let mut buf = Vec::new();
        varint::encode(&mut buf, 0b1000_0000, 7, 4); // ack stream 4
        varint::encode(&mut buf, 0b0100_0000, 6, 9); // cancel stream 9
        varint::encode(&mut buf, 0b0000_0000, 6, 2); // increment 2

        let parsed = parse_decoder_stream(&buf).unwrap();
        assert_eq!(
            parsed,
            vec![
                DecoderInstruction::SectionAcknowledgement(4),
                DecoderInstruction::StreamCancellation(9),
                DecoderInstruction::InsertCountIncrement(2),
            ]
        );
    }

    #[test]
    fn truncated_buffer_is_rejected() {
        let buf = [0xFF]; // claims continuation bytes that never arrive
        assert!(parse_decoder_stream(&buf).is_err());
    }
}
