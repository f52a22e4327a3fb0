//! The QPACK encoder (spec component C3): turns header fields into field
//! sections, opportunistically grows the dynamic table, and tracks which
//! streams are blocked waiting on insertions the peer hasn't acknowledged
//! yet.

use std::collections::HashMap;
use std::sync::Mutex;

use super::HeaderField;
use super::dynamic_table::DynamicTable;
use super::error::QpackError;
use super::instruction::{self, DecoderInstruction, EncoderInstruction};
use super::section::{SectionInfo, StreamInfo, write_prefix};
use super::static_table;
use crate::error::H3ErrorCode;

/// Header names whose values QPACK never Huffman-codes even though this
/// encoder doesn't implement Huffman coding at all (spec §6): kept as a
/// named list so a future Huffman pass has a ready-made exemption table.
pub const DO_NOT_HUFFMAN: &[&str] = &[
    "authorization",
    "content-md5",
    "proxy-authenticate",
    "proxy-authorization",
];

/// Header names the encoder may reference from the static/dynamic table but
/// must never insert into the dynamic table itself (values are too
/// high-cardinality, or too sensitive, to be worth indexing).
pub const DO_NOT_INDEX: &[&str] = &[
    "authorization",
    "content-md5",
    "content-range",
    "etag",
    "if-modified-since",
    "if-unmodified-since",
    "if-none-match",
    "if-range",
    "if-match",
    "location",
    "range",
    "retry-after",
    "last-modified",
    "set-cookie",
    "set-cookie2",
];

/// Header names that must always be emitted as literal-never-indexed field
/// lines: neither referenced from nor inserted into any table.
pub const NEVER_INDEX: &[&str] = &["authorization", "set-cookie", "set-cookie2"];

fn in_list(list: &[&str], name: &str) -> bool {
    list.iter().any(|candidate| candidate.eq_ignore_ascii_case(name))
}

pub struct EncoderConfig {
    pub capacity: usize,
    pub max_blocked_streams: u16,
}

impl From<&sniproxy_config::Http3Config> for EncoderConfig {
    fn from(config: &sniproxy_config::Http3Config) -> Self {
        Self {
            capacity: config.qpack_max_table_capacity,
            max_blocked_streams: config.qpack_blocked_streams,
        }
    }
}

struct EncoderState {
    table: DynamicTable,
    known_insert_count: u64,
    blocked_streams: u16,
    max_blocked_streams: u16,
    streams: HashMap<u64, StreamInfo>,
    pending_instructions: Vec<EncoderInstruction>,
}

enum RefDecision {
    Reference,
    Refuse,
}

impl EncoderState {
    /// Decides whether `index` may be referenced by the section currently
    /// under construction, applying the blocking budget: a stream that's
    /// already blocking doesn't consume additional budget, and a stream that
    /// would be newly blocking is refused once `blocked_streams` is at cap.
    fn reference_dynamic(&mut self, index: u64, stream: &mut StreamInfo, section: &mut SectionInfo) -> RefDecision {
        if !self.table.can_reference(index) {
            return RefDecision::Refuse;
        }
        if self.known_insert_count >= index {
            self.table.add_reference(index);
            section.note_reference(index);
            return RefDecision::Reference;
        }
        if stream.blocking_sections > 0 {
            self.table.add_reference(index);
            section.blocking = true;
            stream.blocking_sections += 1;
            section.note_reference(index);
            return RefDecision::Reference;
        }
        if self.blocked_streams < self.max_blocked_streams {
            self.blocked_streams += 1;
            self.table.add_reference(index);
            section.blocking = true;
            stream.blocking_sections += 1;
            section.note_reference(index);
            return RefDecision::Reference;
        }
        RefDecision::Refuse
    }

    /// Marks every still-blocking section whose `required_insert_count` is
    /// now satisfied as unblocked, decrementing `blocked_streams` exactly
    /// once per stream that has no more blocking sections left.
    fn unblock_up_to(&mut self, new_known: u64) {
        if new_known <= self.known_insert_count {
            return;
        }
        for stream in self.streams.values_mut() {
            for section in stream.sections.iter_mut() {
                if section.blocking && section.required_insert_count <= new_known {
                    section.blocking = false;
                    stream.blocking_sections -= 1;
                    if stream.blocking_sections == 0 {
                        self.blocked_streams -= 1;
                    }
                }
            }
        }
        self.known_insert_count = new_known;
    }
}

/// `relative = base - index`: 0 is the most recently inserted entry that
/// existed when this section's base was captured.
fn pre_base_relative(index: u64, base: u64) -> u64 {
    base - index
}

/// `post_base = index - base - 1`: 0 is the first entry this section itself
/// inserted.
fn post_base_index(index: u64, base: u64) -> u64 {
    index - base - 1
}

fn write_reference(out: &mut Vec<u8>, index: u64, base: u64) {
    if index > base {
        let post_base = post_base_index(index, base);
        varint_encode(out, 0b0001_0000, 4, post_base);
    } else {
        let relative = pre_base_relative(index, base);
        varint_encode(out, 0b1000_0000, 6, relative);
    }
}

fn write_reference_name(out: &mut Vec<u8>, never_index: bool, index: u64, base: u64, value: &str) {
    if index > base {
        let post_base = post_base_index(index, base);
        let flag = if never_index { 0b0000_1000 } else { 0 };
        varint_encode(out, flag, 3, post_base);
    } else {
        let relative = pre_base_relative(index, base);
        let flag = 0b0100_0000 | if never_index { 0b0010_0000 } else { 0 };
        varint_encode(out, flag, 4, relative);
    }
    instruction::write_string(out, value);
}

fn write_static_reference(out: &mut Vec<u8>, index: u64) {
    varint_encode(out, 0b1100_0000, 6, index);
}

fn write_static_name_reference(out: &mut Vec<u8>, never_index: bool, index: u64, value: &str) {
    let flag = 0b0101_0000 | if never_index { 0b0010_0000 } else { 0 };
    varint_encode(out, flag, 4, index);
    instruction::write_string(out, value);
}

fn write_literal_literal(out: &mut Vec<u8>, never_index: bool, name: &str, value: &str) {
    let flag = 0b0010_0000 | if never_index { 0b0001_0000 } else { 0 };
    varint_encode(out, flag, 3, name.len() as u64);
    out.extend_from_slice(name.as_bytes());
    instruction::write_string(out, value);
}

use super::varint::encode as varint_encode;

/// Core per-field decision tree: exact match, then name-only match, then
/// literal, in each case preferring the static table and falling back to
/// inserting/duplicating into the dynamic table when the field may be
/// indexed and there's room.
fn encode_one_field(state: &mut EncoderState, stream: &mut StreamInfo, section: &mut SectionInfo, field: &HeaderField, base: u64, out: &mut Vec<u8>) {
    let never_index = in_list(NEVER_INDEX, &field.name);
    let may_index = !never_index && !in_list(DO_NOT_INDEX, &field.name);

    let (static_exact, static_name) = static_table::find_static(&field.name, &field.value);
    if let Some(idx) = static_exact {
        write_static_reference(out, idx as u64);
        return;
    }

    if let Some(index) = state.table.get_exact(&field.name, &field.value).map(|e| e.index) {
        if state.table.can_reference(index) {
            if let RefDecision::Reference = state.reference_dynamic(index, stream, section) {
                write_reference(out, index, base);
                return;
            }
        }
        if may_index && state.table.can_insert(field.size()) {
            let relative = state.table.insert_count() - index;
            if let Ok(new_index) = state.table.add(field.clone()) {
                state.pending_instructions.push(EncoderInstruction::Duplicate(relative));
                if let RefDecision::Reference = state.reference_dynamic(new_index, stream, section) {
                    write_reference(out, new_index, base);
                    return;
                }
            }
        }
        // Budget already refused this stream a new blocking reference; a
        // literal naming the existing entry still saves the value bytes
        // without asking the decoder to wait on an unacknowledged insert.
        if state.table.can_reference(index) {
            write_reference_name(out, never_index, index, base, &field.value);
            return;
        }
        write_literal_literal(out, never_index, &field.name, &field.value);
        return;
    }

    if let Some(idx) = static_name {
        if may_index && state.table.can_insert(field.size()) {
            if let Ok(new_index) = state.table.add(field.clone()) {
                state.pending_instructions.push(EncoderInstruction::InsertWithNameReference {
                    on_static: true,
                    index: idx as u64,
                    value: field.value.clone(),
                });
                if let RefDecision::Reference = state.reference_dynamic(new_index, stream, section) {
                    write_reference(out, new_index, base);
                    return;
                }
            }
        }
        write_static_name_reference(out, never_index, idx as u64, &field.value);
        return;
    }

    if let Some(name_index) = state.table.get_name(&field.name).map(|e| e.index) {
        if may_index && state.table.can_insert(field.size()) {
            let relative = state.table.insert_count() - name_index;
            if let Ok(new_index) = state.table.add(field.clone()) {
                state.pending_instructions.push(EncoderInstruction::InsertWithNameReference {
                    on_static: false,
                    index: relative,
                    value: field.value.clone(),
                });
                if let RefDecision::Reference = state.reference_dynamic(new_index, stream, section) {
                    write_reference(out, new_index, base);
                    return;
                }
            }
        } else if state.table.can_reference(name_index) {
            if let RefDecision::Reference = state.reference_dynamic(name_index, stream, section) {
                write_reference_name(out, never_index, name_index, base, &field.value);
                return;
            }
        }
        write_literal_literal(out, never_index, &field.name, &field.value);
        return;
    }

    if may_index && state.table.can_insert(field.size()) {
        if let Ok(new_index) = state.table.add(field.clone()) {
            state.pending_instructions.push(EncoderInstruction::InsertWithLiteralName {
                name: field.name.clone(),
                value: field.value.clone(),
            });
            if let RefDecision::Reference = state.reference_dynamic(new_index, stream, section) {
                write_reference(out, new_index, base);
                return;
            }
        }
    }
    write_literal_literal(out, never_index, &field.name, &field.value);
}

/// The encoder half of QPACK. Owns the dynamic table and every in-flight
/// section; safe to share across the session's streams behind an `Arc`.
pub struct Encoder {
    state: Mutex<EncoderState>,
}

impl Encoder {
    pub fn new(config: EncoderConfig) -> Self {
        Self {
            state: Mutex::new(EncoderState {
                table: DynamicTable::new(config.capacity),
                known_insert_count: 0,
                blocked_streams: 0,
                max_blocked_streams: config.max_blocked_streams,
                streams: HashMap::new(),
                pending_instructions: Vec::new(),
            }),
        }
    }

    pub fn set_capacity(&self, capacity: usize) -> Result<(), QpackError> {
        let mut state = self.state.lock().unwrap();
        state.table.set_capacity(capacity)?;
        state.pending_instructions.push(EncoderInstruction::SetCapacity(capacity as u64));
        Ok(())
    }

    /// Opportunistically inserts `field` with no associated section, used to
    /// pre-populate the table ahead of traffic that's expected to repeat it.
    /// Returns `false` without side effects if the field must not be indexed
    /// or there's no room.
    pub fn insert(&self, field: &HeaderField) -> Result<bool, QpackError> {
        let mut state = self.state.lock().unwrap();
        if in_list(NEVER_INDEX, &field.name) || in_list(DO_NOT_INDEX, &field.name) {
            return Ok(false);
        }
        if !state.table.can_insert(field.size()) {
            return Ok(false);
        }

        if let Some(index) = state.table.get_exact(&field.name, &field.value).map(|e| e.index) {
            let relative = state.table.insert_count() - index;
            state.table.add(field.clone())?;
            state.pending_instructions.push(EncoderInstruction::Duplicate(relative));
            return Ok(true);
        }

        let (_, static_name) = static_table::find_static(&field.name, &field.value);
        if let Some(idx) = static_name {
            state.table.add(field.clone())?;
            state.pending_instructions.push(EncoderInstruction::InsertWithNameReference {
                on_static: true,
                index: idx as u64,
                value: field.value.clone(),
            });
            return Ok(true);
        }

        if let Some(name_index) = state.table.get_name(&field.name).map(|e| e.index) {
            let relative = state.table.insert_count() - name_index;
            state.table.add(field.clone())?;
            state.pending_instructions.push(EncoderInstruction::InsertWithNameReference {
                on_static: false,
                index: relative,
                value: field.value.clone(),
            });
            return Ok(true);
        }

        state.table.add(field.clone())?;
        state.pending_instructions.push(EncoderInstruction::InsertWithLiteralName {
            name: field.name.clone(),
            value: field.value.clone(),
        });
        Ok(true)
    }

    /// Encodes `fields` as one field section for `stream_id`, writing the
    /// section prefix followed by each field line into `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>, stream_id: u64, fields: &[HeaderField]) -> Result<(), QpackError> {
        for f in fields {
            if f.name.as_bytes().first().map_or(true, |b| *b <= 0x20) {
                return Err(QpackError::stream(H3ErrorCode::H3_GENERAL_PROTOCOL_ERROR));
            }
        }

        let mut state = self.state.lock().unwrap();
        let base = state.table.insert_count();
        let mut stream = state.streams.remove(&stream_id).unwrap_or_else(|| StreamInfo::new(stream_id));
        let mut section = SectionInfo::default();
        let mut lines = Vec::new();

        for field in fields {
            encode_one_field(&mut state, &mut stream, &mut section, field, base, &mut lines);
        }

        write_prefix(buf, section.required_insert_count, base, state.table.capacity());
        buf.extend_from_slice(&lines);

        stream.sections.push_back(section);
        state.streams.insert(stream_id, stream);
        Ok(())
    }

    /// Applies every instruction parsed off the peer's decoder stream.
    pub fn parse_instruction_buffer(&self, buf: &[u8]) -> Result<(), QpackError> {
        let parsed = instruction::parse_decoder_stream(buf).map_err(|_| QpackError::session(H3ErrorCode::QPACK_DECODER_STREAM_ERROR))?;
        let mut state = self.state.lock().unwrap();
        for instr in parsed {
            match instr {
                DecoderInstruction::SectionAcknowledgement(stream_id) => {
                    let stream = state
                        .streams
                        .get_mut(&stream_id)
                        .ok_or_else(|| QpackError::session(H3ErrorCode::QPACK_DECODER_STREAM_ERROR))?;
                    let section = stream
                        .sections
                        .pop_front()
                        .ok_or_else(|| QpackError::session(H3ErrorCode::QPACK_DECODER_STREAM_ERROR))?;
                    for index in &section.referenced {
                        state.table.release_reference(*index);
                    }
                    if section.blocking {
                        stream.blocking_sections -= 1;
                        if stream.blocking_sections == 0 {
                            state.blocked_streams -= 1;
                        }
                    }
                    let new_known = section.required_insert_count.max(state.known_insert_count);
                    let empty = state.streams.get(&stream_id).is_some_and(|s| s.sections.is_empty());
                    if empty {
                        state.streams.remove(&stream_id);
                    }
                    state.unblock_up_to(new_known);
                }
                DecoderInstruction::StreamCancellation(stream_id) => {
                    let stream = state
                        .streams
                        .remove(&stream_id)
                        .ok_or_else(|| QpackError::session(H3ErrorCode::QPACK_DECODER_STREAM_ERROR))?;
                    for section in &stream.sections {
                        for index in &section.referenced {
                            state.table.release_reference(*index);
                        }
                    }
                    if stream.blocking_sections > 0 {
                        state.blocked_streams -= 1;
                    }
                }
                DecoderInstruction::InsertCountIncrement(n) => {
                    let new_known = state.known_insert_count + n;
                    if new_known > state.table.insert_count() {
                        return Err(QpackError::session(H3ErrorCode::QPACK_ENCODER_STREAM_ERROR));
                    }
                    state.unblock_up_to(new_known);
                }
            }
        }
        Ok(())
    }

    pub fn take_pending_instructions(&self) -> Vec<EncoderInstruction> {
        std::mem::take(&mut self.state.lock().unwrap().pending_instructions)
    }

    pub fn known_insert_count(&self) -> u64 {
        self.state.lock().unwrap().known_insert_count
    }

    pub fn blocked_streams(&self) -> u16 {
        self.state.lock().unwrap().blocked_streams
    }

    pub fn dynamic_table_size(&self) -> usize {
        self.state.lock().unwrap().table.size()
    }

    pub fn dynamic_table_capacity(&self) -> usize {
        self.state.lock().unwrap().table.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, value: &str) -> HeaderField {
        HeaderField::new(name, Some(value)).unwrap()
    }

    #[test]
    fn static_only_fields_need_no_dynamic_table() {
        let encoder = Encoder::new(EncoderConfig {
            capacity: 4096,
            max_blocked_streams: 16,
        });
        let mut buf = Vec::new();
        encoder.encode(&mut buf, 0, &[field(":method", "GET"), field(":path", "/")]).unwrap();
        assert_eq!(encoder.dynamic_table_size(), 0);
        assert!(encoder.take_pending_instructions().is_empty());
        assert_eq!(buf[0], 0x00); // encoded insert count prefix byte, no insertions
    }

    #[test]
    fn repeated_field_is_duplicated_not_reinserted_literally() {
        let encoder = Encoder::new(EncoderConfig {
            capacity: 4096,
            max_blocked_streams: 16,
        });
        let mut buf = Vec::new();
        encoder.encode(&mut buf, 0, &[field("x-custom", "alpha")]).unwrap();
        buf.clear();
        encoder.encode(&mut buf, 1, &[field("x-custom", "alpha")]).unwrap();

        let pending = encoder.take_pending_instructions();
        assert_eq!(pending.len(), 2);
        assert!(matches!(pending[1], EncoderInstruction::Duplicate(_)));
    }

    #[test]
    fn blocking_budget_caps_second_stream() {
        let encoder = Encoder::new(EncoderConfig {
            capacity: 4096,
            max_blocked_streams: 1,
        });
        let mut buf = Vec::new();
        encoder.encode(&mut buf, 0, &[field("x-fresh", "v1")]).unwrap();
        assert_eq!(encoder.blocked_streams(), 1);

        buf.clear();
        encoder.encode(&mut buf, 4, &[field("x-fresh", "v1")]).unwrap();
        // Second stream can't also block; it must fall back to a literal
        // with a (dynamic) name reference instead of referencing the entry.
        assert_eq!(encoder.blocked_streams(), 1);

        // Wire shape: the two-byte section prefix (encoded insert count,
        // sign+delta base), then the literal-with-dynamic-name-reference
        // pattern `01NT....` (T=0, dynamic table) — not a full literal
        // (`001....`) and not an indexed reference (`1...`/`0001...`).
        assert_eq!(buf[2] & 0xf0, 0x40, "expected a literal field line with a dynamic name reference");
    }

    #[test]
    fn section_acknowledgement_releases_references_and_unblocks() {
        let encoder = Encoder::new(EncoderConfig {
            capacity: 4096,
            max_blocked_streams: 4,
        });
        let mut buf = Vec::new();
        encoder.encode(&mut buf, 0, &[field("x-fresh", "v1")]).unwrap();
        assert_eq!(encoder.blocked_streams(), 1);

        let mut ack = Vec::new();
        super::super::varint::encode(&mut ack, 0x80, 7, 0); // section ack, stream 0
        encoder.parse_instruction_buffer(&ack).unwrap();
        assert_eq!(encoder.blocked_streams(), 0);
    }

    #[test]
    fn insert_count_increment_past_actual_insert_count_is_rejected() {
        let encoder = Encoder::new(EncoderConfig {
            capacity: 4096,
            max_blocked_streams: 4,
        });
        let mut buf = Vec::new();
        super::super::varint::encode(&mut buf, 0, 6, 5); // claims 5 insertions never made
        assert!(encoder.parse_instruction_buffer(&buf).is_err());
    }
}
