//! HPACK header compression (RFC 7541)
//!
//! A connection owns one [`HeaderCompression`] context. Its [`Decoder`]
//! tracks the table the peer builds when sending requests, its [`Encoder`]
//! tracks the table the peer mirrors while reading our responses. The
//! static table and the Huffman code are process-wide constants.

pub mod huffman;
pub mod integer;
pub mod table;

use bytes::{Bytes, BytesMut};
use std::collections::{HashSet, VecDeque};
use std::fmt;

use self::integer::{decode_integer, decode_string, encode_integer, encode_string};
use self::table::{DynamicTable, TableMatch, ENTRY_OVERHEAD};
use super::error::Result;
use super::DEFAULT_HEADER_TABLE_SIZE;

/// A header name/value pair
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HeaderField {
    /// Header name (lowercase on the wire)
    pub name: String,
    /// Header value
    pub value: String,
}

impl HeaderField {
    /// Create a new header field
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        HeaderField {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Size counted against the dynamic table: name + value + 32
    pub fn size(&self) -> usize {
        self.name.len() + self.value.len() + ENTRY_OVERHEAD
    }
}

impl fmt::Display for HeaderField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.value)
    }
}

/// Octets of never-indexed fields a decoder remembers, counted like table
/// entries. The oldest fields are forgotten first.
pub const NEVER_INDEXED_LIMIT: usize = 4096;

/// HPACK decoder
#[derive(Debug)]
pub struct Decoder {
    table: DynamicTable,
    never_indexed: HashSet<HeaderField>,
    /// Insertion order of `never_indexed`, oldest first
    never_indexed_order: VecDeque<HeaderField>,
    never_indexed_size: usize,
}

impl Decoder {
    /// Create a decoder whose table ceiling is our advertised HEADER_TABLE_SIZE
    pub fn new(max_table_size: usize) -> Self {
        Decoder {
            table: DynamicTable::new(max_table_size),
            never_indexed: HashSet::new(),
            never_indexed_order: VecDeque::new(),
            never_indexed_size: 0,
        }
    }

    /// The decoder's dynamic table
    pub fn table(&self) -> &DynamicTable {
        &self.table
    }

    /// Fields the peer marked as never-indexed
    pub fn never_indexed(&self) -> &HashSet<HeaderField> {
        &self.never_indexed
    }

    /// Lower or raise the ceiling for size updates from the peer
    pub fn set_max_table_size_limit(&mut self, limit: usize) {
        self.table.set_max_size_limit(limit);
    }

    /// Decode a complete header block
    pub fn decode(&mut self, block: &[u8]) -> Result<Vec<HeaderField>> {
        let mut src = block;
        let mut fields = Vec::new();

        while let Some(&first) = src.first() {
            if first & 0x80 != 0 {
                // Indexed header field
                let index = decode_integer(&mut src, 7)?;
                fields.push(table::get_indexed(&self.table, index)?);
            } else if first & 0x40 != 0 {
                // Literal with incremental indexing
                let field = self.decode_literal(&mut src, 6)?;
                self.table.insert(field.clone());
                fields.push(field);
            } else if first & 0x20 != 0 {
                // Dynamic table size update
                let size = decode_integer(&mut src, 5)?;
                self.table.set_max_size(size)?;
            } else {
                // Literal without indexing (0000) or never indexed (0001)
                let never_indexed = first & 0x10 != 0;
                let field = self.decode_literal(&mut src, 4)?;
                if never_indexed {
                    self.remember_never_indexed(&field);
                }
                fields.push(field);
            }
        }

        Ok(fields)
    }

    fn remember_never_indexed(&mut self, field: &HeaderField) {
        if !self.never_indexed.insert(field.clone()) {
            return;
        }
        self.never_indexed_size += field.size();
        self.never_indexed_order.push_back(field.clone());

        // The newest field is always kept, even when it alone is over the limit
        while self.never_indexed_size > NEVER_INDEXED_LIMIT && self.never_indexed_order.len() > 1 {
            if let Some(oldest) = self.never_indexed_order.pop_front() {
                self.never_indexed_size -= oldest.size();
                self.never_indexed.remove(&oldest);
            }
        }
    }

    fn decode_literal(&self, src: &mut &[u8], prefix_bits: u8) -> Result<HeaderField> {
        let name_index = decode_integer(src, prefix_bits)?;
        let name = if name_index == 0 {
            decode_string(src)?
        } else {
            table::get_indexed(&self.table, name_index)?.name
        };
        let value = decode_string(src)?;
        Ok(HeaderField { name, value })
    }
}

/// HPACK encoder
#[derive(Debug, Clone)]
pub struct Encoder {
    table: DynamicTable,
    use_huffman: bool,
    pending_size_update: Option<usize>,
}

impl Encoder {
    /// Create an encoder whose table ceiling is the peer's HEADER_TABLE_SIZE
    pub fn new(max_table_size: usize) -> Self {
        Encoder {
            table: DynamicTable::new(max_table_size),
            use_huffman: true,
            pending_size_update: None,
        }
    }

    /// Select Huffman coding for string literals (on by default)
    pub fn set_huffman(&mut self, use_huffman: bool) {
        self.use_huffman = use_huffman;
    }

    /// The encoder's dynamic table
    pub fn table(&self) -> &DynamicTable {
        &self.table
    }

    /// Apply the peer's HEADER_TABLE_SIZE
    ///
    /// If this shrinks the table, the next header block starts with a
    /// dynamic table size update so the peer evicts the same entries.
    pub fn set_max_table_size_limit(&mut self, limit: usize) {
        if self.table.set_max_size_limit(limit) {
            self.pending_size_update = Some(self.table.max_size());
        }
    }

    /// Encode a header list into one header block
    ///
    /// Fields found in `never_indexed` go out as never-indexed literals even
    /// when a table entry matches.
    pub fn encode(
        &mut self,
        fields: &[HeaderField],
        never_indexed: &HashSet<HeaderField>,
    ) -> Result<Bytes> {
        let mut dst = BytesMut::with_capacity(fields.len() * 16);

        if let Some(size) = self.pending_size_update.take() {
            encode_integer(&mut dst, size, 5, 0x20);
        }

        for field in fields {
            let found = table::find(&self.table, field);

            if never_indexed.contains(field) {
                let name_index = match found {
                    Some(TableMatch::Full(index)) | Some(TableMatch::Name(index)) => index,
                    None => 0,
                };
                self.encode_literal(&mut dst, field, name_index, 4, 0x10)?;
                continue;
            }

            match found {
                Some(TableMatch::Full(index)) => encode_integer(&mut dst, index, 7, 0x80),
                Some(TableMatch::Name(index)) => {
                    self.encode_literal(&mut dst, field, index, 6, 0x40)?;
                    self.table.insert(field.clone());
                }
                None => {
                    self.encode_literal(&mut dst, field, 0, 6, 0x40)?;
                    self.table.insert(field.clone());
                }
            }
        }

        Ok(dst.freeze())
    }

    fn encode_literal(
        &self,
        dst: &mut BytesMut,
        field: &HeaderField,
        name_index: usize,
        prefix_bits: u8,
        flags: u8,
    ) -> Result<()> {
        encode_integer(dst, name_index, prefix_bits, flags);
        if name_index == 0 {
            encode_string(dst, &field.name, self.use_huffman)?;
        }
        encode_string(dst, &field.value, self.use_huffman)
    }
}

/// Per-connection HPACK state
#[derive(Debug)]
pub struct HeaderCompression {
    decoder: Decoder,
    encoder: Encoder,
}

impl HeaderCompression {
    /// Create a context; `local_table_size` is our advertised HEADER_TABLE_SIZE
    pub fn new(local_table_size: usize) -> Self {
        HeaderCompression {
            decoder: Decoder::new(local_table_size),
            encoder: Encoder::new(DEFAULT_HEADER_TABLE_SIZE as usize),
        }
    }

    /// Decode a header block received from the peer
    pub fn decode_header_block(&mut self, block: &[u8]) -> Result<Vec<HeaderField>> {
        self.decoder.decode(block)
    }

    /// Encode a header list to send to the peer
    pub fn encode_header_block(&mut self, fields: &[HeaderField]) -> Result<Bytes> {
        self.encoder.encode(fields, self.decoder.never_indexed())
    }

    /// Encode a header list that has to fit in `limit` octets
    ///
    /// Returns `Ok(None)` if the block would be larger; the encoder table is
    /// then left as it was, so the peer's copy stays in sync.
    pub fn encode_header_block_within(
        &mut self,
        fields: &[HeaderField],
        limit: usize,
    ) -> Result<Option<Bytes>> {
        // Size update + per field: representation prefix, two length prefixes
        let worst_case = 6 + fields
            .iter()
            .map(|f| f.name.len() + f.value.len() + 16)
            .sum::<usize>();
        if worst_case <= limit {
            return self.encode_header_block(fields).map(Some);
        }

        let snapshot = self.encoder.clone();
        let block = self.encode_header_block(fields)?;
        if block.len() > limit {
            self.encoder = snapshot;
            return Ok(None);
        }
        Ok(Some(block))
    }

    /// Apply the peer's HEADER_TABLE_SIZE setting
    pub fn set_max_dynamic_table_size_limit(&mut self, limit: usize) {
        self.encoder.set_max_table_size_limit(limit);
    }

    /// Decoder half
    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    /// Encoder half
    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    /// Mutable encoder half
    pub fn encoder_mut(&mut self) -> &mut Encoder {
        &mut self.encoder
    }
}

impl Default for HeaderCompression {
    fn default() -> Self {
        Self::new(DEFAULT_HEADER_TABLE_SIZE as usize)
    }
}
