//! HPACK static and dynamic tables (RFC 7541 Section 2.3)
//!
//! Both tables share one index space: 1..=61 address the static table and
//! 62.. address the dynamic table, newest entry first.

use super::HeaderField;
use crate::http::h2::error::{Error, Result};
use std::collections::VecDeque;

/// Per-entry overhead counted towards the dynamic table size
pub const ENTRY_OVERHEAD: usize = 32;

/// Static table as defined in RFC 7541 Appendix A
pub static STATIC_TABLE: [(&str, &str); 61] = [
    (":authority", ""),                   // 1
    (":method", "GET"),                   // 2
    (":method", "POST"),                  // 3
    (":path", "/"),                       // 4
    (":path", "/index.html"),             // 5
    (":scheme", "http"),                  // 6
    (":scheme", "https"),                 // 7
    (":status", "200"),                   // 8
    (":status", "204"),                   // 9
    (":status", "206"),                   // 10
    (":status", "304"),                   // 11
    (":status", "400"),                   // 12
    (":status", "404"),                   // 13
    (":status", "500"),                   // 14
    ("accept-charset", ""),               // 15
    ("accept-encoding", "gzip, deflate"), // 16
    ("accept-language", ""),              // 17
    ("accept-ranges", ""),                // 18
    ("accept", ""),                       // 19
    ("access-control-allow-origin", ""),  // 20
    ("age", ""),                          // 21
    ("allow", ""),                        // 22
    ("authorization", ""),                // 23
    ("cache-control", ""),                // 24
    ("content-disposition", ""),          // 25
    ("content-encoding", ""),             // 26
    ("content-language", ""),             // 27
    ("content-length", ""),               // 28
    ("content-location", ""),             // 29
    ("content-range", ""),                // 30
    ("content-type", ""),                 // 31
    ("cookie", ""),                       // 32
    ("date", ""),                         // 33
    ("etag", ""),                         // 34
    ("expect", ""),                       // 35
    ("expires", ""),                      // 36
    ("from", ""),                         // 37
    ("host", ""),                         // 38
    ("if-match", ""),                     // 39
    ("if-modified-since", ""),            // 40
    ("if-none-match", ""),                // 41
    ("if-range", ""),                     // 42
    ("if-unmodified-since", ""),          // 43
    ("last-modified", ""),                // 44
    ("link", ""),                         // 45
    ("location", ""),                     // 46
    ("max-forwards", ""),                 // 47
    ("proxy-authenticate", ""),           // 48
    ("proxy-authorization", ""),          // 49
    ("range", ""),                        // 50
    ("referer", ""),                      // 51
    ("refresh", ""),                      // 52
    ("retry-after", ""),                  // 53
    ("server", ""),                       // 54
    ("set-cookie", ""),                   // 55
    ("strict-transport-security", ""),    // 56
    ("transfer-encoding", ""),            // 57
    ("user-agent", ""),                   // 58
    ("vary", ""),                         // 59
    ("via", ""),                          // 60
    ("www-authenticate", ""),             // 61
];

/// Result of looking a header field up in the combined index space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableMatch {
    /// Name and value both match the entry at this index
    Full(usize),
    /// Only the name matches the entry at this index
    Name(usize),
}

/// HPACK dynamic table
///
/// Entries are inserted at the front and evicted from the back. The sum of
/// entry sizes never exceeds `max_size`, and `max_size` never exceeds
/// `max_size_limit`.
#[derive(Debug, Clone)]
pub struct DynamicTable {
    entries: VecDeque<HeaderField>,
    size: usize,
    max_size: usize,
    max_size_limit: usize,
}

impl DynamicTable {
    /// Create an empty table whose size and ceiling both start at `limit`
    pub fn new(limit: usize) -> Self {
        DynamicTable {
            entries: VecDeque::new(),
            size: 0,
            max_size: limit,
            max_size_limit: limit,
        }
    }

    /// Current size in octets (entry sizes including overhead)
    pub fn size(&self) -> usize {
        self.size
    }

    /// Maximum size currently in force
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Ceiling imposed by SETTINGS_HEADER_TABLE_SIZE
    pub fn max_size_limit(&self) -> usize {
        self.max_size_limit
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the table has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries, newest first
    pub fn entries(&self) -> impl Iterator<Item = &HeaderField> {
        self.entries.iter()
    }

    /// Get an entry by its position in the dynamic table (0 = newest)
    pub fn get(&self, position: usize) -> Option<&HeaderField> {
        self.entries.get(position)
    }

    /// Apply a dynamic table size update
    ///
    /// Fails with COMPRESSION_ERROR if `max_size` exceeds the ceiling.
    pub fn set_max_size(&mut self, max_size: usize) -> Result<()> {
        if max_size > self.max_size_limit {
            return Err(Error::compression(format!(
                "dynamic table size update {} exceeds limit {}",
                max_size, self.max_size_limit
            )));
        }
        self.max_size = max_size;
        self.evict();
        Ok(())
    }

    /// Change the ceiling; the current maximum only ever shrinks to meet it
    ///
    /// Returns true if the maximum size was lowered.
    pub fn set_max_size_limit(&mut self, limit: usize) -> bool {
        self.max_size_limit = limit;
        let lowered = self.max_size > limit;
        if lowered {
            self.max_size = limit;
        }
        self.evict();
        lowered
    }

    /// Insert a field at the front, evicting the oldest entries to make room
    ///
    /// A field larger than the whole table empties it and is not stored.
    pub fn insert(&mut self, field: HeaderField) {
        let entry_size = field.size();
        if entry_size > self.max_size {
            self.entries.clear();
            self.size = 0;
            return;
        }

        self.entries.push_front(field);
        self.size += entry_size;
        self.evict();
    }

    fn evict(&mut self) {
        while self.size > self.max_size {
            match self.entries.pop_back() {
                Some(evicted) => self.size -= evicted.size(),
                None => break,
            }
        }
    }
}

/// Resolve an index in the combined static + dynamic index space
pub fn get_indexed(dynamic: &DynamicTable, index: usize) -> Result<HeaderField> {
    if index == 0 {
        return Err(Error::compression("header table index 0"));
    }

    if index <= STATIC_TABLE.len() {
        let (name, value) = STATIC_TABLE[index - 1];
        return Ok(HeaderField::new(name, value));
    }

    dynamic
        .get(index - STATIC_TABLE.len() - 1)
        .cloned()
        .ok_or_else(|| Error::compression(format!("header table index {} out of range", index)))
}

/// Find the best match for a field in the combined index space
///
/// Full matches win over name matches; the static table is searched before
/// the dynamic table.
pub fn find(dynamic: &DynamicTable, field: &HeaderField) -> Option<TableMatch> {
    let mut name_match = None;

    for (i, (name, value)) in STATIC_TABLE.iter().enumerate() {
        if *name == field.name {
            if *value == field.value {
                return Some(TableMatch::Full(i + 1));
            }
            name_match.get_or_insert(TableMatch::Name(i + 1));
        }
    }

    for (i, entry) in dynamic.entries().enumerate() {
        if entry.name == field.name {
            let index = STATIC_TABLE.len() + i + 1;
            if entry.value == field.value {
                return Some(TableMatch::Full(index));
            }
            name_match.get_or_insert(TableMatch::Name(index));
        }
    }

    name_match
}
