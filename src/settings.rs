//! Connection-scoped settings records.
//!
//! The demultiplexer holds one record for what the peer told us (ingress)
//! and one for what we advertise (egress). It never interprets them; the
//! per-stream codecs read the limits they care about.

/// HTTP/3 SETTINGS identifiers (RFC 9114 Section 7.2.4.1, RFC 9204)
pub mod settings_id {
    pub const QPACK_MAX_TABLE_CAPACITY: u64 = 0x1;
    pub const MAX_FIELD_SECTION_SIZE: u64 = 0x6;
    pub const QPACK_BLOCKED_STREAMS: u64 = 0x7;
    pub const ENABLE_CONNECT_PROTOCOL: u64 = 0x8;
    pub const H3_DATAGRAM: u64 = 0x33;
}

/// Ordered `(identifier, value)` pairs. Unknown identifiers are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    entries: Vec<(u64, u64)>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: u64) -> Option<u64> {
        self.entries
            .iter()
            .find(|(entry_id, _)| *entry_id == id)
            .map(|(_, value)| *value)
    }

    /// Set or replace a value, keeping the original position.
    pub fn set(&mut self, id: u64, value: u64) {
        match self.entries.iter_mut().find(|(entry_id, _)| *entry_id == id) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((id, value)),
        }
    }

    pub fn unset(&mut self, id: u64) -> Option<u64> {
        let pos = self.entries.iter().position(|(entry_id, _)| *entry_id == id)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.entries.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Dynamic table capacity; 0 when absent.
    pub fn qpack_max_table_capacity(&self) -> u64 {
        self.get(settings_id::QPACK_MAX_TABLE_CAPACITY).unwrap_or(0)
    }

    /// Largest header list the sender of this record accepts; unlimited when absent.
    pub fn max_field_section_size(&self) -> u64 {
        self.get(settings_id::MAX_FIELD_SECTION_SIZE)
            .unwrap_or(u64::MAX)
    }

    pub fn qpack_blocked_streams(&self) -> u64 {
        self.get(settings_id::QPACK_BLOCKED_STREAMS).unwrap_or(0)
    }
}

impl FromIterator<(u64, u64)> for Settings {
    fn from_iter<I: IntoIterator<Item = (u64, u64)>>(iter: I) -> Self {
        let mut settings = Settings::new();
        for (id, value) in iter {
            settings.set(id, value);
        }
        settings
    }
}
