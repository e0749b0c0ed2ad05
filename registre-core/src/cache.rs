//! Session-scoped memory of the last export generated per parameter set.

use std::collections::HashMap;

use crate::model::{DateRange, ExportId, RegistryDirection, Siret};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// Parameters identifying an export for cooldown recovery.
pub struct ExportKey {
    /// Establishment identifier.
    pub siret: Siret,
    /// Registry direction.
    pub direction: RegistryDirection,
    /// ISO-8601 start bound sent to the API.
    pub range_start: String,
    /// ISO-8601 end bound sent to the API.
    pub range_end: String,
}

impl ExportKey {
    /// Key for the given parameters, using the same bounds sent to the API.
    #[must_use]
    pub fn new(siret: Siret, direction: RegistryDirection, range: &DateRange) -> Self {
        let (range_start, range_end) = range.iso_bounds();
        Self {
            siret,
            direction,
            range_start,
            range_end,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Last export generated for a key.
pub struct ExportCacheEntry {
    /// Job identifier.
    pub export_id: ExportId,
    /// Parameters it was generated with.
    pub key: ExportKey,
}

/// Last known export per parameter set.
///
/// Owned by the caller: create one per session and clear it whenever the
/// credential or the selected establishment changes.
#[derive(Debug, Default)]
pub struct ExportCache {
    entries: HashMap<ExportKey, ExportCacheEntry>,
}

impl ExportCache {
    /// Empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember `export_id` for `key`, replacing any previous entry.
    pub fn record(&mut self, key: ExportKey, export_id: ExportId) {
        self.entries.insert(
            key.clone(),
            ExportCacheEntry { export_id, key },
        );
    }

    /// Entry for `key`, ignoring entries without an identifier.
    #[must_use]
    pub fn lookup(&self, key: &ExportKey) -> Option<&ExportCacheEntry> {
        self.entries
            .get(key)
            .filter(|entry| !entry.export_id.is_empty())
    }

    /// Forget every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of remembered exports.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is remembered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn key(direction: RegistryDirection) -> ExportKey {
        let siret = Siret::parse("12345678901234").expect("valid siret");
        let day = NaiveDate::from_ymd_opt(2024, 5, 1).expect("valid date");
        let range = DateRange::new(day, day).expect("valid range");
        ExportKey::new(siret, direction, &range)
    }

    #[test]
    fn record_overwrites_same_key() {
        let mut cache = ExportCache::new();
        cache.record(key(RegistryDirection::Incoming), ExportId("a".into()));
        cache.record(key(RegistryDirection::Incoming), ExportId("b".into()));
        assert_eq!(cache.len(), 1, "one entry per key");
        assert_eq!(
            cache
                .lookup(&key(RegistryDirection::Incoming))
                .map(|entry| entry.export_id.0.as_str()),
            Some("b"),
            "latest export wins"
        );
    }

    #[test]
    fn lookup_is_keyed_by_direction_and_skips_empty_ids() {
        let mut cache = ExportCache::new();
        cache.record(key(RegistryDirection::Incoming), ExportId("a".into()));
        cache.record(key(RegistryDirection::Outgoing), ExportId(String::new()));
        assert!(cache.lookup(&key(RegistryDirection::Outgoing)).is_none(), "empty id ignored");
        cache.clear();
        assert!(cache.is_empty(), "cleared");
    }

    #[test]
    fn entry_remembers_its_parameters() {
        let mut cache = ExportCache::new();
        cache.record(key(RegistryDirection::Outgoing), ExportId("job".into()));
        let entry = cache
            .lookup(&key(RegistryDirection::Outgoing))
            .expect("entry recorded");
        assert_eq!(entry.key, key(RegistryDirection::Outgoing), "key stored with the id");
        assert_eq!(entry.key.range_start, "2024-05-01T00:00:00Z", "ISO lower bound");
        assert_eq!(entry.key.range_end, "2024-05-01T23:59:59Z", "ISO upper bound");
    }
}
