//! Candidacy records and the ordered candidate set

use std::fmt;

/// One candidate's ephemeral record, named `<prefix><ordinal>` relative to
/// the election namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CandidacyRecord {
    name: String,
    ordinal: u64,
}

impl CandidacyRecord {
    /// Parse a namespace-relative name. Returns `None` for names that do not
    /// carry `prefix` followed by a decimal ordinal.
    pub fn parse(prefix: &str, name: &str) -> Option<Self> {
        let suffix = name.strip_prefix(prefix)?;
        if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let ordinal = suffix.parse().ok()?;
        Some(Self {
            name: name.to_string(),
            ordinal,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ordinal(&self) -> u64 {
        self.ordinal
    }
}

impl fmt::Display for CandidacyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Snapshot of the namespace's candidacy records, ascending by ordinal
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateSet {
    records: Vec<CandidacyRecord>,
}

impl CandidateSet {
    /// Build from a raw child listing. Children that are not candidacy
    /// records are skipped.
    pub fn from_children<I, S>(prefix: &str, children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut records: Vec<CandidacyRecord> = children
            .into_iter()
            .filter_map(|name| CandidacyRecord::parse(prefix, name.as_ref()))
            .collect();
        records.sort_by_key(CandidacyRecord::ordinal);
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Holder of the smallest ordinal
    pub fn leader(&self) -> Option<&CandidacyRecord> {
        self.records.first()
    }

    pub fn position(&self, record: &CandidacyRecord) -> Option<usize> {
        self.records
            .binary_search_by_key(&record.ordinal, CandidacyRecord::ordinal)
            .ok()
            .filter(|&idx| self.records[idx].name == record.name)
    }

    /// The record immediately before `record`. `Some(None)` means `record`
    /// leads; `None` means it is not in the set.
    pub fn predecessor(&self, record: &CandidacyRecord) -> Option<Option<&CandidacyRecord>> {
        let idx = self.position(record)?;
        Some(idx.checked_sub(1).map(|prev| &self.records[prev]))
    }

    pub fn iter(&self) -> impl Iterator<Item = &CandidacyRecord> {
        self.records.iter()
    }
}
