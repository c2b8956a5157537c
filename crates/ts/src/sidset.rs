//! Inclusion/exclusion set of service IDs.

use std::collections::HashSet;

/// A set of 16-bit service IDs used for `--sids`/`--xsid` inclusion and
/// exclusion lists across `scan-services`, `collect-eitpf`, and
/// `sync-clocks`.
#[derive(Debug, Clone, Default)]
pub struct SidSet {
    set: HashSet<u16>,
}

impl SidSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn contains(&self, sid: u16) -> bool {
        self.set.contains(&sid)
    }

    pub fn add(&mut self, sid: u16) {
        self.set.insert(sid);
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.set.iter().copied()
    }

    /// Build from a list of decimal strings, silently ignoring entries that
    /// are not purely numeric (mirrors `SidSet::Add(vector<string>)`'s
    /// `stoi` + full-match check in the original).
    pub fn from_strings<I: IntoIterator<Item = S>, S: AsRef<str>>(values: I) -> Self {
        let mut set = Self::new();
        for s in values {
            if let Ok(sid) = s.as_ref().parse::<u16>() {
                set.add(sid);
            }
        }
        set
    }
}

impl FromIterator<u16> for SidSet {
    fn from_iter<I: IntoIterator<Item = u16>>(iter: I) -> Self {
        SidSet {
            set: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        let s = SidSet::new();
        assert!(s.is_empty());
        assert!(!s.contains(1));
    }

    #[test]
    fn test_from_strings_ignores_non_numeric() {
        let s = SidSet::from_strings(["1", "2", "abc", "3x", "4"]);
        assert_eq!(s.len(), 3);
        assert!(s.contains(1));
        assert!(s.contains(2));
        assert!(s.contains(4));
        assert!(!s.contains(3));
    }
}
