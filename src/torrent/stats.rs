use crate::ndn::name::Name;

/// Success bookkeeping for one routable prefix.
#[derive(Debug, Clone)]
pub struct PrefixStats {
    prefix: Name,
    successes: u64,
    failures: u64,
    order: u64,
}

impl PrefixStats {
    pub fn prefix(&self) -> &Name {
        &self.prefix
    }

    pub fn successes(&self) -> u64 {
        self.successes
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    fn ratio(&self) -> f64 {
        let attempts = self.successes + self.failures;
        if attempts == 0 {
            0.0
        } else {
            self.successes as f64 / attempts as f64
        }
    }
}

/// Ordered multiset of routable prefixes with success counters and a
/// wrapping cursor. The cursor is a logical position: it tracks its prefix
/// across `sort` calls rather than a raw index.
#[derive(Debug, Default)]
pub struct StatsTable {
    entries: Vec<PrefixStats>,
    cursor: usize,
    next_order: u64,
}

impl StatsTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, prefix: Name) {
        if self.entries.iter().any(|e| e.prefix == prefix) {
            return;
        }
        self.entries.push(PrefixStats {
            prefix,
            successes: 0,
            failures: 0,
            order: self.next_order,
        });
        self.next_order += 1;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[PrefixStats] {
        &self.entries
    }

    pub fn get(&self, prefix: &Name) -> Option<&PrefixStats> {
        self.entries.iter().find(|e| e.prefix == *prefix)
    }

    /// The prefix the cursor currently points at.
    pub fn current_prefix(&self) -> Option<&Name> {
        self.entries.get(self.cursor).map(|e| &e.prefix)
    }

    /// Advance the cursor to the next prefix in current order, wrapping.
    pub fn advance_cursor(&mut self) {
        if !self.entries.is_empty() {
            self.cursor = (self.cursor + 1) % self.entries.len();
        }
    }

    /// Every prefix except the cursor's, in current order; the forwarding
    /// hint attached to outbound requests.
    pub fn alternates(&self) -> Vec<Name> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != self.cursor)
            .map(|(_, e)| e.prefix.clone())
            .collect()
    }

    pub fn record_success(&mut self, prefix: &Name) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.prefix == *prefix) {
            entry.successes += 1;
        }
    }

    pub fn record_failure(&mut self, prefix: &Name) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.prefix == *prefix) {
            entry.failures += 1;
        }
    }

    /// Re-order descending by success ratio, ties broken by insertion order.
    /// The cursor keeps pointing at the same prefix.
    pub fn sort(&mut self) {
        let current = self.current_prefix().cloned();
        self.entries.sort_by(|a, b| {
            b.ratio()
                .partial_cmp(&a.ratio())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.order.cmp(&b.order))
        });
        if let Some(current) = current {
            self.cursor = self
                .entries
                .iter()
                .position(|e| e.prefix == current)
                .unwrap_or(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(u: &str) -> Name {
        Name::from_uri(u).unwrap()
    }

    fn table(prefixes: &[&str]) -> StatsTable {
        let mut t = StatsTable::new();
        for p in prefixes {
            t.insert(name(p));
        }
        t
    }

    #[test]
    fn insert_deduplicates() {
        let mut t = table(&["/a", "/b"]);
        t.insert(name("/a"));
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn cursor_wraps() {
        let mut t = table(&["/a", "/b", "/c"]);
        assert_eq!(t.current_prefix(), Some(&name("/a")));
        t.advance_cursor();
        t.advance_cursor();
        assert_eq!(t.current_prefix(), Some(&name("/c")));
        t.advance_cursor();
        assert_eq!(t.current_prefix(), Some(&name("/a")));
    }

    #[test]
    fn sort_orders_by_ratio_with_insertion_tiebreak() {
        let mut t = table(&["/a", "/b", "/c"]);
        t.record_failure(&name("/a"));
        t.record_success(&name("/b"));
        t.record_success(&name("/c"));
        t.record_failure(&name("/c"));
        t.sort();
        let order: Vec<String> = t.entries().iter().map(|e| e.prefix().to_string()).collect();
        // /b at 1.0, /c at 0.5, /a at 0.0; untouched entries tie at 0 by insertion.
        assert_eq!(order, vec!["/b", "/c", "/a"]);
    }

    #[test]
    fn cursor_survives_sort() {
        let mut t = table(&["/a", "/b"]);
        t.advance_cursor();
        assert_eq!(t.current_prefix(), Some(&name("/b")));
        t.record_success(&name("/b"));
        t.sort();
        assert_eq!(t.current_prefix(), Some(&name("/b")));
        assert_eq!(t.entries()[0].prefix(), &name("/b"));
    }

    #[test]
    fn alternates_exclude_cursor() {
        let mut t = table(&["/a", "/b", "/c"]);
        t.advance_cursor();
        assert_eq!(t.alternates(), vec![name("/a"), name("/c")]);
    }
}
