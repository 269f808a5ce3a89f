use std::sync::Arc;

/// One row of the roster as displayed: who it is and what to call them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub identity: String,
    pub label: String,
}

/// Display-oriented list of the participants in a room, self included.
///
/// Every mutation swaps in a fresh snapshot and bumps `version`, so observers
/// can detect changes by pointer or version comparison.
#[derive(Debug, Clone, Default)]
pub struct RosterStore {
    entries: Arc<Vec<RosterEntry>>,
    version: u64,
}

impl RosterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the roster with self followed by the participants already present.
    pub fn seed(
        &mut self,
        local: RosterEntry,
        existing: impl IntoIterator<Item = RosterEntry>,
    ) {
        let mut next = vec![local];
        for entry in existing {
            if !next.iter().any(|e| e.identity == entry.identity) {
                next.push(entry);
            }
        }
        self.replace(next);
    }

    /// Insert if absent. Returns `false` when the identity was already present.
    pub fn on_join(&mut self, identity: &str, display_name: Option<&str>) -> bool {
        if self.entries.iter().any(|e| e.identity == identity) {
            return false;
        }
        let mut next = self.entries.as_ref().clone();
        next.push(RosterEntry {
            identity: identity.to_string(),
            label: label_for(identity, display_name),
        });
        self.replace(next);
        true
    }

    /// Remove by identity. Returns `false` when nothing was removed.
    pub fn on_leave(&mut self, identity: &str) -> bool {
        if !self.entries.iter().any(|e| e.identity == identity) {
            return false;
        }
        let next = self
            .entries
            .iter()
            .filter(|e| e.identity != identity)
            .cloned()
            .collect();
        self.replace(next);
        true
    }

    /// Relabel the entry for `identity` in place, keeping its position.
    ///
    /// The entry is found by identity first; failing that, by a label equal to
    /// the previous display label or to the identity itself.
    pub fn on_rename(&mut self, identity: &str, previous_label: &str, new_name: Option<&str>) -> bool {
        let position = self
            .entries
            .iter()
            .position(|e| e.identity == identity)
            .or_else(|| {
                self.entries
                    .iter()
                    .position(|e| e.label == previous_label || e.label == identity)
            });
        let Some(index) = position else {
            return false;
        };

        let mut next = self.entries.as_ref().clone();
        next[index].label = label_for(identity, new_name);
        self.replace(next);
        true
    }

    pub fn entries(&self) -> Arc<Vec<RosterEntry>> {
        self.entries.clone()
    }

    pub fn labels(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.label.clone()).collect()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.entries.iter().any(|e| e.identity == identity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn clear(&mut self) {
        self.replace(Vec::new());
    }

    fn replace(&mut self, next: Vec<RosterEntry>) {
        self.entries = Arc::new(next);
        self.version += 1;
    }
}

fn label_for(identity: &str, name: Option<&str>) -> String {
    name.filter(|n| !n.is_empty()).unwrap_or(identity).to_string()
}
