// holds the current pattern behind an atomically swapped pointer so the UI can
// replace it while the sequencer is playing; the step handler reads it fresh on
// every step and never waits on a lock.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::pattern::Pattern;

#[derive(Debug)]
pub struct Versioned {
    pub version: u64,
    pub pattern: Pattern,
}

#[derive(Clone, Debug)]
pub struct PatternHandle {
    inner: Arc<ArcSwap<Versioned>>,
}

impl PatternHandle {
    pub fn new(pattern: Pattern) -> Self {
        Self { inner: Arc::new(ArcSwap::from_pointee(Versioned { version: 0, pattern })) }
    }

    /// The current snapshot. Cheap; hold it only as long as one step needs it.
    pub fn load(&self) -> Arc<Versioned> {
        self.inner.load_full()
    }

    pub fn version(&self) -> u64 {
        self.inner.load().version
    }

    /// Replaces the pattern and bumps the version.
    pub fn store(&self, pattern: Pattern) {
        self.inner.rcu(|cur| Versioned { version: cur.version + 1, pattern: pattern.clone() });
    }

    /// Edits a copy of the current pattern and publishes it.
    pub fn update(&self, f: impl Fn(&mut Pattern)) {
        self.inner.rcu(|cur| {
            let mut pattern = cur.pattern.clone();
            f(&mut pattern);
            Versioned { version: cur.version + 1, pattern }
        });
    }

    pub fn same_as(&self, other: &PatternHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for PatternHandle {
    fn default() -> Self {
        Self::new(Pattern::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_see_each_others_edits() {
        let a = PatternHandle::new(Pattern::empty(1));
        let b = a.clone();
        let before = a.load();
        b.update(|p| p.bpm = 90.0);
        assert_eq!(a.load().pattern.bpm, 90.0);
        assert_eq!(a.version(), 1);
        // an old snapshot is unaffected
        assert_eq!(before.pattern.bpm, Pattern::empty(1).bpm);
        assert!(a.same_as(&b));
    }

    #[test]
    fn store_replaces_whole_pattern() {
        let h = PatternHandle::default();
        h.store(Pattern::empty(2).with_bpm(140.0));
        let snap = h.load();
        assert_eq!((snap.version, snap.pattern.bars, snap.pattern.bpm), (1, 2, 140.0));
        assert!(!h.same_as(&PatternHandle::default()));
    }
}
