//! The in-process concurrent-map replay cache back-end.
//!
//! Stands in for an embedded key-value store (sled, redb, gdbm-equivalent):
//! a real deployment plugs one in behind the same [`ReplayStore`] trait by
//! replacing the `dashmap::DashMap` with a persistent map. Because this
//! back-end keeps no file handle, [`IndexedStore::rotate`] is a full clear
//! rather than a rename.

use dashmap::DashMap;

use core::digest::Digest;

use crate::{ReplayContext, ReplayEntry, ReplayError, ReplayStore, Verdict};

/// A [`ReplayStore`] backed by an in-process concurrent map.
#[derive(Default)]
pub struct IndexedStore {
    entries: DashMap<Vec<u8>, ReplayEntry>,
}

impl IndexedStore {
    /// Constructs an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl ReplayStore for IndexedStore {
    fn check_and_record(
        &mut self,
        digest: &Digest,
        context: ReplayContext,
        now: u64,
    ) -> Result<Verdict, ReplayError> {
        let key = digest.as_bytes().to_vec();
        if let Some(mut existing) = self.entries.get_mut(&key) {
            existing.replay_count += 1;
            existing.first_replay.get_or_insert(now);
            existing.last_replay = Some(now);
            return Ok(Verdict::Replay(existing.clone()));
        }

        self.entries.insert(
            key,
            ReplayEntry {
                context,
                created: now,
                first_replay: None,
                last_replay: None,
                replay_count: 0,
            },
        );
        Ok(Verdict::Fresh)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn rotate(&mut self) -> Result<(), ReplayError> {
        self.entries.clear();
        Ok(())
    }
}
