//! Dual-generation tile cache with priority eviction
//!
//! Two tile pools support flicker-free viewport transitions: the *active*
//! generation holds the current pass, the *passive* generation the previous
//! one, retained as a fallback so the view is never blank mid-refresh.
//! Eviction drains passive first, least-urgent tiles first. Thumbnails live
//! in an independent strict-FIFO store.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use log::debug;

use crate::part::TilePart;
use crate::task::TileId;

/// Counters for cache activity
///
/// `released` counts successful buffer releases (evictions plus teardown),
/// so `stored == released + resident` holds at any quiescent point.
#[derive(Clone, Copy, Debug, Default)]
pub struct CacheStats {
    pub stored: u64,
    pub evicted: u64,
    pub released: u64,
    pub promoted: u64,
}

/// One generation: tiles ordered by (priority, insertion sequence) with an
/// identity index on the side
///
/// The ordered map stands in for a priority queue whose ordering key can be
/// rewritten: re-prioritizing removes and re-inserts under the new key
/// instead of mutating a key in place.
#[derive(Default)]
struct Generation {
    order: BTreeMap<(u32, u64), TilePart>,
    index: HashMap<TileId, (u32, u64)>,
}

impl Generation {
    fn insert(&mut self, part: TilePart, seq: u64) {
        let key = (part.priority(), seq);
        self.index.insert(part.id(), key);
        self.order.insert(key, part);
    }

    fn remove(&mut self, id: &TileId) -> Option<TilePart> {
        let key = self.index.remove(id)?;
        self.order.remove(&key)
    }

    fn contains(&self, id: &TileId) -> bool {
        self.index.contains_key(id)
    }

    /// Pop the least urgent tile: highest priority number, ties broken by
    /// newest insertion
    fn pop_least_urgent(&mut self) -> Option<TilePart> {
        let (key, part) = self.order.pop_last()?;
        self.index.remove(&part.id());
        debug_assert_eq!(key.0, part.priority());
        Some(part)
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn drain(&mut self) -> Vec<TilePart> {
        self.index.clear();
        std::mem::take(&mut self.order).into_values().collect()
    }

    fn parts(&self) -> impl Iterator<Item = &TilePart> {
        self.order.values()
    }
}

struct Generations {
    active: Generation,
    passive: Generation,
    seq: u64,
    stats: CacheStats,
}

struct ThumbnailStore {
    parts: VecDeque<TilePart>,
    capacity: usize,
}

/// Bounded, priority-ordered store of rendered tiles
///
/// All generation mutations share one mutex; the thumbnail store is guarded
/// independently. Every critical section is short and non-blocking, so the
/// interactive context never waits on a render.
pub struct TileCache {
    generations: Mutex<Generations>,
    thumbnails: Mutex<ThumbnailStore>,
    capacity: usize,
}

impl TileCache {
    /// Create a cache bounded to `capacity` tiles across both generations
    /// and `thumbnail_capacity` thumbnails
    #[must_use]
    pub fn new(capacity: usize, thumbnail_capacity: usize) -> Self {
        Self {
            generations: Mutex::new(Generations {
                active: Generation::default(),
                passive: Generation::default(),
                seq: 0,
                stats: CacheStats::default(),
            }),
            thumbnails: Mutex::new(ThumbnailStore {
                parts: VecDeque::with_capacity(thumbnail_capacity),
                capacity: thumbnail_capacity,
            }),
            capacity,
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Start a new viewport pass: merge active into passive, clear active
    ///
    /// Called once per refresh, strictly before that pass's tasks are
    /// submitted, so previous-pass tiles survive as fallback until new
    /// tiles displace them.
    pub fn begin_new_pass(&self) {
        let mut g = self.lock_generations();
        for part in g.active.drain() {
            let seq = g.seq;
            g.seq += 1;
            g.passive.insert(part, seq);
        }
    }

    /// Promote or re-prioritize a cached tile
    ///
    /// A passive hit moves to active under the new priority; an active hit
    /// is re-prioritized in place. Returns true when found, in which case
    /// the caller must not submit a render for this identity.
    pub fn upsert_or_promote(&self, id: &TileId, new_priority: u32) -> bool {
        let mut g = self.lock_generations();
        if let Some(mut part) = g.passive.remove(id) {
            part.set_priority(new_priority);
            let seq = g.seq;
            g.seq += 1;
            g.active.insert(part, seq);
            g.stats.promoted += 1;
            return true;
        }
        if let Some(mut part) = g.active.remove(id) {
            part.set_priority(new_priority);
            let seq = g.seq;
            g.seq += 1;
            g.active.insert(part, seq);
            return true;
        }
        false
    }

    /// Insert a rendered tile into the active generation, evicting first if
    /// the combined generations are at capacity
    ///
    /// An entry with the same identity in either generation is replaced
    /// and its buffer released, so the index and the ordered store never
    /// disagree. A tile that alone exceeds capacity is still stored (and
    /// becomes the next eviction candidate); storing never fails and never
    /// blocks on space.
    pub fn store(&self, part: TilePart) {
        let mut g = self.lock_generations();
        let id = part.id();
        let displaced = match g.active.remove(&id) {
            Some(old) => Some(old),
            None => g.passive.remove(&id),
        };
        if let Some(old) = displaced {
            Self::release_part(&mut g.stats, &old);
        }
        while g.active.len() + g.passive.len() >= self.capacity {
            let victim = match g.passive.pop_least_urgent() {
                Some(victim) => victim,
                None => match g.active.pop_least_urgent() {
                    Some(victim) => victim,
                    None => break,
                },
            };
            Self::release_part(&mut g.stats, &victim);
            g.stats.evicted += 1;
        }
        let seq = g.seq;
        g.seq += 1;
        g.active.insert(part, seq);
        g.stats.stored += 1;
    }

    /// Insert a thumbnail, evicting the oldest when the FIFO store is full
    pub fn store_thumbnail(&self, part: TilePart) {
        let mut thumbs = self.lock_thumbnails();
        if thumbs.capacity == 0 {
            if part.release_buffer().is_ok() {
                let mut g = self.lock_generations();
                g.stats.stored += 1;
                g.stats.evicted += 1;
                g.stats.released += 1;
            }
            return;
        }
        let evicted = if thumbs.parts.len() >= thumbs.capacity {
            thumbs.parts.pop_front()
        } else {
            None
        };
        thumbs.parts.push_back(part);
        drop(thumbs);

        let mut g = self.lock_generations();
        g.stats.stored += 1;
        if let Some(old) = evicted {
            Self::release_part(&mut g.stats, &old);
            g.stats.evicted += 1;
        }
    }

    /// Membership check by identity, without touching FIFO order
    #[must_use]
    pub fn contains_thumbnail(&self, id: &TileId) -> bool {
        self.lock_thumbnails()
            .parts
            .iter()
            .any(|part| part.id() == *id)
    }

    /// The current renderable set: passive tiles first, then active
    ///
    /// The returned parts share their rasters with the cache; the view is
    /// stable against concurrent worker inserts.
    #[must_use]
    pub fn snapshot(&self) -> Vec<TilePart> {
        let g = self.lock_generations();
        g.passive.parts().chain(g.active.parts()).cloned().collect()
    }

    /// Thumbnails in insertion order
    #[must_use]
    pub fn thumbnails(&self) -> Vec<TilePart> {
        self.lock_thumbnails().parts.iter().cloned().collect()
    }

    /// Release every buffer in both generations and the thumbnail store
    ///
    /// Idempotent: a second teardown finds nothing to release.
    pub fn teardown(&self) {
        let mut g = self.lock_generations();
        for part in g.active.drain() {
            Self::release_part(&mut g.stats, &part);
        }
        for part in g.passive.drain() {
            Self::release_part(&mut g.stats, &part);
        }
        drop(g);

        let parts: Vec<TilePart> = self.lock_thumbnails().parts.drain(..).collect();
        let mut g = self.lock_generations();
        for part in parts {
            Self::release_part(&mut g.stats, &part);
        }
        debug!(
            "cache teardown: {} stored, {} released",
            g.stats.stored, g.stats.released
        );
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.lock_generations().stats
    }

    /// Tile counts as (active, passive)
    #[must_use]
    pub fn generation_len(&self) -> (usize, usize) {
        let g = self.lock_generations();
        (g.active.len(), g.passive.len())
    }

    #[must_use]
    pub fn thumbnail_len(&self) -> usize {
        self.lock_thumbnails().parts.len()
    }

    #[must_use]
    pub fn contains(&self, id: &TileId) -> bool {
        let g = self.lock_generations();
        g.active.contains(id) || g.passive.contains(id)
    }

    fn release_part(stats: &mut CacheStats, part: &TilePart) {
        // A buffer is released exactly once; a failure here means another
        // owner got there first, which the counters must not hide.
        match part.release_buffer() {
            Ok(()) => stats.released += 1,
            Err(e) => debug!("skipping release for {:?}: {e}", part.id()),
        }
    }

    fn lock_generations(&self) -> std::sync::MutexGuard<'_, Generations> {
        self.generations
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_thumbnails(&self) -> std::sync::MutexGuard<'_, ThumbnailStore> {
        self.thumbnails
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
