use lru::LruCache;
use std::sync::Arc;

/// Key for cached decoded tiles: directory plus chunk index within it
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub(crate) struct TileKey {
    pub directory: usize,
    pub chunk: usize,
}

struct CacheEntry {
    data: Arc<Vec<u8>>,
    size_bytes: usize,
}

/// Byte-bounded LRU of decoded tiles, owned by one reader.
///
/// A capacity of zero disables caching.
pub(crate) struct TileCache {
    current_bytes: usize,
    capacity_bytes: usize,
    entries: LruCache<TileKey, CacheEntry>,
}

impl TileCache {
    pub fn new(capacity_bytes: usize) -> Self {
        TileCache {
            current_bytes: 0,
            capacity_bytes,
            entries: LruCache::unbounded(),
        }
    }

    pub fn get(&mut self, key: &TileKey) -> Option<Arc<Vec<u8>>> {
        self.entries.get(key).map(|entry| Arc::clone(&entry.data))
    }

    pub fn insert(&mut self, key: TileKey, data: Arc<Vec<u8>>) {
        let size_bytes = data.len();
        if size_bytes > self.capacity_bytes {
            return;
        }

        if let Some(old) = self.entries.pop(&key) {
            self.current_bytes = self.current_bytes.saturating_sub(old.size_bytes);
        }

        while self.current_bytes + size_bytes > self.capacity_bytes {
            if let Some((_key, entry)) = self.entries.pop_lru() {
                self.current_bytes = self.current_bytes.saturating_sub(entry.size_bytes);
            } else {
                break;
            }
        }

        self.current_bytes = self.current_bytes.saturating_add(size_bytes);
        self.entries.put(key, CacheEntry { data, size_bytes });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn current_bytes(&self) -> usize {
        self.current_bytes
    }
}
