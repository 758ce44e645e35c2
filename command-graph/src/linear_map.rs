use std::fmt;

/// A map backed by a vector of key-value pairs, kept in insertion order.
///
/// Kernel argument lists are short, so a linear scan beats hashing here. Unlike a multimap, each
/// key appears at most once: inserting an existing key replaces its value in place.
#[derive(Clone, PartialEq, Eq)]
pub struct LinearMap<K, V> {
    inner: Vec<(K, V)>,
}

impl<K, V> Default for LinearMap<K, V> {
    #[inline]
    fn default() -> Self {
        LinearMap::new()
    }
}

impl<K, V> LinearMap<K, V> {
    #[inline]
    pub const fn new() -> Self {
        LinearMap { inner: Vec::new() }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.inner.iter().map(|(k, v)| (k, v))
    }

    #[inline]
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.inner.iter().map(|(k, _)| k)
    }
}

impl<K: Eq, V> LinearMap<K, V> {
    /// Inserts `value` under `key`, returning the value it replaced.
    #[inline]
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        match self.get_mut(&key) {
            Some(slot) => Some(std::mem::replace(slot, value)),
            None => {
                self.inner.push((key, value));
                None
            }
        }
    }

    #[inline]
    pub fn get(&self, key: &K) -> Option<&V> {
        self.iter().find_map(|(k, v)| (k == key).then_some(v))
    }

    #[inline]
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.inner
            .iter_mut()
            .find_map(|(k, v)| (k == key).then_some(v))
    }

    #[inline]
    pub fn contains_key(&self, key: &K) -> bool {
        self.keys().any(|k| k == key)
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for LinearMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K: Eq, V> Extend<(K, V)> for LinearMap<K, V> {
    #[inline]
    fn extend<T: IntoIterator<Item = (K, V)>>(&mut self, iter: T) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

impl<K: Eq, V> FromIterator<(K, V)> for LinearMap<K, V> {
    #[inline]
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut map = LinearMap::new();
        map.extend(iter);

        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_replaces_in_place() {
        let mut map = LinearMap::new();
        assert_eq!(map.insert(2, "a"), None);
        assert_eq!(map.insert(0, "b"), None);
        assert_eq!(map.insert(2, "c"), Some("a"));

        assert_eq!(map.len(), 2);
        assert_eq!(map.keys().copied().collect::<Vec<_>>(), [2, 0]);
        assert_eq!(map.get(&2), Some(&"c"));
        assert!(!map.contains_key(&1));
    }

    #[test]
    fn extend_merges() {
        let mut map: LinearMap<u32, u32> = [(0, 0), (1, 1)].into_iter().collect();
        map.extend([(1, 10), (2, 20)]);

        assert_eq!(
            map.iter().map(|(&k, &v)| (k, v)).collect::<Vec<_>>(),
            [(0, 0), (1, 10), (2, 20)],
        );
    }
}
