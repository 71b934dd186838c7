use std::sync::{Arc, RwLock};

use fxhash::FxHashMap;

const STRIPES: usize = 8;

/// Lock-striped memoization map. Insertion takes the write lock of one
/// stripe only; readers share the stripe's read lock and get `Arc`
/// snapshots, so a resolved value is never rebuilt or blocked on globally.
pub(crate) struct StripedCache<V> {
	stripes: [RwLock<FxHashMap<Box<str>, Arc<V>>>; STRIPES],
}

impl<V> Default for StripedCache<V> {
	fn default() -> Self {
		Self { stripes: std::array::from_fn(|_| RwLock::new(FxHashMap::default())) }
	}
}

impl<V> StripedCache<V> {
	fn stripe(&self, key: &str) -> &RwLock<FxHashMap<Box<str>, Arc<V>>> {
		&self.stripes[fxhash::hash(key) % STRIPES]
	}

	pub fn get_or_insert_with(&self, key: &str, build: impl FnOnce() -> V) -> Arc<V> {
		let stripe = self.stripe(key);
		{
			let guard = stripe.read().unwrap_or_else(|e| e.into_inner());
			if let Some(value) = guard.get(key) {
				return value.clone();
			}
		}
		let mut guard = stripe.write().unwrap_or_else(|e| e.into_inner());
		guard.entry(key.into()).or_insert_with(|| Arc::new(build())).clone()
	}

	pub fn clear(&self) {
		for stripe in &self.stripes {
			stripe.write().unwrap_or_else(|e| e.into_inner()).clear();
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn caches_per_key() {
		let cache = StripedCache::<u32>::default();
		let first = cache.get_or_insert_with("a/B", || 1);
		let again = cache.get_or_insert_with("a/B", || 2);
		assert_eq!(*first, 1);
		assert!(Arc::ptr_eq(&first, &again));
		cache.clear();
		assert_eq!(*cache.get_or_insert_with("a/B", || 2), 2);
	}
}
