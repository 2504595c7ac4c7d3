use std::any::{Any, type_name};
use std::collections::HashMap;

/// Process-wide keyed storage.
///
/// Entries outlive the code that created them (a host reload keeps the
/// storage and rebuilds everything else), so every access goes through
/// [`Storage::with_or_init`]: a missing entry, or one holding a value of a
/// different type, is replaced with `T::default()`.
#[derive(Default)]
pub struct Storage {
    entries: HashMap<String, Box<dyn Any>>,
}

impl Storage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` on the entry under `key`, creating it first when absent.
    ///
    /// An entry holding another type is dropped and replaced by the
    /// `T::default()` that `f` saw.
    pub fn with_or_init<T: Any + Default, R>(&mut self, key: &str, f: impl FnOnce(&mut T) -> R) -> R {
        let entry = self
            .entries
            .entry(key.to_owned())
            .or_insert_with(|| Box::new(T::default()));
        if let Some(value) = entry.downcast_mut::<T>() {
            return f(value);
        }
        tracing::warn!(key, expected = type_name::<T>(), "storage entry has a stale type, reinitializing");
        let mut value = T::default();
        let out = f(&mut value);
        *entry = Box::new(value);
        out
    }

    /// Read an entry without creating it.
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.entries.get(key).and_then(|e| e.downcast_ref::<T>())
    }

    pub fn insert<T: Any>(&mut self, key: &str, value: T) {
        self.entries.insert(key.to_owned(), Box::new(value));
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("keys", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}
