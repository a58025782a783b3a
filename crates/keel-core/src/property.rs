//! Values shared between the thread that refreshes them and their readers.
//!
//! Sim-visible render target properties live in an `Arc<Property<T>>`: the
//! object owns it, the render target manager writes fresh snapshots through
//! it once per frame, and readers take cheap copies.
//!
//! ```
//! use keel_core::Property;
//!
//! let size = Property::new((800u32, 600u32));
//! assert!(!size.set((800, 600)));
//! assert!(size.set((1024, 768)));
//! assert_eq!(size.get(), (1024, 768));
//! ```

use std::fmt;

use parking_lot::RwLock;

/// A value behind a read-write lock.
pub struct Property<T> {
    value: RwLock<T>,
}

impl<T: Clone> Property<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: RwLock::new(value),
        }
    }

    /// A copy of the current value.
    pub fn get(&self) -> T {
        self.value.read().clone()
    }

    /// Read the value in place.
    pub fn with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&T) -> R,
    {
        f(&self.value.read())
    }

    /// Modify the value in place.
    pub fn update<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        f(&mut self.value.write())
    }
}

impl<T: Clone + PartialEq> Property<T> {
    /// Store `value`. Returns `false` if it equals the current value.
    pub fn set(&self, value: T) -> bool {
        let mut current = self.value.write();
        if *current == value {
            return false;
        }
        *current = value;
        true
    }
}

impl<T: Clone + Default> Default for Property<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for Property<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Property").field(&*self.value.read()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_reports_change() {
        let width = Property::new(800u32);
        assert!(!width.set(800));
        assert!(width.set(1024));
        assert_eq!(width.get(), 1024);
    }

    #[test]
    fn test_update_and_with() {
        let titles = Property::new(vec!["main".to_string()]);
        titles.update(|titles| titles.push("tool".to_string()));
        assert_eq!(titles.with(Vec::len), 2);
    }
}
