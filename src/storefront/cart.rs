use std::sync::Mutex;
use tracing::debug;

/// Session-scoped cart: an ordered, de-duplicated list of course ids.
pub trait CartStore: Send + Sync {
    fn ids(&self) -> Vec<String>;
    /// Returns false when the course was already in the cart.
    fn add(&self, course_id: &str) -> bool;
    /// Returns false when the course was not in the cart.
    fn remove(&self, course_id: &str) -> bool;
    fn clear(&self);

    fn is_empty(&self) -> bool {
        self.ids().is_empty()
    }
}

/// In-process cart backing store.
#[derive(Debug, Default)]
pub struct InMemoryCartStore {
    items: Mutex<Vec<String>>,
}

impl InMemoryCartStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CartStore for InMemoryCartStore {
    fn ids(&self) -> Vec<String> {
        self.items.lock().map(|items| items.clone()).unwrap_or_default()
    }

    fn add(&self, course_id: &str) -> bool {
        let Ok(mut items) = self.items.lock() else {
            return false;
        };
        if items.iter().any(|id| id == course_id) {
            debug!(course_id, "Course already in cart");
            return false;
        }
        items.push(course_id.to_string());
        true
    }

    fn remove(&self, course_id: &str) -> bool {
        let Ok(mut items) = self.items.lock() else {
            return false;
        };
        let before = items.len();
        items.retain(|id| id != course_id);
        items.len() < before
    }

    fn clear(&self) {
        if let Ok(mut items) = self.items.lock() {
            items.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_idempotent_and_ordered() {
        let cart = InMemoryCartStore::new();
        assert!(cart.add("c2"));
        assert!(cart.add("c1"));
        assert!(!cart.add("c2"));
        assert_eq!(cart.ids(), vec!["c2", "c1"]);
    }

    #[test]
    fn remove_and_clear() {
        let cart = InMemoryCartStore::new();
        cart.add("c1");
        cart.add("c2");
        assert!(cart.remove("c1"));
        assert!(!cart.remove("c1"));
        cart.clear();
        assert!(cart.is_empty());
    }
}
