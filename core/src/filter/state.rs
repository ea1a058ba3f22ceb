use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// write protection of one filter-state entry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateMutability {
    ReadOnly,
    Mutable,
}

/// how long an entry outlives the thing that set it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifeSpan {
    Request,
    Connection,
}

struct Entry {
    value: Arc<dyn Any + Send + Sync>,
    mutability: StateMutability,
    life_span: LifeSpan,
}

/// typed scratch map filters use to hand each other data without coupling
/// their types. keys are well-known strings; values are `Arc`ed so readers
/// can hold them past the setter's callback.
#[derive(Default)]
pub struct FilterState {
    entries: HashMap<&'static str, Entry>,
}

impl FilterState {
    pub fn new() -> Self {
        FilterState {
            entries: HashMap::new(),
        }
    }

    /// insert an entry; refuses to displace a read-only one
    pub fn set_data(
        &mut self,
        key: &'static str,
        value: Arc<dyn Any + Send + Sync>,
        mutability: StateMutability,
        life_span: LifeSpan,
    ) -> bool {
        if let Some(existing) = self.entries.get(key) {
            if existing.mutability == StateMutability::ReadOnly {
                tracing::warn!("refusing to overwrite read-only filter state {:?}", key);
                return false;
            }
        }
        self.entries.insert(
            key,
            Entry {
                value,
                mutability,
                life_span,
            },
        );
        true
    }

    pub fn has_data(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// typed fetch; `None` when missing or of another type
    pub fn get_data<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        self.entries
            .get(key)
            .and_then(|e| e.value.clone().downcast::<T>().ok())
    }

    /// drop request-scoped entries, keeping connection-scoped ones
    pub fn clear_request_scope(&mut self) {
        self.entries.retain(|_, e| e.life_span == LifeSpan::Connection);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_round_trip() {
        let mut state = FilterState::new();
        assert!(state.set_data(
            "answer",
            Arc::new(42usize),
            StateMutability::ReadOnly,
            LifeSpan::Request,
        ));
        assert_eq!(*state.get_data::<usize>("answer").unwrap(), 42);
        assert!(state.get_data::<String>("answer").is_none());
        assert!(state.get_data::<usize>("missing").is_none());
    }

    #[test]
    fn read_only_entries_resist_overwrite() {
        let mut state = FilterState::new();
        state.set_data(
            "k",
            Arc::new("first".to_string()),
            StateMutability::ReadOnly,
            LifeSpan::Request,
        );
        assert!(!state.set_data(
            "k",
            Arc::new("second".to_string()),
            StateMutability::Mutable,
            LifeSpan::Request,
        ));
        assert_eq!(*state.get_data::<String>("k").unwrap(), "first");
    }

    #[test]
    fn mutable_entries_can_be_replaced() {
        let mut state = FilterState::new();
        state.set_data(
            "k",
            Arc::new(1u32),
            StateMutability::Mutable,
            LifeSpan::Request,
        );
        assert!(state.set_data(
            "k",
            Arc::new(2u32),
            StateMutability::Mutable,
            LifeSpan::Request,
        ));
        assert_eq!(*state.get_data::<u32>("k").unwrap(), 2);
    }

    #[test]
    fn request_scope_clears_selectively() {
        let mut state = FilterState::new();
        state.set_data(
            "req",
            Arc::new(1u32),
            StateMutability::Mutable,
            LifeSpan::Request,
        );
        state.set_data(
            "conn",
            Arc::new(2u32),
            StateMutability::Mutable,
            LifeSpan::Connection,
        );
        state.clear_request_scope();
        assert!(!state.has_data("req"));
        assert!(state.has_data("conn"));
    }
}
