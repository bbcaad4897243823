//! Request/response correlation state for JSON-RPC.
//!
//! A client remembers which operation each outstanding request id belongs to,
//! because a JSON-RPC response carries only the id. A server swaps each
//! incoming JSON id for an internal one and remembers the original so the
//! reply can echo it verbatim.

use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Shared between the protocol instances of one logical channel
#[derive(Debug, Default)]
pub struct CorrelationRegistry {
    operations: Mutex<HashMap<i64, String>>,
    external_ids: Mutex<HashMap<i64, JsonValue>>,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the operation of an outgoing request
    pub fn record_operation(&self, id: i64, operation: &str) {
        self.operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, operation.to_string());
    }

    /// Claim the operation of a response; each id resolves once
    pub fn take_operation(&self, id: i64) -> Option<String> {
        self.operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    /// Remember the JSON id a peer sent under internal id `id`
    pub fn record_external_id(&self, id: i64, external: JsonValue) {
        self.external_ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, external);
    }

    pub fn take_external_id(&self, id: i64) -> Option<JsonValue> {
        self.external_ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    pub fn pending_operations(&self) -> usize {
        self.operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn pending_external_ids(&self) -> usize {
        self.external_ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_operation_resolves_once() {
        let registry = CorrelationRegistry::new();
        registry.record_operation(7, "sum");
        assert_eq!(registry.pending_operations(), 1);
        assert_eq!(registry.take_operation(7).as_deref(), Some("sum"));
        assert_eq!(registry.take_operation(7), None);
        assert_eq!(registry.pending_operations(), 0);
    }

    #[test]
    fn test_external_ids_keep_their_json_form() {
        let registry = CorrelationRegistry::new();
        registry.record_external_id(1, json!("abc"));
        registry.record_external_id(2, json!(99));
        assert_eq!(registry.take_external_id(2), Some(json!(99)));
        assert_eq!(registry.take_external_id(1), Some(json!("abc")));
        assert_eq!(registry.pending_external_ids(), 0);
    }

    #[test]
    fn test_concurrent_recording() {
        let registry = Arc::new(CorrelationRegistry::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        registry.record_operation(t * 1000 + i, "op");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(registry.pending_operations(), 400);
    }
}
