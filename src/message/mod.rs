//! Message envelope
//!
//! A [`CommMessage`] wraps a [`Value`] payload (or a [`Fault`]) together with
//! the correlation id, operation name and resource path needed to route it.
//! Envelopes are built through the factories below and never mutated.

mod id;

pub use id::{next_message_id, AtomicIdGenerator, GlobalIdGenerator, IdGenerator, GLOBAL_IDS};

use std::fmt;

use crate::value::Value;

/// Resource path used by every reply
pub const ROOT_RESOURCE_PATH: &str = "/";

/// Id of messages that cannot be correlated to a reply (notifications)
pub const GENERIC_ID: i64 = 0;

/// Named application error carried in place of ordinary data
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fault {
    pub name: String,
    pub value: Value,
}

impl Fault {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fault {}", self.name)
    }
}

/// Correlation-bearing envelope around a value or a fault
#[derive(Debug, Clone, PartialEq)]
pub struct CommMessage {
    id: i64,
    operation_name: String,
    resource_path: String,
    value: Value,
    fault: Option<Fault>,
}

impl CommMessage {
    /// Build an envelope from its parts.
    ///
    /// When `fault` is present the payload is reset to the empty value, so a
    /// message always carries exactly one of the two.
    pub fn new(
        id: i64,
        operation_name: impl Into<String>,
        resource_path: impl Into<String>,
        value: Value,
        fault: Option<Fault>,
    ) -> Self {
        let value = if fault.is_some() { Value::default() } else { value };
        Self {
            id,
            operation_name: operation_name.into(),
            resource_path: resource_path.into(),
            value,
            fault,
        }
    }

    /// The generic-id empty message
    pub fn undefined() -> Self {
        Self::new(GENERIC_ID, "", ROOT_RESOURCE_PATH, Value::default(), None)
    }

    /// Request with a fresh id from the process-wide generator
    pub fn create_request(
        operation_name: impl Into<String>,
        resource_path: impl Into<String>,
        value: Value,
    ) -> Self {
        Self::create_request_with(&GLOBAL_IDS, operation_name, resource_path, value)
    }

    /// Request with an id drawn from `ids`
    pub fn create_request_with(
        ids: &dyn IdGenerator,
        operation_name: impl Into<String>,
        resource_path: impl Into<String>,
        value: Value,
    ) -> Self {
        Self::new(ids.next_id(), operation_name, resource_path, value, None)
    }

    /// Notification: a request nobody will answer
    pub fn create_notification(
        operation_name: impl Into<String>,
        resource_path: impl Into<String>,
        value: Value,
    ) -> Self {
        Self::new(GENERIC_ID, operation_name, resource_path, value, None)
    }

    pub fn create_empty_response(request: &CommMessage) -> Self {
        Self::create_response(request, Value::default())
    }

    pub fn create_response(request: &CommMessage, value: Value) -> Self {
        Self::new(
            request.id,
            request.operation_name.clone(),
            ROOT_RESOURCE_PATH,
            value,
            None,
        )
    }

    pub fn create_fault_response(request: &CommMessage, fault: Fault) -> Self {
        Self::new(
            request.id,
            request.operation_name.clone(),
            ROOT_RESOURCE_PATH,
            Value::default(),
            Some(fault),
        )
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn has_generic_id(&self) -> bool {
        self.id == GENERIC_ID
    }

    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }

    pub fn resource_path(&self) -> &str {
        &self.resource_path
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn fault(&self) -> Option<&Fault> {
        self.fault.as_ref()
    }

    pub fn is_fault(&self) -> bool {
        self.fault.is_some()
    }

    /// Take the payload and fault out of the envelope
    pub fn into_parts(self) -> (Value, Option<Fault>) {
        (self.value, self.fault)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_keeps_identity() {
        let request = CommMessage::create_request("op", "/", Value::from("hello"));
        let response = CommMessage::create_response(&request, Value::from(1));

        assert_eq!(response.operation_name(), "op");
        assert_eq!(response.id(), request.id());
        assert_eq!(response.resource_path(), ROOT_RESOURCE_PATH);
        assert!(!response.is_fault());
    }

    #[test]
    fn test_reply_path_is_root() {
        let request = CommMessage::create_request("op", "/deep/path", Value::new());
        let response = CommMessage::create_empty_response(&request);

        assert_eq!(response.resource_path(), "/");
        assert!(response.value().is_empty());
    }

    #[test]
    fn test_fault_response_has_empty_value() {
        let request = CommMessage::create_request("op", "/", Value::from("payload"));
        let fault = Fault::new("TypeMismatch", Value::from("details"));
        let response = CommMessage::create_fault_response(&request, fault.clone());

        assert_eq!(response.id(), request.id());
        assert_eq!(response.fault(), Some(&fault));
        assert_eq!(response.value(), &Value::default());
    }

    #[test]
    fn test_new_drops_value_when_faulted() {
        let msg = CommMessage::new(
            9,
            "op",
            "/",
            Value::from("ignored"),
            Some(Fault::new("Boom", Value::new())),
        );
        assert!(msg.value().is_empty());
    }

    #[test]
    fn test_request_ids_are_distinct_and_not_generic() {
        let a = CommMessage::create_request("a", "/", Value::new());
        let b = CommMessage::create_request("b", "/", Value::new());
        assert_ne!(a.id(), b.id());
        assert!(!a.has_generic_id());
        assert!(CommMessage::create_notification("n", "/", Value::new()).has_generic_id());
    }

    #[test]
    fn test_injected_generator() {
        let ids = AtomicIdGenerator::starting_at(500);
        let msg = CommMessage::create_request_with(&ids, "lol", "/test", Value::new());
        assert_eq!(msg.id(), 500);
        assert_eq!(ids.next_id(), 501);
    }
}
