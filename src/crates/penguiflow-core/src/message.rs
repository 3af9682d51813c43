//! The envelope that travels between nodes.
//!
//! A [`Message`] is immutable once constructed: nodes that want to change it
//! build a new value with [`Message::with_payload`]/[`Message::with_meta`]
//! rather than mutating in place, so `trace_id` and untouched `meta` keys are
//! preserved by construction rather than by convention.

use serde_json::{Map, Value};
use std::collections::HashMap;

/// Routing/auth metadata carried alongside a [`Message`].
///
/// `tenant` and `topic` are promoted to named fields because hosts that care
/// about tenancy read them on every hop; anything else lives in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Headers {
    pub tenant: Option<String>,
    pub topic: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, String>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Immutable carrier of payload + trace metadata traveling through the graph.
///
/// See SPEC_FULL.md §3.1 for the field-level invariants: `trace_id` survives
/// every hop unconditionally, and `headers`/`meta` survive unless a node
/// explicitly produces a new value for them.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub payload: Value,
    pub trace_id: String,
    pub headers: Headers,
    pub deadline_s: Option<f64>,
    pub meta: Map<String, Value>,
}

impl Message {
    /// Build a new message for a fresh trace.
    pub fn new(payload: Value, trace_id: impl Into<String>) -> Self {
        Self {
            payload,
            trace_id: trace_id.into(),
            headers: Headers::default(),
            deadline_s: None,
            meta: Map::new(),
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_deadline(mut self, deadline_s: f64) -> Self {
        self.deadline_s = Some(deadline_s);
        self
    }

    pub fn with_meta_entry(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    /// Produce a new envelope with a different payload, preserving
    /// `trace_id`, `headers`, `deadline_s`, and `meta` unchanged.
    pub fn with_payload(&self, payload: Value) -> Self {
        Self {
            payload,
            trace_id: self.trace_id.clone(),
            headers: self.headers.clone(),
            deadline_s: self.deadline_s,
            meta: self.meta.clone(),
        }
    }

    /// Produce a new envelope with `meta` merged on top of the current one,
    /// leaving `payload`, `trace_id`, `headers`, and `deadline_s` unchanged.
    pub fn with_merged_meta(&self, extra: Map<String, Value>) -> Self {
        let mut meta = self.meta.clone();
        meta.extend(extra);
        Self {
            meta,
            ..self.clone()
        }
    }

    /// True once `deadline_s` has passed relative to `now_s`.
    pub fn is_expired(&self, now_s: f64) -> bool {
        matches!(self.deadline_s, Some(d) if now_s >= d)
    }
}

/// Either a successful envelope or a terminal [`crate::error::FlowError`],
/// the shape consumers receive from [`crate::runtime::Flow::fetch`].
#[derive(Debug, Clone)]
pub enum FlowOutput {
    Ok(Message),
    Err(crate::error::FlowError),
}

impl FlowOutput {
    pub fn is_ok(&self) -> bool {
        matches!(self, FlowOutput::Ok(_))
    }

    pub fn into_message(self) -> Option<Message> {
        match self {
            FlowOutput::Ok(m) => Some(m),
            FlowOutput::Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_payload_preserves_trace_and_meta() {
        let msg = Message::new(Value::String("hi".into()), "t1")
            .with_headers(Headers::new().with_tenant("acme"))
            .with_meta_entry("hop", Value::from(1));

        let next = msg.with_payload(Value::String("HI".into()));

        assert_eq!(next.trace_id, "t1");
        assert_eq!(next.headers.tenant.as_deref(), Some("acme"));
        assert_eq!(next.meta.get("hop"), Some(&Value::from(1)));
        assert_eq!(next.payload, Value::String("HI".into()));
    }

    #[test]
    fn expiry_is_inclusive_of_now() {
        let msg = Message::new(Value::Null, "t1").with_deadline(100.0);
        assert!(msg.is_expired(100.0));
        assert!(msg.is_expired(101.0));
        assert!(!msg.is_expired(99.0));
    }
}
