use std::sync::{Arc, RwLock};

use serde_json::{Map, Value};

/// One piece of a workflow's reported state, as `capture_state` would
/// obtain it from a field-decorator in a language with runtime reflection.
#[derive(Debug, Clone)]
pub struct ObservedField {
    pub name: String,
    pub value: Value,
    pub redact: bool,
    pub hidden: bool,
}

impl ObservedField {
    pub fn visible(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { name: name.into(), value: value.into(), redact: false, hidden: false }
    }

    pub fn redacted(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { name: name.into(), value: value.into(), redact: true, hidden: false }
    }

    pub fn hidden(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { name: name.into(), value: value.into(), redact: false, hidden: true }
    }
}

/// Implemented by subclass-style `WorkflowRun`s that want specific fields
/// included in their `state` snapshot, in place of field-decorator
/// reflection.
pub trait ObservedState {
    fn observed_fields(&self) -> Vec<ObservedField>;
}

/// Applies redaction/hiding and produces the `Map` stored on a node's
/// `state_snapshot` and a `WorkflowError.state`.
pub fn capture_fields(fields: Vec<ObservedField>) -> Map<String, Value> {
    let mut out = Map::new();
    for field in fields {
        if field.hidden {
            continue;
        }
        let value = if field.redact { Value::String("***".to_string()) } else { field.value };
        out.insert(field.name, value);
    }
    out
}

pub fn capture_state<T: ObservedState + ?Sized>(obj: &T) -> Map<String, Value> {
    capture_fields(obj.observed_fields())
}

/// The state registry for functional-mode workflows (constructed with an
/// executor rather than a `WorkflowRun` subclass): `WorkflowContext::set_state`
/// upserts into this bag instead of tagging a struct field.
#[derive(Clone)]
pub struct ObservedStateBag {
    inner: Arc<RwLock<Vec<ObservedField>>>,
}

impl Default for ObservedStateBag {
    fn default() -> Self {
        Self { inner: Arc::new(RwLock::new(Vec::new())) }
    }
}

impl ObservedStateBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, name: impl Into<String>, value: impl Into<Value>, redact: bool, hidden: bool) {
        let name = name.into();
        let mut fields = self.inner.write().unwrap();
        if let Some(existing) = fields.iter_mut().find(|f| f.name == name) {
            existing.value = value.into();
            existing.redact = redact;
            existing.hidden = hidden;
        } else {
            fields.push(ObservedField { name, value: value.into(), redact, hidden });
        }
    }
}

impl ObservedState for ObservedStateBag {
    fn observed_fields(&self) -> Vec<ObservedField> {
        self.inner.read().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Job {
        id: String,
        api_key: String,
        internal_cursor: u64,
    }

    impl ObservedState for Job {
        fn observed_fields(&self) -> Vec<ObservedField> {
            vec![
                ObservedField::visible("id", self.id.clone()),
                ObservedField::redacted("apiKey", self.api_key.clone()),
                ObservedField::hidden("internalCursor", self.internal_cursor as i64),
            ]
        }
    }

    #[test]
    fn redacts_and_hides_fields() {
        let job = Job { id: "job-1".into(), api_key: "sk-secret".into(), internal_cursor: 7 };
        let captured = capture_state(&job);
        assert_eq!(captured["id"], Value::String("job-1".into()));
        assert_eq!(captured["apiKey"], Value::String("***".into()));
        assert!(!captured.contains_key("internalCursor"));
    }

    #[test]
    fn bag_upserts_by_name() {
        let bag = ObservedStateBag::new();
        bag.set("phase", "start", false, false);
        bag.set("phase", "done", false, false);
        bag.set("token", "abc", true, false);
        let captured = capture_fields(bag.observed_fields());
        assert_eq!(captured["phase"], Value::String("done".into()));
        assert_eq!(captured["token"], Value::String("***".into()));
        assert_eq!(captured.len(), 2);
    }
}
