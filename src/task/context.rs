use serde_json::{Map, Value};
use std::sync::Mutex;

/// Default shared context: a JSON object behind a mutex.
///
/// One instance is shared by every task body of a run, nested lists included.
/// The engine provides no isolation between concurrently running bodies; each
/// call here locks only for its own duration, so read-modify-write sequences
/// across calls are not atomic.
#[derive(Debug, Default)]
pub struct Context {
    values: Mutex<Map<String, Value>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context pre-populated with `values`.
    pub fn from_map(values: Map<String, Value>) -> Self {
        Self {
            values: Mutex::new(values),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Map<String, Value>> {
        match self.values.lock() {
            Ok(values) => values,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    /// Store `value` under `key`, returning the previous value.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.lock().insert(key.into(), value.into())
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.lock().remove(key)
    }

    /// Whether `key` holds a non-null value.
    pub fn contains(&self, key: &str) -> bool {
        self.lock().get(key).is_some_and(|value| !value.is_null())
    }

    /// Whether `key` holds a value that reads as true.
    ///
    /// `null`, `false`, `0`, empty strings and empty collections are falsy.
    pub fn is_truthy(&self, key: &str) -> bool {
        match self.lock().get(key) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(flag)) => *flag,
            Some(Value::Number(number)) => number.as_f64().is_some_and(|n| n != 0.0),
            Some(Value::String(text)) => !text.is_empty(),
            Some(Value::Array(items)) => !items.is_empty(),
            Some(Value::Object(fields)) => !fields.is_empty(),
        }
    }

    /// Apply `f` to the underlying map while holding the lock.
    pub fn update<R>(&self, f: impl FnOnce(&mut Map<String, Value>) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the current contents as a JSON object.
    pub fn snapshot(&self) -> Value {
        Value::Object(self.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthiness() {
        let ctx = Context::new();
        ctx.set("flag", true);
        ctx.set("zero", 0);
        ctx.set("empty", "");
        ctx.set("name", "deploy");
        ctx.set("nothing", Value::Null);

        assert!(ctx.is_truthy("flag"));
        assert!(!ctx.is_truthy("zero"));
        assert!(!ctx.is_truthy("empty"));
        assert!(ctx.is_truthy("name"));
        assert!(!ctx.is_truthy("nothing"));
        assert!(!ctx.is_truthy("missing"));

        assert!(ctx.contains("zero"));
        assert!(!ctx.contains("nothing"));
    }

    #[test]
    fn test_update_and_snapshot() {
        let ctx = Context::new();
        ctx.update(|values| {
            values.insert("count".to_string(), json!(1));
        });
        let previous = ctx.set("count", 2);

        assert_eq!(previous, Some(json!(1)));
        assert_eq!(ctx.snapshot(), json!({"count": 2}));
        assert_eq!(ctx.len(), 1);
    }
}
