use std::fmt::Debug;

use crate::vm::value::{DictRef, ListRef, Value};

/// One step of the iterator protocol.
#[derive(Debug)]
pub enum Step {
    Yield(Value),
    Done,
}

/// The embedding trait behind `Value::Foreign`: an opaque host object
/// carried by reference through the value model.
///
/// `type_names` drives method-table resolution: names are consulted from
/// most specific to most general, first match wins. Every other hook has a
/// refusing default; a host participates only in the protocols it opts
/// into. A `None`/`false` return is a soft miss, never an error.
pub trait HostObject: Debug {
    fn type_names(&self) -> &'static [&'static str];

    fn repr(&self) -> String;

    fn truthy(&self) -> bool {
        true
    }

    fn getattr(&self, _name: &str) -> Option<Value> {
        None
    }

    fn get_index(&self, _key: &Value) -> Option<Value> {
        None
    }

    fn set_index(&mut self, _key: &Value, _value: Value) -> bool {
        false
    }

    fn contains(&self, _value: &Value) -> Option<bool> {
        None
    }

    fn length(&self) -> Option<usize> {
        None
    }

    /// Creates a fresh single-pass cursor over this object, as a Foreign
    /// value. Iterator hosts return a copy of themselves at the current
    /// position, so `iter(iter(x))` behaves like the original.
    fn make_iter(&self) -> Option<Value> {
        None
    }

    /// Steps this object as an iterator. `None` means the object is not an
    /// iterator at all, which is fatal when reached from `TestIterable`.
    fn step(&mut self) -> Option<Step> {
        None
    }
}

// ===== Built-in host objects ===== //

/// The value produced by the `range` builtin: a lazy half-open interval.
#[derive(Debug, Clone)]
pub struct Range {
    pub start: i64,
    pub stop: i64,
}

impl HostObject for Range {
    fn type_names(&self) -> &'static [&'static str] {
        &["range"]
    }

    fn repr(&self) -> String {
        format!("range({}, {})", self.start, self.stop)
    }

    fn truthy(&self) -> bool {
        self.stop > self.start
    }

    fn length(&self) -> Option<usize> {
        Some((self.stop - self.start).max(0) as usize)
    }

    fn contains(&self, value: &Value) -> Option<bool> {
        match value {
            Value::Int(i) => Some(self.start <= *i && *i < self.stop),
            _ => Some(false),
        }
    }

    fn get_index(&self, key: &Value) -> Option<Value> {
        match key {
            Value::Int(i) if *i >= 0 && self.start + *i < self.stop => Some(Value::Int(self.start + *i)),
            _ => None,
        }
    }

    fn make_iter(&self) -> Option<Value> {
        Some(Value::foreign(RangeIter { cursor: self.start, stop: self.stop }))
    }
}

#[derive(Debug, Clone)]
pub struct RangeIter {
    cursor: i64,
    stop: i64,
}

impl HostObject for RangeIter {
    fn type_names(&self) -> &'static [&'static str] {
        &["iterator"]
    }

    fn repr(&self) -> String {
        format!("iterator(range @ {})", self.cursor)
    }

    fn make_iter(&self) -> Option<Value> {
        Some(Value::foreign(self.clone()))
    }

    fn step(&mut self) -> Option<Step> {
        if self.cursor < self.stop {
            let item = Value::Int(self.cursor);
            self.cursor += 1;
            Some(Step::Yield(item))
        } else {
            Some(Step::Done)
        }
    }
}

/// Cursor over a live list: sees elements appended behind the cursor, like
/// any shared-reference iteration would.
#[derive(Debug, Clone)]
pub struct ListIter {
    list: ListRef,
    index: usize,
}

impl ListIter {
    pub fn new(list: ListRef) -> ListIter {
        ListIter { list, index: 0 }
    }
}

impl HostObject for ListIter {
    fn type_names(&self) -> &'static [&'static str] {
        &["iterator"]
    }

    fn repr(&self) -> String {
        format!("iterator(list @ {})", self.index)
    }

    fn make_iter(&self) -> Option<Value> {
        Some(Value::foreign(self.clone()))
    }

    fn step(&mut self) -> Option<Step> {
        let item = self.list.borrow().get(self.index).cloned();
        match item {
            Some(v) => {
                self.index += 1;
                Some(Step::Yield(v))
            }
            None => Some(Step::Done),
        }
    }
}

/// Cursor over a dict's keys, snapshotted at creation.
#[derive(Debug, Clone)]
pub struct DictKeyIter {
    keys: Vec<String>,
    index: usize,
}

impl DictKeyIter {
    pub fn new(dict: &DictRef) -> DictKeyIter {
        DictKeyIter { keys: dict.borrow().keys().cloned().collect(), index: 0 }
    }
}

impl HostObject for DictKeyIter {
    fn type_names(&self) -> &'static [&'static str] {
        &["iterator"]
    }

    fn repr(&self) -> String {
        format!("iterator(dict @ {})", self.index)
    }

    fn make_iter(&self) -> Option<Value> {
        Some(Value::foreign(self.clone()))
    }

    fn step(&mut self) -> Option<Step> {
        match self.keys.get(self.index) {
            Some(k) => {
                let item = Value::str(k.clone());
                self.index += 1;
                Some(Step::Yield(item))
            }
            None => Some(Step::Done),
        }
    }
}

/// Cursor over a string's characters, each yielded as a one-char string.
#[derive(Debug, Clone)]
pub struct CharIter {
    chars: Vec<char>,
    index: usize,
}

impl CharIter {
    pub fn new(s: &str) -> CharIter {
        CharIter { chars: s.chars().collect(), index: 0 }
    }
}

impl HostObject for CharIter {
    fn type_names(&self) -> &'static [&'static str] {
        &["iterator"]
    }

    fn repr(&self) -> String {
        format!("iterator(str @ {})", self.index)
    }

    fn make_iter(&self) -> Option<Value> {
        Some(Value::foreign(self.clone()))
    }

    fn step(&mut self) -> Option<Step> {
        match self.chars.get(self.index) {
            Some(c) => {
                let item = Value::str(c.to_string());
                self.index += 1;
                Some(Step::Yield(item))
            }
            None => Some(Step::Done),
        }
    }
}

// ===== JSON host ===== //

/// A JSON document carried opaquely through the value model. Attribute
/// access, indexing, membership, and iteration all delegate to the JSON
/// payload; leaf values lift to the matching variant on the way out.
#[derive(Debug, Clone)]
pub struct JsonHost {
    pub value: serde_json::Value,
}

impl JsonHost {
    pub fn new(value: serde_json::Value) -> JsonHost {
        JsonHost { value }
    }
}

/// Lifts a JSON value: primitives map to the matching variant, composites
/// stay foreign so their own attribute/index semantics keep applying.
pub fn lift_json(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Nil,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::foreign(JsonHost::new(value.clone())),
        },
        serde_json::Value::String(s) => Value::str(s.clone()),
        _ => Value::foreign(JsonHost::new(value.clone())),
    }
}

impl HostObject for JsonHost {
    fn type_names(&self) -> &'static [&'static str] {
        match self.value {
            serde_json::Value::Array(_) => &["json_array", "json"],
            serde_json::Value::Object(_) => &["json_object", "json"],
            _ => &["json"],
        }
    }

    fn repr(&self) -> String {
        self.value.to_string()
    }

    fn truthy(&self) -> bool {
        match &self.value {
            serde_json::Value::Null => false,
            serde_json::Value::Bool(b) => *b,
            serde_json::Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
            serde_json::Value::String(s) => !s.is_empty(),
            serde_json::Value::Array(a) => !a.is_empty(),
            serde_json::Value::Object(o) => !o.is_empty(),
        }
    }

    fn getattr(&self, name: &str) -> Option<Value> {
        self.value.get(name).map(lift_json)
    }

    fn get_index(&self, key: &Value) -> Option<Value> {
        match (&self.value, key) {
            (serde_json::Value::Array(a), Value::Int(i)) => {
                let index = if *i < 0 { a.len() as i64 + *i } else { *i };
                if index >= 0 {
                    a.get(index as usize).map(lift_json)
                } else {
                    None
                }
            }
            (serde_json::Value::Object(o), k) => o.get(&k.key_str()).map(lift_json),
            _ => None,
        }
    }

    fn contains(&self, value: &Value) -> Option<bool> {
        match &self.value {
            serde_json::Value::Object(o) => Some(o.contains_key(&value.key_str())),
            serde_json::Value::Array(a) => {
                Some(a.iter().any(|e| lift_json(e).is_equal(value)))
            }
            serde_json::Value::String(s) => match value {
                Value::Str(sub) => Some(s.contains(sub.as_str())),
                _ => Some(false),
            },
            _ => None,
        }
    }

    fn length(&self) -> Option<usize> {
        match &self.value {
            serde_json::Value::Array(a) => Some(a.len()),
            serde_json::Value::Object(o) => Some(o.len()),
            serde_json::Value::String(s) => Some(s.chars().count()),
            _ => None,
        }
    }

    fn make_iter(&self) -> Option<Value> {
        let items: Vec<Value> = match &self.value {
            serde_json::Value::Array(a) => a.iter().map(lift_json).collect(),
            serde_json::Value::Object(o) => o.keys().map(|k| Value::str(k.clone())).collect(),
            _ => return None,
        };
        Some(Value::foreign(SnapshotIter { items, index: 0 }))
    }
}

/// Cursor over a pre-lifted snapshot, used by hosts whose payload cannot be
/// iterated in place.
#[derive(Debug, Clone)]
pub struct SnapshotIter {
    items: Vec<Value>,
    index: usize,
}

impl HostObject for SnapshotIter {
    fn type_names(&self) -> &'static [&'static str] {
        &["iterator"]
    }

    fn repr(&self) -> String {
        format!("iterator(@ {})", self.index)
    }

    fn make_iter(&self) -> Option<Value> {
        Some(Value::foreign(self.clone()))
    }

    fn step(&mut self) -> Option<Step> {
        match self.items.get(self.index) {
            Some(v) => {
                let item = v.clone();
                self.index += 1;
                Some(Step::Yield(item))
            }
            None => Some(Step::Done),
        }
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use crate::vm::host::{lift_json, HostObject, JsonHost, Range, Step};
    use crate::vm::value::Value;

    #[test]
    fn test_range_iteration() {
        let range = Range { start: 0, stop: 3 };
        let iter = range.make_iter().unwrap();
        let obj = match &iter {
            Value::Foreign(obj) => obj.clone(),
            _ => panic!("expected a foreign iterator"),
        };
        let mut items: Vec<Value> = Vec::new();
        loop {
            match obj.borrow_mut().step() {
                Some(Step::Yield(v)) => items.push(v),
                Some(Step::Done) => break,
                None => panic!("range iterator must support stepping"),
            }
        }
        assert_eq!(vec![Value::Int(0), Value::Int(1), Value::Int(2)], items);
    }

    #[test]
    fn test_range_membership() {
        let range = Range { start: 0, stop: 10 };
        assert_eq!(Some(true), range.contains(&Value::Int(9)));
        assert_eq!(Some(false), range.contains(&Value::Int(10)));
        assert_eq!(Some(false), range.contains(&Value::str("x")));
    }

    #[test]
    fn test_json_attr_and_index() {
        let host = JsonHost::new(json!({"roles": {"my_client": ["admin", "driver"]}}));
        let roles = host.getattr("roles").unwrap();
        let client = match &roles {
            Value::Foreign(obj) => obj.borrow().get_index(&Value::str("my_client")).unwrap(),
            _ => panic!("nested object must stay foreign"),
        };
        match &client {
            Value::Foreign(obj) => {
                assert_eq!(Some(Value::str("admin")), obj.borrow().get_index(&Value::Int(0)));
                assert_eq!(Some(true), obj.borrow().contains(&Value::str("driver")));
            }
            _ => panic!("array must stay foreign"),
        }
    }

    #[test]
    fn test_json_lift_primitives() {
        assert_eq!(Value::Nil, lift_json(&json!(null)));
        assert_eq!(Value::Bool(true), lift_json(&json!(true)));
        assert_eq!(Value::Int(42), lift_json(&json!(42)));
        assert_eq!(Value::str("hi"), lift_json(&json!("hi")));
    }
}
