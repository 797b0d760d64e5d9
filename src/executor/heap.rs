use crate::engine::{EngineError, ObjectId, Value};

/// Object id of the global object.
pub const GLOBAL: ObjectId = ObjectId(0);

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectData {
    pub class: String,
    /// Own properties in definition order.
    pub properties: Vec<(String, Value)>,
}

impl ObjectData {
    fn new(class: &str) -> Self {
        Self {
            class: class.to_string(),
            properties: Vec::new(),
        }
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Define or overwrite `name`.
    pub fn define(&mut self, name: &str, value: Value) {
        match self.properties.iter_mut().find(|(key, _)| key == name) {
            Some(slot) => slot.1 = value,
            None => self.properties.push((name.to_string(), value)),
        }
    }
}

/// Every object the program has created. Objects are never collected.
#[derive(Debug, Clone)]
pub struct Heap {
    objects: Vec<ObjectData>,
}

impl Heap {
    pub fn new() -> Self {
        Self {
            objects: vec![ObjectData::new("global")],
        }
    }

    pub fn alloc(&mut self, class: &str) -> ObjectId {
        self.objects.push(ObjectData::new(class));
        ObjectId(self.objects.len() as u64 - 1)
    }

    pub fn get(&self, object: ObjectId) -> Option<&ObjectData> {
        self.objects.get(object.0 as usize)
    }

    pub fn set(&mut self, object: ObjectId, name: &str, value: Value) -> Result<(), EngineError> {
        self.objects
            .get_mut(object.0 as usize)
            .ok_or(EngineError::UnknownObject(object))?
            .define(name, value);
        Ok(())
    }

    pub fn get_value(&self, object: ObjectId, name: &str) -> Option<Value> {
        self.get(object)?.property(name).cloned()
    }

    /// Build a value from JSON. Arrays and objects become fresh engine
    /// objects; arrays get index properties and a `length`.
    pub fn import(&mut self, json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                let object = self.alloc("Array");
                for (index, item) in items.iter().enumerate() {
                    let value = self.import(item);
                    self.define(object, &index.to_string(), value);
                }
                self.define(object, "length", Value::Number(items.len() as f64));
                Value::Object(object)
            }
            serde_json::Value::Object(map) => {
                let object = self.alloc("Object");
                for (key, item) in map {
                    let value = self.import(item);
                    self.define(object, key, value);
                }
                Value::Object(object)
            }
        }
    }

    fn define(&mut self, object: ObjectId, name: &str, value: Value) {
        if let Some(data) = self.objects.get_mut(object.0 as usize) {
            data.define(name, value);
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}
