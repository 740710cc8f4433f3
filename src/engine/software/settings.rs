// Copyright (C) 2025 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::{collections::HashMap, error::Error};

use parking_lot::RwLock;

/// Typed error for settings-store failures so callers can distinguish an
/// unknown key from a type mismatch without string matching.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("no setting registered with key {0}")]
    UnknownKey(String),
    #[error("setting {key} is of type {expected}, not {got}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        got: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Str(String),
    Int(i64),
    Num(f64),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "str",
            Value::Int(_) => "int",
            Value::Num(_) => "num",
        }
    }
}

/// The software engine's settings store. Every key is registered with a
/// typed default at construction; sets against unregistered keys or with a
/// mismatched type fail.
pub struct Store {
    values: RwLock<HashMap<String, Value>>,
}

impl Store {
    pub fn new() -> Store {
        let mut values: HashMap<String, Value> = HashMap::new();

        values.insert("audio.driver".into(), Value::Str("default".into()));
        values.insert("audio.period-size".into(), Value::Int(512));
        values.insert("midi.driver".into(), Value::Str("midir".into()));
        values.insert("midi.autoconnect".into(), Value::Int(0));
        values.insert("midi.portname".into(), Value::Str(String::new()));
        values.insert("shell.prompt".into(), Value::Str(String::new()));
        values.insert("synth.gain".into(), Value::Num(0.2));
        values.insert("synth.sample-rate".into(), Value::Num(44100.0));
        values.insert("synth.default-soundfont".into(), Value::Str(String::new()));
        values.insert("player.loop".into(), Value::Int(0));

        Store {
            values: RwLock::new(values),
        }
    }

    fn set(&self, key: &str, value: Value) -> Result<(), Box<dyn Error>> {
        let mut values = self.values.write();
        let current = match values.get(key) {
            Some(current) => current,
            None => return Err(Box::new(SettingsError::UnknownKey(key.to_string()))),
        };

        if current.type_name() != value.type_name() {
            return Err(Box::new(SettingsError::TypeMismatch {
                key: key.to_string(),
                expected: current.type_name(),
                got: value.type_name(),
            }));
        }

        values.insert(key.to_string(), value);
        Ok(())
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }
}

impl crate::engine::Settings for Store {
    fn set_str(&self, key: &str, value: &str) -> Result<(), Box<dyn Error>> {
        self.set(key, Value::Str(value.to_string()))
    }

    fn set_int(&self, key: &str, value: i64) -> Result<(), Box<dyn Error>> {
        self.set(key, Value::Int(value))
    }

    fn set_num(&self, key: &str, value: f64) -> Result<(), Box<dyn Error>> {
        self.set(key, Value::Num(value))
    }

    fn get_str(&self, key: &str) -> Option<String> {
        match self.get(key) {
            Some(Value::Str(value)) => Some(value),
            _ => None,
        }
    }

    fn get_int(&self, key: &str) -> Option<i64> {
        match self.get(key) {
            Some(Value::Int(value)) => Some(value),
            _ => None,
        }
    }

    fn get_num(&self, key: &str) -> Option<f64> {
        match self.get(key) {
            Some(Value::Num(value)) => Some(value),
            _ => None,
        }
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.values.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod test {
    use crate::engine::Settings;

    use super::Store;

    #[test]
    fn test_registered_defaults() {
        let store = Store::new();
        assert_eq!(Some("default".to_string()), store.get_str("audio.driver"));
        assert_eq!(Some(0), store.get_int("midi.autoconnect"));
        assert_eq!(Some(44100.0), store.get_num("synth.sample-rate"));
    }

    #[test]
    fn test_set_and_get() {
        let store = Store::new();
        store
            .set_str("shell.prompt", "> ")
            .expect("set should succeed");
        assert_eq!(Some("> ".to_string()), store.get_str("shell.prompt"));

        store
            .set_int("midi.autoconnect", 1)
            .expect("set should succeed");
        assert_eq!(Some(1), store.get_int("midi.autoconnect"));
    }

    #[test]
    fn test_unknown_key_fails() {
        let store = Store::new();
        assert!(store.set_str("no.such.key", "value").is_err());
        assert_eq!(None, store.get_str("no.such.key"));
    }

    #[test]
    fn test_type_mismatch_fails() {
        let store = Store::new();
        assert!(store.set_int("audio.driver", 3).is_err());
        assert!(store.set_str("midi.autoconnect", "yes").is_err());
        // The previous value survives a failed set.
        assert_eq!(Some("default".to_string()), store.get_str("audio.driver"));
    }

    #[test]
    fn test_keys_sorted() {
        let store = Store::new();
        let keys = store.keys();
        assert!(keys.contains(&"synth.gain".to_string()));
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(sorted, keys);
    }
}
