/*!
Session state: the default module, aliases, session config and globals a
client façade ships alongside every command.

State values are immutable; every `with_*` produces a new value, so derived
façades never observe each other's changes. Encoding against a connection's
state descriptor is memoized per descriptor id, which keeps repeated
commands from re-encoding an unchanged state.
*/

use std::collections::BTreeMap;
use std::sync::Mutex;

use bytes::BytesMut;
use uuid::Uuid;

use sedge_errors::{ClientEncodingError, Error, ErrorKind, ProtocolEncodingError};
use sedge_protocol::codec::build_codec;
use sedge_protocol::common::{RawTypedesc, State as EncodedState};
use sedge_protocol::value::{SparseObject, Value};

/// Anything that can be shipped as the state part of a command.
pub trait State: Send + Sync {
    fn encode(&self, desc: &RawTypedesc) -> Result<EncodedState, Error>;
}

impl State for EncodedState {
    fn encode(&self, _desc: &RawTypedesc) -> Result<EncodedState, Error> {
        Ok(self.clone())
    }
}

/// The session state attached to a client façade.
#[derive(Debug, Default)]
pub struct PoolState {
    module: Option<String>,
    aliases: BTreeMap<String, String>,
    config: BTreeMap<String, Value>,
    globals: BTreeMap<String, Value>,
    cache: Mutex<Option<(Uuid, EncodedState)>>,
}

impl Clone for PoolState {
    fn clone(&self) -> PoolState {
        PoolState {
            module: self.module.clone(),
            aliases: self.aliases.clone(),
            config: self.config.clone(),
            globals: self.globals.clone(),
            cache: Mutex::new(None),
        }
    }
}

impl PartialEq for PoolState {
    fn eq(&self, other: &PoolState) -> bool {
        self.module == other.module
            && self.aliases == other.aliases
            && self.config == other.config
            && self.globals == other.globals
    }
}

impl PoolState {
    pub fn with_default_module(&self, module: Option<String>) -> PoolState {
        PoolState {
            module,
            aliases: self.aliases.clone(),
            config: self.config.clone(),
            globals: self.globals.clone(),
            cache: Mutex::new(None),
        }
    }

    pub fn with_aliases(
        &self,
        aliases: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> PoolState {
        let mut merged = self.aliases.clone();
        merged.extend(aliases.into_iter().map(|(k, v)| (k.into(), v.into())));
        PoolState {
            module: self.module.clone(),
            aliases: merged,
            config: self.config.clone(),
            globals: self.globals.clone(),
            cache: Mutex::new(None),
        }
    }

    pub fn with_config(
        &self,
        config: impl IntoIterator<Item = (impl Into<String>, impl Into<Value>)>,
    ) -> PoolState {
        let mut merged = self.config.clone();
        merged.extend(config.into_iter().map(|(k, v)| (k.into(), v.into())));
        PoolState {
            module: self.module.clone(),
            aliases: self.aliases.clone(),
            config: merged,
            globals: self.globals.clone(),
            cache: Mutex::new(None),
        }
    }

    pub fn with_globals(
        &self,
        globals: impl IntoIterator<Item = (impl Into<String>, impl Into<Value>)>,
    ) -> PoolState {
        let mut merged = self.globals.clone();
        merged.extend(
            globals
                .into_iter()
                .map(|(k, v)| (self.qualify(&k.into()), v.into())),
        );
        PoolState {
            module: self.module.clone(),
            aliases: self.aliases.clone(),
            config: self.config.clone(),
            globals: merged,
            cache: Mutex::new(None),
        }
    }

    pub fn without_config(&self) -> PoolState {
        PoolState {
            module: self.module.clone(),
            aliases: self.aliases.clone(),
            config: BTreeMap::new(),
            globals: self.globals.clone(),
            cache: Mutex::new(None),
        }
    }

    pub fn without_globals(&self) -> PoolState {
        PoolState {
            module: self.module.clone(),
            aliases: self.aliases.clone(),
            config: self.config.clone(),
            globals: BTreeMap::new(),
            cache: Mutex::new(None),
        }
    }

    pub fn module(&self) -> Option<&str> {
        self.module.as_deref()
    }

    pub fn is_default(&self) -> bool {
        self.module.is_none()
            && self.aliases.is_empty()
            && self.config.is_empty()
            && self.globals.is_empty()
    }

    /// Unqualified global names belong to the façade's default module.
    fn qualify(&self, name: &str) -> String {
        if name.contains("::") {
            name.to_string()
        } else {
            format!("{}::{}", self.module.as_deref().unwrap_or("default"), name)
        }
    }

    fn to_sparse_value(&self) -> Value {
        let mut fields: Vec<(String, Option<Value>)> = Vec::new();
        if let Some(module) = &self.module {
            fields.push(("module".into(), Some(Value::Str(module.clone()))));
        }
        if !self.aliases.is_empty() {
            let aliases = self
                .aliases
                .iter()
                .map(|(alias, target)| {
                    Value::Tuple(vec![
                        Value::Str(alias.clone()),
                        Value::Str(target.clone()),
                    ])
                })
                .collect();
            fields.push(("aliases".into(), Some(Value::Array(aliases))));
        }
        if !self.config.is_empty() {
            let config = self
                .config
                .iter()
                .map(|(name, value)| (name.clone(), Some(value.clone())))
                .collect::<Vec<_>>();
            fields.push((
                "config".into(),
                Some(Value::SparseObject(SparseObject::from_pairs(config))),
            ));
        }
        if !self.globals.is_empty() {
            let globals = self
                .globals
                .iter()
                .map(|(name, value)| (name.clone(), Some(value.clone())))
                .collect::<Vec<_>>();
            fields.push((
                "globals".into(),
                Some(Value::SparseObject(SparseObject::from_pairs(globals))),
            ));
        }
        Value::SparseObject(SparseObject::from_pairs(fields))
    }
}

impl State for PoolState {
    fn encode(&self, desc: &RawTypedesc) -> Result<EncodedState, Error> {
        if self.is_default() {
            return Ok(EncodedState::empty());
        }
        if desc.id == Uuid::from_u128(0) {
            return Err(ClientEncodingError::with_message(
                "session state is not supported by this connection yet",
            ));
        }
        if let Some((id, cached)) = &*self.cache.lock().expect("state cache lock") {
            if *id == desc.id {
                return Ok(cached.clone());
            }
        }
        let typedesc = desc
            .decode()
            .map_err(ProtocolEncodingError::with_source)?;
        let codec = build_codec(typedesc.root_pos(), typedesc.descriptors())
            .map_err(ProtocolEncodingError::with_source)?;
        let mut buf = BytesMut::new();
        codec
            .encode(&mut buf, &self.to_sparse_value())
            .map_err(ClientEncodingError::with_source)?;
        let encoded = EncodedState {
            typedesc_id: desc.id,
            data: buf.freeze(),
        };
        *self.cache.lock().expect("state cache lock") = Some((desc.id, encoded.clone()));
        Ok(encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_does_not_touch_parent() {
        let base = PoolState::default().with_default_module(Some("base".into()));
        let derived = base
            .with_default_module(Some("test_module".into()))
            .with_aliases([("m", "test_module")]);
        assert_eq!(base.module(), Some("base"));
        assert_eq!(derived.module(), Some("test_module"));
        assert!(base.aliases.is_empty());
        assert_eq!(derived.aliases.len(), 1);
    }

    #[test]
    fn globals_are_qualified_against_module() {
        let state = PoolState::default().with_globals([("current_user", Value::Int64(1))]);
        assert!(state.globals.contains_key("default::current_user"));
        let state = PoolState::default()
            .with_default_module(Some("app".into()))
            .with_globals([("current_user", Value::Int64(1))]);
        assert!(state.globals.contains_key("app::current_user"));
        let state =
            PoolState::default().with_globals([("other::flag", Value::Bool(true))]);
        assert!(state.globals.contains_key("other::flag"));
    }

    #[test]
    fn default_state_encodes_empty() {
        let state = PoolState::default();
        let encoded = state.encode(&RawTypedesc::uninitialized()).unwrap();
        assert_eq!(encoded, EncodedState::empty());
    }
}
