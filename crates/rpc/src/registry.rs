//! Executor registry.
//!
//! Maps function names to executor constructors. A registry is built
//! once at process start and handed to the [`Worker`](crate::Worker) by
//! reference; there is no global registration.

use std::collections::BTreeMap;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};

/// Type-specific logic invoked by a function call.
pub trait Executor {
    /// Parameter shape decoded from the call payload
    type Params: DeserializeOwned;
    /// Result serialized back as the return value
    type Output: Serialize;

    fn execute(&self, params: Self::Params) -> anyhow::Result<Self::Output>;
}

type Handler = Box<dyn Fn(Value) -> Result<Value> + Send + Sync>;

/// Name → executor mapping used for dispatch
#[derive(Default)]
pub struct Registry {
    handlers: BTreeMap<String, Handler>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor under `name`.
    ///
    /// A fresh executor is constructed for every call.
    pub fn register<E, F>(&mut self, name: &str, constructor: F) -> Result<()>
    where
        E: Executor + 'static,
        F: Fn() -> E + Send + Sync + 'static,
    {
        if self.handlers.contains_key(name) {
            return Err(Error::AlreadyRegistered(name.to_string()));
        }

        let function = name.to_string();
        let handler = move |params: Value| -> Result<Value> {
            let params: E::Params = serde_json::from_value(params)
                .map_err(|e| Error::Remote(format!("bad params for {function}: {e}")))?;
            let output = constructor()
                .execute(params)
                .map_err(|e| Error::Remote(format!("{e:#}")))?;
            Ok(serde_json::to_value(output)?)
        };

        self.handlers.insert(name.to_string(), Box::new(handler));
        Ok(())
    }

    /// Registered names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Decode `params`, run the named executor and serialize its output.
    pub fn call(&self, function: &str, params: Value) -> Result<Value> {
        let handler = self
            .handlers
            .get(function)
            .ok_or_else(|| Error::UnknownFunction(function.to_string()))?;
        handler(params)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.handlers.keys()).finish()
    }
}
