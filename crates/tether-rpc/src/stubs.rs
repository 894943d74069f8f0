//! Callable stubs for a known set of remote functions.
//!
//! The set is fixed when it is built, so a typo in a function name fails at
//! setup rather than as a remote `NO_HANDLER` at call time.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use tether_core::{CodecError, Result, TetherError};

use crate::connection::Connection;

/// One remote function bound to a connection.
#[derive(Clone, Debug)]
pub struct FunctionStub {
    connection: Connection,
    function: Arc<str>,
    timeout: Option<Duration>,
}

impl FunctionStub {
    /// Remote function name.
    pub fn name(&self) -> &str {
        &self.function
    }

    /// Use `timeout` instead of the connection default.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Invoke the function.
    pub async fn call(&self, data: Value) -> Result<Value> {
        match self.timeout {
            Some(timeout) => {
                self.connection
                    .call_with_timeout(&self.function, data, timeout)
                    .await
            }
            None => self.connection.call(&self.function, data).await,
        }
    }

    /// Invoke the function with typed request and response.
    pub async fn call_as<Req, Resp>(&self, request: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let data =
            serde_json::to_value(request).map_err(|e| CodecError::Encode(e.to_string()))?;
        let response = self.call(data).await?;
        serde_json::from_value(response)
            .map_err(|e| TetherError::Codec(CodecError::Decode(e.to_string())))
    }
}

/// Stubs for every function the remote is known to serve.
#[derive(Clone, Debug)]
pub struct FunctionSet {
    stubs: BTreeMap<String, FunctionStub>,
}

impl FunctionSet {
    /// Bind `functions` to `connection`.
    ///
    /// Empty or repeated names are build errors.
    pub fn new<I, S>(connection: &Connection, functions: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut stubs = BTreeMap::new();
        for name in functions {
            let name: String = name.into();
            if name.is_empty() {
                return Err(TetherError::Build("function name must not be empty".into()));
            }
            if stubs.contains_key(&name) {
                return Err(TetherError::Build(format!("function '{name}' listed twice")));
            }
            let stub = FunctionStub {
                connection: connection.clone(),
                function: Arc::from(name.as_str()),
                timeout: None,
            };
            let _ = stubs.insert(name, stub);
        }
        Ok(Self { stubs })
    }

    /// Stub for `function`.
    pub fn stub(&self, function: &str) -> Result<&FunctionStub> {
        self.stubs.get(function).ok_or_else(|| TetherError::NoHandler {
            function: function.to_owned(),
        })
    }

    /// Look up and invoke `function`.
    pub async fn call(&self, function: &str, data: Value) -> Result<Value> {
        self.stub(function)?.call(data).await
    }

    /// Known function names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.stubs.keys().map(String::as_str)
    }

    /// Number of stubs.
    pub fn len(&self) -> usize {
        self.stubs.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.stubs.is_empty()
    }
}
