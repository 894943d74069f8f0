//! Function registry and async dispatch.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use tether_core::errors::{HANDLER_PANIC, NO_HANDLER, VALIDATION_ERROR};
use tether_core::{
    Envelope, FunctionCall, FunctionResult, HandlerError, PING_FUNCTION, Result, TetherError,
};

use crate::validation::Validators;

/// Payload answered to the reserved liveness function.
pub const PING_REPLY: &str = "pong";

/// Trait implemented by every function handler.
#[async_trait]
pub trait FunctionHandler: Send + Sync {
    /// Run the function with the call argument.
    async fn call(&self, data: Value) -> Result<Value, HandlerError>;
}

/// Handler built from an async closure over raw JSON values.
pub struct FnHandler<F>(F);

/// Wrap an async closure as a [`FunctionHandler`].
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> FunctionHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    async fn call(&self, data: Value) -> Result<Value, HandlerError> {
        (self.0)(data).await
    }
}

/// Handler built from an async closure over typed request and response.
pub struct TypedFn<F, Req, Resp> {
    f: F,
    _types: PhantomData<fn(Req) -> Resp>,
}

/// Wrap a typed async closure as a [`FunctionHandler`].
///
/// An argument that does not deserialize into `Req` is answered with
/// `INVALID_PARAMS`.
pub fn typed_fn<F, Fut, Req, Resp>(f: F) -> TypedFn<F, Req, Resp>
where
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, HandlerError>> + Send + 'static,
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
{
    TypedFn {
        f,
        _types: PhantomData,
    }
}

#[async_trait]
impl<F, Fut, Req, Resp> FunctionHandler for TypedFn<F, Req, Resp>
where
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, HandlerError>> + Send + 'static,
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
{
    async fn call(&self, data: Value) -> Result<Value, HandlerError> {
        let request: Req = serde_json::from_value(data)?;
        let response = (self.f)(request).await?;
        serde_json::to_value(response).map_err(|e| HandlerError::internal(e.to_string()))
    }
}

/// Registry mapping function names to handlers, shared by every peer.
#[derive(Default)]
pub struct FunctionRegistry {
    handlers: HashMap<String, Arc<dyn FunctionHandler>>,
}

impl FunctionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler.
    ///
    /// Empty names, the reserved liveness name and duplicates are build
    /// errors.
    pub fn register(&mut self, function: &str, handler: impl FunctionHandler + 'static) -> Result<()> {
        if function.is_empty() {
            return Err(TetherError::Build("function name must not be empty".into()));
        }
        if function == PING_FUNCTION {
            return Err(TetherError::Build(format!("'{PING_FUNCTION}' is reserved")));
        }
        if self.handlers.contains_key(function) {
            return Err(TetherError::Build(format!(
                "handler for '{function}' already registered"
            )));
        }
        let _ = self.handlers.insert(function.to_owned(), Arc::new(handler));
        Ok(())
    }

    /// Run the handler for `function` directly.
    ///
    /// The reserved liveness name answers without touching any handler. A
    /// missing handler is a `NO_HANDLER` error and a panic is a
    /// `HANDLER_PANIC` error.
    pub async fn invoke(&self, function: &str, data: Value) -> Result<Value, HandlerError> {
        if function == PING_FUNCTION {
            return Ok(Value::String(PING_REPLY.to_owned()));
        }
        let Some(handler) = self.handlers.get(function) else {
            return Err(HandlerError::Custom {
                code: NO_HANDLER.to_owned(),
                message: format!("No handler registered for function '{function}'"),
                data: None,
            });
        };
        match AssertUnwindSafe(handler.call(data)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                let detail = panic_message(&*panic);
                warn!(function, detail = %detail, "function handler panicked");
                Err(HandlerError::Custom {
                    code: HANDLER_PANIC.to_owned(),
                    message: format!("Handler for '{function}' panicked: {detail}"),
                    data: None,
                })
            }
        }
    }

    /// Answer an inbound call with a Result or Error envelope.
    pub async fn dispatch(&self, call: FunctionCall, validators: &Validators) -> Envelope {
        let FunctionCall {
            function,
            call_id,
            data,
        } = call;

        if function == PING_FUNCTION {
            return Envelope::Result(FunctionResult {
                function,
                call_id,
                data: Value::String(PING_REPLY.to_owned()),
            });
        }

        counter!("rpc_calls_total", "function" => function.clone()).increment(1);
        let start = Instant::now();

        let outcome = match validators.check_function(&function, &data) {
            Ok(()) => self.invoke(&function, data).await,
            Err(TetherError::Validation { message, .. }) => Err(HandlerError::Custom {
                code: VALIDATION_ERROR.to_owned(),
                message,
                data: None,
            }),
            Err(other) => Err(HandlerError::internal(other.to_string())),
        };

        let elapsed = start.elapsed();
        if elapsed.as_secs() >= 5 {
            warn!(function, duration_secs = elapsed.as_secs_f64(), "slow function call");
        }

        match outcome {
            Ok(data) => {
                debug!(function, call_id = %call_id, "call succeeded");
                Envelope::Result(FunctionResult {
                    function,
                    call_id,
                    data,
                })
            }
            Err(err) => {
                counter!(
                    "rpc_call_errors_total",
                    "function" => function.clone(),
                    "error_type" => err.code().to_owned()
                )
                .increment(1);
                debug!(function, call_id = %call_id, code = err.code(), "call failed");
                Envelope::Error(err.to_function_error(call_id))
            }
        }
    }

    /// Registered function names, sorted.
    pub fn functions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether `function` has a handler.
    pub fn has_function(&self, function: &str) -> bool {
        self.handlers.contains_key(function)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde::Deserialize;
    use serde_json::json;
    use std::time::Duration;
    use tether_core::errors::{HANDLER_ERROR, INVALID_PARAMS};
    use tether_core::{CallId, FunctionError};

    struct EchoHandler;

    #[async_trait]
    impl FunctionHandler for EchoHandler {
        async fn call(&self, data: Value) -> Result<Value, HandlerError> {
            Ok(data)
        }
    }

    struct FailHandler;

    #[async_trait]
    impl FunctionHandler for FailHandler {
        async fn call(&self, _data: Value) -> Result<Value, HandlerError> {
            Err(HandlerError::internal("boom"))
        }
    }

    struct PanicHandler;

    #[async_trait]
    impl FunctionHandler for PanicHandler {
        async fn call(&self, _data: Value) -> Result<Value, HandlerError> {
            panic!("handler exploded")
        }
    }

    fn call(function: &str, data: Value) -> FunctionCall {
        FunctionCall {
            function: function.into(),
            call_id: CallId::from("c-1"),
            data,
        }
    }

    fn expect_error(env: Envelope) -> FunctionError {
        match env {
            Envelope::Error(e) => e,
            other => panic!("expected error envelope, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dispatch_success_echoes_call_id() {
        let mut reg = FunctionRegistry::new();
        reg.register("echo", EchoHandler).unwrap();
        let env = reg.dispatch(call("echo", json!({"x": 1})), &Validators::new()).await;
        assert_matches!(
            env,
            Envelope::Result(r) if r.call_id.as_str() == "c-1" && r.data == json!({"x": 1}) && r.function == "echo"
        );
    }

    #[tokio::test]
    async fn dispatch_missing_handler() {
        let reg = FunctionRegistry::new();
        let err = expect_error(reg.dispatch(call("no.such", json!(null)), &Validators::new()).await);
        assert_eq!(err.code.as_deref(), Some(NO_HANDLER));
        assert!(err.message.contains("no.such"));
        assert_eq!(err.call_id.as_str(), "c-1");
    }

    #[tokio::test]
    async fn dispatch_handler_error() {
        let mut reg = FunctionRegistry::new();
        reg.register("fail", FailHandler).unwrap();
        let err = expect_error(reg.dispatch(call("fail", json!(null)), &Validators::new()).await);
        assert_eq!(err.code.as_deref(), Some(HANDLER_ERROR));
        assert_eq!(err.message, "boom");
    }

    #[tokio::test]
    async fn dispatch_catches_panic() {
        let mut reg = FunctionRegistry::new();
        reg.register("panic", PanicHandler).unwrap();
        let err = expect_error(reg.dispatch(call("panic", json!(null)), &Validators::new()).await);
        assert_eq!(err.code.as_deref(), Some(HANDLER_PANIC));
        assert!(err.message.contains("handler exploded"));
    }

    #[tokio::test]
    async fn ping_bypasses_handlers_and_validators() {
        let reg = FunctionRegistry::new();
        let mut validators = Validators::new();
        validators
            .add_function(PING_FUNCTION, |_| Err("never".into()))
            .unwrap();
        let env = reg.dispatch(call(PING_FUNCTION, json!(null)), &validators).await;
        assert_matches!(env, Envelope::Result(r) if r.data == json!("pong") && r.call_id.as_str() == "c-1");
    }

    #[tokio::test]
    async fn validation_failure_answers_validation_error() {
        let mut reg = FunctionRegistry::new();
        reg.register("echo", EchoHandler).unwrap();
        let mut validators = Validators::new();
        validators.add_function("echo", |_| Err("bad shape".into())).unwrap();
        let err = expect_error(reg.dispatch(call("echo", json!(1)), &validators).await);
        assert_eq!(err.code.as_deref(), Some(VALIDATION_ERROR));
        assert_eq!(err.message, "bad shape");

        validators.set_enabled(false);
        let env = reg.dispatch(call("echo", json!(1)), &validators).await;
        assert_matches!(env, Envelope::Result(_));
    }

    #[test]
    fn duplicate_registration_is_build_error() {
        let mut reg = FunctionRegistry::new();
        reg.register("f", EchoHandler).unwrap();
        assert_matches!(reg.register("f", FailHandler), Err(TetherError::Build(_)));
        assert_matches!(reg.register(PING_FUNCTION, EchoHandler), Err(TetherError::Build(_)));
        assert_matches!(reg.register("", EchoHandler), Err(TetherError::Build(_)));
    }

    #[test]
    fn list_functions_sorted() {
        let mut reg = FunctionRegistry::new();
        reg.register("b", EchoHandler).unwrap();
        reg.register("a", EchoHandler).unwrap();
        assert_eq!(reg.functions(), vec!["a", "b"]);
        assert!(reg.has_function("a"));
        assert!(!reg.has_function("c"));
        assert_eq!(reg.len(), 2);
    }

    #[tokio::test]
    async fn closure_handler() {
        let mut reg = FunctionRegistry::new();
        reg.register(
            "double",
            handler_fn(|data: Value| async move {
                match data.as_i64() {
                    Some(n) => Ok(json!(n * 2)),
                    None => Err(HandlerError::invalid_params("number")),
                }
            }),
        )
        .unwrap();
        assert_eq!(reg.invoke("double", json!(21)).await.unwrap(), json!(42));
        assert_matches!(
            reg.invoke("double", json!("x")).await,
            Err(HandlerError::InvalidParams { .. })
        );
    }

    #[derive(Deserialize)]
    struct Add {
        a: i64,
        b: i64,
    }

    #[tokio::test]
    async fn typed_handler() {
        let mut reg = FunctionRegistry::new();
        reg.register("add", typed_fn(|req: Add| async move { Ok(req.a + req.b) }))
            .unwrap();
        assert_eq!(reg.invoke("add", json!({"a": 2, "b": 3})).await.unwrap(), json!(5));
        let err = reg.invoke("add", json!({"a": 2})).await.unwrap_err();
        assert_eq!(err.code(), INVALID_PARAMS);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_completes() {
        let mut reg = FunctionRegistry::new();
        reg.register(
            "slow",
            handler_fn(|_| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(json!("done"))
            }),
        )
        .unwrap();
        let env = reg.dispatch(call("slow", json!(null)), &Validators::new()).await;
        assert_matches!(env, Envelope::Result(r) if r.data == json!("done"));
    }
}
