//! Call dispatch.

use crate::error::DispatchError;
use crate::registry::{FunctionRegistry, ParamEncoding};
use postbird_protocol::CallFrame;
use serde_json::Value;

/// Resolves function names against a registry and invokes them.
///
/// A dispatcher owns its registry, so registration is finished by the time
/// one exists. Wrap it in an `Arc` to share it between connections.
#[derive(Debug)]
pub struct Dispatcher {
    registry: FunctionRegistry,
}

impl Dispatcher {
    pub fn new(registry: FunctionRegistry) -> Self {
        Self { registry }
    }

    /// Invokes `name` with JSON `params`.
    ///
    /// The parameter count is checked against the handler's declared arity
    /// before the handler runs; conversion failures surface as
    /// [`DispatchError::TypeMismatch`].
    pub fn invoke(&self, name: &str, params: Vec<Value>) -> Result<Value, DispatchError> {
        self.invoke_with(name, params, ParamEncoding::Json)
    }

    /// Invokes `name`, converting `params` according to `encoding`.
    pub fn invoke_with(
        &self,
        name: &str,
        params: Vec<Value>,
        encoding: ParamEncoding,
    ) -> Result<Value, DispatchError> {
        let handler = self
            .registry
            .resolve(name)
            .ok_or_else(|| DispatchError::UnknownFunction(name.to_string()))?;

        let expected = handler.arity();
        if params.len() != expected {
            return Err(DispatchError::ArityMismatch {
                function: name.to_string(),
                expected,
                actual: params.len(),
            });
        }

        handler
            .call_with(params, encoding)
            .map_err(|e| e.for_function(name))
    }

    /// Invokes the function a decoded frame names.
    pub fn invoke_frame(&self, frame: CallFrame) -> Result<Value, DispatchError> {
        self.invoke(&frame.function_name, frame.params)
    }

    /// [`invoke_frame`](Self::invoke_frame) with an explicit parameter encoding.
    pub fn invoke_frame_with(
        &self,
        frame: CallFrame,
        encoding: ParamEncoding,
    ) -> Result<Value, DispatchError> {
        self.invoke_with(&frame.function_name, frame.params, encoding)
    }

    /// Returns the declared arity of `name`, if registered.
    pub fn arity(&self, name: &str) -> Option<usize> {
        self.registry.resolve(name).map(|h| h.arity())
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }
}

impl From<FunctionRegistry> for Dispatcher {
    fn from(registry: FunctionRegistry) -> Self {
        Self::new(registry)
    }
}
