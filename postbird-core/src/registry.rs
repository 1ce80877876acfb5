//! Function registry.
//!
//! Handlers are plain Rust functions or closures. Registration wraps each one
//! in a type-erased [`ErasedHandler`] that knows its arity and converts the
//! loosely-typed wire parameters into the handler's own argument types.

use crate::error::DispatchError;
use postbird_protocol::TransportKind;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

/// How received parameters are converted into handler arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamEncoding {
    /// Parameters are JSON values and must match the argument types as they are.
    #[default]
    Json,
    /// Parameters arrived as text. A string that does not fit the argument
    /// type is also tried as JSON, so `"2"` can fill an `i64`.
    Text,
}

impl ParamEncoding {
    /// Encoding of calls received over `transport`.
    pub fn for_transport(transport: TransportKind) -> Self {
        match transport {
            TransportKind::RawTcp => ParamEncoding::Json,
            TransportKind::PushChannel => ParamEncoding::Text,
        }
    }
}

/// A function that can be invoked with positional JSON parameters.
///
/// Implemented for every `Fn(A1, ..., An) -> R` up to eight arguments where
/// each argument is [`DeserializeOwned`] and the return value is
/// [`Serialize`]. The `Args` parameter only disambiguates the blanket impls.
pub trait Handler<Args>: Send + Sync + 'static {
    /// Number of parameters the handler declares.
    fn arity(&self) -> usize;

    /// Converts `params` and calls the handler. Fails with
    /// [`DispatchError::ArityMismatch`] before converting anything if the
    /// parameter count is wrong.
    fn call_with(&self, params: Vec<Value>, encoding: ParamEncoding)
        -> Result<Value, DispatchError>;

    /// [`call_with`](Self::call_with) for JSON parameters.
    fn call(&self, params: Vec<Value>) -> Result<Value, DispatchError> {
        self.call_with(params, ParamEncoding::Json)
    }
}

/// Object-safe view of a registered handler.
pub trait ErasedHandler: Send + Sync {
    fn arity(&self) -> usize;
    fn call_with(&self, params: Vec<Value>, encoding: ParamEncoding)
        -> Result<Value, DispatchError>;

    fn call(&self, params: Vec<Value>) -> Result<Value, DispatchError> {
        self.call_with(params, ParamEncoding::Json)
    }
}

struct Erased<H, Args> {
    handler: H,
    _args: PhantomData<fn(Args)>,
}

impl<H, Args> ErasedHandler for Erased<H, Args>
where
    H: Handler<Args>,
    Args: 'static,
{
    fn arity(&self) -> usize {
        self.handler.arity()
    }

    fn call_with(
        &self,
        params: Vec<Value>,
        encoding: ParamEncoding,
    ) -> Result<Value, DispatchError> {
        self.handler.call_with(params, encoding)
    }
}

fn take_param<T: DeserializeOwned>(
    value: Value,
    index: usize,
    encoding: ParamEncoding,
) -> Result<T, DispatchError> {
    T::deserialize(&value)
        .or_else(|err| match (&value, encoding) {
            (Value::String(text), ParamEncoding::Text) => {
                serde_json::from_str(text).map_err(|_| err)
            }
            _ => Err(err),
        })
        .map_err(|e| DispatchError::TypeMismatch {
            index,
            expected_type: std::any::type_name::<T>(),
            message: e.to_string(),
        })
}

fn into_result<R: Serialize>(value: R) -> Result<Value, DispatchError> {
    serde_json::to_value(value).map_err(|e| DispatchError::InvalidReturn(e.to_string()))
}

macro_rules! count {
    () => { 0usize };
    ($head:ident $($tail:ident)*) => { 1usize + count!($($tail)*) };
}

macro_rules! impl_handler {
    ($($arg:ident),*) => {
        impl<F, R, $($arg,)*> Handler<($($arg,)*)> for F
        where
            F: Fn($($arg),*) -> R + Send + Sync + 'static,
            R: Serialize,
            $($arg: DeserializeOwned,)*
        {
            fn arity(&self) -> usize {
                count!($($arg)*)
            }

            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn call_with(
                &self,
                params: Vec<Value>,
                encoding: ParamEncoding,
            ) -> Result<Value, DispatchError> {
                let expected = count!($($arg)*);
                let actual = params.len();
                let arity_mismatch = || DispatchError::ArityMismatch {
                    function: String::new(),
                    expected,
                    actual,
                };
                if actual != expected {
                    return Err(arity_mismatch());
                }

                let mut params = params.into_iter().enumerate();
                $(
                    let $arg: $arg = match params.next() {
                        Some((index, value)) => take_param(value, index, encoding)?,
                        None => return Err(arity_mismatch()),
                    };
                )*
                into_result((self)($($arg),*))
            }
        }
    };
}

impl_handler!();
impl_handler!(A1);
impl_handler!(A1, A2);
impl_handler!(A1, A2, A3);
impl_handler!(A1, A2, A3, A4);
impl_handler!(A1, A2, A3, A4, A5);
impl_handler!(A1, A2, A3, A4, A5, A6);
impl_handler!(A1, A2, A3, A4, A5, A6, A7);
impl_handler!(A1, A2, A3, A4, A5, A6, A7, A8);

/// Mapping from function name to handler.
///
/// The registry is filled while it is still exclusively owned and then
/// handed to a [`Dispatcher`](crate::Dispatcher), which only reads it. All
/// registration therefore completes before any connection is served.
#[derive(Default, Clone)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn ErasedHandler>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `handler` under `name`, replacing any earlier registration.
    ///
    /// Arity and parameter types are checked when the function is called,
    /// not here.
    pub fn register<Args, H>(&mut self, name: impl Into<String>, handler: H) -> &mut Self
    where
        H: Handler<Args>,
        Args: 'static,
    {
        let name = name.into();
        let erased: Arc<dyn ErasedHandler> = Arc::new(Erased {
            handler,
            _args: PhantomData,
        });
        if self.functions.insert(name.clone(), erased).is_some() {
            tracing::debug!("Replaced handler for '{}'", name);
        }
        self
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<Args, H>(mut self, name: impl Into<String>, handler: H) -> Self
    where
        H: Handler<Args>,
        Args: 'static,
    {
        self.register(name, handler);
        self
    }

    /// Looks up the handler registered under `name`.
    pub fn resolve(&self, name: &str) -> Option<&Arc<dyn ErasedHandler>> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Returns registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}
