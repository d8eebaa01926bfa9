//! Typed handler methods behind a uniform, type-erased call surface.
//!
//! A [`Method`] binds a stable name to one of four supported shapes:
//!
//! | shape       | input | output                  |
//! |-------------|-------|-------------------------|
//! | `Procedure` | none  | `Result<(), SedError>`  |
//! | `Consumer`  | `Req` | `Result<(), SedError>`  |
//! | `Function`  | `Req` | `Result<Resp, SedError>`|
//! | `Sink`      | `Req` | `()`                    |
//!
//! The route table and the compensable registry call methods by name through
//! this surface; the recorded [`MethodSignature`] replaces runtime
//! introspection when checking Try/Confirm/Cancel symmetry.

use std::any::{Any, TypeId};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use sedmesh_core::{Codec, CodecError, Validate, ValidationResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::context::CallContext;
use crate::error::SedError;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

// ---------------------------------------------------------------------------
// Signatures
// ---------------------------------------------------------------------------

/// Supported method shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodShape {
    Procedure,
    Consumer,
    Function,
    Sink,
}

impl MethodShape {
    #[must_use]
    pub fn returns_error(self) -> bool {
        !matches!(self, Self::Sink)
    }
}

/// Identity of a parameter or return type.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TypeSig {
    id: TypeId,
    name: &'static str,
}

impl TypeSig {
    #[must_use]
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for TypeSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Input and output types of a method, in declaration order. The error type
/// of a fallible shape is the last output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSignature {
    pub shape: MethodShape,
    pub inputs: Vec<TypeSig>,
    pub outputs: Vec<TypeSig>,
}

impl MethodSignature {
    fn new(shape: MethodShape, input: Option<TypeSig>, value: Option<TypeSig>) -> Self {
        let mut outputs: Vec<TypeSig> = value.into_iter().collect();
        if shape.returns_error() {
            outputs.push(TypeSig::of::<SedError>());
        }
        Self {
            shape,
            inputs: input.into_iter().collect(),
            outputs,
        }
    }

    /// Whether the last output is the structured error type.
    #[must_use]
    pub fn returns_error(&self) -> bool {
        self.outputs.last() == Some(&TypeSig::of::<SedError>())
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |sigs: &[TypeSig]| sigs.iter().map(TypeSig::name).collect::<Vec<_>>().join(", ");
        write!(f, "({}) -> ({})", names(&self.inputs), names(&self.outputs))
    }
}

// ---------------------------------------------------------------------------
// Erased values
// ---------------------------------------------------------------------------

/// A decoded method input.
pub struct Input(Box<dyn Any + Send>);

impl Input {
    fn downcast<T: 'static>(self) -> Result<T, SedError> {
        self.0
            .downcast::<T>()
            .map(|b| *b)
            .map_err(|_| SedError::Internal("method input type mismatch".to_string()))
    }

    fn downcast_ref<T: 'static>(&self) -> Result<&T, SedError> {
        self.0
            .downcast_ref::<T>()
            .ok_or_else(|| SedError::Internal("method input type mismatch".to_string()))
    }
}

trait EncodeBody: Send {
    fn encode(&self, codec: Codec) -> Result<Vec<u8>, CodecError>;
}

impl<T: Serialize + Send> EncodeBody for T {
    fn encode(&self, codec: Codec) -> Result<Vec<u8>, CodecError> {
        codec.encode(self)
    }
}

/// The value a method returned, not yet encoded.
pub struct Output(Option<Box<dyn EncodeBody>>);

impl Output {
    #[must_use]
    pub fn none() -> Self {
        Self(None)
    }

    fn value<T: Serialize + Send + 'static>(value: T) -> Self {
        Self(Some(Box::new(value)))
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }

    /// Encodes the value; `None` when the method has no value output.
    ///
    /// # Errors
    ///
    /// Returns `SedError::Encode` if the value cannot be encoded.
    pub fn encode(&self, codec: Codec) -> Result<Option<Vec<u8>>, SedError> {
        self.0
            .as_ref()
            .map(|v| v.encode(codec))
            .transpose()
            .map_err(|e| SedError::Encode(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Handler trait
// ---------------------------------------------------------------------------

/// A handler instance with a typed request/response and an optional
/// pre-handle hook. Bound with [`Method::handler`] as a `Function` shape.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    type Request: DeserializeOwned + Validate + Send + 'static;
    type Response: Serialize + Send + 'static;

    async fn handle(&self, ctx: CallContext, request: Self::Request) -> Result<Self::Response, SedError>;

    /// Runs after decoding and validation, before `handle`.
    fn pre_handle(&self, _ctx: &CallContext, _request: &Self::Request) -> Result<(), SedError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Method
// ---------------------------------------------------------------------------

trait Invocable: Send + Sync {
    fn decode(&self, codec: Codec, payload: &[u8]) -> Result<Input, SedError>;
    fn validate(&self, input: &Input) -> Result<ValidationResult, SedError>;
    fn pre_handle(&self, ctx: &CallContext, input: &Input) -> Result<(), SedError>;
    fn call(&self, ctx: CallContext, input: Input) -> BoxFuture<Result<Output, SedError>>;
}

type RunFn<Req> = dyn Fn(CallContext, Req) -> BoxFuture<Result<Output, SedError>> + Send + Sync;
type HookFn<Req> = dyn Fn(&CallContext, &Req) -> Result<(), SedError> + Send + Sync;

struct Bound<Req> {
    run: Box<RunFn<Req>>,
    hook: Option<Box<HookFn<Req>>>,
    /// Procedures ignore the payload entirely.
    takes_input: bool,
    _marker: PhantomData<fn(Req)>,
}

impl<Req> Invocable for Bound<Req>
where
    Req: DeserializeOwned + Validate + Send + 'static,
{
    fn decode(&self, codec: Codec, payload: &[u8]) -> Result<Input, SedError> {
        if !self.takes_input {
            return Ok(Input(Box::new(())));
        }
        codec
            .decode::<Req>(payload)
            .map(|req| Input(Box::new(req)))
            .map_err(|e| SedError::Decode(e.to_string()))
    }

    fn validate(&self, input: &Input) -> Result<ValidationResult, SedError> {
        if !self.takes_input {
            return Ok(ValidationResult::Valid);
        }
        Ok(input.downcast_ref::<Req>()?.validate())
    }

    fn pre_handle(&self, ctx: &CallContext, input: &Input) -> Result<(), SedError> {
        match &self.hook {
            Some(hook) => hook(ctx, input.downcast_ref::<Req>()?),
            None => Ok(()),
        }
    }

    fn call(&self, ctx: CallContext, input: Input) -> BoxFuture<Result<Output, SedError>> {
        match input.downcast::<Req>() {
            Ok(req) => (self.run)(ctx, req),
            Err(e) => Box::pin(async move { Err(e) }),
        }
    }
}

/// A named, type-erased handler method.
#[derive(Clone)]
pub struct Method {
    name: Arc<str>,
    signature: MethodSignature,
    inner: Arc<dyn Invocable>,
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

impl Method {
    fn bind<Req>(
        name: &str,
        signature: MethodSignature,
        takes_input: bool,
        run: Box<RunFn<Req>>,
        hook: Option<Box<HookFn<Req>>>,
    ) -> Self
    where
        Req: DeserializeOwned + Validate + Send + 'static,
    {
        Self {
            name: Arc::from(name),
            signature,
            inner: Arc::new(Bound {
                run,
                hook,
                takes_input,
                _marker: PhantomData,
            }),
        }
    }

    /// Zero-argument method returning only an error.
    pub fn procedure<F, Fut>(name: &str, f: F) -> Self
    where
        F: Fn(CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), SedError>> + Send + 'static,
    {
        let run: Box<RunFn<()>> = Box::new(move |ctx, ()| {
            let fut = f(ctx);
            Box::pin(async move { fut.await.map(|()| Output::none()) })
        });
        Self::bind(name, MethodSignature::new(MethodShape::Procedure, None, None), false, run, None)
    }

    /// One-argument method returning only an error.
    pub fn consumer<Req, F, Fut>(name: &str, f: F) -> Self
    where
        Req: DeserializeOwned + Validate + Send + 'static,
        F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), SedError>> + Send + 'static,
    {
        let run: Box<RunFn<Req>> = Box::new(move |ctx, req| {
            let fut = f(ctx, req);
            Box::pin(async move { fut.await.map(|()| Output::none()) })
        });
        let sig = MethodSignature::new(MethodShape::Consumer, Some(TypeSig::of::<Req>()), None);
        Self::bind(name, sig, true, run, None)
    }

    /// One-argument method returning a value and an error.
    pub fn function<Req, Resp, F, Fut>(name: &str, f: F) -> Self
    where
        Req: DeserializeOwned + Validate + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, SedError>> + Send + 'static,
    {
        let run: Box<RunFn<Req>> = Box::new(move |ctx, req| {
            let fut = f(ctx, req);
            Box::pin(async move { fut.await.map(Output::value) })
        });
        let sig = MethodSignature::new(
            MethodShape::Function,
            Some(TypeSig::of::<Req>()),
            Some(TypeSig::of::<Resp>()),
        );
        Self::bind(name, sig, true, run, None)
    }

    /// One-argument method with no return value (fire-and-forget events).
    pub fn sink<Req, F, Fut>(name: &str, f: F) -> Self
    where
        Req: DeserializeOwned + Validate + Send + 'static,
        F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let run: Box<RunFn<Req>> = Box::new(move |ctx, req| {
            let fut = f(ctx, req);
            Box::pin(async move {
                fut.await;
                Ok(Output::none())
            })
        });
        let sig = MethodSignature::new(MethodShape::Sink, Some(TypeSig::of::<Req>()), None);
        Self::bind(name, sig, true, run, None)
    }

    /// Binds a [`Handler`] instance, including its pre-handle hook.
    pub fn handler<H: Handler>(name: &str, handler: Arc<H>) -> Self {
        let for_run = Arc::clone(&handler);
        let run: Box<RunFn<H::Request>> = Box::new(move |ctx, req| {
            let h = Arc::clone(&for_run);
            Box::pin(async move { h.handle(ctx, req).await.map(Output::value) })
        });
        let hook: Box<HookFn<H::Request>> = Box::new(move |ctx, req| handler.pre_handle(ctx, req));
        let sig = MethodSignature::new(
            MethodShape::Function,
            Some(TypeSig::of::<H::Request>()),
            Some(TypeSig::of::<H::Response>()),
        );
        Self::bind(name, sig, true, run, Some(hook))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn signature(&self) -> &MethodSignature {
        &self.signature
    }

    /// Decodes a payload into this method's input type.
    ///
    /// # Errors
    ///
    /// Returns `SedError::Decode` if the payload does not match the input.
    pub fn decode(&self, codec: Codec, payload: &[u8]) -> Result<Input, SedError> {
        self.inner.decode(codec, payload)
    }

    /// Runs the input type's constraint checks.
    ///
    /// # Errors
    ///
    /// Returns the field violations, or an internal error on an input that
    /// was decoded by a different method.
    pub fn validate(&self, input: &Input) -> Result<(), SedError> {
        match self.inner.validate(input)? {
            ValidationResult::Valid => Ok(()),
            ValidationResult::Invalid { errors } => Err(SedError::Validation { errors }),
        }
    }

    /// Runs the declared pre-handle hook, if any.
    ///
    /// # Errors
    ///
    /// Returns whatever the hook rejects the request with.
    pub fn pre_handle(&self, ctx: &CallContext, input: &Input) -> Result<(), SedError> {
        self.inner.pre_handle(ctx, input)
    }

    /// Invokes the method body.
    #[must_use]
    pub fn call(&self, ctx: CallContext, input: Input) -> BoxFuture<Result<Output, SedError>> {
        self.inner.call(ctx, input)
    }
}
