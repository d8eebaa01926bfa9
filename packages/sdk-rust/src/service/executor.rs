//! The executor: turns one inbound message into one outbound message.
//!
//! ```text
//! inbound -> pre-dispatch hook -> route lookup -> chain (pre)
//!         -> decode -> validate / pre-handle -> invoke (direct or TCC proxy)
//!         -> encode -> chain (post, reverse) -> outbound
//! ```
//!
//! `handle` is total: every failure, including a panic anywhere in the
//! dispatch, comes back as a rendered error envelope.

use std::convert::Infallible;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::FutureExt;
use sedmesh_core::{keys, Message};
use tokio_util::sync::CancellationToken;
use tower::Service;
use tracing::{debug, error, info_span, warn, Instrument};

use super::config::ConfigHandle;
use super::context::CallContext;
use super::descriptor::HandlerDescriptor;
use super::envelope::EnvelopeRenderer;
use super::i18n::CatalogTranslator;
use super::method::{Input, Method, Output};
use super::router::Routes;
use crate::error::{BranchPhase, SedError};
use crate::tcc::{BranchInvoker, BranchLedger, TransactionProxy};
use crate::traits::{PreDispatchHook, ReplySink, Translator};

/// Counter of dispatches by outcome.
pub const DISPATCH_TOTAL: &str = "sed_dispatch_total";

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct Executor {
    routes: Routes,
    config: ConfigHandle,
    invoker: BranchInvoker,
    proxy: TransactionProxy,
    renderer: EnvelopeRenderer,
    hook: Option<Arc<dyn PreDispatchHook>>,
    reply_sink: Option<Arc<dyn ReplySink>>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("routes", &self.routes.table.len())
            .field("compensables", &self.routes.compensables.len())
            .field("hook", &self.hook.is_some())
            .field("reply_sink", &self.reply_sink.is_some())
            .finish_non_exhaustive()
    }
}

impl Executor {
    #[must_use]
    pub fn builder(routes: Routes) -> ExecutorBuilder {
        ExecutorBuilder::new(routes)
    }

    #[must_use]
    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    #[must_use]
    pub fn renderer(&self) -> &EnvelopeRenderer {
        &self.renderer
    }

    #[must_use]
    pub fn invoker(&self) -> &BranchInvoker {
        &self.invoker
    }

    #[must_use]
    pub fn ledger(&self) -> &Arc<BranchLedger> {
        self.proxy.ledger()
    }

    /// Dispatches one inbound message.
    pub async fn handle(&self, inbound: Message) -> Message {
        self.handle_with_cancel(CancellationToken::new(), inbound).await
    }

    /// Dispatches one inbound message; cancelling `cancel` abandons the
    /// handler body and yields a cancelled error envelope.
    pub async fn handle_with_cancel(&self, cancel: CancellationToken, inbound: Message) -> Message {
        let ctx = CallContext::from_inbound(&inbound, self.config.load(), cancel);
        let span = info_span!(
            "dispatch",
            event_id = %ctx.event_id,
            correlation_id = ctx.correlation_id,
            trace_id = %ctx.trace.trace_id,
            error_code = tracing::field::Empty,
        );
        let fallback = inbound.reply();

        async {
            match AssertUnwindSafe(self.dispatch(&ctx, inbound)).catch_unwind().await {
                Ok(response) => response,
                Err(panic) => {
                    let err = SedError::from_panic(panic.as_ref());
                    error!(error = %err, "dispatch panicked");
                    let combine = ctx.config().validation.combine_errors;
                    self.fail(&ctx, fallback, &err, combine).await
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn dispatch(&self, ctx: &CallContext, inbound: Message) -> Message {
        if let Some(hook) = &self.hook {
            if let Some(response) = hook.before_dispatch(ctx, &inbound).await {
                debug!("dispatch short-circuited by pre-dispatch hook");
                return response;
            }
        }

        let tcc = &ctx.config().tcc;
        let phase = if ctx.event_id == tcc.confirm_event_id {
            Some(BranchPhase::Confirm)
        } else if ctx.event_id == tcc.cancel_event_id {
            Some(BranchPhase::Cancel)
        } else {
            None
        };
        if let Some(phase) = phase {
            let reply = self.invoker.handle_message(ctx, phase, &inbound).await;
            let code = reply.properties.get(keys::ERROR_CODE).unwrap_or_default();
            tracing::Span::current().record("error_code", code);
            return reply;
        }

        let descriptor = match self.resolve(&inbound) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                let combine = ctx.config().validation.combine_errors;
                return self.fail(ctx, inbound.reply(), &err, combine).await;
            }
        };
        let combine = descriptor.validation.combine(ctx.config());

        let pre = descriptor.chain.run_pre(ctx.clone(), inbound).await;
        let (call_ctx, response, error) = match pre.error {
            Some(err) => (pre.ctx.clone(), pre.request.reply(), Some(err)),
            None => {
                let (call_ctx, result) = self.invoke(&pre.ctx, &descriptor, &pre.request).await;
                match result {
                    Ok(response) => (call_ctx, response, None),
                    Err(err) => (call_ctx, pre.request.reply(), Some(err)),
                }
            }
        };
        let (response, error) = descriptor
            .chain
            .run_post(pre.entered, &call_ctx, &pre.request, response, error)
            .await;

        match error {
            Some(err) => self.fail(&call_ctx, response, &err, combine).await,
            None => Self::finish(&call_ctx, response),
        }
    }

    /// Route by URL path when the message carries one, else by event id.
    fn resolve(&self, inbound: &Message) -> Result<Arc<HandlerDescriptor>, SedError> {
        if let Some(path) = inbound.properties.non_empty(keys::URL_PATH) {
            let verb = inbound
                .properties
                .non_empty(keys::HTTP_METHOD)
                .and_then(|m| http::Method::from_bytes(m.to_ascii_uppercase().as_bytes()).ok());
            return self
                .routes
                .table
                .match_path(path, verb.as_ref())
                .ok_or_else(|| SedError::PathNotFound {
                    path: path.to_owned(),
                });
        }
        self.routes
            .table
            .match_event(inbound.event_id())
            .ok_or_else(|| SedError::HandlerNotFound {
                event_id: inbound.event_id().to_owned(),
            })
    }

    /// Decode, validate, pre-handle, invoke and encode. Returns the context
    /// the method ran with, which is transactional for compensable routes.
    async fn invoke(
        &self,
        ctx: &CallContext,
        descriptor: &HandlerDescriptor,
        request: &Message,
    ) -> (CallContext, Result<Message, SedError>) {
        let method = &descriptor.method;
        let prepared = method.decode(descriptor.codec, &request.payload).and_then(|input| {
            if descriptor.validation.enabled() {
                method.validate(&input)?;
            }
            method.pre_handle(ctx, &input)?;
            Ok(input)
        });
        let input = match prepared {
            Ok(input) => input,
            Err(err) => return (ctx.clone(), Err(err)),
        };

        let ctx = match &descriptor.compensable {
            Some(compensable) => self
                .proxy
                .begin(ctx, compensable, descriptor.codec, &request.payload),
            None => ctx.clone(),
        };

        let called = Self::call_bounded(&ctx, method, input).await;
        if called.is_err() && descriptor.compensable.is_some() {
            self.proxy.try_failed(&ctx);
        }
        let result = called.and_then(|output| {
            let mut response = request.reply();
            if let Some(body) = output.encode(descriptor.codec)? {
                response.payload = body;
            }
            Ok(response)
        });
        (ctx, result)
    }

    /// Runs the method body bounded by the deadline and the cancellation
    /// token. A panic in the body is recovered here so post-handles still run.
    async fn call_bounded(ctx: &CallContext, method: &Method, input: Input) -> Result<Output, SedError> {
        let call = AssertUnwindSafe(method.call(ctx.clone(), input)).catch_unwind();
        tokio::select! {
            biased;
            () = ctx.cancellation().cancelled() => Err(SedError::Cancelled),
            outcome = tokio::time::timeout_at(ctx.deadline(), call) => match outcome {
                Ok(Ok(result)) => result,
                Ok(Err(panic)) => {
                    let err = SedError::from_panic(panic.as_ref());
                    error!(method = method.name(), error = %err, "handler panicked");
                    Err(err)
                }
                Err(_) => Err(SedError::DeadlineExceeded {
                    budget_ms: u64::try_from((ctx.deadline() - ctx.started_at()).as_millis())
                        .unwrap_or(u64::MAX),
                }),
            },
        }
    }

    fn finish(ctx: &CallContext, mut response: Message) -> Message {
        Self::stamp(ctx, &mut response);
        metrics::counter!(DISPATCH_TOTAL, "outcome" => "ok").increment(1);
        response
    }

    /// Renders `err` once into the response; semi-sync callers also get the
    /// error through the reply sink.
    async fn fail(&self, ctx: &CallContext, mut response: Message, err: &SedError, combine: bool) -> Message {
        Self::stamp(ctx, &mut response);
        self.renderer.render(ctx, err, combine, &mut response);

        tracing::Span::current().record("error_code", err.code());
        metrics::counter!(
            DISPATCH_TOTAL,
            "outcome" => "error",
            "kind" => err.kind().as_str()
        )
        .increment(1);
        warn!(code = err.code(), kind = err.kind().as_str(), error = %err, "dispatch failed");

        if ctx.semi_sync {
            if let Some(sink) = &self.reply_sink {
                if let Err(e) = sink.push_reply(ctx, response.clone()).await {
                    warn!(error = %e, "semi-sync error reply could not be pushed");
                }
            }
        }
        response
    }

    /// Handler-set headers, transaction ids and trace ids.
    fn stamp(ctx: &CallContext, response: &mut Message) {
        response.properties.merge(&ctx.response_headers());
        if let Some(tx) = &ctx.tx {
            tx.inject(&mut response.properties);
        }
        ctx.trace.inject(&mut response.properties);
    }
}

// ---------------------------------------------------------------------------
// ExecutorBuilder
// ---------------------------------------------------------------------------

pub struct ExecutorBuilder {
    routes: Routes,
    config: Option<ConfigHandle>,
    translator: Option<Arc<dyn Translator>>,
    hook: Option<Arc<dyn PreDispatchHook>>,
    reply_sink: Option<Arc<dyn ReplySink>>,
    ledger: Option<Arc<BranchLedger>>,
}

impl ExecutorBuilder {
    #[must_use]
    pub fn new(routes: Routes) -> Self {
        Self {
            routes,
            config: None,
            translator: None,
            hook: None,
            reply_sink: None,
            ledger: None,
        }
    }

    /// Live configuration; defaults to `SdkConfig::default()`.
    #[must_use]
    pub fn config(mut self, config: ConfigHandle) -> Self {
        self.config = Some(config);
        self
    }

    /// Message translator; defaults to the configuration's catalog.
    #[must_use]
    pub fn translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = Some(translator);
        self
    }

    #[must_use]
    pub fn pre_dispatch_hook(mut self, hook: Arc<dyn PreDispatchHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    #[must_use]
    pub fn reply_sink(mut self, sink: Arc<dyn ReplySink>) -> Self {
        self.reply_sink = Some(sink);
        self
    }

    /// Branch ledger, for sharing with another executor.
    #[must_use]
    pub fn ledger(mut self, ledger: Arc<BranchLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    #[must_use]
    pub fn build(self) -> Executor {
        let config = self.config.unwrap_or_default();
        let translator = self
            .translator
            .unwrap_or_else(|| Arc::new(CatalogTranslator::new(config.clone())));
        let ledger = self.ledger.unwrap_or_default();
        Executor {
            invoker: BranchInvoker::new(Arc::clone(&self.routes.compensables), Arc::clone(&ledger)),
            proxy: TransactionProxy::new(ledger),
            renderer: EnvelopeRenderer::new(translator),
            routes: self.routes,
            config,
            hook: self.hook,
            reply_sink: self.reply_sink,
        }
    }
}

// ---------------------------------------------------------------------------
// DispatchService
// ---------------------------------------------------------------------------

/// The executor as a `tower::Service`. Never fails: errors are envelopes.
#[derive(Debug, Clone)]
pub struct DispatchService {
    executor: Arc<Executor>,
}

impl DispatchService {
    #[must_use]
    pub fn new(executor: Arc<Executor>) -> Self {
        Self { executor }
    }
}

impl Service<Message> for DispatchService {
    type Response = Message;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Message, Infallible>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, inbound: Message) -> Self::Future {
        let executor = Arc::clone(&self.executor);
        Box::pin(async move { Ok(executor.handle(inbound).await) })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use sedmesh_core::error::codes;
    use sedmesh_core::{FieldError, Validate, ValidationResult};
    use serde::{Deserialize, Serialize};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::service::config::SdkConfig;
    use crate::service::descriptor::{CompensableBinding, MatchKind, RouteOptions, ValidationPolicy};
    use crate::service::middleware::chain::tests::Recording;
    use crate::service::middleware::{Interceptor, InterceptorChain};
    use crate::service::router::RouterBuilder;
    use crate::tcc::BranchState;

    #[derive(Debug, Serialize, Deserialize)]
    struct Request {
        #[serde(rename = "A")]
        a: String,
    }

    impl Validate for Request {
        fn validate(&self) -> ValidationResult {
            if self.a.is_empty() {
                ValidationResult::from_errors(vec![FieldError::new("A", "required", "is required")])
            } else {
                ValidationResult::Valid
            }
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Response {
        echoed: String,
    }

    fn echo() -> Method {
        Method::function("echo", |ctx: CallContext, req: Request| async move {
            match req.a.as_str() {
                "panic" => panic!("boom"),
                "fail" => Err(SedError::business("E42", "refused")),
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(Response { echoed: req.a })
                }
                _ => {
                    ctx.set_response_header("X-Echo", "1");
                    Ok(Response { echoed: req.a })
                }
            }
        })
    }

    fn executor_with(builder: RouterBuilder) -> Executor {
        Executor::builder(builder.build()).build()
    }

    fn executor() -> Executor {
        let mut builder = RouterBuilder::new();
        builder.exact("TOPIC1", echo()).unwrap();
        executor_with(builder)
    }

    fn body(msg: &Message) -> Value {
        serde_json::from_slice(&msg.payload).unwrap()
    }

    fn request(event_id: &str, a: &str) -> Message {
        Message::request(7, event_id, format!(r#"{{"A":"{a}"}}"#).into_bytes())
    }

    #[tokio::test]
    async fn success_mirrors_correlation_and_merges_headers() {
        let resp = executor().handle(request("TOPIC1", "x")).await;
        assert_eq!(resp.id, 7);
        assert!(resp.error_code().is_none());
        assert!(resp.properties.get(keys::ERROR_CODE).is_none());
        assert_eq!(body(&resp), serde_json::json!({"echoed": "x"}));
        assert_eq!(resp.properties.get("X-Echo"), Some("1"));
        assert!(resp.properties.get(keys::TRACE_ID).is_some());
    }

    #[tokio::test]
    async fn every_failure_is_an_envelope() {
        let exec = executor();
        let cases = [
            (request("TOPIC1", "panic"), codes::INTERNAL),
            (Message::request(1, "TOPIC1", b"{not json".to_vec()), codes::DECODE),
            (request("TOPIC1", ""), codes::VALIDATION),
            (request("TOPIC1", "fail"), "E42"),
            (request("NOPE", "x"), codes::HANDLER_NOT_FOUND),
        ];
        for (inbound, code) in cases {
            let resp = exec.handle(inbound).await;
            assert_eq!(resp.properties.get(keys::ERROR_CODE), Some(code));
            assert_eq!(body(&resp)["errorCode"], code);
        }
    }

    #[tokio::test]
    async fn panics_in_interceptors_are_recovered() {
        struct Exploding;

        #[async_trait]
        impl Interceptor for Exploding {
            fn name(&self) -> &str {
                "exploding"
            }

            async fn pre_handle(&self, _ctx: &CallContext, _request: &Message) -> Result<crate::service::middleware::PreHandled, SedError> {
                panic!("interceptor bug")
            }
        }

        let mut builder = RouterBuilder::new();
        builder
            .register(
                MatchKind::Exact,
                "TOPIC1",
                echo(),
                RouteOptions::default().interceptors(InterceptorChain::new(vec![Arc::new(Exploding)])),
            )
            .unwrap();
        let resp = executor_with(builder).handle(request("TOPIC1", "x")).await;
        assert_eq!(resp.properties.get(keys::ERROR_CODE), Some(codes::INTERNAL));
        assert_eq!(resp.id, 7);
    }

    #[tokio::test]
    async fn post_handles_unwind_on_body_failure() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::new(vec![
            Arc::new(Recording::new("A", &journal)),
            Arc::new(Recording::new("B", &journal)),
            Arc::new(Recording::new("C", &journal)),
        ]);
        let mut builder = RouterBuilder::new();
        builder
            .register(MatchKind::Exact, "TOPIC1", echo(), RouteOptions::default().interceptors(chain))
            .unwrap();
        let exec = executor_with(builder);

        for a in ["x", "fail", "panic"] {
            journal.lock().clear();
            exec.handle(request("TOPIC1", a)).await;
            assert_eq!(
                *journal.lock(),
                ["pre:A", "pre:B", "pre:C", "post:C", "post:B", "post:A"],
                "body {a}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_bounds_the_handler() {
        let inbound = request("TOPIC1", "slow").with_property(keys::REMAINING_TIMEOUT, "50");
        let resp = executor().handle(inbound).await;
        assert_eq!(resp.properties.get(keys::ERROR_CODE), Some(codes::REMOTE_TIMEOUT));
    }

    #[tokio::test]
    async fn cancellation_abandons_the_handler() {
        let exec = executor();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let resp = exec.handle_with_cancel(cancel, request("TOPIC1", "slow")).await;
        assert_eq!(resp.properties.get(keys::ERROR_CODE), Some(codes::CANCELLED));
    }

    #[tokio::test]
    async fn per_field_validation_policy() {
        let mut builder = RouterBuilder::new();
        builder
            .register(
                MatchKind::Exact,
                "TOPIC1",
                echo(),
                RouteOptions::default().validation(ValidationPolicy::PerField),
            )
            .unwrap();
        builder
            .register(
                MatchKind::Exact,
                "LOOSE",
                echo(),
                RouteOptions::default().validation(ValidationPolicy::Skip),
            )
            .unwrap();
        let exec = executor_with(builder);

        let resp = exec.handle(request("TOPIC1", "")).await;
        assert_eq!(resp.properties.get(keys::ERROR_MSG), Some("A: is required"));

        let resp = exec.handle(request("LOOSE", "")).await;
        assert!(resp.error_code().is_none());
    }

    #[tokio::test]
    async fn url_path_takes_precedence_over_event_id() {
        let mut builder = RouterBuilder::new();
        builder
            .register(
                MatchKind::Exact,
                "TOPIC1",
                echo(),
                RouteOptions::default().http("/echo", Some(http::Method::POST)),
            )
            .unwrap();
        let exec = executor_with(builder);

        let inbound = request("ignored", "x")
            .with_property(keys::URL_PATH, "/echo")
            .with_property(keys::HTTP_METHOD, "post");
        assert!(exec.handle(inbound).await.error_code().is_none());

        let inbound = request("TOPIC1", "x").with_property(keys::URL_PATH, "/nope");
        let resp = exec.handle(inbound).await;
        assert_eq!(resp.properties.get(keys::ERROR_CODE), Some(codes::HANDLER_NOT_FOUND));
    }

    #[tokio::test]
    async fn pre_dispatch_hook_short_circuits() {
        struct Maintenance;

        #[async_trait]
        impl PreDispatchHook for Maintenance {
            async fn before_dispatch(&self, _ctx: &CallContext, inbound: &Message) -> Option<Message> {
                Some(inbound.reply().with_property("maintenance", "true"))
            }
        }

        let mut builder = RouterBuilder::new();
        builder.exact("TOPIC1", echo()).unwrap();
        let exec = Executor::builder(builder.build())
            .pre_dispatch_hook(Arc::new(Maintenance))
            .build();
        let resp = exec.handle(request("NOPE", "x")).await;
        assert_eq!(resp.properties.get("maintenance"), Some("true"));
    }

    #[tokio::test]
    async fn semi_sync_errors_are_pushed_to_the_reply_sink() {
        #[derive(Default)]
        struct Captured(Mutex<Vec<Message>>);

        #[async_trait]
        impl ReplySink for Captured {
            async fn push_reply(&self, _ctx: &CallContext, reply: Message) -> anyhow::Result<()> {
                self.0.lock().push(reply);
                Ok(())
            }
        }

        let sink = Arc::new(Captured::default());
        let mut builder = RouterBuilder::new();
        builder.exact("TOPIC1", echo()).unwrap();
        let exec = Executor::builder(builder.build()).reply_sink(sink.clone()).build();

        let inbound = request("TOPIC1", "fail").with_property(keys::CALL_TYPE, keys::call_type::SEMI_SYNC);
        let resp = exec.handle(inbound).await;
        let pushed = sink.0.lock();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0], resp);

        drop(pushed);
        exec.handle(request("TOPIC1", "fail")).await;
        assert_eq!(sink.0.lock().len(), 1);
    }

    #[tokio::test]
    async fn compensable_route_records_branch_and_coordinator_confirms() {
        let mut builder = RouterBuilder::new();
        builder
            .register(
                MatchKind::Exact,
                "pay",
                echo(),
                RouteOptions::default().compensable(CompensableBinding::new("pay").confirm(echo()).cancel(echo())),
            )
            .unwrap();
        let exec = executor_with(builder);

        let resp = exec.handle(request("pay", "x")).await;
        assert!(resp.error_code().is_none());
        let branch = resp.properties.get(keys::BRANCH_TX_ID).unwrap().to_owned();
        assert_eq!(exec.ledger().get(&branch).unwrap().state, BranchState::Tried);

        let confirm_body = serde_json::json!({"serviceName": "pay", "branchTxId": branch}).to_string();
        let confirm = Message::request(8, "sed.tcc.confirm", confirm_body.into_bytes());
        let reply = exec.handle(confirm).await;
        assert_eq!(reply.properties.get(keys::ERROR_CODE), Some(codes::SUCCESS));
        assert_eq!(exec.ledger().get(&branch).unwrap().state, BranchState::Confirmed);
    }

    #[tokio::test]
    async fn failed_try_is_flagged_but_still_cancellable() {
        let mut builder = RouterBuilder::new();
        builder
            .register(
                MatchKind::Exact,
                "pay",
                echo(),
                RouteOptions::default().compensable(CompensableBinding::new("pay").confirm(echo()).cancel(echo())),
            )
            .unwrap();
        let exec = executor_with(builder);

        let resp = exec.handle(request("pay", "fail")).await;
        assert_eq!(resp.error_code(), Some("E42"));
        let branch = resp.properties.get(keys::BRANCH_TX_ID).unwrap().to_owned();
        let record = exec.ledger().get(&branch).unwrap();
        assert!(record.try_failed);
        assert_eq!(record.state, BranchState::Tried);

        let cancel_body = serde_json::json!({
            "serviceName": "pay",
            "branchTxId": branch,
            "params": {"A": "x"},
        })
        .to_string();
        let reply = exec
            .handle(Message::request(9, "sed.tcc.cancel", cancel_body.into_bytes()))
            .await;
        assert_eq!(reply.properties.get(keys::ERROR_CODE), Some(codes::SUCCESS));
        assert_eq!(exec.ledger().get(&branch).unwrap().state, BranchState::Cancelled);
    }

    #[tokio::test]
    async fn executor_is_a_tower_service() {
        let svc = DispatchService::new(Arc::new(executor()));
        let resp = svc.oneshot(request("TOPIC1", "x")).await.unwrap();
        assert!(resp.error_code().is_none());
    }

    #[tokio::test]
    async fn hot_reloaded_template_applies_to_next_dispatch() {
        let config = ConfigHandle::new(SdkConfig::default());
        let mut builder = RouterBuilder::new();
        builder.exact("TOPIC1", echo()).unwrap();
        let exec = Executor::builder(builder.build()).config(config.clone()).build();

        let mut next = SdkConfig::default();
        next.response.error_template = r#"{"code":"{{code}}"}"#.to_string();
        config.store(next);

        let resp = exec.handle(request("NOPE", "x")).await;
        assert_eq!(body(&resp), serde_json::json!({"code": codes::HANDLER_NOT_FOUND}));
    }
}
