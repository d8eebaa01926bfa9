//! End-to-end dispatch scenarios through the public API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sedmesh_core::error::codes;
use sedmesh_core::{keys, Message, Validate};
use sedmesh_sdk::error::TransportError;
use sedmesh_sdk::remote::{CallOptions, Destination, RemoteCaller};
use sedmesh_sdk::tcc::CompensableDescriptor;
use sedmesh_sdk::traits::Transport;
use sedmesh_sdk::{CallContext, Executor, Method, RegistrationError, RouterBuilder, SedError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Request {
    #[serde(rename = "A")]
    a: String,
}

impl Validate for Request {}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Other {
    #[serde(rename = "B")]
    b: u32,
}

impl Validate for Other {}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Response {
    greeting: String,
}

fn greet(name: &str) -> Method {
    Method::function(name, |_ctx: CallContext, req: Request| async move {
        Ok(Response {
            greeting: format!("hello {}", req.a),
        })
    })
}

/// Records every outbound request and answers with an empty reply.
#[derive(Default)]
struct Recorder {
    sent: Mutex<Vec<(Message, Duration)>>,
}

#[async_trait]
impl Transport for Recorder {
    async fn post(&self, message: Message, _path: &str, timeout: Duration) -> Result<Message, TransportError> {
        let reply = message.reply();
        self.sent.lock().push((message, timeout));
        Ok(reply)
    }
}

#[tokio::test]
async fn exact_route_dispatches_to_bound_method() {
    let mut builder = RouterBuilder::new();
    builder.exact("TOPIC1", greet("M")).unwrap();
    let executor = Executor::builder(builder.build()).build();

    let response = executor
        .handle(Message::request(1, "TOPIC1", br#"{"A":"x"}"#.to_vec()))
        .await;

    assert_eq!(response.id, 1);
    assert!(response.properties.get(keys::ERROR_CODE).is_none());
    let body: Response = serde_json::from_slice(&response.payload).unwrap();
    assert_eq!(body.greeting, "hello x");
}

#[tokio::test]
async fn coordinator_confirm_runs_confirm_method() {
    let confirmed = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&confirmed);
    let confirm = Method::function("Confirm", move |_ctx: CallContext, req: Request| {
        let seen = Arc::clone(&seen);
        async move {
            seen.lock().push(req.a.clone());
            Ok(Response { greeting: req.a })
        }
    });

    let mut builder = RouterBuilder::new();
    builder
        .register_compensable(
            CompensableDescriptor::new("greeter", greet("Try"))
                .with_confirm(confirm)
                .with_cancel(greet("Cancel")),
        )
        .unwrap();
    let executor = Executor::builder(builder.build()).build();

    let body = json!({
        "serviceName": "greeter",
        "params": serde_json::to_string(&Request { a: "x".into() }).unwrap(),
    });
    let reply = executor
        .handle(Message::request(2, "sed.tcc.confirm", body.to_string().into_bytes()))
        .await;

    assert_eq!(reply.properties.get(keys::ERROR_CODE), Some(codes::SUCCESS));
    assert!(reply.properties.get(keys::BRANCH_CONFIRM_FAILED).is_none());
    assert_eq!(*confirmed.lock(), ["x"]);
}

#[test]
fn mismatched_cancel_is_rejected_at_registration() {
    let cancel = Method::function("Cancel", |_ctx: CallContext, _req: Other| async move {
        Ok(Response {
            greeting: String::new(),
        })
    });

    let mut builder = RouterBuilder::new();
    let err = builder
        .register_compensable(
            CompensableDescriptor::new("greeter", greet("Try"))
                .with_confirm(greet("Confirm"))
                .with_cancel(cancel),
        )
        .unwrap_err();

    match err {
        RegistrationError::InvalidCompensable { service, violations } => {
            assert_eq!(service, "greeter");
            assert_eq!(violations.len(), 1);
            assert!(violations[0].contains("Cancel"), "{violations:?}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(builder.build().compensables.is_empty());
}

#[tokio::test]
async fn unregistered_event_id_yields_envelope() {
    let mut builder = RouterBuilder::new();
    builder.exact("TOPIC1", greet("M")).unwrap();
    let executor = Executor::builder(builder.build()).build();

    let response = executor
        .handle(Message::request(3, "NOPE", br#"{"A":"x"}"#.to_vec()))
        .await;

    assert_eq!(response.id, 3);
    assert_eq!(
        response.properties.get(keys::ERROR_CODE),
        Some(codes::HANDLER_NOT_FOUND)
    );
    let message = response.properties.get(keys::ERROR_MSG).unwrap();
    assert!(message.contains("cannot found handler with event id"), "{message}");
    let body: Value = serde_json::from_slice(&response.payload).unwrap();
    assert_eq!(body["errorCode"], codes::HANDLER_NOT_FOUND);
}

#[tokio::test(start_paused = true)]
async fn downstream_timeout_derives_from_inbound_budget() {
    let transport = Arc::new(Recorder::default());
    let caller = Arc::new(RemoteCaller::new(transport.clone()));

    let handler_caller = Arc::clone(&caller);
    let relay = Method::consumer("relay", move |ctx: CallContext, req: Request| {
        let caller = Arc::clone(&handler_caller);
        async move {
            tokio::time::sleep(Duration::from_millis(2)).await;
            caller
                .sync_call::<_, ()>(
                    &ctx,
                    &Destination::Su("su-b".into()),
                    "downstream",
                    &req,
                    &CallOptions::default(),
                )
                .await?;
            Ok::<(), SedError>(())
        }
    });
    let mut builder = RouterBuilder::new();
    builder.exact("relay", relay).unwrap();
    let executor = Executor::builder(builder.build()).build();

    let inbound = Message::request(5, "relay", br#"{"A":"x"}"#.to_vec())
        .with_property(keys::REMAINING_TIMEOUT, "5");
    let response = executor.handle(inbound).await;
    assert!(response.error_code().is_none(), "{:?}", response.properties);

    let sent = transport.sent.lock().clone();
    assert_eq!(sent.len(), 1);
    let (request, timeout) = &sent[0];
    assert!(*timeout <= Duration::from_millis(3), "{timeout:?}");
    let remaining: u64 = request
        .properties
        .get(keys::REMAINING_TIMEOUT)
        .unwrap()
        .parse()
        .unwrap();
    assert!(remaining <= 3);

    // Budget already spent: fail fast, nothing leaves the process.
    let inbound = Message::request(6, "relay", Vec::new()).with_property(keys::REMAINING_TIMEOUT, "5");
    let ctx = CallContext::from_inbound(&inbound, executor.config().load(), CancellationToken::new());
    tokio::time::advance(Duration::from_millis(6)).await;
    let err = caller
        .sync_call::<_, ()>(
            &ctx,
            &Destination::Su("su-b".into()),
            "downstream",
            &Request { a: "y".into() },
            &CallOptions::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), codes::REMOTE_TIMEOUT);
    assert_eq!(transport.sent.lock().len(), 1);
}
