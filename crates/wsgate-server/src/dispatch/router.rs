//! Fan-out router.
//!
//! Routing runs in three phases:
//!
//! 1. every request entry is resolved against the registry and its
//!    handshake performed, all entries concurrently;
//! 2. every call of every admitted entry is spawned before any is awaited;
//! 3. all spawned calls are joined and their results assembled in entry
//!    order, so a repeated backend entry overrides earlier call-names.
//!
//! An entry that fails resolution or handshake fills each of its call-names
//! with that failure; no other entry is affected.

use crate::auth::Session;
use crate::backend::{Registration, Registry};
use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use wsgate_core::messages::{response_type_for, ResponseAuth, ResponseMetadata};
use wsgate_core::{
    CallResult, ErrorKind, GatewayError, GatewayResult, Request, Response, ResponseData, Status,
};

enum Outcome {
    Ready(CallResult),
    Running(JoinHandle<GatewayResult<Value>>),
}

pub struct Router {
    registry: Arc<Registry>,
}

impl Router {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    async fn admit<'a>(
        &'a self,
        backend: &str,
        session: &Session,
    ) -> GatewayResult<&'a Registration> {
        let registration = self.registry.resolve(backend).ok_or_else(|| {
            GatewayError::Resolution(format!("backend '{backend}' is not registered"))
        })?;
        registration
            .handshake
            .perform(self.registry.http_client(), backend, &session.token)
            .await?;
        Ok(registration)
    }

    /// Dispatch every call in `request` and assemble the aggregated response.
    pub async fn route(&self, request: &Request, session: &Session) -> Response {
        let admissions = join_all(
            request
                .requests
                .iter()
                .map(|entry| self.admit(&entry.backend, session)),
        )
        .await;

        let mut pending: Vec<(&str, &str, Outcome)> = Vec::new();
        for (entry, admission) in request.requests.iter().zip(admissions) {
            match admission {
                Ok(registration) => {
                    for (name, call) in &entry.functions {
                        let handler = self.registry.handler_for(&entry.backend, registration, call);
                        let call_name = name.clone();
                        let call = call.clone();
                        let task =
                            tokio::spawn(async move { handler.invoke(&call_name, &call).await });
                        pending.push((
                            entry.backend.as_str(),
                            name.as_str(),
                            Outcome::Running(task),
                        ));
                    }
                }
                Err(e) => {
                    warn!(backend = %entry.backend, error = %e, "request entry not admitted");
                    let result = CallResult::from(e);
                    for name in entry.functions.keys() {
                        pending.push((
                            entry.backend.as_str(),
                            name.as_str(),
                            Outcome::Ready(result.clone()),
                        ));
                    }
                }
            }
        }

        let mut data = ResponseData::new();
        for entry in &request.requests {
            data.entry(entry.backend.clone()).or_default();
        }
        for (backend, name, outcome) in pending {
            let result = match outcome {
                Outcome::Ready(result) => result,
                Outcome::Running(task) => match task.await {
                    Ok(result) => CallResult::from(result),
                    Err(e) => {
                        error!(backend, call = name, error = %e, "call task failed");
                        let message = if e.is_panic() {
                            "invocation panicked"
                        } else {
                            "invocation cancelled"
                        };
                        CallResult::error(ErrorKind::Invocation, message)
                    }
                },
            };
            if let CallResult::Error(body) = &result {
                debug!(
                    backend,
                    call = name,
                    kind = ?body.kind,
                    reason = %body.message,
                    "call failed"
                );
            }
            data.entry(backend.to_string())
                .or_default()
                .insert(name.to_string(), result);
        }

        Response {
            id: request.id.clone().unwrap_or_default(),
            response_type: response_type_for(request),
            status: Status::Success,
            data,
            metadata: ResponseMetadata::now(),
            auth: ResponseAuth {
                session_id: session.token.clone(),
                user_id: session.user_id.clone(),
            },
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{builtin, Arg, Backend, BackendKind, NamedService, ParamType};
    use crate::handshake::Handshake;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tokio::sync::Barrier;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use wsgate_core::messages::RequestMetadata;
    use wsgate_core::{BackendCall, FunctionCall};

    fn session() -> Session {
        Session {
            user_id: "tester".into(),
            token: "tok".into(),
            issued: false,
        }
    }

    fn entry(backend: &str, calls: &[(&str, FunctionCall)]) -> BackendCall {
        BackendCall {
            backend: backend.into(),
            functions: calls
                .iter()
                .map(|(name, call)| (name.to_string(), call.clone()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn request(entries: Vec<BackendCall>) -> Request {
        Request {
            id: Some("req-1".into()),
            requests: entries,
            ..Default::default()
        }
    }

    fn router_with(extra: impl FnOnce(&mut Registry)) -> Router {
        let mut registry = Registry::new();
        registry
            .register("echo", Arc::new(builtin::echo()), Handshake::Open)
            .unwrap();
        registry
            .register("math", Arc::new(builtin::math()), Handshake::Open)
            .unwrap();
        extra(&mut registry);
        Router::new(Arc::new(registry))
    }

    fn ping(v: &str) -> FunctionCall {
        FunctionCall::with_parameters([v])
    }

    #[tokio::test]
    async fn echo_ping_round_trip() {
        let router = router_with(|_| {});
        let req = request(vec![entry("echo", &[("ping", ping("42"))])]);
        let resp = router.route(&req, &session()).await;

        assert_eq!(resp.id, "req-1");
        assert_eq!(resp.response_type, "response");
        assert_eq!(resp.status, Status::Success);
        assert_eq!(resp.auth.user_id, "tester");
        assert_eq!(resp.auth.session_id, "tok");
        assert_eq!(resp.data["echo"]["ping"], CallResult::Success(json!(42)));
    }

    #[tokio::test]
    async fn unknown_backend_is_isolated() {
        let router = router_with(|_| {});
        let req = request(vec![
            entry("nope", &[("a", ping("1")), ("b", ping("2"))]),
            entry("echo", &[("ping", ping("7"))]),
        ]);
        let resp = router.route(&req, &session()).await;

        assert_eq!(resp.status, Status::Success);
        for name in ["a", "b"] {
            match &resp.data["nope"][name] {
                CallResult::Error(body) => assert_eq!(body.kind, ErrorKind::Resolution),
                other => panic!("expected resolution error, got {other:?}"),
            }
        }
        assert_eq!(resp.data["echo"]["ping"], CallResult::Success(json!(7)));
    }

    #[tokio::test]
    async fn call_errors_do_not_affect_siblings() {
        let router = router_with(|_| {});
        let req = request(vec![
            entry(
                "echo",
                &[("ping", ping("not-a-number")), ("say", FunctionCall::with_parameters(["hi"]))],
            ),
            entry("math", &[("div", FunctionCall::with_parameters(["1", "0"]))]),
        ]);
        let resp = router.route(&req, &session()).await;

        assert!(matches!(
            &resp.data["echo"]["ping"],
            CallResult::Error(body) if body.kind == ErrorKind::Type
        ));
        assert_eq!(resp.data["echo"]["say"], CallResult::Success(json!("hi")));
        assert!(matches!(
            &resp.data["math"]["div"],
            CallResult::Error(body) if body.kind == ErrorKind::Invocation
        ));
    }

    #[tokio::test]
    async fn empty_inputs_give_empty_maps() {
        let router = router_with(|_| {});
        let resp = router.route(&request(vec![]), &session()).await;
        assert!(resp.data.is_empty());
        assert_eq!(resp.id, "req-1");

        let resp = router
            .route(&request(vec![entry("echo", &[])]), &session())
            .await;
        assert_eq!(resp.data.len(), 1);
        assert!(resp.data["echo"].is_empty());
    }

    #[tokio::test]
    async fn response_type_follows_metadata() {
        let router = router_with(|_| {});
        let mut req = request(vec![]);
        req.id = None;
        req.metadata = Some(RequestMetadata {
            request_type: Some("web2".into()),
            ..Default::default()
        });
        let resp = router.route(&req, &session()).await;
        assert_eq!(resp.response_type, "web2_response");
        assert_eq!(resp.id, "");
    }

    #[tokio::test]
    async fn repeated_entries_merge_with_later_winning() {
        let router = router_with(|_| {});
        let req = request(vec![
            entry("echo", &[("ping", ping("1")), ("say", FunctionCall::with_parameters(["a"]))]),
            entry("echo", &[("ping", ping("2"))]),
        ]);
        let resp = router.route(&req, &session()).await;
        assert_eq!(resp.data["echo"].len(), 2);
        assert_eq!(resp.data["echo"]["ping"], CallResult::Success(json!(2)));
        assert_eq!(resp.data["echo"]["say"], CallResult::Success(json!("a")));
    }

    #[tokio::test]
    async fn refused_handshake_fills_entry_with_handshake_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        let router = router_with(|registry| {
            registry
                .register(
                    "guarded",
                    Arc::new(builtin::echo()),
                    Handshake::Http { url: server.uri() },
                )
                .unwrap();
        });

        let req = request(vec![
            entry("guarded", &[("ping", ping("1"))]),
            entry("echo", &[("ping", ping("1"))]),
        ]);
        let resp = router.route(&req, &session()).await;
        assert!(matches!(
            &resp.data["guarded"]["ping"],
            CallResult::Error(body) if body.kind == ErrorKind::Handshake
        ));
        assert!(resp.data["echo"]["ping"].is_success());
    }

    #[tokio::test]
    async fn http_url_takes_precedence_over_registered_backend() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let router = router_with(|_| {});

        let req = request(vec![entry(
            "echo",
            &[
                ("remote", FunctionCall::with_url(server.uri())),
                ("ping", ping("5")),
            ],
        )]);
        let resp = router.route(&req, &session()).await;
        match &resp.data["echo"]["remote"] {
            CallResult::Error(body) => {
                assert_eq!(body.kind, ErrorKind::Invocation);
                assert!(body.message.contains("503"));
            }
            other => panic!("expected invocation error, got {other:?}"),
        }
        assert_eq!(resp.data["echo"]["ping"], CallResult::Success(json!(5)));
    }

    struct Panicking;

    #[async_trait]
    impl Backend for Panicking {
        fn kind(&self) -> BackendKind {
            BackendKind::NamedService
        }

        async fn invoke(&self, _: &str, _: &FunctionCall) -> GatewayResult<Value> {
            panic!("boom");
        }
    }

    #[tokio::test]
    async fn panicking_handler_is_contained() {
        let router = router_with(|registry| {
            registry
                .register("bad", Arc::new(Panicking), Handshake::Open)
                .unwrap();
        });
        let req = request(vec![
            entry("bad", &[("x", FunctionCall::default())]),
            entry("echo", &[("ping", ping("3"))]),
        ]);
        let resp = router.route(&req, &session()).await;
        assert_eq!(
            resp.data["bad"]["x"],
            CallResult::error(ErrorKind::Invocation, "invocation panicked")
        );
        assert_eq!(resp.data["echo"]["ping"], CallResult::Success(json!(3)));
    }

    #[tokio::test]
    async fn calls_run_concurrently() {
        // Each call waits on a shared barrier, so the request only completes
        // if all of them are in flight at once.
        let barrier = Arc::new(Barrier::new(3));
        let service = NamedService::builder("slow")
            .operation("wait", &[ParamType::Int], ParamType::Int, {
                let barrier = barrier.clone();
                move |args| {
                    let barrier = barrier.clone();
                    async move {
                        barrier.wait().await;
                        Ok(Arg::Int(args.int(0)?))
                    }
                }
            })
            .build();
        let router = router_with(|registry| {
            registry
                .register("slow", Arc::new(service.clone()), Handshake::Open)
                .unwrap();
            registry
                .register("slow2", Arc::new(service), Handshake::Open)
                .unwrap();
        });

        let req = request(vec![
            entry("slow", &[("wait", ping("1"))]),
            entry("slow2", &[("wait", ping("2"))]),
            entry("slow", &[("wait", ping("3"))]),
        ]);
        let resp = tokio::time::timeout(Duration::from_secs(5), router.route(&req, &session()))
            .await
            .expect("calls did not run concurrently");
        assert_eq!(resp.data["slow"]["wait"], CallResult::Success(json!(3)));
        assert_eq!(resp.data["slow2"]["wait"], CallResult::Success(json!(2)));
    }
}
