use std::sync::Arc;

use courier_api::app::{AppServices, build_app};
use courier_core::{EntityId, EventId, UserId};
use courier_events::{EventPayload, NewEvent, OrderShipped};
use courier_infra::directory::{InMemoryUserDirectory, UserProfile};
use courier_infra::jobs::{EmailJob, ImmediateDispatch, Mailer, RecordingProvider};
use courier_infra::store::InMemoryDocumentStore;
use courier_infra::PipelineSettings;
use reqwest::StatusCode;
use serde_json::{Value, json};

struct TestServer {
    base_url: String,
    services: Arc<AppServices>,
    provider: RecordingProvider,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        let directory = Arc::new(InMemoryUserDirectory::new());
        directory.insert(
            UserId::new("buyer-1").unwrap(),
            UserProfile::new("buyer@example.com"),
        );
        directory.insert(
            UserId::new("buyer-2").unwrap(),
            UserProfile::new("not-an-address"),
        );

        let provider = RecordingProvider::new();
        let services = Arc::new(AppServices::with_store(
            Arc::new(InMemoryDocumentStore::new()),
            directory,
            Mailer::configured(provider.clone()),
            &PipelineSettings {
                immediate_dispatch: ImmediateDispatch::Off,
                ..Default::default()
            },
        ));

        // Same router as prod, bound to an ephemeral port.
        let app = build_app(services.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            services,
            provider,
            handle,
        }
    }

    async fn emit_shipped(&self) -> EventId {
        let draft = NewEvent::new(
            "order",
            EntityId::new("O7").unwrap(),
            EventPayload::OrderShipped(OrderShipped {
                order_id: "O7".into(),
                carrier: "UPS".into(),
                tracking_number: "1Z999".into(),
            }),
        )
        .with_targets([UserId::new("buyer-1").unwrap(), UserId::new("buyer-2").unwrap()]);
        let result = self.services.pipeline.emitter.emit(draft).await.unwrap();
        assert!(result.created);
        result.event_id
    }

    /// A job for `buyer-3` that has used up its retry budget.
    async fn seed_exhausted_job(&self, event_id: EventId) {
        let event = self
            .services
            .pipeline
            .emitter
            .get(event_id)
            .await
            .unwrap()
            .unwrap();
        let mut job = EmailJob::for_recipient(
            &event,
            UserId::new("buyer-3").unwrap(),
            "three@example.com",
            None,
            event.created_at,
        );
        job.attempts = 5;
        job.error = Some("rate_limited".into());
        assert!(self.services.pipeline.dispatcher.jobs().create_if_absent(&job).await.unwrap());
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[tokio::test]
async fn liveness_probe() {
    let server = TestServer::spawn().await;
    let res = reqwest::get(format!("{}/health", server.base_url)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn run_now_processes_sends_and_dead_letters() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("{}/ops/health", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health, json!([]));

    let event_id = server.emit_shipped().await;
    server.seed_exhausted_job(event_id).await;

    let res = client
        .post(format!("{}/ops/run", server.base_url))
        .json(&json!({"phase": "all", "limit": 10}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let report: Value = res.json().await.unwrap();
    assert_eq!(report["events"]["processed"], 1);
    assert_eq!(report["jobs"]["sent"], 1);
    assert_eq!(report["jobs"]["failed"], 2);
    assert_eq!(report["timedOut"], false);
    assert_eq!(report["fatalError"], Value::Null);
    assert_eq!(server.provider.sent().len(), 1);
    assert_eq!(server.provider.sent()[0].to, "buyer@example.com");

    let health: Value = client
        .get(format!("{}/ops/health", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let health = health.as_array().unwrap();
    assert_eq!(health.len(), 2);
    assert_eq!(health[0]["id"], "events");
    assert_eq!(health[1]["id"], "emailJobs");
    assert_eq!(health[1]["errorsCount"], 2);

    let letters: Value = client
        .get(format!("{}/ops/dead-letters?limit=10", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let letters = letters.as_array().unwrap();
    // The invalid address fails its job without a dead letter.
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0]["kind"], "job");
    assert_eq!(letters[0]["error"]["code"], "max_attempts");
    assert_eq!(letters[0]["attempts"], 5);

    let id = letters[0]["id"].as_str().unwrap();
    let res = client
        .post(format!("{}/ops/dead-letters/{}/replay", server.base_url, id))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let replayed: Value = res.json().await.unwrap();
    assert_eq!(replayed["manualRetryCount"], 1);
    assert_eq!(replayed["id"], id);
}

#[tokio::test]
async fn empty_body_runs_both_phases() {
    let server = TestServer::spawn().await;
    let res = reqwest::Client::new()
        .post(format!("{}/ops/run", server.base_url))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let report: Value = res.json().await.unwrap();
    assert_eq!(report["events"]["scanned"], 0);
    assert_eq!(report["jobs"]["scanned"], 0);
}

#[tokio::test]
async fn bad_run_request_is_rejected() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/ops/run", server.base_url))
        .json(&json!({"phase": "sideways"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_request");

    let res = client
        .post(format!("{}/ops/run", server.base_url))
        .json(&json!({"limit": 0}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn replaying_unknown_dead_letter_is_404() {
    let server = TestServer::spawn().await;
    let res = reqwest::Client::new()
        .post(format!("{}/ops/dead-letters/does-not-exist/replay", server.base_url))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "not_found");
}
