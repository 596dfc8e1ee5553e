use super::*;
use async_trait::async_trait;
use axum::{body, body::Body, http::Request};
use futures::StreamExt;
use gateway::{Gateway, GatewayError};
use shared::{domain::ConversationMap, protocol::GatewayStatus};
use sync_engine::ingest_event;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsFrame, MaybeTlsStream, WebSocketStream,
};
use tower::ServiceExt;

type Viewer = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct StubGateway {
    fail_with: Option<&'static str>,
}

#[async_trait]
impl Gateway for StubGateway {
    async fn send_text(&self, _to: &ContactId, _body: &str) -> Result<(), GatewayError> {
        match self.fail_with {
            Some(reason) => Err(GatewayError::rejected(reason)),
            None => Ok(()),
        }
    }
}

struct TestApp {
    app: Router,
    sync: SyncContext,
    ingest_rx: mpsc::Receiver<GatewayEvent>,
    _dir: TempDir,
}

async fn test_app(fail_with: Option<&'static str>) -> TestApp {
    test_app_with_buffer(fail_with, 32).await
}

async fn test_app_with_buffer(fail_with: Option<&'static str>, event_buffer: usize) -> TestApp {
    let dir = TempDir::new().expect("tempdir");
    let store = ConversationStore::open(dir.path().join("chats.json")).await;
    let sync = SyncContext::new(
        store,
        DistributionHub::new(event_buffer),
        DedupPolicy::default(),
    );
    let (ingest, ingest_rx) = mpsc::channel(8);
    let app = build_router(Arc::new(AppState {
        sync: sync.clone(),
        gateway: Arc::new(StubGateway { fail_with }),
        ingest,
        send_timeout: Duration::from_secs(5),
    }));
    TestApp {
        app,
        sync,
        ingest_rx,
        _dir: dir,
    }
}

fn json_request(method: &str, uri: &str, value: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(value.to_string()))
        .expect("request")
}

async fn read_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    format!("ws://{addr}/ws")
}

async fn next_frame(viewer: &mut Viewer) -> serde_json::Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), viewer.next())
            .await
            .expect("frame in time")
            .expect("socket open")
            .expect("frame");
        if let WsFrame::Text(text) = frame {
            return serde_json::from_str(&text).expect("json");
        }
    }
}

async fn seed_inbound(sync: &SyncContext, from: &str, body: &str, timestamp: i64) {
    let event: GatewayEvent = serde_json::from_value(serde_json::json!({
        "type": "message",
        "payload": {
            "direction": "inbound",
            "counterpart_id": from,
            "body": body,
            "timestamp": timestamp
        }
    }))
    .expect("event");
    ingest_event(sync, event).await.expect("ingest");
}

#[tokio::test]
async fn healthz_reports_ok() {
    let test = test_app(None).await;
    let request = Request::get("/healthz").body(Body::empty()).expect("request");
    let response = test.app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(body.as_ref(), b"ok");
}

#[tokio::test]
async fn gateway_webhook_queues_events_for_ingestion() {
    let mut test = test_app(None).await;
    let response = test
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            "/gateway/events",
            serde_json::json!({
                "type": "message",
                "payload": {
                    "direction": "inbound",
                    "counterpartId": "555@c.us",
                    "body": "hi",
                    "timestamp": "2024-01-01T10:00:00Z"
                }
            }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let queued = test.ingest_rx.recv().await.expect("queued event");
    ingest_event(&test.sync, queued).await.expect("ingest");

    let request = Request::get("/conversations/555")
        .body(Body::empty())
        .expect("request");
    let response = test.app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let conversation: Conversation = read_json(response).await;
    assert_eq!(conversation.unread_count, 1);
    assert_eq!(conversation.messages[0].timestamp, 1_704_103_200_000);
}

#[tokio::test]
async fn lists_snapshot_and_searches_conversations() {
    let test = test_app(None).await;
    seed_inbound(&test.sync, "15550001111", "hi", 1000).await;
    seed_inbound(&test.sync, "15559998888", "yo", 1000).await;

    let request = Request::get("/conversations")
        .body(Body::empty())
        .expect("request");
    let response = test.app.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let snapshot: ConversationMap = read_json(response).await;
    assert_eq!(snapshot.len(), 2);

    let request = Request::get("/conversations?q=9998")
        .body(Body::empty())
        .expect("request");
    let response = test.app.oneshot(request).await.expect("response");
    let found: Vec<Conversation> = read_json(response).await;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].contact_id.as_str(), "15559998888");
}

#[tokio::test]
async fn send_route_reports_ok_and_records_outbound_message() {
    let test = test_app(None).await;
    seed_inbound(&test.sync, "555", "hi", 1000).await;

    let response = test
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            "/messages",
            serde_json::json!({ "contact_id": "555", "body": "hello back" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body: SendMessageResponse = read_json(response).await;
    assert_eq!(body, SendMessageResponse::ok());

    let conversation = hub::conversation(&test.sync, &ContactId::parse("555").expect("id"))
        .await
        .expect("conversation");
    assert_eq!(conversation.messages.len(), 2);
    assert_eq!(conversation.unread_count, 1);
}

#[tokio::test]
async fn send_route_surfaces_gateway_reason() {
    let test = test_app(Some("client not ready")).await;

    let response = test
        .app
        .oneshot(json_request(
            "POST",
            "/messages",
            serde_json::json!({ "contact_id": "555", "body": "hi" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body: SendMessageResponse = read_json(response).await;
    assert_eq!(body, SendMessageResponse::failed("client not ready"));
    assert!(hub::snapshot(&test.sync).await.is_empty());
}

#[tokio::test]
async fn send_route_rejects_empty_body() {
    let test = test_app(None).await;

    let response = test
        .app
        .oneshot(json_request(
            "POST",
            "/messages",
            serde_json::json!({ "contact_id": "555", "body": "" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: SendMessageResponse = read_json(response).await;
    assert!(!body.ok);
    assert!(body.reason.is_some());
}

#[tokio::test]
async fn mark_read_route_resets_counter_or_reports_missing() {
    let test = test_app(None).await;

    let missing = Request::post("/conversations/404/read")
        .body(Body::empty())
        .expect("request");
    let response = test.app.clone().oneshot(missing).await.expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let error: ApiError = read_json(response).await;
    assert_eq!(error.code, ErrorCode::NotFound);

    seed_inbound(&test.sync, "555", "hi", 1000).await;
    let request = Request::post("/conversations/555@c.us/read")
        .body(Body::empty())
        .expect("request");
    let response = test.app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let conversation: Conversation = read_json(response).await;
    assert_eq!(conversation.unread_count, 0);
}

#[tokio::test]
async fn gateway_webhook_rejects_undecodable_events() {
    let mut test = test_app(None).await;
    let response = test
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            "/gateway/events",
            serde_json::json!({
                "type": "message",
                "payload": {
                    "direction": "sideways",
                    "counterpart_id": "555",
                    "body": "hi",
                    "timestamp": 1000
                }
            }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error: ApiError = read_json(response).await;
    assert_eq!(error.code, ErrorCode::Validation);
    assert!(matches!(
        test.ingest_rx.try_recv(),
        Err(mpsc::error::TryRecvError::Empty)
    ));
}

#[tokio::test]
async fn websocket_viewer_gets_snapshot_then_updates() {
    let test = test_app(None).await;
    seed_inbound(&test.sync, "555", "hi", 1000).await;
    let (mut viewer, _) = connect_async(serve(test.app.clone()).await)
        .await
        .expect("connect");

    let bootstrap = next_frame(&mut viewer).await;
    assert_eq!(bootstrap["type"], "snapshot");
    assert_eq!(bootstrap["payload"]["conversations"]["555"]["unread_count"], 1);

    seed_inbound(&test.sync, "777", "yo", 2000).await;
    let update = next_frame(&mut viewer).await;
    assert_eq!(update["type"], "conversation_updated");
    assert_eq!(update["payload"]["conversation"]["contact_id"], "777");
}

#[tokio::test]
async fn lagging_websocket_viewer_gets_fresh_snapshot() {
    let test = test_app_with_buffer(None, 1).await;
    seed_inbound(&test.sync, "555", "hi", 1000).await;
    let (mut viewer, _) = connect_async(serve(test.app.clone()).await)
        .await
        .expect("connect");

    let bootstrap = next_frame(&mut viewer).await;
    assert_eq!(bootstrap["type"], "snapshot");
    assert!(bootstrap["payload"].get("status").is_none());

    // No await between these, so the connection task sees an overflowed buffer.
    test.sync.hub.publish_status(GatewayStatus::Connected);
    test.sync
        .hub
        .publish_status(GatewayStatus::QrChallenge("2@abc".into()));
    test.sync.hub.publish_status(GatewayStatus::Ready);

    let resync = next_frame(&mut viewer).await;
    assert_eq!(resync["type"], "snapshot");
    assert_eq!(resync["payload"]["status"], serde_json::json!({ "type": "ready" }));
    assert_eq!(
        resync["payload"]["conversations"]["555"]["messages"]
            .as_array()
            .map(Vec::len),
        Some(1)
    );

    seed_inbound(&test.sync, "777", "yo", 2000).await;
    let update = next_frame(&mut viewer).await;
    assert_eq!(update["type"], "conversation_updated");
    assert_eq!(update["payload"]["conversation"]["contact_id"], "777");
}
