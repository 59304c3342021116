//! Inbound webmention HTTP endpoint.
//!
//! Routes:
//! - `POST <endpoint>`: receive a mention (form or JSON body)
//! - `GET <endpoint>?postId=<id>`: mentions of a post
//! - `GET <endpoint>?stats=1`: totals and recent mentions
//! - `GET /health`

mod error;
mod handlers;
mod views;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use backfeed_core::Webmentions;
use backfeed_shared::{BackfeedError, Result, ServerConfig};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub use error::{ApiError, ApiResult};
pub use handlers::{AppState, ListParams, MentionRequest};
pub use views::{MentionView, StatsView};

/// Build the application router.
pub fn router(webmentions: Arc<Webmentions>, endpoint_path: &str) -> Router {
    let endpoint = format!("/{}", endpoint_path.trim_matches('/'));

    Router::new()
        .route("/health", get(handlers::health))
        .route(&endpoint, get(handlers::query).post(handlers::receive))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { webmentions })
}

/// Serve until Ctrl-C, then wait for in-flight outbound deliveries.
pub async fn serve(config: &ServerConfig, webmentions: Arc<Webmentions>) -> Result<()> {
    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .map_err(|e| BackfeedError::Network(format!("failed to bind {}: {e}", config.bind_addr)))?;

    let local = listener
        .local_addr()
        .map_err(|e| BackfeedError::Network(e.to_string()))?;
    info!(addr = %local, endpoint = %config.endpoint_path, "webmention endpoint listening");

    let app = router(webmentions.clone(), &config.endpoint_path);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| BackfeedError::Network(format!("server error: {e}")))?;

    info!(pending = webmentions.pending(), "shutting down, draining deliveries");
    webmentions.drain().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use backfeed_core::EventBus;
    use backfeed_shared::{
        AppConfig, Mention, MentionId, MentionStore, MentionUpdate, NewMention, Post, TypeCounts,
    };
    use backfeed_storage::Storage;
    use tower::ServiceExt;
    use uuid::Uuid;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TARGET: &str = "https://mysite.test/posts/hello-world";

    async fn storage() -> Arc<Storage> {
        let tmp = std::env::temp_dir().join(format!("backfeed_server_{}.db", Uuid::now_v7()));
        let storage = Storage::open(&tmp).await.expect("open test db");
        storage
            .upsert_post(&Post {
                id: "p1".into(),
                slug: "hello-world".into(),
                title: None,
                content_html: String::new(),
            })
            .await
            .unwrap();
        Arc::new(storage)
    }

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.site.origin = "https://mysite.test".into();
        config
    }

    async fn build_test_app() -> Router {
        let storage = storage().await;
        let webmentions =
            Webmentions::new(&config(), storage.clone(), storage, Arc::new(EventBus::new()))
                .unwrap();
        router(Arc::new(webmentions), "/webmention")
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn post_form(body: String) -> Request<Body> {
        Request::post("/webmention")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap()
    }

    fn post_json(body: serde_json::Value) -> Request<Body> {
        Request::post("/webmention")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn source_server() -> (MockServer, String) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                r#"<div class="h-entry">
                     <a class="p-author h-card" href="/jane"><span class="p-name">Jane</span></a>
                     <p class="e-content">Nice post</p>
                     <a class="u-like-of" href="{TARGET}">liked</a>
                   </div>"#
            )))
            .mount(&server)
            .await;
        let source = format!("{}/notes/1", server.uri());
        (server, source)
    }

    fn encode(s: &str) -> String {
        s.replace(':', "%3A").replace('/', "%2F")
    }

    #[tokio::test]
    async fn health_reports_version() {
        let app = build_test_app().await;
        let response = app.oneshot(get("/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "healthy");
        assert!(json["version"].is_string());
    }

    #[tokio::test]
    async fn missing_fields_rejected() {
        let app = build_test_app().await;
        let response = app.oneshot(post_form(String::new())).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"], "Missing source or target URL");
    }

    #[tokio::test]
    async fn foreign_target_rejected_as_json() {
        let app = build_test_app().await;
        let response = app
            .oneshot(post_json(serde_json::json!({
                "source": "https://blog.example/a",
                "target": "https://elsewhere.example/posts/hello-world",
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"], "Target URL does not belong to this site");
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let app = build_test_app().await;
        let request = Request::post("/webmention")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn verified_mention_accepted_then_listed() {
        let (_server, source) = source_server().await;
        let app = build_test_app().await;

        let body = format!("source={}&target={}", encode(&source), encode(TARGET));
        let response = app.clone().oneshot(post_form(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let json = body_json(response).await;
        assert_eq!(json["success"], true);
        assert!(!json["id"].as_str().unwrap().is_empty());

        let response = app.clone().oneshot(get("/webmention?postId=p1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let list = body_json(response).await;
        let first = &list.as_array().unwrap()[0];
        assert_eq!(first["sourceUrl"], source.as_str());
        assert_eq!(first["type"], "like");
        assert_eq!(first["author"]["name"], "Jane");
        assert_eq!(first["content"], "Nice post");
        assert!(first["createdAt"].is_string());
        assert!(first.get("publishedAt").is_none());

        let response = app.oneshot(get("/webmention?stats=1")).await.unwrap();
        let stats = body_json(response).await;
        assert_eq!(stats["total"], 1);
        assert_eq!(stats["byType"]["like"], 1);
        assert_eq!(stats["byType"]["reply"], 0);
        assert_eq!(stats["recent"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn body_without_content_type_read_as_form() {
        let (_server, source) = source_server().await;
        let app = build_test_app().await;

        let request = Request::post("/webmention")
            .body(Body::from(format!(
                "source={}&target={}",
                encode(&source),
                encode(TARGET)
            )))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn get_without_parameters_is_bad_request() {
        let app = build_test_app().await;
        let response = app.oneshot(get("/webmention")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_post_lists_nothing() {
        let app = build_test_app().await;
        let response = app.oneshot(get("/webmention?postId=nope")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!([]));
    }

    /// Store whose every call fails, as if the database went away.
    struct FailingStore;

    #[async_trait]
    impl MentionStore for FailingStore {
        async fn find_by_pair(&self, _: &str, _: &str) -> backfeed_shared::Result<Option<Mention>> {
            Err(BackfeedError::Storage("disk I/O error".into()))
        }
        async fn create(&self, _: NewMention) -> backfeed_shared::Result<Mention> {
            Err(BackfeedError::Storage("disk I/O error".into()))
        }
        async fn update(&self, _: &MentionId, _: MentionUpdate) -> backfeed_shared::Result<Mention> {
            Err(BackfeedError::Storage("disk I/O error".into()))
        }
        async fn list_by_post(&self, _: &str) -> backfeed_shared::Result<Vec<Mention>> {
            Err(BackfeedError::Storage("disk I/O error".into()))
        }
        async fn count_by_type(&self) -> backfeed_shared::Result<TypeCounts> {
            Err(BackfeedError::Storage("disk I/O error".into()))
        }
        async fn list_recent(&self, _: u32) -> backfeed_shared::Result<Vec<Mention>> {
            Err(BackfeedError::Storage("disk I/O error".into()))
        }
    }

    #[tokio::test]
    async fn storage_failure_is_server_error() {
        let (_server, source) = source_server().await;
        let posts = storage().await;
        let webmentions =
            Webmentions::new(&config(), Arc::new(FailingStore), posts, Arc::new(EventBus::new()))
                .unwrap();
        let app = router(Arc::new(webmentions), "webmention/");

        let body = format!("source={}&target={}", encode(&source), encode(TARGET));
        let response = app.clone().oneshot(post_form(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = app.oneshot(get("/webmention?stats=1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["error"], "Internal server error");
    }
}
