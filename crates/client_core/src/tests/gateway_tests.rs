use super::*;

use anyhow::Result;
use axum::{
    extract::Path,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    routing::{get, patch, post},
    Json, Router,
};
use shared::{domain::ContentKind, error::ErrorKind};
use tokio::net::TcpListener;

fn sample_content(id: &str, theme: Option<&str>) -> Content {
    Content {
        id: ContentId::from(id),
        kind: ContentKind::Repost,
        text: "hello".into(),
        theme_id: theme.map(ThemeId::from),
        created_at: "2024-05-01T08:30:00Z".parse().expect("timestamp"),
    }
}

async fn spawn_backend(app: Router) -> Result<String> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}"))
}

fn gateway_for(base_url: impl Into<String>) -> HttpGateway {
    let config = ClientConfig {
        base_url: base_url.into(),
        ..ClientConfig::default()
    };
    HttpGateway::new(&config).expect("gateway")
}

async fn list_content() -> Json<Vec<Content>> {
    Json(vec![sample_content("1", Some("A")), sample_content("2", None)])
}

async fn patch_content(Path(id): Path<String>, Json(patch): Json<ContentPatch>) -> Json<Content> {
    let mut content = sample_content(&id, None);
    content.apply_patch(&patch);
    Json(content)
}

#[tokio::test]
async fn fetches_and_validates_content() {
    let base = spawn_backend(Router::new().route("/content", get(list_content)))
        .await
        .expect("spawn backend");

    let items = gateway_for(base).fetch_content().await.expect("fetch");
    assert_eq!(
        items,
        vec![sample_content("1", Some("A")), sample_content("2", None)]
    );
}

#[tokio::test]
async fn base_url_path_prefix_is_kept() {
    let base = spawn_backend(Router::new().route("/api/content", get(list_content)))
        .await
        .expect("spawn backend");

    let items = gateway_for(format!("{base}/api/"))
        .fetch_content()
        .await
        .expect("fetch");
    assert_eq!(items.len(), 2);
}

#[tokio::test]
async fn out_of_range_confidence_is_a_validation_error() {
    let app = Router::new().route(
        "/themes",
        get(|| async {
            Json(serde_json::json!([
                {"id": "t1", "name": "Rust", "contentCount": 3, "confidence": 1.7}
            ]))
        }),
    );
    let base = spawn_backend(app).await.expect("spawn backend");

    let err = gateway_for(base).fetch_themes().await.expect_err("invalid");
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn duplicate_ids_are_a_validation_error() {
    let app = Router::new().route(
        "/themes",
        get(|| async {
            Json(serde_json::json!([
                {"id": "t1", "name": "Rust", "contentCount": 3},
                {"id": "t1", "name": "Go", "contentCount": 1}
            ]))
        }),
    );
    let base = spawn_backend(app).await.expect("spawn backend");

    let err = gateway_for(base).fetch_themes().await.expect_err("duplicate");
    assert!(matches!(&err, ClientError::Validation(msg) if msg.contains("duplicate")), "{err}");
}

#[tokio::test]
async fn malformed_body_is_a_validation_error() {
    let app = Router::new().route("/content", get(|| async { "not json at all" }));
    let base = spawn_backend(app).await.expect("spawn backend");

    let err = gateway_for(base).fetch_content().await.expect_err("malformed");
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn error_body_is_parsed_into_remote_error() {
    let app = Router::new().route(
        "/content/sync/status",
        get(|| async {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"message": "sync worker offline", "code": "worker_down"})),
            )
        }),
    );
    let base = spawn_backend(app).await.expect("spawn backend");

    let err = gateway_for(base).check_status().await.expect_err("remote");
    assert_eq!(
        err,
        ClientError::Remote {
            status: 503,
            code: Some("worker_down".into()),
            message: "sync worker offline".into(),
        }
    );
    assert!(!err.is_transient());
}

#[tokio::test]
async fn unparseable_error_body_gets_default_message() {
    let app = Router::new().route(
        "/content",
        get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "<html>oops</html>") }),
    );
    let base = spawn_backend(app).await.expect("spawn backend");

    let err = gateway_for(base).fetch_content().await.expect_err("remote");
    assert_eq!(
        err,
        ClientError::Remote {
            status: 500,
            code: None,
            message: "API request failed".into(),
        }
    );
}

#[tokio::test]
async fn refused_connection_is_a_network_error() {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let err = gateway_for(format!("http://{addr}"))
        .fetch_content()
        .await
        .expect_err("refused");
    assert_eq!(err.kind(), ErrorKind::Network);
    assert!(err.is_transient());
}

#[tokio::test]
async fn access_token_is_sent_as_bearer() {
    let app = Router::new().route(
        "/content/sync",
        post(|headers: HeaderMap| async move {
            let auth = headers
                .get(AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_string();
            Json(SyncStarted { status: auth })
        }),
    );
    let base = spawn_backend(app).await.expect("spawn backend");

    let started = gateway_for(base)
        .with_access_token("token-1")
        .begin_sync()
        .await
        .expect("begin");
    assert_eq!(started.status, "Bearer token-1");
}

#[tokio::test]
async fn patches_content_by_id() {
    let base = spawn_backend(Router::new().route("/content/:id", patch(patch_content)))
        .await
        .expect("spawn backend");

    let updated = gateway_for(base)
        .update_content(&ContentId::from("42"), &ContentPatch::theme("B"))
        .await
        .expect("patch");
    assert_eq!(updated, sample_content("42", Some("B")));
}

#[tokio::test]
async fn delete_accepts_empty_success_and_reports_missing() {
    let app = Router::new().route(
        "/themes/:id",
        axum::routing::delete(|Path(id): Path<String>| async move {
            if id == "t1" {
                StatusCode::NO_CONTENT
            } else {
                StatusCode::NOT_FOUND
            }
        }),
    );
    let base = spawn_backend(app).await.expect("spawn backend");
    let gateway = gateway_for(base);

    gateway
        .delete(EntityKind::Theme, "t1")
        .await
        .expect("delete t1");
    let err = gateway
        .delete(EntityKind::Theme, "missing")
        .await
        .expect_err("missing");
    assert!(matches!(err, ClientError::Remote { status: 404, .. }), "{err}");
}
