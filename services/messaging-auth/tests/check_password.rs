use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use common_auth::{AuthError, AuthenticationService, InMemoryAuthenticationService};
use http_body_util::BodyExt;
use messaging_auth::{build_router, AppState};
use tower::ServiceExt;

fn router_with(service: InMemoryAuthenticationService) -> Router {
    let auth: Arc<dyn AuthenticationService> = Arc::new(service);
    build_router(Arc::new(AppState::new(auth, Duration::from_millis(200))))
}

fn tokens() -> InMemoryAuthenticationService {
    InMemoryAuthenticationService::new()
        .with_token("T1", "alice")
        .with_token("T 2", "carol")
}

async fn get(router: Router, uri: &str) -> (StatusCode, Option<String>, String) {
    let response = router
        .oneshot(Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap())
        .await
        .expect("response");

    let (parts, body) = response.into_parts();
    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .map(|value| value.to_str().unwrap().to_string());
    let bytes = body.collect().await.unwrap().to_bytes();
    (
        parts.status,
        content_type,
        String::from_utf8(bytes.to_vec()).expect("utf8"),
    )
}

#[tokio::test]
async fn matching_user_answers_true() {
    let (status, content_type, body) = get(router_with(tokens()), "/?user=alice&pass=T1").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "true");
    assert_eq!(content_type.as_deref(), Some("text/plain; charset=utf-8"));
}

#[tokio::test]
async fn other_user_answers_false() {
    let (status, _, body) = get(router_with(tokens()), "/?user=bob&pass=T1").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "false");
}

#[tokio::test]
async fn comparison_is_case_sensitive() {
    let (status, _, body) = get(router_with(tokens()), "/?user=Alice&pass=T1").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "false");
}

#[tokio::test]
async fn unknown_token_answers_false() {
    let (status, _, body) = get(router_with(tokens()), "/?user=alice&pass=expired").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "false");
}

#[tokio::test]
async fn parameters_are_percent_decoded() {
    let (status, _, body) = get(router_with(tokens()), "/?pass=T%202&user=carol").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "true");

    let (status, _, body) = get(router_with(tokens()), "/?pass=T+2&user=carol").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "true");
}

#[tokio::test]
async fn missing_or_empty_parameters_are_rejected() {
    let uris = [
        "/",
        "/?",
        "/?user=alice",
        "/?pass=T1",
        "/?user=&pass=T1",
        "/?user=alice&pass=",
        "/?username=alice&password=T1",
        "/?user",
    ];

    for uri in uris {
        let (status, _, body) = get(router_with(tokens()), uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "uri {uri}");
        assert!(body.is_empty(), "uri {uri}");
    }
}

#[tokio::test]
async fn extra_parameters_are_ignored() {
    let uri = "/?user=alice&pass=T1&domain=example.com";
    let (status, _, body) = get(router_with(tokens()), uri).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "true");
}

#[tokio::test]
async fn repeated_parameters_are_accepted() {
    let cases = [
        ("/?user=alice&user=alice&pass=T1", "true"),
        ("/?user=alice&pass=T1&pass=T1", "true"),
        ("/?user=bob&user=alice&pass=T1", "true"),
        ("/?user=alice&user=bob&pass=T1", "false"),
    ];

    for (uri, expected) in cases {
        let (status, _, body) = get(router_with(tokens()), uri).await;
        assert_eq!(status, StatusCode::OK, "uri {uri}");
        assert_eq!(body, expected, "uri {uri}");
    }
}

#[tokio::test]
async fn undecodable_credentials_are_rejected() {
    // Any call reaching the dependency would answer 401.
    let service = tokens().failing_with(AuthError::Unauthorized);
    for uri in ["/?user=alice&pass=%FF", "/?user=%C3%28&pass=T1"] {
        let (status, _, body) = get(router_with(service.clone()), uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "uri {uri}");
        assert!(body.is_empty(), "uri {uri}");
    }
}

#[tokio::test]
async fn unauthorized_dependency_answers_401() {
    let service = tokens().failing_with(AuthError::Unauthorized);
    let (status, _, body) = get(router_with(service), "/?user=alice&pass=T1").await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body.is_empty());
}

#[tokio::test]
async fn failed_dependency_answers_424() {
    let service = tokens().failing_with(AuthError::FailedDependency("connection refused".into()));
    let (status, _, body) = get(router_with(service), "/?user=alice&pass=T1").await;

    assert_eq!(status, StatusCode::FAILED_DEPENDENCY);
    assert!(body.is_empty());
}

#[tokio::test]
async fn slow_dependency_answers_424() {
    let service = tokens().with_delay(Duration::from_secs(5));
    let (status, _, body) = get(router_with(service), "/?user=alice&pass=T1").await;

    assert_eq!(status, StatusCode::FAILED_DEPENDENCY);
    assert!(body.is_empty());
}

#[tokio::test]
async fn unexpected_failure_answers_500() {
    let service = tokens().failing_with(AuthError::Unexpected("malformed reply".into()));
    let (status, _, body) = get(router_with(service), "/?user=alice&pass=T1").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.is_empty());
}

struct PanickingAuthenticationService;

#[async_trait]
impl AuthenticationService for PanickingAuthenticationService {
    async fn validate_token(&self, _token: &str) -> Result<Option<String>, AuthError> {
        panic!("backend exploded");
    }
}

#[tokio::test]
async fn panicking_dependency_answers_500() {
    let auth: Arc<dyn AuthenticationService> = Arc::new(PanickingAuthenticationService);
    let router = build_router(Arc::new(AppState::new(auth, Duration::from_secs(1))));
    let (status, _, body) = get(router, "/?user=alice&pass=T1").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.is_empty());
}

#[tokio::test]
async fn missing_parameters_skip_the_dependency() {
    // A failing dependency would turn any call into a 401.
    let service = tokens().failing_with(AuthError::Unauthorized);
    let (status, _, _) = get(router_with(service), "/?user=alice").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn request_id_is_echoed() {
    let response = router_with(tokens())
        .oneshot(
            Request::builder()
                .uri("/?user=alice&pass=T1")
                .header("x-request-id", "req-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("response");

    assert_eq!(response.headers()["x-request-id"], "req-42");
}

#[tokio::test]
async fn request_id_is_generated_when_absent() {
    let response = router_with(tokens())
        .oneshot(Request::builder().uri("/?user=alice&pass=T1").body(Body::empty()).unwrap())
        .await
        .expect("response");

    let id = response.headers()["x-request-id"].to_str().unwrap();
    assert_eq!(id.len(), 36);
}
