use std::convert::Infallible;

use serde_json::{json, Value};
use warp::{Filter, Reply};

use webclip_core::config::{
    BrowserSection, GatewayConfig, ProxySection, RecordingSection, ServerSection, TranscodeSection,
};
use webclipd::Gateway;

const TOKEN: &str = "integration-secret";

fn routes() -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let config = GatewayConfig {
        server: ServerSection {
            port: 0,
            bearer_token: TOKEN.to_string(),
            request_timeout_seconds: 5,
        },
        browser: BrowserSection::default(),
        recording: RecordingSection::default(),
        transcode: TranscodeSection::default(),
        storage: None,
        proxy: ProxySection::default(),
    };
    Gateway::new(config).expect("gateway builds").routes()
}

fn body_json(body: &[u8]) -> Value {
    serde_json::from_slice(body).expect("response body is JSON")
}

#[tokio::test]
async fn missing_authorization_is_unauthorized() {
    let response = warp::test::request()
        .method("POST")
        .path("/screenshot")
        .json(&json!({ "url": "https://example.com" }))
        .reply(&routes())
        .await;

    assert_eq!(response.status(), 401);
    assert_eq!(body_json(response.body()), json!({}));
}

#[tokio::test]
async fn malformed_authorization_is_unauthorized() {
    let response = warp::test::request()
        .method("POST")
        .path("/pdf")
        .header("authorization", TOKEN)
        .json(&json!({ "url": "https://example.com" }))
        .reply(&routes())
        .await;

    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn wrong_token_is_forbidden() {
    let response = warp::test::request()
        .method("POST")
        .path("/screenshot")
        .header("authorization", "Bearer wrong")
        .json(&json!({ "url": "https://example.com" }))
        .reply(&routes())
        .await;

    assert_eq!(response.status(), 403);
    assert_eq!(body_json(response.body()), json!({}));
}

#[tokio::test]
async fn recording_rejects_proxy_mode() {
    let response = warp::test::request()
        .method("POST")
        .path("/recording")
        .header("authorization", format!("Bearer {TOKEN}"))
        .json(&json!({ "url": "https://example.com", "proxy": "phantomjs" }))
        .reply(&routes())
        .await;

    assert_eq!(response.status(), 400);
    assert_eq!(
        body_json(response.body()),
        json!({ "error": "Can not proxy recording requests" })
    );
}

#[tokio::test]
async fn invalid_source_url_is_rejected() {
    let response = warp::test::request()
        .method("POST")
        .path("/screenshot")
        .header("authorization", format!("Bearer {TOKEN}"))
        .json(&json!({ "url": "not a url" }))
        .reply(&routes())
        .await;

    assert_eq!(response.status(), 400);
    assert_eq!(body_json(response.body()), json!({ "error": "Invalid URL" }));
}

#[tokio::test]
async fn transcode_endpoints_validate_the_source() {
    for path in [
        "/optimize-video",
        "/optimize-silent-video",
        "/optimize-looping-video",
        "/video-to-mp3",
        "/video-to-webm",
    ] {
        let response = warp::test::request()
            .method("POST")
            .path(path)
            .header("authorization", format!("Bearer {TOKEN}"))
            .json(&json!({ "url": "ftp://example.com/video.mp4" }))
            .reply(&routes())
            .await;

        assert_eq!(response.status(), 400, "{path} must validate its source");
        assert_eq!(body_json(response.body()), json!({ "error": "Invalid URL" }));
    }
}

#[tokio::test]
async fn missing_body_field_is_a_bad_request() {
    let response = warp::test::request()
        .method("POST")
        .path("/screenshot")
        .header("authorization", format!("Bearer {TOKEN}"))
        .json(&json!({ "upload": {} }))
        .reply(&routes())
        .await;

    assert_eq!(response.status(), 400);
    assert!(body_json(response.body())["error"].is_string());
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let response = warp::test::request()
        .method("POST")
        .path("/scrape")
        .header("authorization", format!("Bearer {TOKEN}"))
        .json(&json!({ "url": "https://example.com" }))
        .reply(&routes())
        .await;

    assert_eq!(response.status(), 404);
}
