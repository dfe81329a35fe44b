use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::error;
use warp::{http::StatusCode, reply, Filter, Rejection, Reply};

use webclip_core::config::ProxySection;
use webclip_core::{
    resolve, verify_url, BrowserOverrides, CaptureEngine, Delivery, DeliveryDispatcher,
    FileDefaults, GatewayConfig, OptimizeOptions, OutputDescriptor, PdfOptions,
    RecordingOverrides, ScreenshotOptions, StorageError, TranscodeInput, TranscodeOperation,
    Transcoder, UploadTarget, ViewportOverride,
};

const SCREENSHOT_DEFAULTS: FileDefaults = FileDefaults {
    prefix: "screenshot-",
    ext: "png",
};
const PDF_DEFAULTS: FileDefaults = FileDefaults {
    prefix: "webpage-",
    ext: "pdf",
};
const RECORDING_DEFAULTS: FileDefaults = FileDefaults {
    prefix: "webclip-",
    ext: "webm",
};

#[derive(Debug, Deserialize)]
struct ScreenshotRequest {
    url: String,
    proxy: Option<String>,
    #[serde(default)]
    browser: BrowserOverrides,
    config: Option<ScreenshotOptions>,
    #[serde(default)]
    upload: UploadTarget,
}

#[derive(Debug, Deserialize)]
struct PdfRequest {
    url: String,
    proxy: Option<String>,
    browser: Option<BrowserOverrides>,
    config: Option<PdfOptions>,
    #[serde(default)]
    upload: UploadTarget,
}

#[derive(Debug, Deserialize)]
struct RecordingRequest {
    url: String,
    proxy: Option<String>,
    #[serde(default)]
    browser: BrowserOverrides,
    config: Option<RecordingOverrides>,
    #[serde(default)]
    upload: UploadTarget,
}

#[derive(Debug, Deserialize)]
struct TranscodeRequest {
    url: String,
    config: Option<OptimizeOptions>,
    #[serde(default)]
    upload: UploadTarget,
}

#[derive(Debug)]
struct Unauthorized;
impl warp::reject::Reject for Unauthorized {}

#[derive(Debug)]
struct Forbidden;
impl warp::reject::Reject for Forbidden {}

/// One route per pipeline operation, all behind the bearer-token filter.
/// Holds the long-lived adapters; per-request state lives in handlers.
pub struct Gateway {
    token: String,
    timeout: Duration,
    proxy: ProxySection,
    capture: CaptureEngine,
    transcoder: Transcoder,
    dispatcher: DeliveryDispatcher,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Result<Self, StorageError> {
        let dispatcher = DeliveryDispatcher::new(config.storage.as_ref())?;
        let capture = CaptureEngine::new(
            config.browser.clone(),
            config.recording.clone(),
            config.transcode.ffmpeg_path.clone(),
        );
        let transcoder = Transcoder::new(config.transcode.clone());
        Ok(Self {
            token: config.server.bearer_token.clone(),
            timeout: Duration::from_secs(config.server.request_timeout_seconds),
            proxy: config.proxy.clone(),
            capture,
            transcoder,
            dispatcher,
        })
    }

    pub fn routes(self) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
        let gateway = Arc::new(self);
        let auth = with_auth(gateway.token.clone());

        let screenshot = endpoint("screenshot", &auth, gateway.clone()).and_then(handle_screenshot);
        let pdf = endpoint("pdf", &auth, gateway.clone()).and_then(handle_pdf);
        let recording = endpoint("recording", &auth, gateway.clone()).and_then(handle_recording);

        let optimize = endpoint("optimize-video", &auth, gateway.clone()).and_then(
            |request: TranscodeRequest, gateway: Arc<Gateway>| async move {
                let operation =
                    TranscodeOperation::Optimize(request.config.clone().unwrap_or_default());
                handle_transcode("optimize-video", request, gateway, operation).await
            },
        );
        let optimize_silent = endpoint("optimize-silent-video", &auth, gateway.clone()).and_then(
            |request: TranscodeRequest, gateway: Arc<Gateway>| async move {
                handle_transcode(
                    "optimize-silent-video",
                    request,
                    gateway,
                    TranscodeOperation::OptimizeSilent,
                )
                .await
            },
        );
        let optimize_looping = endpoint("optimize-looping-video", &auth, gateway.clone()).and_then(
            |request: TranscodeRequest, gateway: Arc<Gateway>| async move {
                handle_transcode(
                    "optimize-looping-video",
                    request,
                    gateway,
                    TranscodeOperation::LoopBackground,
                )
                .await
            },
        );
        let to_mp3 = endpoint("video-to-mp3", &auth, gateway.clone()).and_then(
            |request: TranscodeRequest, gateway: Arc<Gateway>| async move {
                handle_transcode(
                    "video-to-mp3",
                    request,
                    gateway,
                    TranscodeOperation::ExtractAudio,
                )
                .await
            },
        );
        let to_webm = endpoint("video-to-webm", &auth, gateway).and_then(
            |request: TranscodeRequest, gateway: Arc<Gateway>| async move {
                handle_transcode(
                    "video-to-webm",
                    request,
                    gateway,
                    TranscodeOperation::ConvertContainer,
                )
                .await
            },
        );

        screenshot
            .or(pdf)
            .or(recording)
            .or(optimize)
            .or(optimize_silent)
            .or(optimize_looping)
            .or(to_mp3)
            .or(to_webm)
            .recover(handle_rejection)
    }

    /// Runs the pipeline on its own task so a dropped connection cannot
    /// abandon a live browser or ffmpeg process mid-flight; the task runs
    /// its cleanup to completion either way. The timeout bounds how long
    /// the response waits, not the cleanup.
    async fn run_bounded<F>(&self, endpoint: &'static str, work: F) -> Result<Vec<u8>, String>
    where
        F: Future<Output = Result<Vec<u8>, String>> + Send + 'static,
    {
        let handle = tokio::spawn(work);
        match tokio::time::timeout(self.timeout, handle).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join)) => Err(format!("pipeline task failed: {join}")),
            Err(_) => Err(format!(
                "{endpoint} exceeded the {}s request timeout",
                self.timeout.as_secs()
            )),
        }
    }

    async fn deliver(
        &self,
        endpoint: &'static str,
        produced: Result<Vec<u8>, String>,
        descriptor: OutputDescriptor,
    ) -> Result<warp::reply::Response, Rejection> {
        let bytes = match produced {
            Ok(bytes) => bytes,
            Err(message) => {
                error!(endpoint, error = %message, "pipeline failed");
                return Ok(internal_error(&message));
            }
        };

        match self.dispatcher.dispatch(bytes, descriptor).await {
            Ok(Delivery::Remote(stored)) => Ok(reply::json(&stored).into_response()),
            Ok(Delivery::Inline { bytes, descriptor }) => {
                let filename = descriptor
                    .name
                    .rsplit('/')
                    .next()
                    .unwrap_or(descriptor.name.as_str())
                    .to_string();
                let length = bytes.len();
                let response = reply::with_header(
                    reply::with_header(
                        reply::with_header(bytes, "Content-Type", descriptor.mime.as_str()),
                        "Content-Length",
                        length.to_string(),
                    ),
                    "Content-Disposition",
                    format!("attachment; filename=\"{filename}\""),
                );
                Ok(response.into_response())
            }
            Err(err) => {
                error!(endpoint, error = %err, "delivery failed");
                Ok(internal_error(&err.to_string()))
            }
        }
    }
}

fn endpoint<T>(
    name: &'static str,
    auth: &(impl Filter<Extract = (), Error = Rejection> + Clone + Send + Sync + 'static),
    gateway: Arc<Gateway>,
) -> impl Filter<Extract = (T, Arc<Gateway>), Error = Rejection> + Clone
where
    T: serde::de::DeserializeOwned + Send,
{
    warp::path(name)
        .and(warp::path::end())
        .and(warp::post())
        .and(auth.clone())
        .and(warp::body::json())
        .and(warp::any().map(move || gateway.clone()))
}

fn with_auth(token: String) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and_then(move |header: Option<String>| {
            let token = token.clone();
            async move {
                let presented = header.and_then(|value| {
                    value.strip_prefix("Bearer ").map(|token| token.to_string())
                });
                match presented {
                    None => Err(warp::reject::custom(Unauthorized)),
                    Some(presented) if presented == token => Ok(()),
                    Some(_) => Err(warp::reject::custom(Forbidden)),
                }
            }
        })
        .untuple_one()
}

async fn handle_screenshot(
    request: ScreenshotRequest,
    gateway: Arc<Gateway>,
) -> Result<warp::reply::Response, Rejection> {
    let descriptor = resolve(&request.upload, &SCREENSHOT_DEFAULTS);
    let source = match verify_url(&request.url, request.proxy.as_deref(), &gateway.proxy) {
        Ok(source) => source,
        Err(err) => return Ok(bad_request(&err.to_string())),
    };

    let options = request.config.unwrap_or_default();
    let browser = request.browser;
    let worker = gateway.clone();
    let produced = gateway
        .run_bounded("screenshot", async move {
            worker
                .capture
                .screenshot(&source, &browser, options)
                .await
                .map_err(|err| err.to_string())
        })
        .await;
    gateway.deliver("screenshot", produced, descriptor).await
}

async fn handle_pdf(
    request: PdfRequest,
    gateway: Arc<Gateway>,
) -> Result<warp::reply::Response, Rejection> {
    let descriptor = resolve(&request.upload, &PDF_DEFAULTS);
    let source = match verify_url(&request.url, request.proxy.as_deref(), &gateway.proxy) {
        Ok(source) => source,
        Err(err) => return Ok(bad_request(&err.to_string())),
    };

    // Documents render as portrait pages unless the caller asks otherwise.
    let browser = request.browser.unwrap_or_else(|| BrowserOverrides {
        viewport: Some(ViewportOverride {
            width: 1080,
            height: 1920,
        }),
    });
    let options = request.config.unwrap_or_default();
    let worker = gateway.clone();
    let produced = gateway
        .run_bounded("pdf", async move {
            worker
                .capture
                .pdf(&source, &browser, options)
                .await
                .map_err(|err| err.to_string())
        })
        .await;
    gateway.deliver("pdf", produced, descriptor).await
}

async fn handle_recording(
    request: RecordingRequest,
    gateway: Arc<Gateway>,
) -> Result<warp::reply::Response, Rejection> {
    if request.proxy.is_some() {
        return Ok(bad_request("Can not proxy recording requests"));
    }
    let descriptor = resolve(&request.upload, &RECORDING_DEFAULTS);
    let source = match verify_url(&request.url, None, &gateway.proxy) {
        Ok(source) => source,
        Err(err) => return Ok(bad_request(&err.to_string())),
    };

    let browser = request.browser;
    let overrides = request.config.unwrap_or_default();
    let worker = gateway.clone();
    let produced = gateway
        .run_bounded("recording", async move {
            worker
                .capture
                .record(&source, &browser, &overrides)
                .await
                .map_err(|err| err.to_string())
        })
        .await;
    gateway.deliver("recording", produced, descriptor).await
}

async fn handle_transcode(
    endpoint: &'static str,
    request: TranscodeRequest,
    gateway: Arc<Gateway>,
    operation: TranscodeOperation,
) -> Result<warp::reply::Response, Rejection> {
    let defaults = FileDefaults {
        prefix: operation.output_prefix(),
        ext: operation.output_extension(),
    };
    let descriptor = resolve(&request.upload, &defaults);
    let source = match verify_url(&request.url, None, &gateway.proxy) {
        Ok(source) => source,
        Err(err) => return Ok(bad_request(&err.to_string())),
    };

    let worker = gateway.clone();
    let produced = gateway
        .run_bounded(endpoint, async move {
            worker
                .transcoder
                .run(TranscodeInput::Location(source), operation)
                .await
                .map_err(|err| err.to_string())
        })
        .await;
    gateway.deliver(endpoint, produced, descriptor).await
}

fn bad_request(message: &str) -> warp::reply::Response {
    reply::with_status(
        reply::json(&json!({ "error": message })),
        StatusCode::BAD_REQUEST,
    )
    .into_response()
}

fn internal_error(message: &str) -> warp::reply::Response {
    reply::with_status(
        reply::json(&json!({ "error": message })),
        StatusCode::INTERNAL_SERVER_ERROR,
    )
    .into_response()
}

async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, body) = if err.find::<Unauthorized>().is_some() {
        (StatusCode::UNAUTHORIZED, json!({}))
    } else if err.find::<Forbidden>().is_some() {
        (StatusCode::FORBIDDEN, json!({}))
    } else if let Some(err) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, json!({ "error": err.to_string() }))
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, json!({ "error": "not found" }))
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "error": "internal error" }),
        )
    };
    Ok(reply::with_status(reply::json(&body), status))
}
