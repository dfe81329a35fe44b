mod error;
mod recording;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, NavigateParams, PrintToPdfParams, Viewport as ClipViewport,
};
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::handler::viewport::Viewport as ChromiumViewport;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{BrowserSection, RecordingSection};
use crate::transcode::{CommandExecutor, SystemCommandExecutor};

pub use error::{CaptureError, CaptureResult};

/// Per-request browser launch overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BrowserOverrides {
    pub viewport: Option<ViewportOverride>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ViewportOverride {
    pub width: u32,
    pub height: u32,
}

/// Screenshot parameters. Caller-supplied options replace the defaults
/// wholesale; there is no deep merge.
#[derive(Debug, Clone, Deserialize)]
pub struct ScreenshotOptions {
    #[serde(default = "default_full_page")]
    pub full_page: bool,
    pub clip: Option<ClipRegion>,
}

impl Default for ScreenshotOptions {
    fn default() -> Self {
        Self {
            full_page: true,
            clip: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClipRegion {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// PDF parameters; defaults are A4 with backgrounds, zero margins, and
/// page size driven by page CSS.
#[derive(Debug, Clone, Deserialize)]
pub struct PdfOptions {
    #[serde(default)]
    pub landscape: bool,
    #[serde(default = "default_true")]
    pub print_background: bool,
    #[serde(default = "default_true")]
    pub prefer_css_page_size: bool,
    #[serde(default = "default_a4_width")]
    pub paper_width: f64,
    #[serde(default = "default_a4_height")]
    pub paper_height: f64,
    #[serde(default)]
    pub margin: f64,
}

impl Default for PdfOptions {
    fn default() -> Self {
        Self {
            landscape: false,
            print_background: true,
            prefer_css_page_size: true,
            paper_width: default_a4_width(),
            paper_height: default_a4_height(),
            margin: 0.0,
        }
    }
}

/// Per-request recording overrides; unset fields fall back to the
/// configured recording section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordingOverrides {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<u32>,
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct RecordingOptions {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub duration_ms: u64,
}

fn default_full_page() -> bool {
    true
}

fn default_true() -> bool {
    true
}

fn default_a4_width() -> f64 {
    8.27
}

fn default_a4_height() -> f64 {
    11.69
}

const SETTLE_IMAGES_SCRIPT: &str = r#"
(async () => {
    const images = Array.from(document.images);
    await Promise.all(images.map((img) => {
        if (img.complete) return Promise.resolve();
        return new Promise((resolve) => {
            img.addEventListener('load', resolve, { once: true });
            img.addEventListener('error', resolve, { once: true });
        });
    }));
    return images.length;
})()
"#;

/// Owns the lifecycle of one browser session per request: launch,
/// navigate, wait for readiness, extract the artifact, tear down. The
/// session is terminated on every exit path before the call returns.
pub struct CaptureEngine {
    browser: BrowserSection,
    recording: RecordingSection,
    ffmpeg_path: PathBuf,
    executor: Arc<dyn CommandExecutor>,
}

impl CaptureEngine {
    pub fn new(
        browser: BrowserSection,
        recording: RecordingSection,
        ffmpeg_path: PathBuf,
    ) -> Self {
        Self::with_executor(
            browser,
            recording,
            ffmpeg_path,
            Arc::new(SystemCommandExecutor),
        )
    }

    pub fn with_executor(
        browser: BrowserSection,
        recording: RecordingSection,
        ffmpeg_path: PathBuf,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        Self {
            browser,
            recording,
            ffmpeg_path,
            executor,
        }
    }

    pub async fn screenshot(
        &self,
        source: &str,
        overrides: &BrowserOverrides,
        options: ScreenshotOptions,
    ) -> CaptureResult<Vec<u8>> {
        let session = self.open_session(overrides).await?;
        let produced = self.screenshot_on(&session, source, options).await;
        session.close().await;
        produced
    }

    pub async fn pdf(
        &self,
        source: &str,
        overrides: &BrowserOverrides,
        options: PdfOptions,
    ) -> CaptureResult<Vec<u8>> {
        let session = self.open_session(overrides).await?;
        let produced = self.pdf_on(&session, source, options).await;
        session.close().await;
        produced
    }

    pub async fn record(
        &self,
        source: &str,
        overrides: &BrowserOverrides,
        requested: &RecordingOverrides,
    ) -> CaptureResult<Vec<u8>> {
        let options = self.resolve_recording(requested);
        let session = self.open_session(overrides).await?;
        let produced = self.record_on(&session, source, &options).await;
        session.close().await;
        produced
    }

    /// Caller-requested durations are clamped so one request cannot hold a
    /// browser process open indefinitely.
    fn resolve_recording(&self, requested: &RecordingOverrides) -> RecordingOptions {
        RecordingOptions {
            width: requested.width.unwrap_or(self.recording.width),
            height: requested.height.unwrap_or(self.recording.height),
            frame_rate: requested.frame_rate.unwrap_or(self.recording.frame_rate),
            duration_ms: requested
                .duration_ms
                .unwrap_or(self.recording.duration_ms)
                .min(self.recording.max_duration_ms),
        }
    }

    async fn screenshot_on(
        &self,
        session: &CaptureSession,
        source: &str,
        options: ScreenshotOptions,
    ) -> CaptureResult<Vec<u8>> {
        session.load(source, self.navigation_timeout()).await?;
        let mut params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(options.full_page);
        if let Some(clip) = options.clip {
            params = params.clip(ClipViewport {
                x: clip.x,
                y: clip.y,
                width: clip.width,
                height: clip.height,
                scale: 1.0,
            });
        }
        let bytes = session.page()?.screenshot(params.build()).await?;
        info!(size = bytes.len(), "screenshot captured");
        Ok(bytes)
    }

    async fn pdf_on(
        &self,
        session: &CaptureSession,
        source: &str,
        options: PdfOptions,
    ) -> CaptureResult<Vec<u8>> {
        session.load(source, self.navigation_timeout()).await?;
        let params = PrintToPdfParams::builder()
            .landscape(options.landscape)
            .print_background(options.print_background)
            .prefer_css_page_size(options.prefer_css_page_size)
            .paper_width(options.paper_width)
            .paper_height(options.paper_height)
            .margin_top(options.margin)
            .margin_bottom(options.margin)
            .margin_left(options.margin)
            .margin_right(options.margin)
            .build();
        let bytes = session.page()?.pdf(params).await?;
        info!(size = bytes.len(), "pdf rendered");
        Ok(bytes)
    }

    async fn record_on(
        &self,
        session: &CaptureSession,
        source: &str,
        options: &RecordingOptions,
    ) -> CaptureResult<Vec<u8>> {
        session.load(source, self.navigation_timeout()).await?;
        recording::record_page(
            session.page()?,
            options,
            &self.browser.tmp_dir,
            &self.ffmpeg_path,
            self.executor.as_ref(),
        )
        .await
    }

    fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.browser.navigation_timeout_seconds)
    }

    async fn open_session(&self, overrides: &BrowserOverrides) -> CaptureResult<CaptureSession> {
        let (width, height) = match &overrides.viewport {
            Some(viewport) => (viewport.width, viewport.height),
            None => (self.browser.viewport_width, self.browser.viewport_height),
        };

        let mut builder = ChromiumConfig::builder()
            .viewport(ChromiumViewport {
                width,
                height,
                device_scale_factor: Some(1.0),
                emulating_mobile: false,
                is_landscape: width >= height,
                has_touch: false,
            })
            .request_timeout(self.navigation_timeout())
            .args(vec![
                "--disable-gpu".to_string(),
                "--mute-audio".to_string(),
                "--hide-scrollbars".to_string(),
                format!("--window-size={width},{height}"),
            ]);
        if let Some(path) = &self.browser.executable_path {
            builder = builder.chrome_executable(path);
        }
        if !self.browser.sandbox {
            builder = builder.no_sandbox();
        }
        let config = builder.build().map_err(CaptureError::Configuration)?;

        info!(width, height, "launching chromium session");
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|err| CaptureError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "chromium handler reported error");
                }
            }
        });

        let page = match browser.new_page(CreateTargetParams::new("about:blank")).await {
            Ok(page) => page,
            Err(err) => {
                let mut session = CaptureSession {
                    browser,
                    page: None,
                    handler_task: Some(handler_task),
                };
                session.shutdown().await;
                return Err(CaptureError::Cdp(err));
            }
        };

        Ok(CaptureSession {
            browser,
            page: Some(page),
            handler_task: Some(handler_task),
        })
    }
}

/// One exclusively-owned browser process plus a single page in it. Never
/// shared across requests; `close` must run on every exit path.
pub struct CaptureSession {
    browser: Browser,
    page: Option<Page>,
    handler_task: Option<JoinHandle<()>>,
}

impl CaptureSession {
    async fn load(&self, source: &str, timeout: Duration) -> CaptureResult<()> {
        match tokio::time::timeout(timeout, self.load_inner(source)).await {
            Ok(result) => result,
            Err(_) => Err(CaptureError::Timeout(format!(
                "page load exceeded {}s",
                timeout.as_secs()
            ))),
        }
    }

    async fn load_inner(&self, source: &str) -> CaptureResult<()> {
        let page = self.page()?;
        if source.starts_with("http") {
            let params = NavigateParams::builder()
                .url(source)
                .build()
                .map_err(CaptureError::Configuration)?;
            page.goto(params).await?;
            page.wait_for_navigation().await?;
        } else {
            page.set_content(source).await?;
        }
        // The load event under-reports pending image decodes; wait for
        // every image element to settle before producing the artifact.
        page.evaluate(SETTLE_IMAGES_SCRIPT).await?;
        Ok(())
    }

    fn page(&self) -> CaptureResult<&Page> {
        self.page
            .as_ref()
            .ok_or_else(|| CaptureError::Configuration("session has no page".into()))
    }

    async fn close(mut self) {
        self.shutdown().await;
    }

    async fn shutdown(&mut self) {
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "failed to close browser gracefully");
        }
        if let Some(handle) = self.handler_task.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "browser handler join error");
            }
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if let Some(handle) = &self.handler_task {
            if !handle.is_finished() {
                warn!("capture session dropped without explicit shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecordingSection;

    fn engine() -> CaptureEngine {
        CaptureEngine::new(
            BrowserSection::default(),
            RecordingSection::default(),
            PathBuf::from("/usr/bin/ffmpeg"),
        )
    }

    #[test]
    fn recording_defaults_come_from_config() {
        let options = engine().resolve_recording(&RecordingOverrides::default());
        assert_eq!(options.width, 1920);
        assert_eq!(options.height, 1080);
        assert_eq!(options.frame_rate, 30);
        assert_eq!(options.duration_ms, 5000);
    }

    #[test]
    fn recording_duration_is_clamped() {
        let options = engine().resolve_recording(&RecordingOverrides {
            duration_ms: Some(3_600_000),
            ..Default::default()
        });
        assert_eq!(options.duration_ms, 60_000);
    }

    #[test]
    fn recording_overrides_apply_below_cap() {
        let options = engine().resolve_recording(&RecordingOverrides {
            width: Some(1280),
            height: Some(720),
            frame_rate: Some(24),
            duration_ms: Some(2000),
        });
        assert_eq!(options.width, 1280);
        assert_eq!(options.height, 720);
        assert_eq!(options.frame_rate, 24);
        assert_eq!(options.duration_ms, 2000);
    }

    #[test]
    fn screenshot_options_default_to_full_page() {
        let options: ScreenshotOptions = serde_json::from_str("{}").unwrap();
        assert!(options.full_page);
        assert!(options.clip.is_none());
    }

    #[test]
    fn pdf_options_default_to_a4_with_backgrounds() {
        let options = PdfOptions::default();
        assert!(options.print_background);
        assert!(options.prefer_css_page_size);
        assert!((options.paper_width - 8.27).abs() < f64::EPSILON);
        assert!((options.paper_height - 11.69).abs() < f64::EPSILON);
        assert_eq!(options.margin, 0.0);
    }
}
