use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chromiumoxide::cdp::browser_protocol::page::{
    ScreencastFrameAckParams, StartScreencastFormat, StartScreencastParams, StopScreencastParams,
};
use chromiumoxide::cdp::browser_protocol::page::EventScreencastFrame;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::transcode::CommandExecutor;

use super::error::{CaptureError, CaptureResult};
use super::RecordingOptions;

/// Screencasts the page for the requested duration, then muxes the
/// collected frames into a webm clip. The frame directory is deleted
/// before returning regardless of whether the read succeeded.
pub(crate) async fn record_page(
    page: &Page,
    options: &RecordingOptions,
    tmp_dir: &Path,
    ffmpeg_path: &Path,
    executor: &dyn CommandExecutor,
) -> CaptureResult<Vec<u8>> {
    let frames_dir = tmp_dir.join(format!("screencast-{}", Uuid::new_v4().simple()));
    fs::create_dir_all(&frames_dir)
        .await
        .map_err(|source| CaptureError::Io {
            path: frames_dir.clone(),
            source,
        })?;

    let produced = capture_frames(page, options, &frames_dir).await;
    let outcome = match produced {
        Ok(frame_count) => {
            mux_frames(&frames_dir, frame_count, options, ffmpeg_path, executor).await
        }
        Err(err) => Err(err),
    };

    if let Err(error) = fs::remove_dir_all(&frames_dir).await {
        debug!(path = %frames_dir.display(), %error, "failed to clean screencast directory");
    }
    outcome
}

async fn capture_frames(
    page: &Page,
    options: &RecordingOptions,
    frames_dir: &Path,
) -> CaptureResult<usize> {
    let mut frames = page.event_listener::<EventScreencastFrame>().await?;
    page.execute(
        StartScreencastParams::builder()
            .format(StartScreencastFormat::Png)
            .max_width(options.width as i64)
            .max_height(options.height as i64)
            .every_nth_frame(1)
            .build(),
    )
    .await?;

    let deadline = Instant::now() + Duration::from_millis(options.duration_ms);
    let mut frame_count = 0usize;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let Ok(next) = tokio::time::timeout(remaining, frames.next()).await else {
            break;
        };
        let Some(frame) = next else {
            break;
        };
        page.execute(ScreencastFrameAckParams::new(frame.session_id))
            .await?;
        let bytes = BASE64
            .decode(AsRef::<[u8]>::as_ref(&frame.data))
            .map_err(|err| CaptureError::Recording(format!("invalid frame payload: {err}")))?;
        let frame_path = frames_dir.join(format!("frame_{:05}.png", frame_count));
        fs::write(&frame_path, &bytes)
            .await
            .map_err(|source| CaptureError::Io {
                path: frame_path,
                source,
            })?;
        frame_count += 1;
    }

    if let Err(err) = page.execute(StopScreencastParams::default()).await {
        warn!(error = %err, "failed to stop screencast");
    }

    if frame_count == 0 {
        return Err(CaptureError::Recording(
            "screencast produced no frames".into(),
        ));
    }
    info!(frames = frame_count, "screencast finished");
    Ok(frame_count)
}

async fn mux_frames(
    frames_dir: &Path,
    frame_count: usize,
    options: &RecordingOptions,
    ffmpeg_path: &Path,
    executor: &dyn CommandExecutor,
) -> CaptureResult<Vec<u8>> {
    let clip_path = frames_dir.join("clip.webm");
    let pattern: PathBuf = frames_dir.join("frame_%05d.png");
    let args = [
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-y".to_string(),
        "-framerate".to_string(),
        options.frame_rate.to_string(),
        "-i".to_string(),
        pattern.to_string_lossy().to_string(),
        "-c:v".to_string(),
        "libvpx-vp9".to_string(),
        "-b:v".to_string(),
        "0".to_string(),
        "-crf".to_string(),
        "33".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        clip_path.to_string_lossy().to_string(),
    ];

    let mut command = Command::new(ffmpeg_path);
    for arg in &args {
        command.arg(arg);
    }
    let output = executor
        .run(&mut command)
        .await
        .map_err(|err| CaptureError::Recording(format!("failed to spawn ffmpeg: {err}")))?;
    if !output.status.success() {
        return Err(CaptureError::Recording(format!(
            "ffmpeg mux failed ({} frames): {}",
            frame_count,
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    fs::read(&clip_path)
        .await
        .map_err(|source| CaptureError::Io {
            path: clip_path,
            source,
        })
}
