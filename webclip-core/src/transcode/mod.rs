mod error;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::TranscodeSection;

pub use error::{TranscodeError, TranscodeResult};

/// Seam for spawning external processes, so tests can substitute a fake.
#[async_trait::async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, command: &mut Command) -> std::io::Result<std::process::Output>;
}

#[derive(Debug, Default)]
pub struct SystemCommandExecutor;

#[async_trait::async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(&self, command: &mut Command) -> std::io::Result<std::process::Output> {
        command.output().await
    }
}

/// Source material for one transcode job. Buffers are staged to a unique
/// temp file before invocation; the transcoder only consumes paths/URLs.
#[derive(Debug)]
pub enum TranscodeInput {
    Bytes(Vec<u8>),
    Location(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OptimizeOptions {
    #[serde(default)]
    pub audio: Option<bool>,
    pub crf: Option<u8>,
    pub preset: Option<String>,
}

#[derive(Debug, Clone)]
pub enum TranscodeOperation {
    Optimize(OptimizeOptions),
    OptimizeSilent,
    LoopBackground,
    ExtractAudio,
    ConvertContainer,
}

impl TranscodeOperation {
    pub fn output_extension(&self) -> &'static str {
        match self {
            TranscodeOperation::Optimize(_)
            | TranscodeOperation::OptimizeSilent
            | TranscodeOperation::LoopBackground => "mp4",
            TranscodeOperation::ExtractAudio => "mp3",
            TranscodeOperation::ConvertContainer => "webm",
        }
    }

    pub fn output_prefix(&self) -> &'static str {
        match self {
            TranscodeOperation::Optimize(_) | TranscodeOperation::OptimizeSilent => "optimized-",
            TranscodeOperation::LoopBackground => "background-",
            TranscodeOperation::ExtractAudio => "audio-",
            TranscodeOperation::ConvertContainer => "optimized-",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            TranscodeOperation::Optimize(_) => "optimize",
            TranscodeOperation::OptimizeSilent => "optimize-silent",
            TranscodeOperation::LoopBackground => "loop-background",
            TranscodeOperation::ExtractAudio => "extract-audio",
            TranscodeOperation::ConvertContainer => "convert-container",
        }
    }
}

enum StagedInput {
    Temp(PathBuf),
    External(String),
}

impl StagedInput {
    fn location(&self) -> String {
        match self {
            StagedInput::Temp(path) => path.to_string_lossy().to_string(),
            StagedInput::External(location) => location.clone(),
        }
    }
}

/// Drives one external transcoding process per job. Every invocation
/// stages input when needed, runs to completion, reads the produced file
/// back into memory and deletes all temporary files it created, on the
/// failure path as much as on the success path.
pub struct Transcoder {
    config: TranscodeSection,
    executor: Arc<dyn CommandExecutor>,
}

impl Transcoder {
    pub fn new(config: TranscodeSection) -> Self {
        Self::with_executor(config, Arc::new(SystemCommandExecutor))
    }

    pub fn with_executor(config: TranscodeSection, executor: Arc<dyn CommandExecutor>) -> Self {
        Self { config, executor }
    }

    pub async fn run(
        &self,
        input: TranscodeInput,
        operation: TranscodeOperation,
    ) -> TranscodeResult<Vec<u8>> {
        let staged = self.stage_input(input).await?;
        let output_path = self.config.tmp_dir().join(generate_temp_name(
            operation.output_prefix(),
            operation.output_extension(),
        ));
        let args = self.build_args(&staged.location(), &operation, &output_path);

        let mut command = Command::new(&self.config.ffmpeg_path);
        for arg in &args {
            command.arg(arg);
        }
        let run_result = self.executor.run(&mut command).await;

        let outcome = match run_result {
            Err(source) => Err(TranscodeError::Spawn(source)),
            Ok(output) if !output.status.success() => Err(TranscodeError::CommandFailure {
                command: format!("{} {}", self.config.ffmpeg_path.display(), args.join(" ")),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            }),
            Ok(_) => fs::read(&output_path)
                .await
                .map_err(|source| TranscodeError::Io {
                    path: output_path.clone(),
                    source,
                }),
        };

        // Both temp files are removed unconditionally; one failing removal
        // must not skip the other.
        remove_quietly(&output_path).await;
        if let StagedInput::Temp(path) = &staged {
            remove_quietly(path).await;
        }

        if let Ok(bytes) = &outcome {
            info!(
                operation = operation.label(),
                size = bytes.len(),
                "transcode completed"
            );
        }
        outcome
    }

    async fn stage_input(&self, input: TranscodeInput) -> TranscodeResult<StagedInput> {
        match input {
            TranscodeInput::Location(location) => Ok(StagedInput::External(location)),
            TranscodeInput::Bytes(bytes) => {
                let path = self
                    .config
                    .tmp_dir()
                    .join(generate_temp_name("input-", "mp4"));
                fs::write(&path, &bytes)
                    .await
                    .map_err(|source| TranscodeError::Io {
                        path: path.clone(),
                        source,
                    })?;
                Ok(StagedInput::Temp(path))
            }
        }
    }

    fn build_args(
        &self,
        input: &str,
        operation: &TranscodeOperation,
        output: &Path,
    ) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            input.to_string(),
        ];
        match operation {
            TranscodeOperation::Optimize(options) => {
                let crf = options.crf.unwrap_or(self.config.crf);
                let preset = options
                    .preset
                    .clone()
                    .unwrap_or_else(|| self.config.preset.clone());
                args.extend([
                    "-c:v".to_string(),
                    "libx264".to_string(),
                    "-preset".to_string(),
                    preset,
                    "-crf".to_string(),
                    crf.to_string(),
                    "-movflags".to_string(),
                    "+faststart".to_string(),
                ]);
                if options.audio.unwrap_or(true) {
                    args.extend([
                        "-c:a".to_string(),
                        "aac".to_string(),
                        "-b:a".to_string(),
                        "128k".to_string(),
                    ]);
                } else {
                    args.push("-an".to_string());
                }
            }
            TranscodeOperation::OptimizeSilent => {
                args.extend([
                    "-an".to_string(),
                    "-c:v".to_string(),
                    "libx264".to_string(),
                    "-preset".to_string(),
                    self.config.preset.clone(),
                    "-crf".to_string(),
                    self.config.crf.to_string(),
                    "-movflags".to_string(),
                    "+faststart".to_string(),
                ]);
            }
            TranscodeOperation::LoopBackground => {
                args.extend([
                    "-an".to_string(),
                    "-c:v".to_string(),
                    "libx264".to_string(),
                    "-vf".to_string(),
                    "scale=-2:720".to_string(),
                    "-preset".to_string(),
                    "veryfast".to_string(),
                    "-crf".to_string(),
                    "28".to_string(),
                    "-movflags".to_string(),
                    "+faststart".to_string(),
                    "-pix_fmt".to_string(),
                    "yuv420p".to_string(),
                ]);
            }
            TranscodeOperation::ExtractAudio => {
                args.extend([
                    "-vn".to_string(),
                    "-c:a".to_string(),
                    "libmp3lame".to_string(),
                    "-b:a".to_string(),
                    "192k".to_string(),
                ]);
            }
            TranscodeOperation::ConvertContainer => {
                args.extend([
                    "-c:v".to_string(),
                    "libvpx-vp9".to_string(),
                    "-b:v".to_string(),
                    "0".to_string(),
                    "-crf".to_string(),
                    "33".to_string(),
                    "-pix_fmt".to_string(),
                    "yuv420p".to_string(),
                    "-row-mt".to_string(),
                    "1".to_string(),
                    "-deadline".to_string(),
                    "good".to_string(),
                    "-cpu-used".to_string(),
                    "4".to_string(),
                ]);
            }
        }
        args.push(output.to_string_lossy().to_string());
        args
    }
}

pub(crate) fn generate_temp_name(prefix: &str, ext: &str) -> String {
    format!("{prefix}{}.{ext}", Uuid::new_v4().simple())
}

pub(crate) async fn remove_quietly(path: &Path) {
    if let Err(error) = fs::remove_file(path).await {
        debug!(path = %path.display(), %error, "failed to remove temp artifact");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transcoder() -> Transcoder {
        Transcoder::new(TranscodeSection::default())
    }

    fn args_for(operation: TranscodeOperation) -> Vec<String> {
        transcoder().build_args("in.mp4", &operation, Path::new("out.bin"))
    }

    fn has_pair(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2)
            .any(|pair| pair[0] == flag && pair[1] == value)
    }

    #[test]
    fn optimize_defaults_keep_audio() {
        let args = args_for(TranscodeOperation::Optimize(OptimizeOptions::default()));
        assert!(has_pair(&args, "-c:v", "libx264"));
        assert!(has_pair(&args, "-preset", "veryfast"));
        assert!(has_pair(&args, "-crf", "23"));
        assert!(has_pair(&args, "-movflags", "+faststart"));
        assert!(has_pair(&args, "-c:a", "aac"));
        assert!(has_pair(&args, "-b:a", "128k"));
        assert!(!args.contains(&"-an".to_string()));
    }

    #[test]
    fn optimize_audio_toggle_strips_track() {
        let args = args_for(TranscodeOperation::Optimize(OptimizeOptions {
            audio: Some(false),
            crf: Some(18),
            preset: Some("slow".into()),
        }));
        assert!(args.contains(&"-an".to_string()));
        assert!(has_pair(&args, "-crf", "18"));
        assert!(has_pair(&args, "-preset", "slow"));
        assert!(!args.contains(&"aac".to_string()));
    }

    #[test]
    fn silent_optimize_always_strips_audio() {
        let args = args_for(TranscodeOperation::OptimizeSilent);
        assert!(args.contains(&"-an".to_string()));
        assert!(has_pair(&args, "-c:v", "libx264"));
    }

    #[test]
    fn loop_background_downscales_and_normalizes() {
        let args = args_for(TranscodeOperation::LoopBackground);
        assert!(args.contains(&"-an".to_string()));
        assert!(has_pair(&args, "-vf", "scale=-2:720"));
        assert!(has_pair(&args, "-crf", "28"));
        assert!(has_pair(&args, "-pix_fmt", "yuv420p"));
    }

    #[test]
    fn extract_audio_drops_video() {
        let args = args_for(TranscodeOperation::ExtractAudio);
        assert!(args.contains(&"-vn".to_string()));
        assert!(has_pair(&args, "-c:a", "libmp3lame"));
        assert!(has_pair(&args, "-b:a", "192k"));
    }

    #[test]
    fn convert_container_uses_vp9_constant_quality() {
        let args = args_for(TranscodeOperation::ConvertContainer);
        assert!(has_pair(&args, "-c:v", "libvpx-vp9"));
        assert!(has_pair(&args, "-b:v", "0"));
        assert!(has_pair(&args, "-crf", "33"));
        assert!(has_pair(&args, "-deadline", "good"));
        assert!(has_pair(&args, "-cpu-used", "4"));
        assert!(has_pair(&args, "-row-mt", "1"));
    }

    #[test]
    fn operation_outputs_match_format() {
        assert_eq!(
            TranscodeOperation::Optimize(OptimizeOptions::default()).output_extension(),
            "mp4"
        );
        assert_eq!(TranscodeOperation::ExtractAudio.output_extension(), "mp3");
        assert_eq!(
            TranscodeOperation::ConvertContainer.output_extension(),
            "webm"
        );
        assert_eq!(TranscodeOperation::LoopBackground.output_prefix(), "background-");
        assert_eq!(TranscodeOperation::ExtractAudio.output_prefix(), "audio-");
    }

    #[test]
    fn temp_names_are_unique() {
        assert_ne!(
            generate_temp_name("input-", "mp4"),
            generate_temp_name("input-", "mp4")
        );
    }
}
