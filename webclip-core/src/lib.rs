pub mod capture;
pub mod config;
pub mod delivery;
pub mod error;
pub mod output;
pub mod source;
pub mod storage;
pub mod transcode;

pub use capture::{
    BrowserOverrides, CaptureEngine, CaptureError, CaptureResult, ClipRegion, PdfOptions,
    RecordingOptions, RecordingOverrides, ScreenshotOptions, ViewportOverride,
};
pub use config::{
    BrowserSection, GatewayConfig, ProxySection, RecordingSection, ServerSection, StorageSection,
    TranscodeSection,
};
pub use delivery::{Delivery, DeliveryDispatcher};
pub use error::{ConfigError, Result};
pub use output::{generate_filename, mime_for, resolve, FileDefaults, OutputDescriptor, UploadTarget};
pub use source::{is_valid_url, verify_url, VerifyError, MAX_URL_LENGTH};
pub use storage::{ObjectStore, StorageError, StorageResult, StoredObject};
pub use transcode::{
    CommandExecutor, OptimizeOptions, SystemCommandExecutor, TranscodeError, TranscodeInput,
    TranscodeOperation, Transcoder,
};
