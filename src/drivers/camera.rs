//! Photo capture via `rpicam-still`
//!
//! Each capture writes into a private temporary directory which is removed
//! before the call returns, on success and failure alike.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use serde_json::{Map, Value};

use super::{CapabilityDriver, DriverError, DriverOutput, ProcessRunner};
use crate::identity::CAMERA;

/// File name of the capture inside its scratch directory
const CAPTURE_FILE: &str = "photo.jpg";

/// Fixed capture parameters
#[derive(Debug, Clone)]
pub struct CameraSettings {
    /// Capture program (`rpicam-still` or `libcamera-still`)
    pub program: String,
    pub width: u32,
    pub height: u32,
    /// JPEG quality (1-100)
    pub quality: u8,
    /// Time the camera runs before capturing (`-t`)
    pub capture_delay: Duration,
    /// Hard limit for the whole capture process
    pub timeout: Duration,
    /// Directory for scratch files
    pub work_dir: PathBuf,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            program: "rpicam-still".to_string(),
            width: 1920,
            height: 1080,
            quality: 85,
            capture_delay: Duration::from_millis(1000),
            timeout: Duration::from_secs(10),
            work_dir: std::env::temp_dir(),
        }
    }
}

/// Captures still photos with the Pi camera
pub struct CameraDriver {
    settings: CameraSettings,
    runner: Arc<dyn ProcessRunner>,
}

impl CameraDriver {
    #[must_use]
    pub fn new(settings: CameraSettings, runner: Arc<dyn ProcessRunner>) -> Self {
        Self { settings, runner }
    }

    fn capture_args(&self, output: &Path) -> Vec<String> {
        let s = &self.settings;
        vec![
            "-o".to_string(),
            output.display().to_string(),
            "-t".to_string(),
            s.capture_delay.as_millis().to_string(),
            "--width".to_string(),
            s.width.to_string(),
            "--height".to_string(),
            s.height.to_string(),
            "-q".to_string(),
            s.quality.to_string(),
            "--nopreview".to_string(),
        ]
    }

    fn take_photo(&self) -> Result<String, DriverError> {
        let scratch = tempfile::Builder::new()
            .prefix("capture-")
            .tempdir_in(&self.settings.work_dir)
            .map_err(|e| DriverError::CaptureFailed(format!("failed to create scratch dir: {e}")))?;
        let output_path = scratch.path().join(CAPTURE_FILE);

        let result = self.capture_into(&output_path);

        // Dropping the guard would also clean up; closing surfaces errors
        if let Err(e) = scratch.close() {
            tracing::warn!(error = %e, "failed to remove capture scratch dir");
        }

        result
    }

    fn capture_into(&self, output_path: &Path) -> Result<String, DriverError> {
        let args = self.capture_args(output_path);
        let output = self
            .runner
            .run(&self.settings.program, &args, self.settings.timeout)
            .map_err(|e| DriverError::CaptureFailed(format!("{}: {e}", self.settings.program)))?;

        if !output.success() {
            return Err(DriverError::CaptureFailed(format!(
                "{} {}",
                self.settings.program,
                output.failure_detail()
            )));
        }

        let bytes = std::fs::read(output_path)
            .map_err(|e| DriverError::CaptureFailed(format!("no photo produced: {e}")))?;
        if bytes.is_empty() {
            return Err(DriverError::CaptureFailed("photo file is empty".to_string()));
        }

        tracing::info!(size = bytes.len(), "photo captured");
        Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
    }
}

impl CapabilityDriver for CameraDriver {
    fn capability(&self) -> &str {
        CAMERA
    }

    fn execute(
        &self,
        command: &str,
        _payload: &Map<String, Value>,
    ) -> Result<DriverOutput, DriverError> {
        if command != "take_photo" {
            return Err(DriverError::InvalidCommand(format!(
                "unknown camera command '{command}'"
            )));
        }

        self.take_photo().map(DriverOutput::Artifact)
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;
    use crate::drivers::ProcessOutput;

    /// Writes `content` to the `-o` path (if any) and exits with `exit`
    struct FakeCamera {
        content: Option<&'static [u8]>,
        exit: Option<i32>,
    }

    impl ProcessRunner for FakeCamera {
        fn run(&self, _program: &str, args: &[String], _timeout: Duration) -> io::Result<ProcessOutput> {
            let pos = args.iter().position(|a| a == "-o").expect("missing -o");
            if let Some(content) = self.content {
                std::fs::write(&args[pos + 1], content)?;
            }
            Ok(ProcessOutput {
                status: self.exit,
                ..ProcessOutput::default()
            })
        }
    }

    fn driver(work_dir: &Path, camera: FakeCamera) -> CameraDriver {
        let settings = CameraSettings {
            work_dir: work_dir.to_path_buf(),
            ..CameraSettings::default()
        };
        CameraDriver::new(settings, Arc::new(camera))
    }

    fn is_empty_dir(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[test]
    fn capture_args_are_fixed() {
        let d = driver(Path::new("/tmp"), FakeCamera { content: None, exit: Some(0) });
        let args = d.capture_args(Path::new("/tmp/x/photo.jpg"));
        assert_eq!(
            args,
            [
                "-o", "/tmp/x/photo.jpg", "-t", "1000", "--width", "1920", "--height", "1080",
                "-q", "85", "--nopreview"
            ]
        );
    }

    #[test]
    fn success_encodes_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let d = driver(dir.path(), FakeCamera { content: Some(b"\xff\xd8jpeg"), exit: Some(0) });

        let out = d.execute("take_photo", &Map::new()).unwrap();

        let DriverOutput::Artifact(encoded) = out else {
            panic!("expected artifact");
        };
        assert_eq!(encoded, base64::engine::general_purpose::STANDARD.encode(b"\xff\xd8jpeg"));
        assert!(is_empty_dir(dir.path()));
    }

    #[test]
    fn nonzero_exit_fails_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let d = driver(dir.path(), FakeCamera { content: Some(b"partial"), exit: Some(255) });

        let err = d.execute("take_photo", &Map::new()).unwrap_err();

        assert!(matches!(err, DriverError::CaptureFailed(_)));
        assert!(is_empty_dir(dir.path()));
    }

    #[test]
    fn missing_output_fails() {
        let dir = tempfile::tempdir().unwrap();
        let d = driver(dir.path(), FakeCamera { content: None, exit: Some(0) });

        let err = d.execute("take_photo", &Map::new()).unwrap_err();

        assert!(matches!(err, DriverError::CaptureFailed(msg) if msg.starts_with("no photo")));
        assert!(is_empty_dir(dir.path()));
    }

    #[test]
    fn unknown_command_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let d = driver(dir.path(), FakeCamera { content: Some(b"x"), exit: Some(0) });

        let err = d.execute("record_video", &Map::new()).unwrap_err();
        assert!(matches!(err, DriverError::InvalidCommand(_)));
    }
}
