//! ffmpeg-backed audio concatenation.

use log::debug;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;

use codex_core::{AudioConcatenator, AudioToolError};

const MAX_STDERR_CHARS: usize = 400;

/// Runs `ffmpeg` with a two-input concat filter.
///
/// Attachment urls are resolved against `project_root`.
#[derive(Debug, Clone)]
pub struct FfmpegConcatenator {
    program: PathBuf,
    project_root: PathBuf,
}

impl FfmpegConcatenator {
    pub fn new(program: impl Into<PathBuf>, project_root: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            project_root: project_root.into(),
        }
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root.join(path)
        }
    }
}

impl AudioConcatenator for FfmpegConcatenator {
    fn concat(&self, first: &Path, second: &Path, destination: &Path) -> Result<(), AudioToolError> {
        let first = self.absolute(first);
        let second = self.absolute(second);
        let destination = self.absolute(destination);
        for input in [&first, &second] {
            if !input.is_file() {
                return Err(AudioToolError::Failed(format!(
                    "input file missing: {}",
                    input.display()
                )));
            }
        }

        debug!(
            "event=ffmpeg_concat module=cli status=start destination={}",
            destination.display()
        );
        let output = Command::new(&self.program)
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(&first)
            .arg("-i")
            .arg(&second)
            .arg("-filter_complex")
            .arg("[0:a][1:a]concat=n=2:v=0:a=1[out]")
            .arg("-map")
            .arg("[out]")
            .arg("-y")
            .arg(&destination)
            .output()
            .map_err(|err| match err.kind() {
                ErrorKind::NotFound => AudioToolError::Unavailable(format!(
                    "`{}` not found",
                    self.program.display()
                )),
                _ => AudioToolError::Failed(err.to_string()),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AudioToolError::Failed(
                stderr.trim().chars().take(MAX_STDERR_CHARS).collect(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::FfmpegConcatenator;
    use codex_core::{AudioConcatenator, AudioToolError};
    use std::path::Path;

    #[test]
    fn missing_inputs_fail_before_running_the_tool() {
        let dir = tempfile::tempdir().expect("temp dir");
        let tool = FfmpegConcatenator::new("ffmpeg", dir.path());
        let result = tool.concat(Path::new("a.webm"), Path::new("b.webm"), Path::new("c.webm"));
        assert!(matches!(result, Err(AudioToolError::Failed(_))));
    }

    #[test]
    fn missing_program_is_unavailable() {
        let dir = tempfile::tempdir().expect("temp dir");
        std::fs::write(dir.path().join("a.webm"), b"a").expect("write a");
        std::fs::write(dir.path().join("b.webm"), b"b").expect("write b");
        let tool = FfmpegConcatenator::new("codex-no-such-ffmpeg-binary", dir.path());
        let result = tool.concat(Path::new("a.webm"), Path::new("b.webm"), Path::new("c.webm"));
        assert!(matches!(result, Err(AudioToolError::Unavailable(_))));
    }
}
