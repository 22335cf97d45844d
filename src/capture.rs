//! The page-to-bitmap capture boundary.
//!
//! The core treats capture as one awaited call with a hard timeout; the
//! production implementation shells out to a headless Chromium that writes a
//! PNG screenshot into a temporary file. The file is deleted when the
//! [`CapturedPage`] is dropped at the end of the refresh cycle.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// A captured screenshot, alive exactly as long as the cycle that owns it.
#[derive(Debug)]
pub struct CapturedPage {
    file: tempfile::NamedTempFile,
}

impl CapturedPage {
    pub(crate) fn new(file: tempfile::NamedTempFile) -> Self {
        Self { file }
    }

    pub fn path(&self) -> &std::path::Path {
        self.file.path()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Capture did not produce a screenshot within {timeout:?}")]
    Timeout { timeout: std::time::Duration },

    #[error("Failed to create a temporary file for the screenshot")]
    TempFile(#[source] std::io::Error),

    #[error("Failed to spawn the capture process '{browser}'")]
    Spawn {
        browser: camino::Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Capture process exited with {status}")]
    Renderer { status: std::process::ExitStatus },
}

pub trait CaptureSource {
    fn capture(
        &self,
        viewport: Viewport,
    ) -> impl std::future::Future<Output = Result<CapturedPage, CaptureError>>;
}

// Headroom on top of load + settle for browser startup and PNG encoding.
const CAPTURE_SLACK: std::time::Duration = std::time::Duration::from_secs(10);

/// Captures via a headless Chromium invocation.
///
/// The page-load timeout maps to `--timeout` and the settle delay (time for
/// lazy client-side content to finish rendering) to `--virtual-time-budget`.
pub struct ChromiumCapture {
    config: crate::config::CaptureConfig,
}

impl ChromiumCapture {
    pub fn new(config: crate::config::CaptureConfig) -> Self {
        Self { config }
    }
}

impl CaptureSource for ChromiumCapture {
    fn capture(
        &self,
        viewport: Viewport,
    ) -> impl std::future::Future<Output = Result<CapturedPage, CaptureError>> {
        async move {
            let file = tempfile::Builder::new()
                .prefix("page-capture-")
                .suffix(".png")
                .tempfile()
                .map_err(CaptureError::TempFile)?;

            let deadline = self.config.load_timeout + self.config.settle_delay + CAPTURE_SLACK;

            let mut command = tokio::process::Command::new(self.config.browser.as_std_path());
            command
                .arg("--headless")
                .arg("--no-sandbox")
                .arg("--disable-gpu")
                .arg("--disable-dev-shm-usage")
                .arg("--hide-scrollbars")
                .arg(format!("--window-size={},{}", viewport.width, viewport.height))
                .arg(format!("--timeout={}", self.config.load_timeout.as_millis()))
                .arg(format!(
                    "--virtual-time-budget={}",
                    self.config.settle_delay.as_millis()
                ))
                .arg(format!("--screenshot={}", file.path().display()))
                .arg(&self.config.url)
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .kill_on_drop(true);

            tracing::debug!(
                url = %self.config.url,
                width = viewport.width,
                height = viewport.height,
                "Capturing page"
            );

            let status = tokio::time::timeout(deadline, command.status())
                .await
                .map_err(|_elapsed| CaptureError::Timeout { timeout: deadline })?
                .map_err(|source| CaptureError::Spawn {
                    browser: self.config.browser.clone(),
                    source,
                })?;

            if !status.success() {
                return Err(CaptureError::Renderer { status });
            }

            tracing::debug!(path = %file.path().display(), "Capture finished");
            Ok(CapturedPage::new(file))
        }
    }
}
