//! Headless-browser PDF rendering.
//!
//! One isolated browser process per job: launched, driven through a single
//! page, and torn down again. Page close and browser close each run on every
//! exit path, including when the wall-clock timeout wins the race, so a
//! timed-out render never orphans a Chromium process.
//!
//! Loading waits for network idle (a short quiet window with at most a
//! couple of in-flight requests) before serializing the PDF, so images and
//! fonts referenced by the document are painted rather than still in flight.
//! Failed sub-requests and HTTP-error responses are logged with the caller's
//! context label for debugging broken asset references; they never fail the
//! render by themselves.

use std::collections::HashMap;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent,
    EventResponseReceived,
};
use chromiumoxide::cdp::browser_protocol::page::PrintToPdfParams;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::time::Instant;

/// Fixed viewport for deterministic layout (A4 at 150 dpi).
const VIEWPORT_WIDTH: u32 = 1240;
const VIEWPORT_HEIGHT: u32 = 1754;

/// A4 paper, inches.
const PAPER_WIDTH_IN: f64 = 8.27;
const PAPER_HEIGHT_IN: f64 = 11.69;

/// 10 mm margins, matching the offer document design grid.
const PAGE_MARGIN_IN: f64 = 0.39;

/// Network idle: at most this many in-flight requests...
const NETWORK_IDLE_MAX_INFLIGHT: usize = 2;
/// ...sustained for this long.
const NETWORK_IDLE_QUIET_WINDOW: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to configure render browser: {0}")]
    Launch(String),

    #[error("render engine error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),

    #[error("PDF render timed out after {0} ms")]
    Timeout(u64),
}

/// Drives a headless Chromium instance to turn offer HTML into PDF bytes.
pub struct PdfRenderer {
    chrome_executable: Option<String>,
    timeout: Duration,
}

impl PdfRenderer {
    pub fn new(chrome_executable: Option<String>, timeout: Duration) -> Self {
        Self {
            chrome_executable,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Render `html` to PDF bytes under the configured wall-clock budget.
    ///
    /// The timeout race happens inside this call: browser teardown below the
    /// race runs whether the page work finished, failed, or was cut off.
    pub async fn render(&self, html: &str, context: &str) -> Result<Vec<u8>, RenderError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .viewport(Viewport {
                width: VIEWPORT_WIDTH,
                height: VIEWPORT_HEIGHT,
                ..Default::default()
            })
            .request_timeout(self.timeout);
        if let Some(path) = &self.chrome_executable {
            builder = builder.chrome_executable(std::path::PathBuf::from(path));
        }
        let config = builder.build().map_err(RenderError::Launch)?;

        let (mut browser, mut handler) = Browser::launch(config).await?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let outcome = match tokio::time::timeout(
            self.timeout,
            Self::render_page(&browser, html, context),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(context, timeout_ms = self.timeout.as_millis() as u64, "Render timed out");
                Err(RenderError::Timeout(self.timeout.as_millis() as u64))
            }
        };

        if let Err(e) = browser.close().await {
            tracing::warn!(context, error = %e, "Failed to close render browser");
        }
        let _ = browser.wait().await;
        handler_task.abort();

        outcome
    }

    async fn render_page(
        browser: &Browser,
        html: &str,
        context: &str,
    ) -> Result<Vec<u8>, RenderError> {
        let page = browser.new_page("about:blank").await?;

        let result = Self::drive_page(&page, html, context).await;

        // Closed on success and failure alike; the browser-level close in
        // render() still reaps the process if this fails.
        if let Err(e) = page.close().await {
            tracing::warn!(context, error = %e, "Failed to close render page");
        }

        result
    }

    async fn drive_page(page: &Page, html: &str, context: &str) -> Result<Vec<u8>, RenderError> {
        page.execute(EnableParams::default()).await?;

        let mut requests = page.event_listener::<EventRequestWillBeSent>().await?;
        let mut finished = page.event_listener::<EventLoadingFinished>().await?;
        let mut failed = page.event_listener::<EventLoadingFailed>().await?;
        let mut responses = page.event_listener::<EventResponseReceived>().await?;

        page.set_content(html).await?;

        // Quiet-window network-idle wait. Tracks in-flight sub-requests from
        // CDP events; resets the window on new activity. Bounded by the
        // caller's overall timeout.
        let mut inflight: HashMap<_, String> = HashMap::new();
        let quiet = tokio::time::sleep(NETWORK_IDLE_QUIET_WINDOW);
        tokio::pin!(quiet);

        loop {
            tokio::select! {
                Some(event) = requests.next() => {
                    inflight.insert(event.request_id.clone(), event.request.url.clone());
                    quiet.as_mut().reset(Instant::now() + NETWORK_IDLE_QUIET_WINDOW);
                }
                Some(event) = finished.next() => {
                    inflight.remove(&event.request_id);
                }
                Some(event) = failed.next() => {
                    let url = inflight.remove(&event.request_id).unwrap_or_default();
                    tracing::warn!(
                        context,
                        url = %url,
                        error = %event.error_text,
                        "Sub-request failed while loading render content"
                    );
                }
                Some(event) = responses.next() => {
                    if event.response.status >= 400 {
                        tracing::warn!(
                            context,
                            url = %event.response.url,
                            status = event.response.status,
                            "Sub-request returned HTTP error while loading render content"
                        );
                    }
                }
                _ = &mut quiet => {
                    if inflight.len() <= NETWORK_IDLE_MAX_INFLIGHT {
                        break;
                    }
                    quiet.as_mut().reset(Instant::now() + NETWORK_IDLE_QUIET_WINDOW);
                }
            }
        }

        let pdf = page.pdf(pdf_params()).await?;

        tracing::debug!(context, bytes = pdf.len(), "PDF serialized");
        Ok(pdf)
    }
}

/// A4, design-grid margins, backgrounds on, CSS page sizing honored.
fn pdf_params() -> PrintToPdfParams {
    PrintToPdfParams {
        print_background: Some(true),
        prefer_css_page_size: Some(true),
        paper_width: Some(PAPER_WIDTH_IN),
        paper_height: Some(PAPER_HEIGHT_IN),
        margin_top: Some(PAGE_MARGIN_IN),
        margin_bottom: Some(PAGE_MARGIN_IN),
        margin_left: Some(PAGE_MARGIN_IN),
        margin_right: Some(PAGE_MARGIN_IN),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdf_params_match_document_design() {
        let params = pdf_params();
        assert_eq!(params.print_background, Some(true));
        assert_eq!(params.prefer_css_page_size, Some(true));
        assert_eq!(params.paper_width, Some(PAPER_WIDTH_IN));
        assert_eq!(params.paper_height, Some(PAPER_HEIGHT_IN));
        assert_eq!(params.margin_top, Some(PAGE_MARGIN_IN));
        assert_eq!(params.margin_bottom, Some(PAGE_MARGIN_IN));
        assert_eq!(params.margin_left, Some(PAGE_MARGIN_IN));
        assert_eq!(params.margin_right, Some(PAGE_MARGIN_IN));
        // Header/footer chrome stays off; the document carries its own.
        assert!(params.display_header_footer.is_none());
    }

    #[test]
    fn timeout_error_names_the_budget() {
        let e = RenderError::Timeout(45_000);
        assert!(e.to_string().contains("45000 ms"));
    }
}
