//! Render-pipeline HTML signature check.
//!
//! The upstream template pipeline stamps every document it emits with a
//! marker comment. Payloads without the marker were not produced by the
//! trusted pipeline (or were truncated in transit) and are rejected before
//! any rendering work happens.

use crate::error::WorkerError;

/// Marker emitted by the trusted template pipeline into every document.
pub const PIPELINE_MARKER: &str = "<!-- offerforge:render-root -->";

/// Reject HTML that does not carry the pipeline marker.
///
/// The error message names `context` and is persisted verbatim as the job's
/// terminal error message.
pub fn assert_signed(html: &str, context: &str) -> Result<(), WorkerError> {
    if html.contains(PIPELINE_MARKER) {
        Ok(())
    } else {
        Err(WorkerError::Validation(format!(
            "{context}: HTML is missing the render pipeline marker and was rejected"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_html_passes() {
        let html = format!("<html><body>{PIPELINE_MARKER}<p>offer</p></body></html>");
        assert!(assert_signed(&html, "job test").is_ok());
    }

    #[test]
    fn unsigned_html_is_rejected_with_context() {
        let err = assert_signed("<html><body>foreign</body></html>", "job 42").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("job 42"));
        assert!(message.contains("render pipeline marker"));
    }

    #[test]
    fn empty_html_is_rejected() {
        assert!(assert_signed("", "ctx").is_err());
    }
}
