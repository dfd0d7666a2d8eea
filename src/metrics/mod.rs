//! Metrics exposition.
//!
//! Collectors register themselves on the default registry next to the
//! code they instrument; this module only renders the registry. The
//! coordinator exposes it on `GET /metrics`; agents keep their counters
//! in-process (hosts are firewalled, nothing listens).

use anyhow::Result;
use prometheus::Encoder;

/// Gather metrics from the default registry in textual format.
pub(crate) fn render() -> Result<String> {
    let metric_families = prometheus::gather();
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_is_utf8_text() {
        let text = render().unwrap();
        // The default registry may be empty in isolated test runs; the
        // exposition format is line-oriented either way.
        assert!(text.is_empty() || text.ends_with('\n'));
    }
}
