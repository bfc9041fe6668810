use tubescribe_core::{AcquisitionConfig, Error, PageSession, Result, Selectors, VideoMetadata};

/// Script reading all metadata fields in one pass. Selectors are embedded as JSON strings.
pub fn metadata_script(sel: &Selectors) -> String {
    let q = |s: &str| serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        r#"(() => {{
  const getText = (s) => {{
    const el = document.querySelector(s);
    return (el && el.textContent ? el.textContent.trim() : '') || '';
  }};
  return {{
    video_title: getText({}),
    channel_name: getText({}),
    channel_subscribers: getText({}),
    views: getText({}),
    post_date: getText({})
  }};
}})()"#,
        q(&sel.video_title),
        q(&sel.channel_name),
        q(&sel.channel_subscribers),
        q(&sel.views),
        q(&sel.post_date),
    )
}

pub fn strip_title_suffix(title: &str, suffix: &str) -> String {
    if suffix.is_empty() {
        return title.trim().to_string();
    }
    title.replacen(suffix, "", 1).trim().to_string()
}

async fn extract_from_dom(session: &dyn PageSession, cfg: &AcquisitionConfig) -> Result<VideoMetadata> {
    session
        .wait_for_selector(&cfg.selectors.title_region, false, cfg.metadata_timeout)
        .await?;
    tokio::time::sleep(cfg.after_navigation_delay).await;
    let v = session.evaluate(&metadata_script(&cfg.selectors)).await?;
    serde_json::from_value(v).map_err(|e| Error::Browser(format!("metadata result: {e}")))
}

/// Title, channel and view metadata from the current DOM.
///
/// Never fails: falls back to the document title (minus the site suffix), then to an
/// all-empty record.
pub async fn extract_metadata(session: &dyn PageSession, cfg: &AcquisitionConfig) -> VideoMetadata {
    match extract_from_dom(session, cfg).await {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(error = %e, "metadata extraction failed; falling back to page title");
            match session.title().await {
                Ok(t) => VideoMetadata {
                    video_title: strip_title_suffix(&t, &cfg.title_suffix),
                    ..Default::default()
                },
                Err(e) => {
                    tracing::warn!(error = %e, "page title unavailable; returning empty metadata");
                    VideoMetadata::default()
                }
            }
        }
    }
}
