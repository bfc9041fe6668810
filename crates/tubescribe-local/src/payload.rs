//! `get_transcript` response body -> plain transcript text.
//!
//! The response shape is undocumented; every level is optional so that a missing or
//! renamed field degrades to an empty transcript instead of a parse failure.

use serde::Deserialize;
use serde_json::Value;

/// Location of the action that carries the transcript panel.
const FIRST_ACTION: &str = "/actions/0";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub update_engagement_panel_action: Option<UpdateEngagementPanelAction>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateEngagementPanelAction {
    pub content: Option<PanelContent>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelContent {
    pub transcript_renderer: Option<TranscriptRenderer>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TranscriptRenderer {
    pub content: Option<TranscriptRendererContent>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptRendererContent {
    pub transcript_search_panel_renderer: Option<SearchPanelRenderer>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchPanelRenderer {
    pub body: Option<SearchPanelBody>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPanelBody {
    pub transcript_segment_list_renderer: Option<SegmentListRenderer>,
}

/// Segments stay raw here so each one is decoded on its own.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentListRenderer {
    pub initial_segments: Option<Vec<Value>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub transcript_segment_renderer: Option<SegmentRenderer>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SegmentRenderer {
    pub snippet: Option<Snippet>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Snippet {
    #[serde(default)]
    pub runs: Vec<Run>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Run {
    pub text: Option<String>,
}

impl Action {
    /// Raw `initialSegments`, or `None` when any link of the chain is missing.
    pub fn initial_segments(&self) -> Option<&[Value]> {
        self.update_engagement_panel_action
            .as_ref()?
            .content
            .as_ref()?
            .transcript_renderer
            .as_ref()?
            .content
            .as_ref()?
            .transcript_search_panel_renderer
            .as_ref()?
            .body
            .as_ref()?
            .transcript_segment_list_renderer
            .as_ref()?
            .initial_segments
            .as_deref()
    }
}

impl Segment {
    /// Text of the first run in the snippet, or `""`.
    pub fn first_run_text(&self) -> &str {
        self.transcript_segment_renderer
            .as_ref()
            .and_then(|r| r.snippet.as_ref())
            .and_then(|s| s.runs.first())
            .and_then(|r| r.text.as_deref())
            .unwrap_or("")
    }
}

/// Text of one raw segment. A segment of unexpected shape contributes `""`.
pub fn segment_text(raw: &Value) -> String {
    match Segment::deserialize(raw) {
        Ok(seg) => seg.first_run_text().to_string(),
        Err(e) => {
            tracing::debug!(error = %e, "skipping malformed transcript segment");
            String::new()
        }
    }
}

/// Segments joined by single spaces, newlines flattened, ends trimmed.
pub fn segments_to_text(segments: &[Value]) -> String {
    segments
        .iter()
        .map(segment_text)
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\n', " ")
        .trim()
        .to_string()
}

/// Transcript text for a parsed response body. Never fails; a shape mismatch yields `""`.
///
/// Only `actions[0]` is decoded, so unrelated actions cannot spoil the result.
pub fn transcript_text(body: &Value) -> String {
    let action = match body.pointer(FIRST_ACTION).map(Action::deserialize) {
        Some(Ok(a)) => a,
        Some(Err(e)) => {
            tracing::debug!(error = %e, "first action does not match expected shape");
            Action::default()
        }
        None => Action::default(),
    };
    match action.initial_segments() {
        Some(segs) => segments_to_text(segs),
        None => {
            tracing::warn!("could not find transcript segments in the expected JSON structure");
            String::new()
        }
    }
}
