use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("missing input: {0}")]
    MissingInput(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("interaction failed: {0}")]
    Interaction(String),
    #[error("timeout: transcript data not received within {} seconds", .0.as_secs())]
    CaptureTimeout(Duration),
    #[error("transcript payload unreadable: {0}")]
    Payload(String),
    #[error("browser error: {0}")]
    Browser(String),
}

impl Error {
    /// True for errors caused by the caller's input rather than the page or engine.
    pub fn is_input(&self) -> bool {
        matches!(self, Error::MissingInput(_) | Error::InvalidUrl(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Validate a caller-supplied page URL before any browser work happens.
pub fn parse_target_url(raw: &str) -> Result<url::Url> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(Error::MissingInput(
            "URL is required in request body".to_string(),
        ));
    }
    let u = url::Url::parse(s).map_err(|e| Error::InvalidUrl(format!("{s}: {e}")))?;
    match u.scheme() {
        "http" | "https" => Ok(u),
        other => Err(Error::InvalidUrl(format!(
            "{s}: unsupported scheme {other:?} (expected http or https)"
        ))),
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScrapeRequest {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoMetadata {
    pub video_title: String,
    pub channel_name: String,
    pub channel_subscribers: String,
    pub views: String,
    pub post_date: String,
}

impl VideoMetadata {
    pub fn is_empty(&self) -> bool {
        self.video_title.is_empty()
            && self.channel_name.is_empty()
            && self.channel_subscribers.is_empty()
            && self.views.is_empty()
            && self.post_date.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionResult {
    #[serde(flatten)]
    pub metadata: VideoMetadata,
    pub transcript_text: String,
    /// Final page URL (after redirects), not necessarily the requested one.
    pub url: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Document,
    Xhr,
    Fetch,
    Script,
    Stylesheet,
    Image,
    Media,
    Font,
    Other(String),
}

impl ResourceType {
    /// Map a DevTools protocol resource type name (`"XHR"`, `"Document"`, ...).
    pub fn from_cdp(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "document" => Self::Document,
            "xhr" => Self::Xhr,
            "fetch" => Self::Fetch,
            "script" => Self::Script,
            "stylesheet" => Self::Stylesheet,
            "image" => Self::Image,
            "media" => Self::Media,
            "font" => Self::Font,
            other => Self::Other(other.to_string()),
        }
    }

    /// Primary document and XHR/API traffic.
    pub fn is_essential(&self) -> bool {
        matches!(self, Self::Document | Self::Xhr)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    pub url: String,
    pub resource_type: ResourceType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestDecision {
    Allow,
    Abort,
}

/// Per-request allow/abort decision, consulted before a sub-resource is sent.
pub trait RequestGate: Send + Sync {
    fn decide(&self, req: &RequestDescriptor) -> RequestDecision;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedResponse {
    /// Engine-specific id; pass back to [`PageSession::response_body`].
    pub id: String,
    pub url: String,
    pub method: String,
    pub status: u16,
}

pub type ResponseStream = futures_util::stream::BoxStream<'static, ObservedResponse>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitUntil {
    /// DOM content loaded.
    DomContentLoaded,
    /// DOM content loaded and no network activity for a short window.
    NetworkIdle,
}

/// One isolated browser tab. Owned by exactly one acquisition.
#[async_trait::async_trait]
pub trait PageSession: Send + Sync {
    async fn intercept_requests(&self, gate: Arc<dyn RequestGate>) -> Result<()>;
    /// Subscribe to completed responses. Dropping the stream unsubscribes.
    async fn observe_responses(&self) -> Result<ResponseStream>;
    async fn response_body(&self, id: &str) -> Result<Vec<u8>>;
    async fn goto(&self, url: &str, wait: WaitUntil, timeout: Duration) -> Result<()>;
    async fn wait_for_selector(&self, selector: &str, visible: bool, timeout: Duration)
        -> Result<()>;
    async fn count(&self, selector: &str) -> Result<usize>;
    async fn click(&self, selector: &str) -> Result<()>;
    /// Click via `element.click()` in page script, bypassing input emulation.
    async fn script_click(&self, selector: &str) -> Result<()>;
    async fn scroll_into_view(&self, selector: &str) -> Result<()>;
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;
    async fn title(&self) -> Result<String>;
    async fn current_url(&self) -> Result<String>;
    /// Close the tab. The pipeline calls this once, also when an acquisition is abandoned.
    async fn close(&self) -> Result<()>;
}

/// Process-wide browser engine. Only hands out new sessions.
#[async_trait::async_trait]
pub trait BrowserEngine: Send + Sync {
    async fn new_session(&self) -> Result<Box<dyn PageSession>>;
    async fn shutdown(&self) -> Result<()>;
}

/// Tagged result of one interaction step; the caller decides whether `Failed` is fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Succeeded,
    SucceededDegraded(String),
    Failed(String),
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, StepOutcome::Failed(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    Navigating,
    AwaitingPlayer,
    Interacting,
    Capturing,
    Assembling,
    Done,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::Navigating => "navigating",
            Stage::AwaitingPlayer => "awaiting_player",
            Stage::Interacting => "interacting",
            Stage::Capturing => "capturing",
            Stage::Assembling => "assembling",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Selectors {
    pub more_actions: String,
    pub more_actions_alt: String,
    pub transcript_button: String,
    pub any_button: String,
    pub video_player: String,
    pub title_region: String,
    pub video_title: String,
    pub channel_name: String,
    pub channel_subscribers: String,
    pub views: String,
    pub post_date: String,
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            more_actions: "#description-inline-expander > #expand".to_string(),
            more_actions_alt: "#description-inline-expander".to_string(),
            transcript_button: r#"button[aria-label="Show transcript"]"#.to_string(),
            any_button: "button".to_string(),
            video_player: "#movie_player".to_string(),
            title_region: "#title".to_string(),
            video_title: "h1.ytd-video-primary-info-renderer, #title h1".to_string(),
            channel_name: "#owner-name a, #channel-name a".to_string(),
            channel_subscribers: "#owner-sub-count".to_string(),
            views: "#count .view-count, #count span".to_string(),
            post_date: "#info-strings yt-formatted-string, #date yt-formatted-string".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    pub navigation_timeout: Duration,
    pub element_wait_timeout: Duration,
    pub metadata_timeout: Duration,
    /// Hard bound on waiting for the transcript response, counted from listener install.
    pub capture_timeout: Duration,
    pub after_navigation_delay: Duration,
    pub after_click_delay: Duration,
    pub after_scroll_delay: Duration,
    pub transcript_click_attempts: usize,
    pub transcript_endpoint: String,
    /// Site-name decoration stripped from the document title in the metadata fallback.
    pub title_suffix: String,
    pub selectors: Selectors,
    /// Appended to the built-in blockable URL patterns.
    pub extra_block_patterns: Vec<String>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            navigation_timeout: Duration::from_secs(30),
            element_wait_timeout: Duration::from_secs(15),
            metadata_timeout: Duration::from_secs(10),
            capture_timeout: Duration::from_secs(60),
            after_navigation_delay: Duration::from_secs(2),
            after_click_delay: Duration::from_secs(1),
            after_scroll_delay: Duration::from_secs(1),
            transcript_click_attempts: 3,
            transcript_endpoint: "https://www.youtube.com/youtubei/v1/get_transcript".to_string(),
            title_suffix: " - YouTube".to_string(),
            selectors: Selectors::default(),
            extra_block_patterns: Vec::new(),
        }
    }
}
