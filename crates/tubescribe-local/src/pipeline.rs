//! Transcript acquisition for one page: navigate, interact, capture, assemble.
//!
//! Ordering matters: the request filter and the transcript capture are installed before
//! the first navigation, so an early transcript response is buffered rather than missed.

use std::sync::Arc;
use tubescribe_core::{
    parse_target_url, AcquisitionConfig, AcquisitionResult, BrowserEngine, Error, PageSession,
    Result, Stage, StepOutcome, WaitUntil,
};

use crate::capture::{self, TranscriptCapture};
use crate::interact;
use crate::traffic::TrafficPolicy;

#[derive(Clone)]
pub struct Acquirer {
    engine: Arc<dyn BrowserEngine>,
    config: AcquisitionConfig,
    policy: Arc<TrafficPolicy>,
}

/// Closes the session if the acquisition future is dropped before it finishes.
struct CloseOnDrop {
    session: Arc<dyn PageSession>,
    armed: bool,
}

impl CloseOnDrop {
    fn new(session: Arc<dyn PageSession>) -> Self {
        Self {
            session,
            armed: true,
        }
    }

    async fn close(mut self) {
        self.armed = false;
        if let Err(e) = self.session.close().await {
            tracing::warn!(error = %e, "closing page session failed");
        }
    }
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                tracing::warn!("acquisition abandoned, closing page session");
                let session = self.session.clone();
                rt.spawn(async move {
                    if let Err(e) = session.close().await {
                        tracing::debug!(error = %e, "closing abandoned session failed");
                    }
                });
            }
            Err(_) => tracing::warn!("acquisition abandoned outside a runtime, session left open"),
        }
    }
}

fn enter(stage: &mut Stage, next: Stage) {
    tracing::debug!(from = stage.as_str(), to = next.as_str(), "acquisition stage");
    *stage = next;
}

impl Acquirer {
    pub fn new(engine: Arc<dyn BrowserEngine>, config: AcquisitionConfig) -> Self {
        let policy = Arc::new(TrafficPolicy::with_extra(&config.extra_block_patterns));
        Self {
            engine,
            config,
            policy,
        }
    }

    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    /// Acquire metadata and transcript for `url`.
    ///
    /// Input errors are returned before any session exists. Once a session is open it is
    /// closed on every path; a close failure is logged and never replaces the result.
    pub async fn acquire(&self, url: &str) -> Result<AcquisitionResult> {
        let target = parse_target_url(url)?;
        let session: Arc<dyn PageSession> = Arc::from(self.engine.new_session().await?);
        let guard = CloseOnDrop::new(session.clone());

        let mut stage = Stage::Init;
        let out = self.drive(session.as_ref(), target.as_str(), &mut stage).await;
        match &out {
            Ok(r) => {
                enter(&mut stage, Stage::Done);
                tracing::info!(
                    url = %r.url,
                    transcript_chars = r.transcript_text.len(),
                    degraded_metadata = r.metadata.is_empty(),
                    "acquisition finished"
                );
            }
            Err(e) => {
                tracing::error!(stage = stage.as_str(), error = %e, "acquisition failed");
                enter(&mut stage, Stage::Failed);
            }
        }

        guard.close().await;
        out
    }

    async fn drive(
        &self,
        session: &dyn PageSession,
        url: &str,
        stage: &mut Stage,
    ) -> Result<AcquisitionResult> {
        let cfg = &self.config;

        enter(stage, Stage::Navigating);
        session.intercept_requests(self.policy.clone()).await?;
        let capture =
            TranscriptCapture::install(session, &cfg.transcript_endpoint, cfg.capture_timeout)
                .await?;
        self.navigate(session, url).await?;

        enter(stage, Stage::AwaitingPlayer);
        tokio::time::sleep(cfg.after_navigation_delay).await;
        if let Err(e) = session
            .wait_for_selector(&cfg.selectors.video_player, false, cfg.element_wait_timeout)
            .await
        {
            tracing::warn!(error = %e, "video player not found, continuing");
        }

        enter(stage, Stage::Interacting);
        // Assumed optional: the transcript button has been seen without the expanded panel.
        match interact::expand_description(session, cfg).await {
            StepOutcome::Succeeded => {}
            StepOutcome::SucceededDegraded(why) => {
                tracing::info!(reason = %why, "description expanded via fallback")
            }
            StepOutcome::Failed(why) => {
                tracing::warn!(reason = %why, "description panel not expanded, continuing")
            }
        }
        match interact::open_transcript_panel(session, cfg).await {
            StepOutcome::Succeeded => {}
            StepOutcome::SucceededDegraded(why) => {
                tracing::info!(reason = %why, "transcript panel opened via fallback")
            }
            StepOutcome::Failed(why) => return Err(Error::Interaction(why)),
        }

        enter(stage, Stage::Capturing);
        let resp = capture.await_match().await?;
        let captured = capture::read_captured(session, &resp, cfg).await?;

        enter(stage, Stage::Assembling);
        let final_url = match session.current_url().await {
            Ok(u) if !u.trim().is_empty() => u,
            Ok(_) => url.to_string(),
            Err(e) => {
                tracing::debug!(error = %e, "current url unavailable; using requested url");
                url.to_string()
            }
        };
        Ok(AcquisitionResult {
            metadata: captured.metadata,
            transcript_text: captured.transcript_text,
            url: final_url,
            timestamp: chrono::Utc::now(),
        })
    }

    /// Strict wait first; one retry with the looser DOM-content-loaded condition.
    async fn navigate(&self, session: &dyn PageSession, url: &str) -> Result<()> {
        let timeout = self.config.navigation_timeout;
        let first = match session.goto(url, WaitUntil::NetworkIdle, timeout).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        tracing::warn!(error = %first, "navigation error; retrying with domcontentloaded");
        session
            .goto(url, WaitUntil::DomContentLoaded, timeout)
            .await
            .map_err(|e| Error::Navigation(format!("{url}: {e} (first attempt: {first})")))
    }
}
