//! First-match capture of the transcript API response, raced against a fixed deadline.

use futures_util::StreamExt;
use std::time::Duration;
use tokio::time::Instant;
use tubescribe_core::{
    AcquisitionConfig, Error, ObservedResponse, PageSession, ResponseStream, Result,
    VideoMetadata,
};

use crate::{metadata, payload};

pub fn is_transcript_response(endpoint: &str, resp: &ObservedResponse) -> bool {
    resp.method.eq_ignore_ascii_case("POST") && resp.url.contains(endpoint)
}

enum Race {
    Matched(ObservedResponse),
    Closed,
    Expired,
}

/// A response subscription installed before navigation.
///
/// The deadline is fixed at install time, so time spent navigating and clicking counts
/// against the capture budget.
pub struct TranscriptCapture {
    responses: ResponseStream,
    endpoint: String,
    timeout: Duration,
    deadline: Instant,
}

impl TranscriptCapture {
    pub async fn install(
        session: &dyn PageSession,
        endpoint: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let responses = session.observe_responses().await?;
        Ok(Self {
            responses,
            endpoint: endpoint.to_string(),
            timeout,
            deadline: Instant::now() + timeout,
        })
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Wait for the first matching response. The subscription is dropped on every outcome.
    ///
    /// The deadline is checked before the buffer, so a response that is only read after
    /// the deadline has passed does not count.
    pub async fn await_match(self) -> Result<ObservedResponse> {
        let Self {
            mut responses,
            endpoint,
            timeout,
            deadline,
        } = self;

        let expired = tokio::time::sleep_until(deadline);
        tokio::pin!(expired);
        let raced = loop {
            tokio::select! {
                biased;
                _ = &mut expired => break Race::Expired,
                next = responses.next() => match next {
                    Some(resp) if is_transcript_response(&endpoint, &resp) => break Race::Matched(resp),
                    Some(_) => continue,
                    None => break Race::Closed,
                },
            }
        };
        drop(responses);

        match raced {
            Race::Matched(resp) => {
                tracing::info!(url = %resp.url, status = resp.status, "transcript request intercepted");
                Ok(resp)
            }
            Race::Closed => Err(Error::Browser(
                "response stream closed before the transcript request was seen".to_string(),
            )),
            Race::Expired => Err(Error::CaptureTimeout(timeout)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedTranscript {
    pub metadata: VideoMetadata,
    pub transcript_text: String,
}

/// Parse the captured body, then read metadata from the DOM as it is right now.
pub async fn read_captured(
    session: &dyn PageSession,
    resp: &ObservedResponse,
    cfg: &AcquisitionConfig,
) -> Result<CapturedTranscript> {
    let bytes = session
        .response_body(&resp.id)
        .await
        .map_err(|e| Error::Payload(format!("could not read response body: {e}")))?;
    let body: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|e| Error::Payload(format!("response body is not JSON: {e}")))?;
    tracing::debug!(bytes = bytes.len(), "parsed transcript JSON");

    let metadata = metadata::extract_metadata(session, cfg).await;
    let transcript_text = payload::transcript_text(&body);
    Ok(CapturedTranscript {
        metadata,
        transcript_text,
    })
}
