//! Scripted in-memory engine for pipeline tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tubescribe_core::{
    AcquisitionConfig, BrowserEngine, Error, ObservedResponse, PageSession, RequestGate,
    ResponseStream, Result, WaitUntil,
};

pub const TRANSCRIPT_URL: &str =
    "https://www.youtube.com/youtubei/v1/get_transcript?prettyPrint=false";

pub fn selectors() -> tubescribe_core::Selectors {
    AcquisitionConfig::default().selectors
}

pub fn transcript_body(segments: &[&str]) -> Vec<u8> {
    let segs: Vec<serde_json::Value> = segments
        .iter()
        .map(|t| serde_json::json!({ "transcriptSegmentRenderer": { "snippet": { "runs": [{ "text": t }] } } }))
        .collect();
    serde_json::json!({
        "actions": [{
            "updateEngagementPanelAction": { "content": { "transcriptRenderer": { "content": {
                "transcriptSearchPanelRenderer": { "body": {
                    "transcriptSegmentListRenderer": { "initialSegments": segs }
                }}
            }}}}
        }]
    })
    .to_string()
    .into_bytes()
}

pub fn response(id: &str, method: &str, url: &str) -> ObservedResponse {
    ObservedResponse {
        id: id.to_string(),
        url: url.to_string(),
        method: method.to_string(),
        status: 200,
    }
}

/// What the fake page looks like and how it reacts.
#[derive(Default, Clone)]
pub struct PageScript {
    pub visible: HashSet<String>,
    pub present: HashSet<String>,
    pub click_fails: HashSet<String>,
    pub script_click_fails: bool,
    /// Number of leading `goto` calls that fail.
    pub goto_failures: usize,
    /// Number of leading transcript-button lookups that find nothing.
    pub transcript_hidden_for: usize,
    /// Responses emitted (in order) when the transcript button is clicked.
    pub on_transcript_click: Vec<(ObservedResponse, Vec<u8>)>,
    pub metadata: Option<serde_json::Value>,
    pub title: Option<String>,
    pub final_url: Option<String>,
}

impl PageScript {
    /// A watch page where every step works and the transcript API answers with `segments`.
    pub fn happy(segments: &[&str]) -> Self {
        let s = selectors();
        let mut p = PageScript::default();
        for sel in [
            &s.more_actions,
            &s.more_actions_alt,
            &s.transcript_button,
            &s.any_button,
            &s.video_player,
            &s.title_region,
        ] {
            p.visible.insert(sel.clone());
        }
        p.on_transcript_click = vec![(
            response("req-1", "POST", TRANSCRIPT_URL),
            transcript_body(segments),
        )];
        p.metadata = Some(serde_json::json!({
            "video_title": "Rust in 100 Seconds",
            "channel_name": "Fireship",
            "channel_subscribers": "3.2M subscribers",
            "views": "1,234,567 views",
            "post_date": "Sep 20, 2021"
        }));
        p.title = Some("Rust in 100 Seconds - YouTube".to_string());
        p.final_url = Some("https://www.youtube.com/watch?v=5C_HPTJg5ek".to_string());
        p
    }

    pub fn hide(mut self, sel: &str) -> Self {
        self.visible.remove(sel);
        self.present.remove(sel);
        self
    }
}

#[derive(Default)]
pub struct Probe {
    pub sessions_created: AtomicUsize,
    pub closed: AtomicBool,
    pub calls: Mutex<Vec<String>>,
    pub gotos: Mutex<Vec<WaitUntil>>,
    pub transcript_lookups: AtomicUsize,
    listener: Mutex<Option<UnboundedSender<ObservedResponse>>>,
}

impl Probe {
    fn log(&self, s: impl Into<String>) {
        self.calls.lock().unwrap().push(s.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn position(&self, call: &str) -> Option<usize> {
        self.calls().iter().position(|c| c == call)
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == call).count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// True once the response subscription has been dropped by its consumer.
    pub fn listener_detached(&self) -> bool {
        self.listener
            .lock()
            .unwrap()
            .as_ref()
            .map(|tx| tx.is_closed())
            .unwrap_or(true)
    }

    /// Push a response as if the page had just finished loading it.
    pub fn emit(&self, resp: ObservedResponse) -> bool {
        match self.listener.lock().unwrap().as_ref() {
            Some(tx) => tx.send(resp).is_ok(),
            None => false,
        }
    }
}

pub struct FakeSession {
    script: Arc<PageScript>,
    probe: Arc<Probe>,
    bodies: Mutex<HashMap<String, Vec<u8>>>,
    gotos: AtomicUsize,
}

impl FakeSession {
    pub fn new(script: PageScript, probe: Arc<Probe>) -> Self {
        Self {
            script: Arc::new(script),
            probe,
            bodies: Mutex::new(HashMap::new()),
            gotos: AtomicUsize::new(0),
        }
    }

    fn exists(&self, sel: &str, visible: bool) -> bool {
        self.script.visible.contains(sel) || (!visible && self.script.present.contains(sel))
    }

    fn fire_transcript(&self) {
        for (resp, body) in &self.script.on_transcript_click {
            self.bodies
                .lock()
                .unwrap()
                .insert(resp.id.clone(), body.clone());
            self.probe.emit(resp.clone());
        }
    }
}

#[async_trait::async_trait]
impl PageSession for FakeSession {
    async fn intercept_requests(&self, _gate: Arc<dyn RequestGate>) -> Result<()> {
        self.probe.log("intercept");
        Ok(())
    }

    async fn observe_responses(&self) -> Result<ResponseStream> {
        self.probe.log("observe");
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        *self.probe.listener.lock().unwrap() = Some(tx);
        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|r| (r, rx))
        });
        Ok(Box::pin(stream))
    }

    async fn response_body(&self, id: &str) -> Result<Vec<u8>> {
        self.bodies
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::Browser(format!("no body for {id}")))
    }

    async fn goto(&self, _url: &str, wait: WaitUntil, timeout: Duration) -> Result<()> {
        self.probe.log("goto");
        self.probe.gotos.lock().unwrap().push(wait);
        let n = self.gotos.fetch_add(1, Ordering::SeqCst);
        if n < self.script.goto_failures {
            tokio::time::sleep(timeout).await;
            return Err(Error::Navigation(format!("timed out after {timeout:?}")));
        }
        Ok(())
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        visible: bool,
        timeout: Duration,
    ) -> Result<()> {
        if self.exists(selector, visible) {
            return Ok(());
        }
        tokio::time::sleep(timeout).await;
        Err(Error::Browser(format!("timed out waiting for {selector}")))
    }

    async fn count(&self, selector: &str) -> Result<usize> {
        if selector == selectors().transcript_button {
            let n = self.probe.transcript_lookups.fetch_add(1, Ordering::SeqCst);
            if n < self.script.transcript_hidden_for {
                return Ok(0);
            }
        }
        Ok(usize::from(self.exists(selector, false)))
    }

    async fn click(&self, selector: &str) -> Result<()> {
        self.probe.log(format!("click:{selector}"));
        if self.script.click_fails.contains(selector) || !self.exists(selector, false) {
            return Err(Error::Browser(format!("click failed: {selector}")));
        }
        if selector == selectors().transcript_button {
            self.fire_transcript();
        }
        Ok(())
    }

    async fn script_click(&self, selector: &str) -> Result<()> {
        self.probe.log(format!("script_click:{selector}"));
        if self.script.script_click_fails || !self.exists(selector, false) {
            return Err(Error::Browser(format!("script click failed: {selector}")));
        }
        if selector == selectors().transcript_button {
            self.fire_transcript();
        }
        Ok(())
    }

    async fn scroll_into_view(&self, selector: &str) -> Result<()> {
        self.probe.log(format!("scroll:{selector}"));
        Ok(())
    }

    async fn evaluate(&self, _script: &str) -> Result<serde_json::Value> {
        self.probe.log("evaluate");
        self.script
            .metadata
            .clone()
            .ok_or_else(|| Error::Browser("evaluation failed".to_string()))
    }

    async fn title(&self) -> Result<String> {
        self.probe.log("title");
        self.script
            .title
            .clone()
            .ok_or_else(|| Error::Browser("target closed".to_string()))
    }

    async fn current_url(&self) -> Result<String> {
        self.script
            .final_url
            .clone()
            .ok_or_else(|| Error::Browser("target closed".to_string()))
    }

    async fn close(&self) -> Result<()> {
        self.probe.log("close");
        self.probe.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeEngine {
    script: PageScript,
    pub probe: Arc<Probe>,
}

impl FakeEngine {
    pub fn new(script: PageScript) -> Arc<Self> {
        Arc::new(Self {
            script,
            probe: Arc::new(Probe::default()),
        })
    }
}

#[async_trait::async_trait]
impl BrowserEngine for FakeEngine {
    async fn new_session(&self) -> Result<Box<dyn PageSession>> {
        self.probe.sessions_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession::new(
            self.script.clone(),
            self.probe.clone(),
        )))
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}
