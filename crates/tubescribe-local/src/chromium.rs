//! Headless Chromium engine over the DevTools protocol (chromiumoxide).
//!
//! One [`ChromiumEngine`] per process; it only hands out tabs. Each [`ChromiumSession`]
//! owns its tab plus the background tasks answering paused requests and correlating
//! network events, and aborts them on close.

use base64::Engine as _;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::fetch::{
    self, ContinueRequestParams, EventRequestPaused, FailRequestParams, RequestPattern,
    RequestStage,
};
use chromiumoxide::cdp::browser_protocol::network::{
    self, ErrorReason, EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent,
    EventResponseReceived, GetResponseBodyParams,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tubescribe_core::{
    BrowserEngine, Error, ObservedResponse, PageSession, RequestDecision, RequestDescriptor,
    RequestGate, ResourceType, ResponseStream, Result, WaitUntil,
};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

fn cdp(e: CdpError) -> Error {
    Error::Browser(e.to_string())
}

fn js_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

#[derive(Debug, Clone)]
pub struct ChromiumOptions {
    pub headless: bool,
    pub no_sandbox: bool,
    pub chrome_executable: Option<PathBuf>,
    pub user_agent: Option<String>,
    pub window_size: (u32, u32),
    /// Quiet period used by [`WaitUntil::NetworkIdle`].
    pub network_idle_window: Duration,
}

impl Default for ChromiumOptions {
    fn default() -> Self {
        Self {
            headless: true,
            no_sandbox: true,
            chrome_executable: None,
            user_agent: None,
            window_size: (1280, 720),
            network_idle_window: Duration::from_millis(500),
        }
    }
}

impl ChromiumOptions {
    fn browser_config(&self) -> Result<BrowserConfig> {
        let mut b = BrowserConfig::builder().window_size(self.window_size.0, self.window_size.1);
        if !self.headless {
            b = b.with_head();
        }
        if self.no_sandbox {
            b = b.no_sandbox().arg("--disable-setuid-sandbox");
        }
        if let Some(p) = &self.chrome_executable {
            b = b.chrome_executable(p);
        }
        if let Some(ua) = &self.user_agent {
            b = b.arg(format!("--user-agent={ua}"));
        }
        b = b.args(["--mute-audio", "--no-first-run", "--disable-dev-shm-usage"]);
        b.build().map_err(Error::NotConfigured)
    }
}

pub struct ChromiumEngine {
    browser: tokio::sync::Mutex<Option<Browser>>,
    handler: JoinHandle<()>,
    network_idle_window: Duration,
}

impl ChromiumEngine {
    pub async fn launch(opts: ChromiumOptions) -> Result<Self> {
        let config = opts.browser_config()?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| Error::NotConfigured(format!("failed to launch Chromium: {e}")))?;
        let handler = tokio::spawn(async move {
            while let Some(ev) = handler.next().await {
                if let Err(e) = ev {
                    tracing::debug!(error = %e, "devtools handler error");
                }
            }
            tracing::debug!("devtools handler finished");
        });
        tracing::info!(headless = opts.headless, "browser initialized");
        Ok(Self {
            browser: tokio::sync::Mutex::new(Some(browser)),
            handler,
            network_idle_window: opts.network_idle_window,
        })
    }
}

#[async_trait::async_trait]
impl BrowserEngine for ChromiumEngine {
    async fn new_session(&self) -> Result<Box<dyn PageSession>> {
        let page = {
            let guard = self.browser.lock().await;
            let browser = guard
                .as_ref()
                .ok_or_else(|| Error::NotConfigured("browser has been shut down".to_string()))?;
            browser.new_page("about:blank").await.map_err(cdp)?
        };
        page.execute(network::EnableParams::default())
            .await
            .map_err(cdp)?;
        Ok(Box::new(ChromiumSession {
            page,
            tasks: Mutex::new(Vec::new()),
            network_idle_window: self.network_idle_window,
            closed: AtomicBool::new(false),
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        let mut guard = self.browser.lock().await;
        if let Some(mut browser) = guard.take() {
            let closed = browser.close().await;
            self.handler.abort();
            closed.map_err(cdp)?;
            tracing::info!("browser closed");
        }
        Ok(())
    }
}

pub struct ChromiumSession {
    page: Page,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    network_idle_window: Duration,
    closed: AtomicBool,
}

impl ChromiumSession {
    fn track(&self, task: JoinHandle<()>) {
        if let Ok(mut t) = self.tasks.lock() {
            t.push(task);
        }
    }

    fn abort_tasks(&self) {
        if let Ok(mut t) = self.tasks.lock() {
            for task in t.drain(..) {
                task.abort();
            }
        }
    }

    async fn eval_value(&self, script: &str) -> Result<serde_json::Value> {
        let r = self.page.evaluate(script).await.map_err(cdp)?;
        Ok(r.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn eval_bool(&self, script: &str) -> Result<bool> {
        Ok(self.eval_value(script).await?.as_bool().unwrap_or(false))
    }

    async fn wait_network_idle(&self, budget: Duration) -> Result<()> {
        // Resource-timing entries stop growing once the page has gone quiet.
        let js = format!(
            r#"(async () => {{
  const timeoutMs = {timeout_ms};
  const idleMs = {idle_ms};
  const interval = 100;
  const start = Date.now();
  const count = () => {{ try {{ return performance.getEntriesByType('resource').length; }} catch (_) {{ return 0; }} }};
  let last = count();
  let stable = 0;
  while (Date.now() - start < timeoutMs) {{
    await new Promise(r => setTimeout(r, interval));
    const now = count();
    if (now === last) {{ stable += interval; }} else {{ stable = 0; last = now; }}
    if (stable >= idleMs && document.readyState !== 'loading') return true;
  }}
  return false;
}})()"#,
            timeout_ms = budget.as_millis(),
            idle_ms = self.network_idle_window.as_millis(),
        );
        let settled = tokio::time::timeout(budget + Duration::from_secs(1), self.eval_bool(&js))
            .await
            .map_err(|_| Error::Navigation(format!("network did not settle within {budget:?}")))??;
        if settled {
            Ok(())
        } else {
            Err(Error::Navigation(format!(
                "network did not settle within {budget:?}"
            )))
        }
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        self.abort_tasks();
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Dropped without `close`: the tab lives in the shared browser, so close it anyway.
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                let page = self.page.clone();
                rt.spawn(async move {
                    if let Err(e) = page.close().await {
                        tracing::debug!(error = %e, "closing dropped tab failed");
                    }
                });
            }
            Err(_) => tracing::warn!("session dropped outside a runtime; tab left open"),
        }
    }
}

#[async_trait::async_trait]
impl PageSession for ChromiumSession {
    async fn intercept_requests(&self, gate: Arc<dyn RequestGate>) -> Result<()> {
        let mut paused = self
            .page
            .event_listener::<EventRequestPaused>()
            .await
            .map_err(cdp)?;
        self.page
            .execute(
                fetch::EnableParams::builder()
                    .pattern(
                        RequestPattern::builder()
                            .url_pattern("*")
                            .request_stage(RequestStage::Request)
                            .build(),
                    )
                    .build(),
            )
            .await
            .map_err(cdp)?;

        let page = self.page.clone();
        self.track(tokio::spawn(async move {
            while let Some(ev) = paused.next().await {
                let desc = RequestDescriptor {
                    url: ev.request.url.clone(),
                    resource_type: ResourceType::from_cdp(ev.resource_type.as_ref()),
                };
                let decision = gate.decide(&desc);
                let page = page.clone();
                let id = ev.request_id.clone();
                tokio::spawn(async move {
                    let res = match decision {
                        RequestDecision::Allow => page
                            .execute(ContinueRequestParams::new(id))
                            .await
                            .map(|_| ()),
                        RequestDecision::Abort => page
                            .execute(FailRequestParams::new(id, ErrorReason::BlockedByClient))
                            .await
                            .map(|_| ()),
                    };
                    // A request that vanished (tab navigated away) is not an error worth surfacing.
                    if let Err(e) = res {
                        tracing::debug!(url = %desc.url, error = %e, "request decision not applied");
                    }
                });
            }
        }));
        Ok(())
    }

    async fn observe_responses(&self) -> Result<ResponseStream> {
        let mut sent = self
            .page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(cdp)?;
        let mut received = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(cdp)?;
        let mut finished = self
            .page
            .event_listener::<EventLoadingFinished>()
            .await
            .map_err(cdp)?;
        let mut failed = self
            .page
            .event_listener::<EventLoadingFailed>()
            .await
            .map_err(cdp)?;

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<ObservedResponse>();
        self.track(tokio::spawn(async move {
            // request id -> (url, method, status)
            let mut inflight: HashMap<String, (String, String, u16)> = HashMap::new();
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    Some(ev) = sent.next() => {
                        inflight.insert(
                            ev.request_id.inner().clone(),
                            (ev.request.url.clone(), ev.request.method.clone(), 0),
                        );
                    }
                    Some(ev) = received.next() => {
                        if let Some(entry) = inflight.get_mut(ev.request_id.inner()) {
                            entry.2 = u16::try_from(ev.response.status).unwrap_or(0);
                        }
                    }
                    Some(ev) = finished.next() => {
                        let id = ev.request_id.inner().clone();
                        if let Some((url, method, status)) = inflight.remove(&id) {
                            let observed = ObservedResponse { id, url, method, status };
                            if tx.send(observed).is_err() {
                                break;
                            }
                        }
                    }
                    Some(ev) = failed.next() => {
                        inflight.remove(ev.request_id.inner());
                    }
                    else => break,
                }
            }
        }));

        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|r| (r, rx))
        });
        Ok(Box::pin(stream))
    }

    async fn response_body(&self, id: &str) -> Result<Vec<u8>> {
        let ret = self
            .page
            .execute(GetResponseBodyParams::new(network::RequestId::new(id)))
            .await
            .map_err(cdp)?;
        let body = &ret.result;
        if body.base64_encoded {
            base64::engine::general_purpose::STANDARD
                .decode(body.body.as_bytes())
                .map_err(|e| Error::Payload(format!("invalid base64 body: {e}")))
        } else {
            Ok(body.body.clone().into_bytes())
        }
    }

    async fn goto(&self, url: &str, wait: WaitUntil, timeout: Duration) -> Result<()> {
        let started = Instant::now();
        tokio::time::timeout(timeout, self.page.goto(url))
            .await
            .map_err(|_| Error::Navigation(format!("timed out after {timeout:?}")))?
            .map_err(|e| Error::Navigation(e.to_string()))?;
        if wait == WaitUntil::NetworkIdle {
            let budget = timeout.saturating_sub(started.elapsed());
            self.wait_network_idle(budget).await?;
        }
        Ok(())
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        visible: bool,
        timeout: Duration,
    ) -> Result<()> {
        let js = format!(
            r#"(() => {{
  const el = document.querySelector({sel});
  if (!el) return false;
  if (!{visible}) return true;
  const st = window.getComputedStyle(el);
  const r = el.getBoundingClientRect();
  return st.visibility !== 'hidden' && st.display !== 'none' && (r.width > 0 || r.height > 0);
}})()"#,
            sel = js_str(selector),
        );
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if let Ok(Ok(true)) = tokio::time::timeout(remaining, self.eval_bool(&js)).await {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::Browser(format!(
                    "timed out after {timeout:?} waiting for {selector}"
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn count(&self, selector: &str) -> Result<usize> {
        let js = format!("document.querySelectorAll({}).length", js_str(selector));
        Ok(self.eval_value(&js).await?.as_u64().unwrap_or(0) as usize)
    }

    async fn click(&self, selector: &str) -> Result<()> {
        self.page
            .find_element(selector)
            .await
            .map_err(cdp)?
            .click()
            .await
            .map_err(cdp)?;
        Ok(())
    }

    async fn script_click(&self, selector: &str) -> Result<()> {
        let js = format!(
            "(() => {{ const el = document.querySelector({}); if (!el) return false; el.click(); return true; }})()",
            js_str(selector)
        );
        if self.eval_bool(&js).await? {
            Ok(())
        } else {
            Err(Error::Browser(format!("no element for {selector}")))
        }
    }

    async fn scroll_into_view(&self, selector: &str) -> Result<()> {
        let js = format!(
            "(() => {{ const el = document.querySelector({}); if (!el) return false; el.scrollIntoView({{ behavior: 'smooth', block: 'center' }}); return true; }})()",
            js_str(selector)
        );
        if self.eval_bool(&js).await? {
            Ok(())
        } else {
            Err(Error::Browser(format!("no element for {selector}")))
        }
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        self.eval_value(script).await
    }

    async fn title(&self) -> Result<String> {
        Ok(self
            .eval_value("document.title")
            .await?
            .as_str()
            .unwrap_or("")
            .to_string())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self
            .eval_value("window.location.href")
            .await?
            .as_str()
            .unwrap_or("")
            .to_string())
    }

    async fn close(&self) -> Result<()> {
        self.abort_tasks();
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.page.clone().close().await.map_err(cdp)
    }
}
