//! Chat surface probe over the Chrome DevTools Protocol
//!
//! Every read is one `Runtime.evaluate` round trip returning a JSON string,
//! so a half-rendered page never yields a partially deserialized value.

use crate::runtime::{ProbeError, SurfaceProbe, SurfaceSnapshot};
use crate::state_machine::Role;
use async_trait::async_trait;
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{sleep, Instant};

impl From<CdpError> for ProbeError {
    fn from(e: CdpError) -> Self {
        ProbeError::Operation(e.to_string())
    }
}

/// CSS selectors locating the parts of a chat surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SurfaceSelectors {
    /// Candidate input boxes, first visible wins
    pub input: Vec<String>,
    pub send_button: Vec<String>,
    /// Region whose markup length is sampled for quiescence
    pub chat_area: String,
    /// Elements counted for arrival (user turns plus reply shells)
    pub message_shell: String,
    /// Elements whose last match is read as the latest message
    pub message_container: String,
    /// Preferred text node inside a message container
    pub message_content: String,
    /// Visible while the participant is still generating
    pub busy: String,
    /// Generic spinners, only counted when `busy` matches nothing
    pub busy_fallback: String,
    /// Removed from a message before its text is read
    pub noise: Vec<String>,
}

impl Default for SurfaceSelectors {
    fn default() -> Self {
        Self {
            input: vec![
                r#"div[role="textbox"]"#.to_string(),
                r#"div[contenteditable="true"]"#.to_string(),
            ],
            send_button: vec![
                r#"button mat-icon[data-mat-icon-name="send"]"#.to_string(),
                r#"button[aria-label*="Send"]"#.to_string(),
            ],
            chat_area: "body".to_string(),
            message_shell: ".user-query, .model-response".to_string(),
            message_container: ".user-query, .response-container".to_string(),
            message_content: ".response-content".to_string(),
            busy: r#"button[aria-label] mat-icon[svgicon="gm_stop-fill"], .bard-avatar.thinking"#
                .to_string(),
            busy_fallback: r#"[class*="loading"], [class*="generating"]"#.to_string(),
            noise: vec![
                "button".to_string(),
                "mat-icon".to_string(),
                ".thoughts-header".to_string(),
                r#"[aria-hidden="true"]"#.to_string(),
            ],
        }
    }
}

#[derive(Deserialize)]
struct Latest {
    text: Option<String>,
}

#[derive(Deserialize)]
struct Counts {
    rendered_length: usize,
    element_count: usize,
}

/// One participant's page
pub struct CdpProbe {
    role: Role,
    page: Page,
    prelude: String,
    selectors: SurfaceSelectors,
    submit_timeout: Duration,
    poll_interval: Duration,
}

impl CdpProbe {
    #[must_use]
    pub fn new(role: Role, page: Page, selectors: SurfaceSelectors) -> Self {
        Self {
            role,
            page,
            prelude: prelude(&selectors),
            selectors,
            submit_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
        }
    }

    /// How long a committed message may take to appear as its own element
    #[must_use]
    pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn eval<T: DeserializeOwned>(&self, body: &str) -> Result<T, ProbeError> {
        let expr = format!("(() => {{ {} {body} }})()", self.prelude);
        let result = self.page.evaluate(expr).await?;
        let json: String = result
            .into_value()
            .map_err(|e| ProbeError::Operation(format!("script returned no JSON: {e}")))?;
        serde_json::from_str(&json)
            .map_err(|e| ProbeError::Operation(format!("unexpected script result {json}: {e}")))
    }

    async fn click_send(&self) -> Result<(), ProbeError> {
        for selector in &self.selectors.send_button {
            if let Ok(button) = self.page.find_element(selector.as_str()).await {
                button.click().await?;
                tracing::debug!(role = %self.role, selector = %selector, "Clicked send");
                return Ok(());
            }
        }
        tracing::debug!(role = %self.role, "No send button found, pressing Enter");
        for selector in &self.selectors.input {
            if let Ok(input) = self.page.find_element(selector.as_str()).await {
                input.press_key("Enter").await?;
                return Ok(());
            }
        }
        Err(ProbeError::NotFound("send button or input box".to_string()))
    }
}

#[async_trait]
impl SurfaceProbe for CdpProbe {
    async fn is_ready(&self, timeout: Duration) -> Result<bool, ProbeError> {
        let started = Instant::now();
        loop {
            match self.eval::<bool>(READY_SCRIPT).await {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                // Still navigating; the timeout decides
                Err(e) => tracing::debug!(role = %self.role, error = %e, "Readiness probe failed"),
            }
            if started.elapsed() >= timeout {
                return Ok(false);
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn snapshot(&self) -> Result<SurfaceSnapshot, ProbeError> {
        let counts: Counts = self.eval(SNAPSHOT_SCRIPT).await?;
        Ok(SurfaceSnapshot::new(counts.rendered_length, counts.element_count))
    }

    async fn submit(&self, text: &str) -> Result<(), ProbeError> {
        let before = self.snapshot().await?.element_count;

        let inserted: bool = self.eval(&insert_script(text)).await?;
        if !inserted {
            return Err(ProbeError::NotFound("input box".to_string()));
        }
        self.click_send().await?;

        // Committed once the text shows up as its own element
        let started = Instant::now();
        while started.elapsed() < self.submit_timeout {
            sleep(self.poll_interval).await;
            if self.snapshot().await?.element_count > before {
                return Ok(());
            }
        }
        Err(ProbeError::Timeout(format!(
            "message not echoed within {:?}",
            self.submit_timeout
        )))
    }

    async fn busy_indicators(&self) -> Result<usize, ProbeError> {
        self.eval(BUSY_SCRIPT).await
    }

    async fn read_latest(&self) -> Result<Option<String>, ProbeError> {
        let latest: Latest = self.eval(LATEST_SCRIPT).await?;
        Ok(latest.text)
    }

    async fn bring_to_foreground(&self) {
        if let Err(e) = self.page.bring_to_front().await {
            tracing::debug!(role = %self.role, error = %e, "Could not focus page");
        }
    }
}

/// Shared helpers plus the selectors as a JSON literal
fn prelude(selectors: &SurfaceSelectors) -> String {
    let json = serde_json::to_value(selectors).map_or_else(|_| "{}".to_string(), |v| v.to_string());
    format!(
        "const S = {json}; \
         const visible = el => !!el && !!(el.offsetWidth || el.offsetHeight || el.getClientRects().length); \
         const firstVisible = list => {{ for (const s of list) {{ const el = document.querySelector(s); if (visible(el)) return el; }} return null; }};"
    )
}

fn insert_script(text: &str) -> String {
    let literal = serde_json::Value::String(text.to_string()).to_string();
    format!(
        "const input = firstVisible(S.input); \
         if (!input) return JSON.stringify(false); \
         input.focus(); \
         document.execCommand('selectAll', false); \
         document.execCommand('insertText', false, {literal}); \
         return JSON.stringify(true);"
    )
}

const READY_SCRIPT: &str = "return JSON.stringify(firstVisible(S.input) !== null);";

const SNAPSHOT_SCRIPT: &str = "const area = document.querySelector(S.chat_area) || document.body; \
     return JSON.stringify({ \
       rendered_length: area.innerHTML.length, \
       element_count: document.querySelectorAll(S.message_shell).length });";

const BUSY_SCRIPT: &str = "const count = sel => [...document.querySelectorAll(sel)].filter(visible).length; \
     const precise = count(S.busy); \
     return JSON.stringify(precise > 0 ? precise : count(S.busy_fallback));";

const LATEST_SCRIPT: &str = "const all = document.querySelectorAll(S.message_container); \
     if (all.length === 0) return JSON.stringify({ text: null }); \
     const last = all[all.length - 1]; \
     const target = last.querySelector(S.message_content) || last; \
     const clone = target.cloneNode(true); \
     for (const sel of S.noise) { for (const n of clone.querySelectorAll(sel)) n.remove(); } \
     return JSON.stringify({ text: (clone.innerText || clone.textContent || '').trim() });";
