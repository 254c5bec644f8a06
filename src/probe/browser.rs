//! Browser bootstrap: one headed Chromium, one page per participant

use super::cdp::CdpProbe;
use crate::config::{BrowserSettings, Timeouts};
use crate::error::RelayError;
use crate::runtime::Participant;
use crate::state_machine::Role;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub struct SurfaceBrowser {
    browser: Browser,
    handler_task: JoinHandle<()>,
    pages: BTreeMap<Role, Page>,
}

impl SurfaceBrowser {
    /// Launch Chromium on the persistent profile and open every role's page.
    ///
    /// # Errors
    ///
    /// Any launch or navigation problem is a setup error.
    pub async fn launch(settings: &BrowserSettings, roles: &[Role]) -> Result<Self, RelayError> {
        let config = browser_config(settings)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| RelayError::setup(format!("failed to launch browser: {e}")))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::warn!("CDP handler error: {e}");
                }
            }
        });

        let mut pages = BTreeMap::new();
        for role in roles {
            let url = settings
                .urls
                .get(role)
                .ok_or_else(|| RelayError::setup(format!("no URL configured for {role}")))?;
            tracing::info!(role = %role, url = %url, "Opening surface");
            let page = tokio::time::timeout(settings.page_load_timeout, browser.new_page(url.as_str()))
                .await
                .map_err(|_| {
                    RelayError::setup(format!(
                        "{role} page did not load within {:?}",
                        settings.page_load_timeout
                    ))
                })?
                .map_err(|e| RelayError::setup(format!("failed to open {role} page: {e}")))?;
            pages.insert(role.clone(), page);
        }

        if let Some(primary) = roles.first().and_then(|r| pages.get(r)) {
            if let Err(e) = primary.bring_to_front().await {
                tracing::debug!(error = %e, "Could not focus primary page");
            }
        }

        Ok(Self {
            browser,
            handler_task,
            pages,
        })
    }

    /// Bind each page to a CDP probe
    #[must_use]
    pub fn participants(&self, settings: &BrowserSettings, timeouts: &Timeouts) -> Vec<Participant> {
        self.pages
            .iter()
            .map(|(role, page)| {
                let probe = CdpProbe::new(role.clone(), page.clone(), settings.selectors.clone())
                    .with_submit_timeout(timeouts.arrival)
                    .with_poll_interval(timeouts.poll_interval);
                Participant::new(role.clone(), Arc::new(probe))
            })
            .collect()
    }

    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            tracing::warn!(error = %e, "Browser did not close cleanly");
        }
        self.handler_task.abort();
    }
}

fn browser_config(settings: &BrowserSettings) -> Result<BrowserConfig, RelayError> {
    let mut builder = BrowserConfig::builder().with_head().viewport(None);

    // The profile carries the participants' logged-in sessions
    let profile = settings
        .user_data_dir
        .as_ref()
        .ok_or_else(|| RelayError::setup("RELAY_USER_DATA_DIR is not set"))?;
    if !profile.is_dir() {
        return Err(RelayError::setup(format!(
            "browser profile {} does not exist",
            profile.display()
        )));
    }
    builder = builder.user_data_dir(profile);
    if let Some(path) = &settings.executable {
        builder = builder.chrome_executable(path);
    }

    builder
        .build()
        .map_err(|e| RelayError::setup(format!("invalid browser config: {e}")))
}
