//! Portal client over plain HTTP with a cookie jar.
//!
//! Login posts the credential form; the listing page is parsed with CSS
//! selectors. Each `connect` starts a fresh cookie jar, which is how a lost
//! session gets torn down and rebuilt.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{StatusCode, Url};
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use tracing::debug;

use crate::monitor::config::PortalSettings;
use crate::monitor::error::{AuthError, FetchError};
use crate::monitor::portal::{Credentials, PortalClient, PortalConnector};
use crate::monitor::snapshot::{ListingItem, Snapshot};

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

const USER_AGENT: &str = concat!("portal-watch/", env!("CARGO_PKG_VERSION"));

pub struct HttpPortalConnector {
    settings: PortalSettings,
    timeout: Duration,
}

impl HttpPortalConnector {
    pub fn new(settings: PortalSettings, timeout: Duration) -> Self {
        Self { settings, timeout }
    }
}

#[async_trait]
impl PortalConnector for HttpPortalConnector {
    type Client = HttpPortalClient;

    async fn connect(&self) -> Result<HttpPortalClient, AuthError> {
        HttpPortalClient::new(self.settings.clone(), self.timeout)
    }
}

pub struct HttpPortalClient {
    http: reqwest::Client,
    settings: PortalSettings,
    table: Selector,
    rows: Selector,
    cells: Selector,
    timeout: Duration,
}

impl HttpPortalClient {
    pub fn new(settings: PortalSettings, timeout: Duration) -> Result<Self, AuthError> {
        let table = parse_selector(&settings.table_selector, &settings.base_url)?;
        let rows = parse_selector(&settings.row_selector, &settings.base_url)?;
        let cells = parse_selector(&settings.cell_selector, &settings.base_url)?;

        let http = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AuthError::Unreachable {
                url: settings.base_url.clone(),
                cause: e.to_string(),
            })?;

        Ok(Self {
            http,
            settings,
            table,
            rows,
            cells,
            timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.settings.base_url, path)
        } else {
            format!("{}/{}", self.settings.base_url, path)
        }
    }

    fn on_login_page(&self, url: &Url) -> bool {
        same_path(url.path(), &self.settings.login_path)
    }
}

#[async_trait]
impl PortalClient for HttpPortalClient {
    async fn login(&mut self, credentials: &Credentials) -> Result<(), AuthError> {
        let url = self.url(&self.settings.login_path);
        let form = [
            (self.settings.username_field.as_str(), credentials.username.as_str()),
            (self.settings.password_field.as_str(), credentials.password.as_str()),
        ];

        let response = self
            .http
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| classify_auth_error(&url, e, self.timeout))?;

        let status = response.status();
        debug!(%status, final_url = %response.url(), "Login response");

        if status.is_server_error() {
            return Err(AuthError::Unreachable {
                url,
                cause: format!("HTTP {}", status),
            });
        }
        if !status.is_success() {
            return Err(AuthError::Rejected {
                reason: format!("HTTP {}", status),
            });
        }
        if self.on_login_page(response.url()) && !same_path(&self.settings.listing_path, &self.settings.login_path) {
            return Err(AuthError::Rejected {
                reason: "portal returned to the login page".to_string(),
            });
        }

        Ok(())
    }

    async fn fetch_listing(&mut self) -> Result<Snapshot, FetchError> {
        let url = self.url(&self.settings.listing_path);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| classify_fetch_error(e, self.timeout))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FetchError::SessionExpired(format!("HTTP {} from {}", status, url)));
        }
        if self.on_login_page(response.url()) {
            return Err(FetchError::SessionExpired(format!(
                "{} redirected to the login page",
                url
            )));
        }
        if !status.is_success() {
            return Err(FetchError::Navigation(format!("HTTP {} from {}", status, url)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| classify_fetch_error(e, self.timeout))?;

        extract_listing(
            &body,
            &self.table,
            &self.rows,
            &self.cells,
            self.settings.max_items,
        )
        .ok_or_else(|| {
            FetchError::NotFound(format!(
                "no element matches '{}' on {}",
                self.settings.table_selector, url
            ))
        })
    }
}

/// Pull item text out of a listing page. `None` when the listing container
/// is missing; a container without rows is an empty snapshot.
///
/// Each row contributes the text of its first matching cell, or its own text
/// when it has no such cell. Blank rows are skipped.
pub fn extract_listing(
    html: &str,
    table: &Selector,
    rows: &Selector,
    cells: &Selector,
    max_items: usize,
) -> Option<Snapshot> {
    let document = Html::parse_document(html);
    document.select(table).next()?;

    let mut items = Vec::new();
    for row in document.select(rows) {
        let text = match row.select(cells).next() {
            Some(cell) => element_text(&cell),
            None => element_text(&row),
        };
        if !text.is_empty() {
            items.push(ListingItem::new(text));
        }
    }

    Some(Snapshot::new(items).truncated(max_items))
}

fn element_text(element: &ElementRef<'_>) -> String {
    let raw: String = element.text().collect::<Vec<_>>().join(" ");
    WHITESPACE.replace_all(raw.trim(), " ").into_owned()
}

fn same_path(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}

fn parse_selector(selector: &str, base_url: &str) -> Result<Selector, AuthError> {
    Selector::parse(selector).map_err(|e| AuthError::Unreachable {
        url: base_url.to_string(),
        cause: format!("invalid selector '{}': {}", selector, e),
    })
}

fn classify_auth_error(url: &str, err: reqwest::Error, timeout: Duration) -> AuthError {
    if err.is_timeout() {
        AuthError::Timeout(timeout)
    } else {
        AuthError::Unreachable {
            url: url.to_string(),
            cause: err.to_string(),
        }
    }
}

fn classify_fetch_error(err: reqwest::Error, timeout: Duration) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout(timeout)
    } else {
        FetchError::Navigation(err.to_string())
    }
}
