//! Cookie-aware HTTP surface.
//!
//! Wraps one `reqwest::Client` with a shared jar so the handshake can plant
//! cookies and later requests can read them back. Redirects are followed;
//! callers classify the final URI themselves, so a completed exchange is
//! returned regardless of status code. `None` strictly means transport
//! failure.

use anyhow::{Context, Result};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::{Client, Proxy};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info_span, warn, Instrument};
use url::Url;

pub(crate) struct Browser {
    client: Client,
    jar: Arc<Jar>,
}

impl Browser {
    pub(crate) fn new(proxy: Option<Proxy>, timeout: Duration) -> Result<Self> {
        let jar = Arc::new(Jar::default());

        let mut builder = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .cookie_provider(Arc::clone(&jar))
            .timeout(timeout);
        if let Some(proxy) = proxy {
            builder = builder.proxy(proxy);
        }

        let client = builder.build().context("Failed to build HTTP client")?;

        Ok(Self { client, jar })
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    /// HEAD `url`, returning the final URI after redirects.
    pub(crate) async fn head(&self, url: Url) -> Option<Url> {
        let span = info_span!(
            "steam.head",
            http.method = "HEAD",
            url = %url
        );
        match self.client.head(url.clone()).send().instrument(span).await {
            Ok(response) => Some(response.url().clone()),
            Err(err) => {
                warn!("HEAD {url} failed: {err}");
                None
            }
        }
    }

    /// GET `url`, returning the final URI and body text.
    pub(crate) async fn get(&self, url: Url) -> Option<(Url, String)> {
        let span = info_span!(
            "steam.get",
            http.method = "GET",
            url = %url
        );
        let response = match self.client.get(url.clone()).send().instrument(span).await {
            Ok(response) => response,
            Err(err) => {
                warn!("GET {url} failed: {err}");
                return None;
            }
        };

        self.read_body("GET", url, response).await
    }

    /// POST a form to `url`, returning the final URI and body text.
    ///
    /// The form is sent as an ordered list of pairs so repeated field names
    /// (`cid[]`, `ck[]`) survive serialization.
    pub(crate) async fn post_form(
        &self,
        url: Url,
        form: &[(String, String)],
    ) -> Option<(Url, String)> {
        let span = info_span!(
            "steam.post",
            http.method = "POST",
            url = %url
        );
        let response = match self
            .client
            .post(url.clone())
            .form(form)
            .send()
            .instrument(span)
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!("POST {url} failed: {err}");
                return None;
            }
        };

        self.read_body("POST", url, response).await
    }

    /// POST a pre-encoded `application/x-www-form-urlencoded` body.
    ///
    /// Used where a field carries raw bytes (RSA ciphertext) that percent
    /// encoding, not UTF-8 form serialization, must represent.
    pub(crate) async fn post_raw_form(&self, url: Url, body: String) -> Option<(Url, String)> {
        let span = info_span!(
            "steam.post",
            http.method = "POST",
            url = %url
        );
        let response = match self
            .client
            .post(url.clone())
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(body)
            .send()
            .instrument(span)
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!("POST {url} failed: {err}");
                return None;
            }
        };

        self.read_body("POST", url, response).await
    }

    async fn read_body(
        &self,
        method: &str,
        url: Url,
        response: reqwest::Response,
    ) -> Option<(Url, String)> {
        let final_url = response.url().clone();
        let status = response.status();
        if !status.is_success() {
            debug!("{method} {url} finished with status {status}");
        }
        match response.text().await {
            Ok(text) => Some((final_url, text)),
            Err(err) => {
                warn!("{method} {url}: failed to read body: {err}");
                None
            }
        }
    }

    /// Read one cookie's value as the jar would present it to `url`.
    pub(crate) fn cookie_value(&self, url: &Url, name: &str) -> Option<String> {
        let header = self.jar.cookies(url)?;
        let cookies = header.to_str().ok()?;
        cookies.split("; ").find_map(|pair| {
            let (cookie_name, value) = pair.split_once('=')?;
            (cookie_name == name).then(|| value.to_string())
        })
    }

    /// Plant a cookie for `url`'s host with path `/`.
    ///
    /// Domains get a dot prefix so the cookie spans subdomains; IP hosts
    /// (test servers) get host-only cookies.
    pub(crate) fn set_cookie(&self, url: &Url, name: &str, value: &str) {
        let cookie = match url.host() {
            Some(url::Host::Domain(domain)) => {
                format!("{name}={value}; Path=/; Domain=.{domain}")
            }
            _ => format!("{name}={value}; Path=/"),
        };
        self.jar.add_cookie_str(&cookie, url);
    }
}
