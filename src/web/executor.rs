//! Session-aware request execution.
//!
//! Every web operation funnels through one template: make sure the session
//! is alive (or wait for an in-flight refresh), wait for initialization,
//! stamp the anti-CSRF field into POST bodies, dispatch under the host's
//! limiter, then classify the terminal URI. Expired sessions trigger one
//! refresh, self-profile bounces retry as-is, and every retry consumes the
//! shared attempt budget.

use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, warn};
use url::Url;

use super::session::is_session_expired_url;
use super::WebHandler;
use crate::globals::Service;

/// Casing of the anti-CSRF `sessionid` form field.
///
/// Steam's endpoints are inconsistent: market posts want camel case, most
/// others lowercase. `None` suppresses the field entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionField {
    #[default]
    Lower,
    Camel,
    Pascal,
    None,
}

impl SessionField {
    fn field_name(self) -> Option<&'static str> {
        match self {
            Self::Lower => Some("sessionid"),
            Self::Camel => Some("sessionID"),
            Self::Pascal => Some("SessionID"),
            Self::None => None,
        }
    }
}

#[derive(Clone, Copy)]
pub(crate) enum Method {
    Get,
    Head,
    Post,
}

/// POST payload shapes. Pairs keep their order on the wire, which the
/// confirmation batch endpoint requires for its repeated `cid[]`/`ck[]`
/// fields.
#[derive(Clone)]
pub(crate) enum Body {
    None,
    Map(HashMap<String, String>),
    Pairs(Vec<(String, String)>),
}

impl Body {
    /// Stamp the session id under `field`, replacing any identical pair.
    fn stamp(&mut self, field: &str, session_id: &str) {
        match self {
            Self::None => {
                *self = Self::Pairs(vec![(field.to_string(), session_id.to_string())]);
            }
            Self::Map(map) => {
                map.insert(field.to_string(), session_id.to_string());
            }
            Self::Pairs(pairs) => {
                pairs.retain(|(name, value)| !(name == field && value == session_id));
                pairs.push((field.to_string(), session_id.to_string()));
            }
        }
    }

    fn into_form(self) -> Vec<(String, String)> {
        match self {
            Self::None => Vec::new(),
            Self::Map(map) => map.into_iter().collect(),
            Self::Pairs(pairs) => pairs,
        }
    }
}

impl WebHandler {
    pub(crate) async fn execute(
        &self,
        method: Method,
        service: Service,
        path: &str,
        body: Body,
        session: SessionField,
        check_session: bool,
    ) -> Option<(Url, String)> {
        if path.is_empty() || !path.starts_with('/') {
            warn!("refusing malformed request path {path:?}");
            return None;
        }

        let base = self.globals.config().endpoints.url(service).clone();
        let url = match base.join(path) {
            Ok(url) => url,
            Err(err) => {
                warn!("refusing unjoinable request path {path:?}: {err}");
                return None;
            }
        };
        let host = url.host_str().unwrap_or_default().to_string();
        let requested_path = url.path().to_string();

        let mut tries = self.globals.config().max_tries;
        loop {
            if tries == 0 {
                debug!("request to {url} ran out of tries");
                return None;
            }

            if check_session {
                if self.is_session_expired().await == Some(true) {
                    if self.refresh_session().await {
                        tries -= 1;
                        continue;
                    }
                    return None;
                }
            } else {
                // Ride out any in-flight refresh before dispatching.
                drop(self.session_gate.lock().await);
            }

            if !self.wait_initialized().await {
                return None;
            }

            let response = match method {
                Method::Head => self
                    .globals
                    .limit(&host, self.browser.head(url.clone()))
                    .await
                    .map(|final_url| (final_url, String::new())),
                Method::Get => self.globals.limit(&host, self.browser.get(url.clone())).await,
                Method::Post => {
                    let mut body = body.clone();
                    if let Some(field) = session.field_name() {
                        let Some(session_id) = self.browser.cookie_value(&base, "sessionid")
                        else {
                            warn!("no sessionid cookie present for {host}");
                            return None;
                        };
                        body.stamp(field, &session_id);
                    }
                    let form = body.into_form();
                    self.globals
                        .limit(&host, self.browser.post_form(url.clone(), &form))
                        .await
                }
            };

            let Some((final_url, text)) = response else {
                tries -= 1;
                continue;
            };

            if is_session_expired_url(&final_url) {
                if self.refresh_session().await {
                    tries -= 1;
                    continue;
                }
                return None;
            }

            if final_url.path() != requested_path && self.is_self_profile(&final_url) {
                debug!("request to {url} bounced to own profile, retrying");
                tries -= 1;
                continue;
            }

            return Some((final_url, text));
        }
    }

    /// Wait until the handshake has marked the session initialized, polling
    /// once per second up to the connection timeout.
    async fn wait_initialized(&self) -> bool {
        let deadline = Instant::now() + self.globals.config().connection_timeout;
        while !self.initialized.load(Ordering::Relaxed) {
            if Instant::now() >= deadline {
                warn!(
                    "session not initialized within {:?}",
                    self.globals.config().connection_timeout
                );
                return false;
            }
            sleep(Duration::from_secs(1)).await;
        }
        true
    }

    /// GET a page, returning its body text.
    pub async fn get_html(
        &self,
        service: Service,
        path: &str,
        check_session: bool,
    ) -> Option<String> {
        self.execute(
            Method::Get,
            service,
            path,
            Body::None,
            SessionField::None,
            check_session,
        )
        .await
        .map(|(_, text)| text)
    }

    /// GET a JSON document.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        service: Service,
        path: &str,
        check_session: bool,
    ) -> Option<T> {
        let (_, text) = self
            .execute(
                Method::Get,
                service,
                path,
                Body::None,
                SessionField::None,
                check_session,
            )
            .await?;
        match serde_json::from_str(&text) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                warn!("failed to parse JSON from {service:?} {path}: {err}");
                None
            }
        }
    }

    /// GET an XML document.
    pub async fn get_xml<T: DeserializeOwned>(
        &self,
        service: Service,
        path: &str,
        check_session: bool,
    ) -> Option<T> {
        let (_, text) = self
            .execute(
                Method::Get,
                service,
                path,
                Body::None,
                SessionField::None,
                check_session,
            )
            .await?;
        match quick_xml::de::from_str(&text) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                warn!("failed to parse XML from {service:?} {path}: {err}");
                None
            }
        }
    }

    /// HEAD a resource; reports whether the request completed acceptably.
    pub async fn head(&self, service: Service, path: &str, check_session: bool) -> bool {
        self.execute(
            Method::Head,
            service,
            path,
            Body::None,
            SessionField::None,
            check_session,
        )
        .await
        .is_some()
    }

    /// POST a form, returning the response body text.
    pub async fn post_html(
        &self,
        service: Service,
        path: &str,
        form: HashMap<String, String>,
        session: SessionField,
        check_session: bool,
    ) -> Option<String> {
        self.execute(
            Method::Post,
            service,
            path,
            Body::Map(form),
            session,
            check_session,
        )
        .await
        .map(|(_, text)| text)
    }

    /// POST a form, parsing the response as JSON.
    pub async fn post_json<T: DeserializeOwned>(
        &self,
        service: Service,
        path: &str,
        form: HashMap<String, String>,
        session: SessionField,
        check_session: bool,
    ) -> Option<T> {
        let (_, text) = self
            .execute(
                Method::Post,
                service,
                path,
                Body::Map(form),
                session,
                check_session,
            )
            .await?;
        match serde_json::from_str(&text) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                warn!("failed to parse JSON from {service:?} {path}: {err}");
                None
            }
        }
    }

    /// POST an ordered list of pairs, parsing the response as JSON.
    ///
    /// Unlike the map variant this preserves field order and repeated names.
    pub async fn post_json_pairs<T: DeserializeOwned>(
        &self,
        service: Service,
        path: &str,
        form: Vec<(String, String)>,
        session: SessionField,
        check_session: bool,
    ) -> Option<T> {
        let (_, text) = self
            .execute(
                Method::Post,
                service,
                path,
                Body::Pairs(form),
                session,
                check_session,
            )
            .await?;
        match serde_json::from_str(&text) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                warn!("failed to parse JSON from {service:?} {path}: {err}");
                None
            }
        }
    }

    /// POST a form, caring only about completion.
    pub async fn post_void(
        &self,
        service: Service,
        path: &str,
        form: HashMap<String, String>,
        session: SessionField,
        check_session: bool,
    ) -> bool {
        self.execute(
            Method::Post,
            service,
            path,
            Body::Map(form),
            session,
            check_session,
        )
        .await
        .is_some()
    }
}
