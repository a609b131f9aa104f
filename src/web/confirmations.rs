//! Mobile confirmations.
//!
//! Listing scrapes the mobile confirmation page; acting uses the batch
//! `multiajaxop` endpoint with a per-item `ajaxop` fallback for the batches
//! Steam drops under load. Every request carries the device id and a
//! time-bound confirmation hash.

use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use tracing::warn;
use url::form_urlencoded;

use super::executor::SessionField;
use super::WebHandler;
use crate::globals::Service;
use crate::guard::Authenticator;

const CONFIRMATION_TAG: &str = "conf";
const MOBILE_CLIENT: &str = "android";

/// What a pending confirmation gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationKind {
    Generic,
    Trade,
    Market,
    PhoneNumberChange,
    AccountRecovery,
}

impl ConfirmationKind {
    /// Wire value 4 is deliberately undefined and rejected along with
    /// anything else unknown.
    fn from_wire(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::Generic),
            2 => Some(Self::Trade),
            3 => Some(Self::Market),
            5 => Some(Self::PhoneNumberChange),
            6 => Some(Self::AccountRecovery),
            _ => None,
        }
    }
}

/// One pending server-side action awaiting mobile approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub id: u64,
    pub key: u64,
    pub creator: u64,
    pub kind: ConfirmationKind,
}

#[derive(Debug, Deserialize)]
struct BooleanResponse {
    #[serde(default)]
    success: bool,
}

/// Extract confirmations from the mobile listing page.
///
/// A page without entries is a valid empty listing. An entry with a missing
/// or invalid field voids the whole listing, since acting on half-parsed
/// data could approve the wrong thing.
pub(crate) fn parse_confirmations(html: &str) -> Option<Vec<Confirmation>> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("div.mobileconf_list_entry").ok()?;

    let mut confirmations = Vec::new();
    for entry in document.select(&selector) {
        let id = attribute_u64(&entry, "data-confid")?;
        let key = attribute_u64(&entry, "data-key")?;
        let creator = attribute_u64(&entry, "data-creator")?;
        let kind = entry
            .value()
            .attr("data-type")?
            .parse::<u64>()
            .ok()
            .and_then(ConfirmationKind::from_wire)?;

        confirmations.push(Confirmation {
            id,
            key,
            creator,
            kind,
        });
    }

    Some(confirmations)
}

fn attribute_u64(entry: &ElementRef<'_>, name: &str) -> Option<u64> {
    let value = entry.value().attr(name)?.parse::<u64>().ok()?;
    (value != 0).then_some(value)
}

fn confirmation_list_path(steam_id: u64, hash: &str, device_id: &str, time: u32) -> String {
    let mut query = form_urlencoded::Serializer::new(String::new());
    query
        .append_pair("a", &steam_id.to_string())
        .append_pair("k", hash)
        .append_pair("l", "english")
        .append_pair("m", MOBILE_CLIENT)
        .append_pair("p", device_id)
        .append_pair("t", &time.to_string())
        .append_pair("tag", CONFIRMATION_TAG);
    format!("/mobileconf/conf?{}", query.finish())
}

fn confirmation_op_path(
    steam_id: u64,
    confirmation: &Confirmation,
    hash: &str,
    device_id: &str,
    time: u32,
    operation: &str,
) -> String {
    let mut query = form_urlencoded::Serializer::new(String::new());
    query
        .append_pair("a", &steam_id.to_string())
        .append_pair("cid", &confirmation.id.to_string())
        .append_pair("ck", &confirmation.key.to_string())
        .append_pair("k", hash)
        .append_pair("l", "english")
        .append_pair("m", MOBILE_CLIENT)
        .append_pair("op", operation)
        .append_pair("p", device_id)
        .append_pair("t", &time.to_string())
        .append_pair("tag", CONFIRMATION_TAG);
    format!("/mobileconf/ajaxop?{}", query.finish())
}

impl WebHandler {
    /// List pending mobile confirmations.
    ///
    /// Needs a valid device id and an obtainable server time. Listings are
    /// spaced by the process-wide confirmations gate. Returns `None` when
    /// the listing could not be fetched or parsed; an account with nothing
    /// pending yields an empty vector.
    pub async fn confirmations(&self, authenticator: &Authenticator) -> Option<Vec<Confirmation>> {
        if !authenticator.has_valid_device_id() {
            warn!("cannot list confirmations without a valid device id");
            return None;
        }
        let Some(steam_id) = self.steam_id() else {
            warn!("cannot list confirmations before the session is initialized");
            return None;
        };

        let time = self.globals.time().steam_time(self.browser.client()).await;
        if time == 0 {
            return None;
        }
        let hash = authenticator.confirmation_hash(time, CONFIRMATION_TAG)?;

        self.globals.confirmations_gate().await;

        let path = confirmation_list_path(steam_id, &hash, authenticator.device_id(), time);
        let html = self.get_html(Service::Community, &path, true).await?;
        parse_confirmations(&html)
    }

    /// Approve (`accept`) or cancel the given confirmations.
    ///
    /// Tries the batch endpoint first. When Steam reports a failed batch,
    /// the items are retried one at a time in order; per-item verdicts are
    /// ignored and only a transport failure aborts the sweep. Retried items
    /// are safe: the server treats each confirmation id idempotently.
    pub async fn handle_confirmations(
        &self,
        authenticator: &Authenticator,
        confirmations: &[Confirmation],
        accept: bool,
    ) -> bool {
        if confirmations.is_empty() {
            return true;
        }
        if !authenticator.has_valid_device_id() {
            warn!("cannot handle confirmations without a valid device id");
            return false;
        }
        let Some(steam_id) = self.steam_id() else {
            warn!("cannot handle confirmations before the session is initialized");
            return false;
        };

        let time = self.globals.time().steam_time(self.browser.client()).await;
        if time == 0 {
            return false;
        }
        let Some(hash) = authenticator.confirmation_hash(time, CONFIRMATION_TAG) else {
            return false;
        };
        let operation = if accept { "allow" } else { "cancel" };

        let mut form: Vec<(String, String)> = vec![
            ("a".to_string(), steam_id.to_string()),
            ("k".to_string(), hash.clone()),
            ("m".to_string(), MOBILE_CLIENT.to_string()),
            ("op".to_string(), operation.to_string()),
            ("p".to_string(), authenticator.device_id().to_string()),
            ("t".to_string(), time.to_string()),
            ("tag".to_string(), CONFIRMATION_TAG.to_string()),
        ];
        for confirmation in confirmations {
            form.push(("cid[]".to_string(), confirmation.id.to_string()));
            form.push(("ck[]".to_string(), confirmation.key.to_string()));
        }

        let response: Option<BooleanResponse> = self
            .post_json_pairs(
                Service::Community,
                "/mobileconf/multiajaxop",
                form,
                SessionField::Lower,
                true,
            )
            .await;
        let Some(response) = response else {
            return false;
        };
        if response.success {
            return true;
        }

        // Known flakiness under load: the batch reports failure even though
        // individual operations would succeed.
        warn!("batch confirmation request failed, falling back to per-item requests");
        for confirmation in confirmations {
            let path = confirmation_op_path(
                steam_id,
                confirmation,
                &hash,
                authenticator.device_id(),
                time,
                operation,
            );
            let response: Option<BooleanResponse> =
                self.get_json(Service::Community, &path, true).await;
            if response.is_none() {
                return false;
            }
        }
        true
    }
}
