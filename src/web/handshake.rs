//! RSA+AES login handshake.
//!
//! `AuthenticateUser` expects a random 32-byte session key encrypted to the
//! universe's published RSA key, and the single-use web nonce sealed with
//! that session key using Steam's symmetric envelope. A successful exchange
//! yields the two login tokens, which become cookies on all three web hosts
//! together with the derived `sessionid` and the timezone offset.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit};
use aes::Aes256;
use anyhow::{anyhow, Context, Result};
use base64::Engine;
use chrono::Local;
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::{BigUint, Pkcs1v15Encrypt, RsaPublicKey};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::sync::atomic::Ordering;
use tokio::time::Instant;
use tracing::warn;
use url::{form_urlencoded, Url};

use super::session::is_session_expired_url;
use super::{Identity, WebHandler};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;

const SESSION_KEY_BYTES: usize = 32;
const PARENTAL_CODE_LENGTH: usize = 4;
const PARENTAL_MAX_TRIES: u8 = 5;

/// 1024-bit modulus of the public-universe login key (exponent 65537).
const PUBLIC_UNIVERSE_MODULUS_HEX: &str = "\
DFEC1AD62C10662C17353A14B07C59117F9DD3D82B7AE3E015CD191E46E87B87\
74A2184631A9031479828EE945A24912A923687389CF69A1B16146BDC1BEBFD6\
011BD881D4DC90FBFE4F527366CB9570D7C58EBA1B7A37905C8A95A2979BA4E7\
9F788A567B3054DFAEC5163AB545EA99F0BB29178C939C11554B1F35C47CC0A9";

/// Steam universes that can carry an authenticated web session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Universe {
    Public,
    Beta,
    Internal,
    Dev,
}

/// The published login RSA key for a universe, when one exists.
fn universe_key(universe: Universe) -> Option<RsaPublicKey> {
    let modulus_hex = match universe {
        Universe::Public => PUBLIC_UNIVERSE_MODULUS_HEX,
        Universe::Beta | Universe::Internal | Universe::Dev => return None,
    };

    let modulus = BigUint::parse_bytes(modulus_hex.as_bytes(), 16)?;
    RsaPublicKey::new(modulus, BigUint::from(65_537u64)).ok()
}

/// Whether a 64-bit SteamID names an individual account.
fn is_individual_account(steam_id: u64) -> bool {
    let universe = steam_id >> 56;
    let account_type = (steam_id >> 52) & 0xF;
    let account_id = steam_id & 0xFFFF_FFFF;
    account_id != 0 && account_type == 1 && (1..=4).contains(&universe)
}

/// Steam's symmetric envelope: a random IV sealed with AES-256-ECB is
/// prepended to the AES-256-CBC/PKCS#7 ciphertext of the payload.
fn symmetric_encrypt(key: &[u8; SESSION_KEY_BYTES], plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut iv = [0u8; 16];
    OsRng.fill_bytes(&mut iv);

    let block_cipher =
        Aes256::new_from_slice(key).map_err(|_| anyhow!("invalid AES key length"))?;
    let mut sealed_iv = GenericArray::clone_from_slice(&iv);
    block_cipher.encrypt_block(&mut sealed_iv);

    let ciphertext = Aes256CbcEnc::new_from_slices(key, &iv)
        .map_err(|_| anyhow!("invalid AES key or IV length"))?
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut sealed = Vec::with_capacity(iv.len() + ciphertext.len());
    sealed.extend_from_slice(&sealed_iv);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Percent-encode raw bytes for a form body.
fn encode_bytes(bytes: &[u8]) -> String {
    form_urlencoded::byte_serialize(bytes).collect()
}

impl WebHandler {
    /// Establish the authenticated web session.
    ///
    /// Single attempt by design: the nonce is single-use, so a failed
    /// handshake needs a fresh nonce before anything can be retried. On
    /// success the handler is initialized, the identity and parental code
    /// are cached for future renewals, and all session cookies are in place.
    pub async fn init(
        &self,
        steam_id: u64,
        universe: Universe,
        web_api_user_nonce: &str,
        parental_code: Option<&str>,
    ) -> bool {
        if !is_individual_account(steam_id) {
            warn!("refusing handshake for non-individual SteamID {steam_id}");
            return false;
        }
        if web_api_user_nonce.is_empty() {
            warn!("refusing handshake with an empty nonce");
            return false;
        }

        let identity = Identity { steam_id, universe };
        match self
            .perform_handshake(identity, web_api_user_nonce, parental_code)
            .await
        {
            Ok(()) => {
                if let Ok(mut slot) = self.identity.lock() {
                    *slot = Some(identity);
                }
                if let Ok(mut slot) = self.parental_code.lock() {
                    *slot = parental_code.map(|code| SecretString::from(code.to_string()));
                }
                true
            }
            Err(err) => {
                warn!("Authentication handshake failed: {err}");
                false
            }
        }
    }

    pub(crate) async fn perform_handshake(
        &self,
        identity: Identity,
        nonce: &str,
        parental_code: Option<&str>,
    ) -> Result<()> {
        let public_key = universe_key(identity.universe)
            .ok_or_else(|| anyhow!("no login RSA key for universe {:?}", identity.universe))?;

        let mut session_key = [0u8; SESSION_KEY_BYTES];
        OsRng.fill_bytes(&mut session_key);

        let encrypted_session_key = public_key
            .encrypt(&mut OsRng, Pkcs1v15Encrypt, &session_key)
            .context("RSA encryption of the session key failed")?;
        let encrypted_login_key = symmetric_encrypt(&session_key, nonce.as_bytes())?;

        let (token, token_secure) = self
            .authenticate_user(identity.steam_id, &encrypted_session_key, &encrypted_login_key)
            .await?;

        self.install_session_cookies(identity.steam_id, &token, &token_secure);

        if let Some(code) = parental_code {
            if code.len() == PARENTAL_CODE_LENGTH {
                self.unlock_parental(code).await?;
            } else {
                warn!("ignoring parental code of unexpected length");
            }
        }

        // Terminal write: the fresh session counts as checked and refreshed.
        let now = Instant::now();
        if let Ok(mut times) = self.times.lock() {
            times.last_check = now;
            times.last_refresh = now;
        }
        self.initialized.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn authenticate_user(
        &self,
        steam_id: u64,
        encrypted_session_key: &[u8],
        encrypted_login_key: &[u8],
    ) -> Result<(String, String)> {
        let url = self
            .globals
            .config()
            .endpoints
            .api
            .join("/ISteamUserAuth/AuthenticateUser/v1/")?;
        let host = url.host_str().unwrap_or_default().to_string();

        let body = format!(
            "steamid={steam_id}&sessionkey={}&encrypted_loginkey={}",
            encode_bytes(encrypted_session_key),
            encode_bytes(encrypted_login_key),
        );

        let (_, text) = self
            .globals
            .limit(&host, self.browser.post_raw_form(url.clone(), body))
            .await
            .ok_or_else(|| anyhow!("{url} - no response"))?;

        let json: Value =
            serde_json::from_str(&text).context("AuthenticateUser returned malformed JSON")?;
        let token = json
            .get("authenticateuser")
            .and_then(|v| v.get("token"))
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| anyhow!("Error parsing JSON response: no token found"))?;
        let token_secure = json
            .get("authenticateuser")
            .and_then(|v| v.get("tokensecure"))
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| anyhow!("Error parsing JSON response: no tokensecure found"))?;

        Ok((token.to_string(), token_secure.to_string()))
    }

    fn install_session_cookies(&self, steam_id: u64, token: &str, token_secure: &str) {
        let session_id =
            base64::engine::general_purpose::STANDARD.encode(steam_id.to_string());
        // The comma stays URL-encoded; that is the form the mobile app sends.
        let timezone_offset = format!("{}%2C0", Local::now().offset().local_minus_utc());

        let endpoints = &self.globals.config().endpoints;
        for url in [&endpoints.community, &endpoints.help, &endpoints.store] {
            self.browser.set_cookie(url, "sessionid", &session_id);
            self.browser.set_cookie(url, "steamLogin", token);
            self.browser.set_cookie(url, "steamLoginSecure", token_secure);
            self.browser.set_cookie(url, "timezoneOffset", &timezone_offset);
        }
    }

    /// Enter the family-view PIN on the community and store fronts.
    async fn unlock_parental(&self, code: &str) -> Result<()> {
        let endpoints = self.globals.config().endpoints.clone();
        let (community, store) = tokio::join!(
            self.unlock_parental_on(&endpoints.community, code),
            self.unlock_parental_on(&endpoints.store, code),
        );

        if community && store {
            Ok(())
        } else {
            Err(anyhow!("parental unlock was rejected"))
        }
    }

    /// One service's unlock POST.
    ///
    /// This runs before the handler is initialized, so it cannot go through
    /// the session-aware executor: it posts directly, retrying self-profile
    /// bounces and transport hiccups, and treating a login redirect as a
    /// hard failure.
    async fn unlock_parental_on(&self, base: &Url, code: &str) -> bool {
        let Some(session_id) = self.browser.cookie_value(base, "sessionid") else {
            warn!("no sessionid cookie for parental unlock on {base}");
            return false;
        };
        let Ok(url) = base.join("/parental/ajaxunlock") else {
            return false;
        };
        let host = url.host_str().unwrap_or_default().to_string();
        let requested_path = url.path().to_string();
        let form = vec![
            ("pin".to_string(), code.to_string()),
            ("sessionid".to_string(), session_id),
        ];

        for _ in 0..PARENTAL_MAX_TRIES {
            let response = self
                .globals
                .limit(&host, self.browser.post_form(url.clone(), &form))
                .await;
            let Some((final_url, _)) = response else {
                continue;
            };
            if is_session_expired_url(&final_url) {
                warn!("parental unlock on {host} bounced to login");
                return false;
            }
            if final_url.path() != requested_path && self.is_self_profile(&final_url) {
                continue;
            }
            return true;
        }
        false
    }

    pub(crate) fn cached_parental_code(&self) -> Option<String> {
        self.parental_code
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(|code| code.expose_secret().clone()))
    }
}
