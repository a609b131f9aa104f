//! Guard engine: login codes and confirmation signatures.
//!
//! Everything here is deterministic. Codes and hashes are pure functions of
//! the account secrets and the corrected Steam server time; nothing in this
//! module touches the network.

pub mod crypto;
pub mod device;

pub use device::is_valid_device_id;

use secrecy::{ExposeSecret, SecretString};

/// The per-account secrets of an enrolled mobile authenticator.
///
/// `shared_secret` feeds login-code generation, `identity_secret` feeds
/// confirmation signing. Both are the base64 blobs Steam hands out at
/// enrollment time and are immutable after construction; only the device id
/// can be corrected afterwards, and only with a value that validates.
pub struct Authenticator {
    shared_secret: SecretString,
    identity_secret: SecretString,
    device_id: String,
}

impl Authenticator {
    #[must_use]
    pub fn new(shared_secret: String, identity_secret: String, device_id: String) -> Self {
        Self {
            shared_secret: SecretString::from(shared_secret),
            identity_secret: SecretString::from(identity_secret),
            device_id,
        }
    }

    /// Five-character login code for the 30-second window containing `time`.
    ///
    /// Returns `None` when `time` is zero or the shared secret is not valid
    /// base64.
    #[must_use]
    pub fn generate_code(&self, time: u32) -> Option<String> {
        crypto::generate_code(self.shared_secret.expose_secret(), time)
    }

    /// Base64 HMAC binding a confirmation request to `time` and `tag`.
    #[must_use]
    pub fn confirmation_hash(&self, time: u32, tag: &str) -> Option<String> {
        crypto::confirmation_hash(self.identity_secret.expose_secret(), time, tag)
    }

    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    #[must_use]
    pub fn has_valid_device_id(&self) -> bool {
        device::is_valid_device_id(&self.device_id)
    }

    /// Replace the device id. The new value is applied only when it passes
    /// validation; the return value reports whether it did.
    pub fn correct_device_id(&mut self, device_id: &str) -> bool {
        if !device::is_valid_device_id(device_id) {
            return false;
        }
        self.device_id = device_id.to_string();
        true
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("shared_secret", &"***")
            .field("identity_secret", &"***")
            .field("device_id", &self.device_id)
            .finish()
    }
}
