//! HMAC-SHA1 derivations behind guard codes and confirmation signatures.

use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// Steam's code alphabet. Visually ambiguous symbols are excluded.
const CODE_CHARACTERS: &[u8; 26] = b"23456789BCDFGHJKMNPQRTVWXY";

/// Length of a login code.
const CODE_DIGITS: usize = 5;

/// Seconds each login code stays valid.
pub const CODE_PERIOD: u32 = 30;

/// Confirmation tags longer than this are truncated before signing.
const MAX_TAG_BYTES: usize = 32;

/// Derive the five-character login code for the window containing `time`.
///
/// This is Steam's variant of HOTP: HMAC-SHA1 over the big-endian window
/// counter, dynamic truncation, then five base-26 symbols from the fixed
/// alphabet. Returns `None` when `time` is zero or `shared_secret` is not
/// valid base64.
#[must_use]
pub fn generate_code(shared_secret: &str, time: u32) -> Option<String> {
    if time == 0 {
        return None;
    }

    let key = base64::engine::general_purpose::STANDARD
        .decode(shared_secret)
        .ok()?;

    let counter = u64::from(time / CODE_PERIOD).to_be_bytes();
    let mut mac = HmacSha1::new_from_slice(&key).ok()?;
    mac.update(&counter);
    let digest = mac.finalize().into_bytes();

    let offset = usize::from(digest[19] & 0x0F);
    let window = digest.get(offset..offset + 4)?;
    let mut value =
        u32::from_be_bytes([window[0], window[1], window[2], window[3]]) & 0x7FFF_FFFF;

    let mut code = String::with_capacity(CODE_DIGITS);
    for _ in 0..CODE_DIGITS {
        code.push(char::from(
            CODE_CHARACTERS[value as usize % CODE_CHARACTERS.len()],
        ));
        value /= CODE_CHARACTERS.len() as u32;
    }

    Some(code)
}

/// Sign a confirmation request: base64 of HMAC-SHA1 over the big-endian
/// `time` followed by at most [`MAX_TAG_BYTES`] bytes of `tag`.
///
/// Returns `None` when `identity_secret` is not valid base64.
#[must_use]
pub fn confirmation_hash(identity_secret: &str, time: u32, tag: &str) -> Option<String> {
    let key = base64::engine::general_purpose::STANDARD
        .decode(identity_secret)
        .ok()?;

    let tag_bytes = tag.as_bytes();
    let tag_len = tag_bytes.len().min(MAX_TAG_BYTES);

    let mut buffer = Vec::with_capacity(8 + tag_len);
    buffer.extend_from_slice(&u64::from(time).to_be_bytes());
    buffer.extend_from_slice(&tag_bytes[..tag_len]);

    let mut mac = HmacSha1::new_from_slice(&key).ok()?;
    mac.update(&buffer);
    let digest = mac.finalize().into_bytes();

    Some(base64::engine::general_purpose::STANDARD.encode(digest))
}
