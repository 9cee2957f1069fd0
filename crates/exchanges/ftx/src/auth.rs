use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of `payload` keyed with `secret`.
pub(crate) fn sign(secret: &str, payload: &str) -> Result<String, hmac::digest::InvalidLength> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// REST signature payload: millisecond timestamp, method, path with query, body.
pub(crate) fn rest_payload(ts_ms: i64, method: &str, path: &str, body: &str) -> String {
    format!("{}{}{}{}", ts_ms, method, path, body)
}

pub(crate) fn login_payload(ts_ms: i64) -> String {
    format!("{}websocket_login", ts_ms)
}
