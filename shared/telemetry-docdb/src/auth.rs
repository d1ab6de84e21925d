//! Master-key request signing

use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{DocDbError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Build the URL-encoded `authorization` header value for one request.
///
/// `date` must be the exact RFC 1123 string sent as `x-ms-date`.
pub fn master_key_token(
    verb: &str,
    resource_type: &str,
    resource_link: &str,
    date: &str,
    key: &[u8],
) -> Result<String> {
    let payload = format!(
        "{}\n{}\n{}\n{}\n\n",
        verb.to_lowercase(),
        resource_type.to_lowercase(),
        resource_link,
        date.to_lowercase()
    );

    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| DocDbError::Configuration(format!("Unusable account key: {}", e)))?;
    mac.update(payload.as_bytes());
    let signature = STANDARD.encode(mac.finalize().into_bytes());

    let token = format!("type=master&ver=1.0&sig={}", signature);
    Ok(urlencoding::encode(&token).into_owned())
}
