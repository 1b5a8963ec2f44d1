//! Request authentication: captcha tokens, HMAC-signed admin timestamps,
//! storefront webhook signatures and the SMS provider's shared token.

use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use loam_core::{config::Secret, notify::CaptchaVerifier};
use sha2::{Digest, Sha256};

use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// How far an admin timestamp may drift from now, in seconds.
pub const ADMIN_WINDOW_SECS: i64 = 600;

/// Header carrying the base64 body signature of a storefront webhook.
pub const SIGNATURE_HEADER: &str = "x-shopify-hmac-sha256";

fn mac(key: &Secret) -> Result<HmacSha256> {
  if key.is_empty() {
    return Err(Error::Unauthorized);
  }
  HmacSha256::new_from_slice(key.expose().as_bytes()).map_err(|_| Error::Unauthorized)
}

pub async fn verify_captcha(
  verifier: &dyn CaptchaVerifier,
  token: &str,
  remote_ip: &str,
) -> Result<()> {
  if verifier.verify(token, Some(remote_ip)).await? {
    Ok(())
  } else {
    Err(Error::Captcha)
  }
}

/// Check `signature` (hex HMAC-SHA256 of the decimal unix `timestamp`) and
/// that the timestamp is within ten minutes of `now`.
pub fn verify_admin(key: &Secret, timestamp: &str, signature: &str, now: DateTime<Utc>) -> Result<()> {
  let at: i64 = timestamp.trim().parse().map_err(|_| Error::Unauthorized)?;
  if (now.timestamp() - at).abs() > ADMIN_WINDOW_SECS {
    return Err(Error::Unauthorized);
  }
  let expected = hex::decode(signature.trim()).map_err(|_| Error::Unauthorized)?;
  let mut mac = mac(key)?;
  mac.update(timestamp.trim().as_bytes());
  mac.verify_slice(&expected).map_err(|_| Error::Unauthorized)
}

/// Sign a timestamp the way staff tooling does.
pub fn sign_admin(key: &Secret, timestamp: &str) -> Result<String> {
  let mut mac = mac(key)?;
  mac.update(timestamp.as_bytes());
  Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check the base64 HMAC-SHA256 signature of a raw webhook body.
pub fn verify_webhook(secret: &Secret, body: &[u8], signature: Option<&str>) -> Result<()> {
  let signature = signature.ok_or(Error::Unauthorized)?;
  let expected = B64.decode(signature.trim()).map_err(|_| Error::Unauthorized)?;
  let mut mac = mac(secret)?;
  mac.update(body);
  mac.verify_slice(&expected).map_err(|_| Error::Unauthorized)
}

pub fn sign_webhook(secret: &Secret, body: &[u8]) -> Result<String> {
  let mut mac = mac(secret)?;
  mac.update(body);
  Ok(B64.encode(mac.finalize().into_bytes()))
}

/// Constant-time comparison of a shared token, by digest.
pub fn verify_token(expected: &Secret, given: Option<&str>) -> Result<()> {
  let given = given.ok_or(Error::Unauthorized)?;
  if expected.is_empty() {
    return Err(Error::Unauthorized);
  }
  let (a, b) = (Sha256::digest(expected.expose()), Sha256::digest(given));
  let diff = a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y));
  if diff == 0 { Ok(()) } else { Err(Error::Unauthorized) }
}
