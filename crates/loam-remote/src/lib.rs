//! HTTP clients for every external service the hub talks to, and the
//! process-wide rate limiter they share.
//!
//! Every client classifies failures as [`RemoteError`] so callers can tell a
//! throttled or unavailable service (retry next cycle) from a rejected
//! payload (log and skip).
//!
//! [`RemoteError`]: loam_core::remote::RemoteError

mod http;

pub mod captcha;
pub mod error;
pub mod limiter;
pub mod mail;
pub mod printer;
pub mod sheets;
pub mod sms;
pub mod storage;
pub mod storefront;

pub use captcha::Recaptcha;
pub use error::{Error, Result};
pub use limiter::RateLimiter;
pub use mail::HttpMailer;
pub use printer::SpoolPrinter;
pub use sheets::SheetsClient;
pub use sms::TwilioSms;
pub use storage::WebDavStorage;
pub use storefront::HttpStorefront;

#[cfg(test)]
mod tests;
