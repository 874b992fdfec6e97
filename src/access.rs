//! Access decisions for a resolved link
//!
//! A visit goes through two requests: first without a password, and, if the
//! link is protected, again with the password the visitor typed in. Both
//! requests are answered by [`authorize`], which is a pure function of the
//! record, the supplied password and the current time.

use chrono::{DateTime, Utc};
use tracing::error;

use crate::models::UrlRecord;
use crate::password::verify_password;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Granted,
    Expired,
    PasswordRequired,
    WrongPassword,
}

/// Decide whether a visit to `record` may proceed.
///
/// Expiry wins over every password state.
pub fn authorize(
    record: &UrlRecord,
    supplied_password: Option<&str>,
    now: DateTime<Utc>,
) -> AccessDecision {
    if record.is_expired_at(now) {
        return AccessDecision::Expired;
    }

    let Some(hash) = record.password_hash.as_deref() else {
        return AccessDecision::Granted;
    };

    match supplied_password {
        None | Some("") => AccessDecision::PasswordRequired,
        Some(password) => match verify_password(password, hash) {
            Ok(true) => AccessDecision::Granted,
            Ok(false) => AccessDecision::WrongPassword,
            Err(e) => {
                error!(code = %record.code, error = %e, "stored password hash is unusable");
                AccessDecision::WrongPassword
            }
        },
    }
}
