//! Resolves short codes to their targets and records granted visits

use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::access::{authorize, AccessDecision};
use crate::analytics::{ClickEventPipeline, RawClick};
use crate::clock::Clock;
use crate::registry::{RegistryError, UrlRegistry};

/// Outcome of a resolution attempt, as seen by the visitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Redirect(String),
    PasswordRequired,
    /// Unknown, deleted and expired links look the same from outside
    NotFoundOrExpired,
    WrongPassword,
}

/// Request-level facts about the visitor, captured for analytics
#[derive(Debug, Clone)]
pub struct Visitor {
    pub ip: IpAddr,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
}

pub struct RedirectResolver {
    registry: Arc<UrlRegistry>,
    pipeline: Arc<ClickEventPipeline>,
    clock: Arc<dyn Clock>,
}

impl RedirectResolver {
    pub fn new(
        registry: Arc<UrlRegistry>,
        pipeline: Arc<ClickEventPipeline>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            pipeline,
            clock,
        }
    }

    pub async fn resolve(
        &self,
        code: &str,
        password: Option<String>,
        visitor: Visitor,
    ) -> Result<Resolution, RegistryError> {
        let record = match self.registry.get(code).await {
            Ok(record) => record,
            Err(RegistryError::NotFound) => {
                debug!(%code, "unknown short code");
                return Ok(Resolution::NotFoundOrExpired);
            }
            Err(e) => return Err(e),
        };

        let now = self.clock.now();

        // Password verification is CPU heavy; keep it off the async workers
        let decision = if record.is_password_protected() && password.is_some() {
            let record = record.clone();
            tokio::task::spawn_blocking(move || authorize(&record, password.as_deref(), now))
                .await
                .map_err(|e| RegistryError::Storage(e.into()))?
        } else {
            authorize(&record, password.as_deref(), now)
        };

        let resolution = match decision {
            AccessDecision::Granted => {
                self.pipeline.submit(RawClick {
                    url_id: record.id.clone(),
                    timestamp: now,
                    client_ip: visitor.ip,
                    user_agent: visitor.user_agent,
                    referrer: visitor.referrer,
                });
                Resolution::Redirect(record.original_url)
            }
            AccessDecision::Expired => {
                debug!(%code, "short code has expired");
                Resolution::NotFoundOrExpired
            }
            AccessDecision::PasswordRequired => Resolution::PasswordRequired,
            AccessDecision::WrongPassword => {
                warn!(%code, "wrong password for protected link");
                Resolution::WrongPassword
            }
        };

        Ok(resolution)
    }
}
