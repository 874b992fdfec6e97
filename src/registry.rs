//! Short link registry
//!
//! Owns the lifecycle of links: validation on create, code allocation,
//! lookups, hard deletes and purging of expired links.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::codegen::{validate_alias, CodeGenError, CodeGenerator, RESERVED_ALIASES};
use crate::models::{CreateUrlRequest, Expiration, NewUrl, UrlRecord};
use crate::password::process_new_password;
use crate::storage::{Storage, StorageError};

pub const MAX_URL_LENGTH: usize = 2048;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{0}")]
    Validation(String),
    #[error("custom alias '{0}' is already taken")]
    AliasTaken(String),
    #[error("could not allocate a unique short code after {attempts} attempts")]
    Exhausted { attempts: usize },
    #[error("link not found")]
    NotFound,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub struct UrlRegistry {
    storage: Arc<dyn Storage>,
    generator: CodeGenerator,
    clock: Arc<dyn Clock>,
}

impl UrlRegistry {
    pub fn new(storage: Arc<dyn Storage>, generator: CodeGenerator, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            generator,
            clock,
        }
    }

    /// Validate, hash and persist a new link
    pub async fn create(&self, request: CreateUrlRequest) -> Result<UrlRecord, RegistryError> {
        let original_url = validate_url(&request.url)?;

        let expiration = request
            .expiration
            .as_deref()
            .unwrap_or("never")
            .parse::<Expiration>()
            .map_err(RegistryError::Validation)?;

        let alias = request
            .custom_alias
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty());

        if let Some(ref alias) = alias {
            validate_alias(alias).map_err(RegistryError::Validation)?;
        }

        let password_hash = match request.password.filter(|p| !p.is_empty()) {
            Some(password) => tokio::task::spawn_blocking(move || {
                process_new_password(Some(&password))
            })
            .await
            .map_err(|e| RegistryError::Storage(e.into()))?
            .map_err(|e| RegistryError::Storage(e.into()))?,
            None => None,
        };

        let now = self.clock.now();
        let template = NewUrl {
            id: Uuid::new_v4().to_string(),
            code: String::new(),
            original_url,
            password_hash,
            expiration,
            expires_at: expiration.expires_at(now).map(|t| t.timestamp_millis()),
            created_at: now.timestamp_millis(),
            custom_alias: alias.is_some(),
        };

        let record = match alias {
            Some(alias) => {
                let new_url = NewUrl {
                    code: alias.clone(),
                    ..template
                };
                match self.storage.insert_url(&new_url).await {
                    Ok(record) => record,
                    Err(StorageError::Conflict) => return Err(RegistryError::AliasTaken(alias)),
                    Err(StorageError::Other(e)) => return Err(RegistryError::Storage(e)),
                }
            }
            None => {
                let storage = &self.storage;
                let template = &template;
                self.generator
                    .generate(|code| async move {
                        if RESERVED_ALIASES.contains(&code.as_str()) {
                            return Ok(None);
                        }
                        let candidate = NewUrl {
                            code,
                            ..template.clone()
                        };
                        match storage.insert_url(&candidate).await {
                            Ok(record) => Ok(Some(record)),
                            Err(StorageError::Conflict) => Ok(None),
                            Err(StorageError::Other(e)) => Err(e),
                        }
                    })
                    .await
                    .map_err(|e| match e {
                        CodeGenError::Exhausted { attempts } => {
                            RegistryError::Exhausted { attempts }
                        }
                        CodeGenError::Claim(e) => RegistryError::Storage(e),
                    })?
            }
        };

        info!(
            id = %record.id,
            code = %record.code,
            expiration = %record.expiration,
            protected = record.is_password_protected(),
            "created short link"
        );

        Ok(record)
    }

    /// Look up a link by code, whether or not it has expired
    pub async fn get(&self, code: &str) -> Result<UrlRecord, RegistryError> {
        self.storage
            .get_by_code(code)
            .await?
            .ok_or(RegistryError::NotFound)
    }

    pub async fn get_by_id(&self, id: &str) -> Result<UrlRecord, RegistryError> {
        self.storage
            .get_by_id(id)
            .await?
            .ok_or(RegistryError::NotFound)
    }

    /// All links, most recent first
    pub async fn list(&self) -> Result<Vec<UrlRecord>, RegistryError> {
        Ok(self.storage.list().await?)
    }

    /// Hard delete; the code stops resolving immediately
    pub async fn delete(&self, id: &str) -> Result<(), RegistryError> {
        match self.storage.delete(id).await? {
            Some(record) => {
                info!(id = %record.id, code = %record.code, "deleted short link");
                Ok(())
            }
            None => Err(RegistryError::NotFound),
        }
    }

    /// Remove every expired link, freeing its code
    pub async fn purge_expired(&self) -> Result<u64, RegistryError> {
        let purged = self
            .storage
            .purge_expired(self.clock.now().timestamp_millis())
            .await?;

        if purged > 0 {
            info!(purged, "purged expired short links");
        } else {
            debug!("no expired short links to purge");
        }

        Ok(purged)
    }
}

/// Accept absolute http(s) URLs only; returns the trimmed input
pub fn validate_url(raw: &str) -> Result<String, RegistryError> {
    let url = raw.trim();

    if url.is_empty() {
        return Err(RegistryError::Validation("URL cannot be empty".to_string()));
    }

    if url.len() > MAX_URL_LENGTH {
        return Err(RegistryError::Validation(format!(
            "URL must be at most {MAX_URL_LENGTH} characters"
        )));
    }

    let parsed = url::Url::parse(url)
        .map_err(|e| RegistryError::Validation(format!("Invalid URL format: {e}")))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(RegistryError::Validation(format!(
            "Invalid protocol: {}. Only http:// and https:// are allowed",
            parsed.scheme()
        )));
    }

    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(RegistryError::Validation("URL must include a host".to_string()));
    }

    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url() {
        assert_eq!(
            validate_url("  https://example.com/a?b=c ").unwrap(),
            "https://example.com/a?b=c"
        );
        assert!(validate_url("").is_err());
        assert!(validate_url("example.com").is_err());
        assert!(validate_url("javascript:alert(1)").is_err());
        assert!(validate_url("ftp://example.com/file").is_err());
        assert!(validate_url(&format!("https://example.com/{}", "a".repeat(MAX_URL_LENGTH))).is_err());
    }
}
