//! Public API credentials.
//!
//! `Basic base64(pk:sk)` grants full access to the key's project;
//! `Bearer pk` alone grants the restricted, publishable-only scope.

use base64::Engine;
use chrono::Utc;

use crate::{api_key, data::Storage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    All,
    Restricted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessScope {
    pub project_id: String,
    pub access_level: AccessLevel,
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("No authorization header")]
    Missing,

    #[error("Invalid authorization header")]
    Malformed,

    #[error("Invalid public key")]
    UnknownKey,

    #[error("Invalid credentials")]
    WrongSecret,

    #[error("API key expired")]
    Expired,

    #[error("Error while verifying credentials: {0}")]
    Lookup(anyhow::Error),
}

#[derive(Debug, PartialEq, Eq)]
enum Credential {
    Secret { public_key: String, secret_key: String },
    Publishable { public_key: String },
}

fn parse(header: &str) -> Result<Credential, CredentialError> {
    if let Some(encoded) = header.strip_prefix("Basic ") {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|_| CredentialError::Malformed)?;
        let decoded =
            String::from_utf8(decoded).map_err(|_| CredentialError::Malformed)?;
        let (public_key, secret_key) =
            decoded.split_once(':').ok_or(CredentialError::Malformed)?;
        if public_key.is_empty() || secret_key.is_empty() {
            return Err(CredentialError::Malformed);
        }
        Ok(Credential::Secret {
            public_key: public_key.to_string(),
            secret_key: secret_key.to_string(),
        })
    } else if let Some(public_key) = header.strip_prefix("Bearer ") {
        let public_key = public_key.trim();
        if public_key.is_empty() {
            return Err(CredentialError::Malformed);
        }
        Ok(Credential::Publishable {
            public_key: public_key.to_string(),
        })
    } else {
        Err(CredentialError::Malformed)
    }
}

/// Resolves the `Authorization` header value to a project scope. A
/// successful lookup bumps the key's last-used time.
#[tracing::instrument(skip_all)]
pub async fn resolve(
    storage: &Storage,
    authorization: Option<&str>,
) -> Result<AccessScope, CredentialError> {
    let header = authorization.ok_or(CredentialError::Missing)?;
    let credential = parse(header)?;
    let (public_key, secret_key, access_level) = match &credential {
        Credential::Secret {
            public_key,
            secret_key,
        } => (public_key, Some(secret_key), AccessLevel::All),
        Credential::Publishable { public_key } => {
            (public_key, None, AccessLevel::Restricted)
        }
    };
    let key = storage
        .api_key_by_publishable(public_key)
        .await
        .map_err(CredentialError::Lookup)?
        .ok_or(CredentialError::UnknownKey)?;
    if let Some(secret_key) = secret_key {
        if !api_key::verify_secret_key(secret_key, &key.hashed_secret_key) {
            return Err(CredentialError::WrongSecret);
        }
    }
    let now = Utc::now();
    if key.expires_at.is_some_and(|expires_at| expires_at <= now) {
        return Err(CredentialError::Expired);
    }
    if let Err(error) = storage.touch_api_key(&key.id, now).await {
        tracing::warn!(?error, key_id = key.id, "Failed to record key use.");
    }
    tracing::debug!(
        project_id = key.project_id,
        ?access_level,
        "Resolved access scope."
    );
    Ok(AccessScope {
        project_id: key.project_id,
        access_level,
    })
}

#[cfg(test)]
mod tests {
    use base64::Engine;
    use chrono::{Duration, Utc};

    use crate::data::tests::storage;

    use super::*;

    fn basic(pk: &str, sk: &str) -> String {
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(format!("{pk}:{sk}"));
        format!("Basic {encoded}")
    }

    #[test]
    fn parses_both_schemes() {
        assert_eq!(
            parse(&basic("pk", "sk")).unwrap(),
            Credential::Secret {
                public_key: "pk".to_string(),
                secret_key: "sk".to_string()
            }
        );
        assert_eq!(
            parse("Bearer pk-lf-1").unwrap(),
            Credential::Publishable {
                public_key: "pk-lf-1".to_string()
            }
        );
    }

    #[test]
    fn rejects_garbage() {
        for header in ["", "Token x", "Basic !!!", "Bearer ", basic("pk", "").as_str()]
        {
            assert!(
                matches!(parse(header), Err(CredentialError::Malformed)),
                "{header:?}"
            );
        }
    }

    #[tokio::test]
    async fn resolves_secret_and_publishable_keys() {
        let (_dir, storage) = storage().await;
        storage.insert_project("p1", "P").await.unwrap();
        let key = storage.create_api_key("p1", None).await.unwrap();

        let header = basic(&key.publishable_key, &key.secret_key);
        let scope = resolve(&storage, Some(&header)).await.unwrap();
        assert_eq!(scope.project_id, "p1");
        assert_eq!(scope.access_level, AccessLevel::All);

        let header = format!("Bearer {}", key.publishable_key);
        let scope = resolve(&storage, Some(&header)).await.unwrap();
        assert_eq!(scope.access_level, AccessLevel::Restricted);

        let listed = storage.list_api_keys("p1").await.unwrap();
        assert!(listed[0].last_used_at.is_some());
    }

    #[tokio::test]
    async fn rejects_wrong_unknown_and_expired() {
        let (_dir, storage) = storage().await;
        storage.insert_project("p1", "P").await.unwrap();
        let key = storage.create_api_key("p1", None).await.unwrap();

        assert!(matches!(
            resolve(&storage, None).await,
            Err(CredentialError::Missing)
        ));
        let header = basic(&key.publishable_key, "sk-lf-wrong");
        assert!(matches!(
            resolve(&storage, Some(&header)).await,
            Err(CredentialError::WrongSecret)
        ));
        let header = basic("pk-lf-unknown", &key.secret_key);
        assert!(matches!(
            resolve(&storage, Some(&header)).await,
            Err(CredentialError::UnknownKey)
        ));

        storage
            .expire_api_key(&key.id, Utc::now() - Duration::hours(1))
            .await
            .unwrap();
        let header = basic(&key.publishable_key, &key.secret_key);
        assert!(matches!(
            resolve(&storage, Some(&header)).await,
            Err(CredentialError::Expired)
        ));
    }
}
