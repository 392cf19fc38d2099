//! Session tokens for the management API.
//!
//! Tokens are HS256 JWTs minted elsewhere (or by `tracelens jwt`). The
//! subject is resolved against the `users` table on every request, so a
//! token outliving its user is worthless.

use std::time::{Duration, SystemTime, SystemTimeError, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};

use crate::{conf, rbac::Role};

#[derive(serde::Serialize, serde::Deserialize, Debug, PartialEq)]
pub struct Claims {
    pub sub: String,
    aud: String,
    iss: String,
    exp: u64,
}

impl Claims {
    pub fn new(
        sub: &str,
        ttl: Duration,
        jwt_conf: &conf::Jwt,
    ) -> Result<Self, SystemTimeError> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?;
        let exp = now.saturating_add(ttl).as_secs();
        Ok(Self {
            sub: sub.to_string(),
            aud: jwt_conf.audience.clone(),
            iss: jwt_conf.issuer.clone(),
            exp,
        })
    }

    pub fn to_str(
        &self,
        jwt_conf: &conf::Jwt,
    ) -> jsonwebtoken::errors::Result<String> {
        jsonwebtoken::encode(
            &Header::default(),
            self,
            &EncodingKey::from_secret(jwt_conf.secret.as_bytes()),
        )
    }

    pub fn from_str(
        str: &str,
        jwt_conf: &conf::Jwt,
    ) -> jsonwebtoken::errors::Result<Self> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0; // "exp" should mean what it says.
        validation.set_audience(&[&jwt_conf.audience]);
        validation.set_issuer(&[&jwt_conf.issuer]);
        let key = DecodingKey::from_secret(jwt_conf.secret.as_bytes());
        jsonwebtoken::decode::<Self>(str, &key, &validation)
            .map(|data| data.claims)
    }
}

/// The signed-in user, with the projects they belong to.
#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub struct SessionUser {
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub projects: Vec<ProjectMembership>,
}

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub struct ProjectMembership {
    pub id: String,
    pub name: String,
    pub role: Role,
}

impl SessionUser {
    pub fn role_in(&self, project_id: &str) -> Option<Role> {
        self.projects
            .iter()
            .find(|p| p.id == project_id)
            .map(|p| p.role)
    }

    pub fn is_member_of(&self, project_id: &str) -> bool {
        self.role_in(project_id).is_some()
    }
}
