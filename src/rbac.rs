use std::fmt;

use crate::auth::SessionUser;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, utoipa::ToSchema,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Owner,
    Admin,
    Member,
    Viewer,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OWNER" => Some(Self::Owner),
            "ADMIN" => Some(Self::Admin),
            "MEMBER" => Some(Self::Member),
            "VIEWER" => Some(Self::Viewer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "OWNER",
            Self::Admin => "ADMIN",
            Self::Member => "MEMBER",
            Self::Viewer => "VIEWER",
        }
    }

    fn scopes(&self) -> &'static [Scope] {
        match self {
            Self::Owner | Self::Admin => &[
                Scope::ApiKeysRead,
                Scope::ApiKeysCreate,
                Scope::ApiKeysDelete,
                Scope::ScoresCud,
            ],
            Self::Member => &[Scope::ScoresCud],
            Self::Viewer => &[],
        }
    }

    pub fn has(&self, scope: Scope) -> bool {
        self.scopes().contains(&scope)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    ApiKeysRead,
    ApiKeysCreate,
    ApiKeysDelete,
    ScoresCud,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ApiKeysRead => "apiKeys:read",
            Self::ApiKeysCreate => "apiKeys:create",
            Self::ApiKeysDelete => "apiKeys:delete",
            Self::ScoresCud => "scores:CUD",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("User does not have access to this resource or action")]
pub struct AccessDenied;

pub fn throw_if_no_access(
    user: &SessionUser,
    project_id: &str,
    scope: Scope,
) -> Result<(), AccessDenied> {
    match user.role_in(project_id) {
        Some(role) if role.has(scope) => Ok(()),
        role => {
            tracing::warn!(
                uid = user.id,
                project_id,
                ?role,
                %scope,
                "Access denied."
            );
            Err(AccessDenied)
        }
    }
}
