use crate::errors::{AppError, AppResult};
use axum::http::HeaderMap;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Instructor,
    Student,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Instructor => "instructor",
            Self::Student => "student",
        }
    }
}

/// The authenticated caller's server-side session state. The class id is only
/// ever taken from here, never from request input, so a caller cannot scope a
/// reporting query into someone else's class.
#[derive(Debug, Clone, Serialize)]
pub struct Auth {
    pub user_id: i64,
    pub class_id: i64,
    pub class_name: String,
    pub role: Role,
    pub is_admin: bool,
}

/// Boundary to the session/auth machinery, which lives outside this crate.
pub trait AuthProvider: Send + Sync {
    fn authenticate(&self, headers: &HeaderMap) -> AppResult<Auth>;
}

/// Reference provider for deployments where a trusted front proxy injects the
/// resolved session as headers. Anything production-grade replaces this.
pub struct HeaderAuth;

impl AuthProvider for HeaderAuth {
    fn authenticate(&self, headers: &HeaderMap) -> AppResult<Auth> {
        let user_id = header_i64(headers, "x-session-user")?;
        let class_id = header_i64(headers, "x-session-class")?;
        let class_name = header_str(headers, "x-session-class-name")?;
        let role = match header_str(headers, "x-session-role")?.as_str() {
            "instructor" => Role::Instructor,
            _ => Role::Student,
        };
        let is_admin = headers
            .get("x-session-admin")
            .is_some_and(|v| v.to_str().unwrap_or("") == "1");

        Ok(Auth {
            user_id,
            class_id,
            class_name,
            role,
            is_admin,
        })
    }
}

/// Fixed-identity provider used by tests.
pub struct StaticAuth(pub Auth);

impl AuthProvider for StaticAuth {
    fn authenticate(&self, _headers: &HeaderMap) -> AppResult<Auth> {
        Ok(self.0.clone())
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> AppResult<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
        .ok_or_else(|| AppError::NotFound(format!("missing session header: {}", name)))
}

fn header_i64(headers: &HeaderMap, name: &str) -> AppResult<i64> {
    header_str(headers, name)?
        .parse()
        .map_err(|_| AppError::Internal(format!("malformed session header: {}", name)))
}
