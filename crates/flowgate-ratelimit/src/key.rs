//! Rate-limit key derivation
//!
//! Priority: authenticated caller, then client IP, then a single global key.
//! The request path is always part of the key.

use std::fmt;

/// Isolation granularity of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyScope {
    User,
    Ip,
    Global,
}

impl KeyScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyScope::User => "user",
            KeyScope::Ip => "ip",
            KeyScope::Global => "global",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    scope: KeyScope,
    key: String,
}

impl RateLimitKey {
    pub fn user(caller_id: &str, path: &str) -> Self {
        Self {
            scope: KeyScope::User,
            key: format!("user:{}:{}", caller_id, path),
        }
    }

    pub fn ip(addr: &str, path: &str) -> Self {
        Self {
            scope: KeyScope::Ip,
            key: format!("ip:{}:{}", addr, path),
        }
    }

    pub fn global(path: &str) -> Self {
        Self {
            scope: KeyScope::Global,
            key: format!("global:{}", path),
        }
    }

    /// Pick the most specific enabled scope for which a value is known
    pub fn derive(
        by_user: bool,
        by_ip: bool,
        caller_id: Option<&str>,
        client_ip: Option<&str>,
        path: &str,
    ) -> Self {
        match (caller_id, client_ip) {
            (Some(id), _) if by_user && !id.is_empty() => Self::user(id, path),
            (_, Some(ip)) if by_ip && !ip.is_empty() => Self::ip(ip, path),
            _ => Self::global(path),
        }
    }

    pub fn scope(&self) -> KeyScope {
        self.scope
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}
