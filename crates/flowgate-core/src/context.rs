//! Per-request context
//!
//! A [`RequestContext`] is created by the request-id middleware, enriched by
//! the auth gate and read by the rate limiter and the proxy. It travels as an
//! axum request extension.

/// Identity returned by the token validator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub subject_id: String,
    pub email: Option<String>,
}

impl CallerIdentity {
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            email: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// Cross-cutting values propagated to backends as headers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Inbound X-Request-ID, or a generated id
    pub correlation_id: String,
    pub caller_id: Option<String>,
    pub caller_email: Option<String>,
    /// First hop client address as seen by the gateway
    pub client_ip: Option<String>,
}

impl RequestContext {
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            ..Default::default()
        }
    }

    /// Context with a freshly generated correlation id
    pub fn generate() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = Some(ip.into());
        self
    }

    pub fn with_identity(mut self, identity: &CallerIdentity) -> Self {
        self.set_identity(identity);
        self
    }

    pub fn set_identity(&mut self, identity: &CallerIdentity) {
        self.caller_id = Some(identity.subject_id.clone());
        self.caller_email = identity.email.clone();
    }

    pub fn is_authenticated(&self) -> bool {
        self.caller_id.is_some()
    }
}
