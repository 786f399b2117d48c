//! Rate-limit gate
//!
//! Two stages on API routes. [`rate_limit_middleware`] runs before the auth
//! gate and charges the client IP (or the global key), so rejected
//! credentials still spend budget. [`caller_rate_limit_middleware`] runs
//! after it and, with `by_user` on, also charges the authenticated caller's
//! own bucket. The effective rule is the matched route's override, then the
//! service's, then the limiter default.

use crate::app::GatewayState;
use crate::types::IngressError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use flowgate_core::{Error, RateLimitRule, RequestContext};
use flowgate_ratelimit::{RateLimitConfig, RateLimitKey, RateLimiter};
use flowgate_routing::RouteMatch;
use std::sync::Arc;

/// Limiter plus the key-derivation switches
#[derive(Clone)]
pub struct RateLimitGate {
    limiter: Arc<dyn RateLimiter>,
    by_user: bool,
    by_ip: bool,
}

impl RateLimitGate {
    pub fn new(limiter: Arc<dyn RateLimiter>, config: &RateLimitConfig) -> Self {
        Self {
            limiter,
            by_user: config.by_user,
            by_ip: config.by_ip,
        }
    }

    pub fn limiter(&self) -> &Arc<dyn RateLimiter> {
        &self.limiter
    }

    /// Key for a request whose identity is not yet known: IP, else global
    pub fn client_key(&self, context: &RequestContext, path: &str) -> RateLimitKey {
        RateLimitKey::derive(false, self.by_ip, None, context.client_ip.as_deref(), path)
    }

    /// Key for the authenticated caller, when per-user limiting applies
    pub fn caller_key(&self, context: &RequestContext, path: &str) -> Option<RateLimitKey> {
        if !self.by_user {
            return None;
        }
        context
            .caller_id
            .as_deref()
            .filter(|caller| !caller.is_empty())
            .map(|caller| RateLimitKey::user(caller, path))
    }

    /// `Ok` when admitted, otherwise the rejection with its retry hint
    pub async fn check(
        &self,
        key: &RateLimitKey,
        rule: Option<RateLimitRule>,
    ) -> Result<(), Error> {
        let rule = rule.unwrap_or_else(|| self.limiter.default_rule());
        if self.limiter.allow(key.as_str(), &rule).await {
            Ok(())
        } else {
            Err(Error::RateLimitExceeded {
                retry_after_secs: rule.retry_after_secs(),
            })
        }
    }
}

fn route_rule(req: &Request) -> Option<RateLimitRule> {
    req.extensions()
        .get::<RouteMatch>()
        .and_then(|matched| matched.rate_limit())
}

async fn admit(
    state: &GatewayState,
    gate: &RateLimitGate,
    key: RateLimitKey,
    req: Request,
    next: Next,
) -> Response {
    match gate.check(&key, route_rule(&req)).await {
        Ok(()) => next.run(req).await,
        Err(e) => {
            state.metrics.record_rate_limited(key.scope().as_str());
            tracing::warn!(key = %key, path = %req.uri().path(), "Rate limit exceeded");
            IngressError::from(e).into_response()
        }
    }
}

/// Charge the client before any credential is looked at
pub async fn rate_limit_middleware(
    State(state): State<GatewayState>,
    req: Request,
    next: Next,
) -> Response {
    let Some(gate) = state.rate_limit.clone() else {
        return next.run(req).await;
    };

    let key = {
        let context = req.extensions().get::<RequestContext>().cloned().unwrap_or_default();
        gate.client_key(&context, req.uri().path())
    };
    admit(&state, &gate, key, req, next).await
}

/// Charge the authenticated caller's bucket
pub async fn caller_rate_limit_middleware(
    State(state): State<GatewayState>,
    req: Request,
    next: Next,
) -> Response {
    let Some(gate) = state.rate_limit.clone() else {
        return next.run(req).await;
    };

    let key = req
        .extensions()
        .get::<RequestContext>()
        .and_then(|context| gate.caller_key(context, req.uri().path()));
    match key {
        Some(key) => admit(&state, &gate, key, req, next).await,
        None => next.run(req).await,
    }
}
