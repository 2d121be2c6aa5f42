//! Tenant and actor context, carried explicitly through every engine call.
//!
//! The context replaces ambient session settings: isolation becomes an
//! enforced parameter. The tenant id scopes every read and write; the actor
//! fields enrich the audit events emitted by mutations. Both fail closed:
//! without an active tenant, reads come back empty and writes are refused.

use crate::error::{AuthzError, Result};
use crate::validation::validate_namespace;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Optional labels attached to every audit event produced within a call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActorContext {
    pub actor_id: Option<String>,
    pub request_id: Option<String>,
    pub reason: Option<String>,
    pub ip_address: Option<IpAddr>,
    pub user_agent: Option<String>,
}

/// Per-request tenant and actor context.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    tenant: Option<String>,
    actor: ActorContext,
}

fn normalize(value: Option<&str>) -> Option<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Some(v.to_string()),
        _ => None,
    }
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor for the common single-tenant call pattern.
    pub fn for_tenant(tenant_id: &str) -> Result<Self> {
        let mut ctx = Self::new();
        ctx.set_tenant(tenant_id)?;
        Ok(ctx)
    }

    /// Activate a tenant for subsequent operations. The id must be a valid
    /// namespace.
    pub fn set_tenant(&mut self, tenant_id: &str) -> Result<()> {
        validate_namespace("tenant_id", tenant_id)?;
        self.tenant = Some(tenant_id.to_string());
        Ok(())
    }

    pub fn clear_tenant(&mut self) {
        self.tenant = None;
    }

    /// The active tenant, if any. Empty ids never survive `set_tenant`, so
    /// `Some` here always means a usable namespace.
    pub fn tenant(&self) -> Option<&str> {
        self.tenant.as_deref()
    }

    /// Attach actor labels for audit enrichment. Empty strings normalize to
    /// absent; a present `ip` must parse as an address.
    pub fn set_actor(
        &mut self,
        actor_id: Option<&str>,
        request_id: Option<&str>,
        reason: Option<&str>,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<()> {
        let ip_address = match normalize(ip) {
            Some(raw) => Some(raw.parse::<IpAddr>().map_err(|_| {
                AuthzError::invalid("ip_address", "is not a valid IP address")
            })?),
            None => None,
        };
        self.actor = ActorContext {
            actor_id: normalize(actor_id),
            request_id: normalize(request_id),
            reason: normalize(reason),
            ip_address,
            user_agent: normalize(user_agent),
        };
        Ok(())
    }

    pub fn clear_actor(&mut self) {
        self.actor = ActorContext::default();
    }

    pub fn actor(&self) -> &ActorContext {
        &self.actor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_requires_valid_namespace() {
        let mut ctx = RequestContext::new();
        assert!(ctx.set_tenant("acme").is_ok());
        assert_eq!(ctx.tenant(), Some("acme"));

        assert!(ctx.set_tenant("ACME").is_err());
        // failed set leaves the previous tenant in place
        assert_eq!(ctx.tenant(), Some("acme"));

        ctx.clear_tenant();
        assert_eq!(ctx.tenant(), None);
    }

    #[test]
    fn actor_normalizes_empty_to_absent() {
        let mut ctx = RequestContext::new();
        ctx.set_actor(Some("admin@acme.com"), Some(""), None, Some(""), None)
            .unwrap();
        assert_eq!(ctx.actor().actor_id.as_deref(), Some("admin@acme.com"));
        assert!(ctx.actor().request_id.is_none());
        assert!(ctx.actor().ip_address.is_none());
    }

    #[test]
    fn actor_ip_must_parse() {
        let mut ctx = RequestContext::new();
        assert!(ctx
            .set_actor(None, None, None, Some("10.1.2.3"), None)
            .is_ok());
        assert!(ctx
            .set_actor(None, None, None, Some("not-an-ip"), None)
            .is_err());

        ctx.set_actor(Some("a"), None, None, Some("::1"), None).unwrap();
        assert!(ctx.actor().ip_address.unwrap().is_loopback());

        ctx.clear_actor();
        assert!(ctx.actor().actor_id.is_none());
    }
}
