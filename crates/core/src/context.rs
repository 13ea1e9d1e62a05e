//! Ambient request context (tenant scope).

use crate::error::{DomainError, DomainResult};
use crate::id::TenantId;

/// Tenant context for a request.
///
/// Every inventory operation and query requires a tenant. The context is
/// constructed at the boundary (HTTP middleware, job runner) and passed down
/// explicitly; an unscoped context fails with a validation error the moment
/// the tenant is needed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct RequestContext {
    tenant_id: Option<TenantId>,
}

impl RequestContext {
    /// Context scoped to a tenant.
    pub fn for_tenant(tenant_id: TenantId) -> Self {
        Self {
            tenant_id: Some(tenant_id),
        }
    }

    /// Context with no tenant attached (pre-auth, system startup).
    pub fn unscoped() -> Self {
        Self { tenant_id: None }
    }

    /// The tenant this request acts on behalf of.
    pub fn tenant(&self) -> DomainResult<TenantId> {
        self.tenant_id
            .ok_or_else(|| DomainError::validation("tenant context not set"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoped_context_yields_tenant() {
        let tenant = TenantId::new();
        let ctx = RequestContext::for_tenant(tenant);
        assert_eq!(ctx.tenant().unwrap(), tenant);
    }

    #[test]
    fn unscoped_context_is_a_validation_error() {
        let err = RequestContext::unscoped().tenant().unwrap_err();
        match err {
            DomainError::Validation(msg) => assert!(msg.contains("tenant context not set")),
            other => panic!("expected validation error, got {other:?}"),
        }
    }
}
