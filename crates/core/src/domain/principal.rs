use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::audit::AuditContext;
use crate::domain::partner::{PartnerId, PartnerMode};

/// Authenticated caller as handed over by the session layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub email: String,
    pub partner_id: Option<PartnerId>,
    #[serde(default)]
    pub modes: BTreeSet<PartnerMode>,
    #[serde(default)]
    pub admin: bool,
}

impl Principal {
    pub fn system() -> Self {
        Self {
            id: "system".to_string(),
            email: "system@tradein.local".to_string(),
            partner_id: None,
            modes: BTreeSet::new(),
            admin: true,
        }
    }

    pub fn audit_context(&self, correlation_id: impl Into<String>) -> AuditContext {
        AuditContext::new(correlation_id, self.email.clone())
    }
}
