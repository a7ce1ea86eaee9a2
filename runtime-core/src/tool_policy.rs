//! ToolPolicy: denylist > allowlist > risk-level default (spec §4.3, invariant E7).

use crate::run::AgentContext;
use crate::tool::{ToolDefinition, ToolRisk};

pub struct ToolPolicy;

#[derive(Clone, Debug, PartialEq)]
pub enum PolicyDecision {
    Allow,
    Deny(String),
}

impl ToolPolicy {
    /// Ordering (spec §4.3, unambiguous):
    /// 1. name in denied -> deny
    /// 2. allowed nonempty and name not in allowed -> deny
    /// 3. risk_level == high and no explicit allow -> deny
    /// 4. allow
    pub fn check(ctx: &AgentContext, tool: &ToolDefinition) -> PolicyDecision {
        if ctx.denied_tools.iter().any(|d| d == &tool.name) {
            return PolicyDecision::Deny(format!("tool `{}` is denied", tool.name));
        }
        let explicitly_allowed = ctx.allowed_tools.iter().any(|a| a == &tool.name);
        if !ctx.allowed_tools.is_empty() && !explicitly_allowed {
            return PolicyDecision::Deny(format!(
                "tool `{}` is not in the allowed list",
                tool.name
            ));
        }
        if tool.risk_level == ToolRisk::High && !explicitly_allowed {
            return PolicyDecision::Deny(format!(
                "tool `{}` is high-risk and not explicitly allowed",
                tool.name
            ));
        }
        PolicyDecision::Allow
    }
}
