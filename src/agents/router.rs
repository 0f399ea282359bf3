//! 交接路由
//!
//! 校验目标是否在当前 Agent 的 handoffs 中；每回合由 HopCounter 计数，超过上限即终止回合。

use std::sync::Arc;

use crate::agents::{AgentCatalog, AgentDefinition};
use crate::core::{AgentError, RoutingError};

#[derive(Debug, Clone)]
pub struct HandoffRouter {
    catalog: Arc<AgentCatalog>,
}

impl HandoffRouter {
    pub fn new(catalog: Arc<AgentCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &AgentCatalog {
        &self.catalog
    }

    /// from → to；目标不可达返回 InvalidHandoff（回合内可恢复）
    pub fn route(&self, from: &str, to: &str) -> Result<&AgentDefinition, RoutingError> {
        let source = self
            .catalog
            .get(from)
            .ok_or_else(|| RoutingError::UnknownAgent(from.to_string()))?;
        let to = to.trim();
        if !source.can_hand_off_to(to) {
            return Err(RoutingError::InvalidHandoff {
                from: from.to_string(),
                to: to.to_string(),
                allowed: if source.handoffs.is_empty() {
                    "none".to_string()
                } else {
                    source.handoffs.join(", ")
                },
            });
        }
        self.catalog
            .get(to)
            .ok_or_else(|| RoutingError::UnknownAgent(to.to_string()))
    }
}

/// 单回合交接计数
#[derive(Debug, Clone, Copy)]
pub struct HopCounter {
    hops: usize,
    max: usize,
}

impl HopCounter {
    pub fn new(max: usize) -> Self {
        Self { hops: 0, max }
    }

    /// 记录一次交接；超过上限返回 MaxHandoffsExceeded
    pub fn record(&mut self) -> Result<usize, AgentError> {
        if self.hops >= self.max {
            return Err(AgentError::MaxHandoffsExceeded(self.max));
        }
        self.hops += 1;
        Ok(self.hops)
    }

    pub fn hops(&self) -> usize {
        self.hops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolRegistry;

    fn router() -> HandoffRouter {
        let defs = vec![
            AgentDefinition::new("Orchestrator", "x").with_handoffs(&["Coder"]),
            AgentDefinition::new("Coder", "y").with_handoffs(&["Orchestrator"]),
            AgentDefinition::new("Loner", "z"),
        ];
        let catalog = AgentCatalog::new(defs, &ToolRegistry::new()).unwrap();
        HandoffRouter::new(Arc::new(catalog))
    }

    #[test]
    fn routes_to_allowed_target() {
        let r = router();
        assert_eq!(r.route("Orchestrator", "Coder").unwrap().name, "Coder");
        assert_eq!(r.route("Coder", " Orchestrator ").unwrap().name, "Orchestrator");
    }

    #[test]
    fn rejects_unreachable_target() {
        let r = router();
        let err = r.route("Coder", "Loner").unwrap_err();
        assert_eq!(
            err,
            RoutingError::InvalidHandoff {
                from: "Coder".into(),
                to: "Loner".into(),
                allowed: "Orchestrator".into(),
            }
        );
        assert!(matches!(
            r.route("Loner", "Coder"),
            Err(RoutingError::InvalidHandoff { ref allowed, .. }) if allowed == "none"
        ));
        assert_eq!(r.route("Ghost", "Coder").unwrap_err(), RoutingError::UnknownAgent("Ghost".into()));
    }

    #[test]
    fn hop_counter_enforces_limit() {
        let mut hops = HopCounter::new(2);
        assert_eq!(hops.record().unwrap(), 1);
        assert_eq!(hops.record().unwrap(), 2);
        assert_eq!(hops.record().unwrap_err(), AgentError::MaxHandoffsExceeded(2));
        assert_eq!(hops.hops(), 2);
    }
}
