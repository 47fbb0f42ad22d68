//! 能力注册表：启动时构建，之后以 Arc 共享且只读
//!
//! 名称大小写不敏感；descriptors() 按名称排序，与注册顺序无关。

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::skills::{Capability, CapabilityDescriptor};

#[derive(Default)]
pub struct CapabilityRegistry {
    capabilities: BTreeMap<String, Arc<dyn Capability>>,
    default: Option<String>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 同名能力会被替换
    pub fn register(&mut self, capability: Arc<dyn Capability>) -> &mut Self {
        let key = capability.descriptor().name.to_lowercase();
        if self.capabilities.insert(key.clone(), capability).is_some() {
            tracing::warn!(capability = %key, "capability registered twice, keeping the last one");
        }
        self
    }

    /// 注册并设为回退能力
    pub fn register_default(&mut self, capability: Arc<dyn Capability>) -> &mut Self {
        self.default = Some(capability.descriptor().name.to_lowercase());
        self.register(capability)
    }

    /// 按名称设置回退能力；名称未注册时返回 false
    pub fn set_default(&mut self, name: &str) -> bool {
        let key = name.to_lowercase();
        if self.capabilities.contains_key(&key) {
            self.default = Some(key);
            true
        } else {
            false
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(&name.trim().to_lowercase()).cloned()
    }

    pub fn default_capability(&self) -> Option<Arc<dyn Capability>> {
        self.default.as_deref().and_then(|name| self.get(name))
    }

    pub fn descriptors(&self) -> Vec<CapabilityDescriptor> {
        self.capabilities.values().map(|c| c.descriptor().clone()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.capabilities.values().map(|c| c.descriptor().name.clone()).collect()
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<dyn Capability>> {
        self.capabilities.values()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::skills::{CommandCapability, DirectAnswerCapability};

    #[test]
    fn test_lookup_and_ordering() {
        let llm = Arc::new(MockLlmClient::default());
        let mut registry = CapabilityRegistry::new();
        registry
            .register(Arc::new(DirectAnswerCapability::new(llm.clone())))
            .register_default(Arc::new(CommandCapability::new(llm)));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["command", "direct_llm"]);
        assert!(registry.get("Direct_LLM").is_some());
        assert!(registry.get("browser").is_none());
        assert_eq!(
            registry.default_capability().map(|c| c.descriptor().name.clone()),
            Some("command".to_string())
        );
        assert!(registry.set_default("direct_llm"));
        assert!(!registry.set_default("missing"));
    }
}
