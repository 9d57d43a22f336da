use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

use crate::identity::{IdentityResolver, ResolverError};

/// In-memory resolver used by tests: a fixed key → topics table plus a set
/// of publicly accessible topics. Unknown keys are reported unauthorized.
#[derive(Debug, Default, Clone)]
pub struct StaticResolver {
    keys: HashMap<String, Vec<String>>,
    public: HashSet<String>,
    fail_upstream: bool,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, api_key: &str, topics: &[&str]) -> Self {
        self.keys
            .insert(api_key.to_string(), topics.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn with_public(mut self, topic: &str) -> Self {
        self.public.insert(topic.to_string());
        self
    }

    /// Makes every call fail as an upstream error.
    pub fn failing(mut self) -> Self {
        self.fail_upstream = true;
        self
    }
}

#[async_trait]
impl IdentityResolver for StaticResolver {
    async fn topics_for_key(&self, api_key: &str) -> Result<Vec<String>, ResolverError> {
        if self.fail_upstream {
            return Err(ResolverError::Upstream("identity service unavailable".to_string()));
        }
        self.keys
            .get(api_key)
            .cloned()
            .ok_or(ResolverError::Unauthorized)
    }

    async fn is_public_topic(&self, topic: &str) -> Result<bool, ResolverError> {
        if self.fail_upstream {
            return Err(ResolverError::Upstream("identity service unavailable".to_string()));
        }
        Ok(self.public.contains(topic))
    }
}
