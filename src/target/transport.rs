//! Delivery of broadcast requests to targets.

use super::rpc::{TargetReply, TargetRequest};
use super::service::TargetService;
use crate::config::NetworkConfig;
use crate::error::{CofferError, Result};
use crate::types::TargetId;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Sends one request to one target.
#[async_trait]
pub trait TargetTransport: Send + Sync {
    async fn send(&self, target: TargetId, request: &TargetRequest) -> Result<TargetReply>;
}

/// HTTP transport to targets served by [`super::run_target_server`].
pub struct HttpTransport {
    addrs: BTreeMap<TargetId, String>,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(addrs: impl IntoIterator<Item = (TargetId, String)>, network: &NetworkConfig) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(network.connect_timeout)
            .timeout(network.request_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            addrs: addrs.into_iter().collect(),
            client,
        }
    }

    pub fn targets(&self) -> Vec<TargetId> {
        self.addrs.keys().copied().collect()
    }

    fn target_url(&self, target: TargetId) -> Option<String> {
        self.addrs
            .get(&target)
            .map(|addr| format!("http://{}/target/op?target={}", addr, target))
    }
}

#[async_trait]
impl TargetTransport for HttpTransport {
    async fn send(&self, target: TargetId, request: &TargetRequest) -> Result<TargetReply> {
        let url = self
            .target_url(target)
            .ok_or_else(|| CofferError::Network(format!("unknown target {}", target)))?;

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| CofferError::Network(e.to_string()))?;

        response
            .json()
            .await
            .map_err(|e| CofferError::Deserialization(e.to_string()))
    }
}

/// In-process transport to a fixed set of targets.
#[derive(Clone, Default)]
pub struct LocalTransport {
    targets: BTreeMap<TargetId, Arc<TargetService>>,
}

impl LocalTransport {
    /// `count` targets with ids `0..count`.
    pub fn with_targets(count: u32) -> Self {
        Self::with_id_range(0, count)
    }

    /// `count` targets with ids starting at `first`.
    pub fn with_id_range(first: TargetId, count: u32) -> Self {
        Self {
            targets: (first..first.saturating_add(count))
                .map(|id| (id, Arc::new(TargetService::new(id))))
                .collect(),
        }
    }

    pub fn target(&self, id: TargetId) -> Option<Arc<TargetService>> {
        self.targets.get(&id).cloned()
    }

    pub fn targets(&self) -> Vec<TargetId> {
        self.targets.keys().copied().collect()
    }

    pub fn services(&self) -> impl Iterator<Item = &Arc<TargetService>> {
        self.targets.values()
    }
}

#[async_trait]
impl TargetTransport for LocalTransport {
    async fn send(&self, target: TargetId, request: &TargetRequest) -> Result<TargetReply> {
        let service = self
            .targets
            .get(&target)
            .ok_or_else(|| CofferError::Network(format!("unknown target {}", target)))?;
        Ok(service.handle(request))
    }
}

/// In-process targets first, everything else over HTTP.
pub struct RoutedTransport {
    local: LocalTransport,
    remote: HttpTransport,
}

impl RoutedTransport {
    pub fn new(local: LocalTransport, remote: HttpTransport) -> Self {
        Self { local, remote }
    }

    /// Every target either side can reach, in id order.
    pub fn targets(&self) -> Vec<TargetId> {
        let mut targets = self.local.targets();
        targets.extend(self.remote.targets());
        targets.sort_unstable();
        targets.dedup();
        targets
    }
}

#[async_trait]
impl TargetTransport for RoutedTransport {
    async fn send(&self, target: TargetId, request: &TargetRequest) -> Result<TargetReply> {
        if self.local.target(target).is_some() {
            self.local.send(target, request).await
        } else {
            self.remote.send(target, request).await
        }
    }
}
