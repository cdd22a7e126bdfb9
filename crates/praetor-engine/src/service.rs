//! Service seam for transport layers (REST/gRPC/WebSocket front-ends).

use async_trait::async_trait;

use praetor_core::model::{CheckRequest, CheckResponse};

use crate::engine::DecisionEngine;

/// Anything that can answer authorization checks. Transports depend on this
/// trait rather than on the concrete engine.
#[async_trait]
pub trait PolicyDecisionPoint: Send + Sync {
    async fn check(&self, request: CheckRequest) -> CheckResponse;
    async fn check_batch(&self, requests: Vec<CheckRequest>) -> Vec<CheckResponse>;
}

#[async_trait]
impl PolicyDecisionPoint for DecisionEngine {
    async fn check(&self, request: CheckRequest) -> CheckResponse {
        DecisionEngine::check(self, request).await
    }

    async fn check_batch(&self, requests: Vec<CheckRequest>) -> Vec<CheckResponse> {
        DecisionEngine::check_batch(self, requests).await
    }
}
