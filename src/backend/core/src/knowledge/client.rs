//! gRPC client wrapper implementing [`KnowledgeApi`].
//!
//! Every call runs under the configured timeout; transport errors surface as
//! retryable `MedicError`s so per-cycle callers can degrade gracefully.

use async_trait::async_trait;
use std::time::Duration;
use tonic::transport::Channel;

use super::api::KnowledgeApi;
use crate::api::grpc as convert;
use crate::api::proto;
use crate::api::proto::knowledge_service_client::KnowledgeServiceClient;
use crate::contracts::{
    ActionRecord, ActionStatus, DatabaseHealth, Detection, RegisteredDatabase, SystemConfig,
};
use crate::error::Result;

/// Knowledge over gRPC.
#[derive(Clone)]
pub struct GrpcKnowledge {
    client: KnowledgeServiceClient<Channel>,
    timeout: Duration,
}

impl GrpcKnowledge {
    /// Connect to a Knowledge endpoint.
    pub async fn connect(address: &str, timeout: Duration) -> Result<Self> {
        let channel = Channel::from_shared(address.to_string())
            .map_err(|e| crate::error::MedicError::configuration(e.to_string()))?
            .connect_timeout(timeout)
            .connect_lazy();

        Ok(Self {
            client: KnowledgeServiceClient::new(channel),
            timeout,
        })
    }

    fn client(&self) -> KnowledgeServiceClient<Channel> {
        self.client.clone()
    }

    async fn with_timeout<T, F>(&self, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = std::result::Result<T, tonic::Status>>,
    {
        let response = tokio::time::timeout(self.timeout, fut).await??;
        Ok(response)
    }
}

#[async_trait]
impl KnowledgeApi for GrpcKnowledge {
    async fn register_detection(&self, detection: &Detection) -> Result<bool> {
        let mut client = self.client();
        let msg = convert::to_proto_detection(detection);
        let response = self
            .with_timeout(async move {
                client
                    .register_detection(msg)
                    .await
                    .map(|r| r.into_inner())
            })
            .await?;
        Ok(response.registered)
    }

    async fn is_detection_active(&self, key: &str) -> Result<bool> {
        let mut client = self.client();
        let request = proto::DetectionKeyRequest {
            key: key.to_string(),
        };
        let response = self
            .with_timeout(async move {
                client
                    .is_detection_active(request)
                    .await
                    .map(|r| r.into_inner())
            })
            .await?;
        Ok(response.active)
    }

    async fn mark_detection_resolved(&self, detection_id: &str, solution: &str) -> Result<()> {
        let mut client = self.client();
        let request = proto::MarkResolvedRequest {
            detection_id: detection_id.to_string(),
            solution: solution.to_string(),
        };
        self.with_timeout(async move { client.mark_detection_resolved(request).await })
            .await?;
        Ok(())
    }

    async fn register_action(&self, record: &ActionRecord) -> Result<()> {
        let mut client = self.client();
        let msg = convert::to_proto_action(record);
        self.with_timeout(async move { client.register_action(msg).await })
            .await?;
        Ok(())
    }

    async fn update_action_status(
        &self,
        action_id: &str,
        status: ActionStatus,
        message: &str,
        error: &str,
    ) -> Result<()> {
        let mut client = self.client();
        let request = proto::UpdateActionStatusRequest {
            action_id: action_id.to_string(),
            status: status.as_str().to_string(),
            message: message.to_string(),
            error: error.to_string(),
        };
        self.with_timeout(async move { client.update_action_status(request).await })
            .await?;
        Ok(())
    }

    async fn pending_actions_by_database(&self, database_id: &str) -> Result<Vec<ActionRecord>> {
        let mut client = self.client();
        let request = proto::DatabaseIdRequest {
            database_id: database_id.to_string(),
        };
        let response = self
            .with_timeout(async move {
                client
                    .pending_actions_by_database(request)
                    .await
                    .map(|r| r.into_inner())
            })
            .await?;
        Ok(response
            .actions
            .into_iter()
            .map(convert::from_proto_action)
            .collect())
    }

    async fn register_database(&self, database: &RegisteredDatabase) -> Result<String> {
        let mut client = self.client();
        let msg = convert::to_proto_database(database);
        let response = self
            .with_timeout(async move {
                client.register_database(msg).await.map(|r| r.into_inner())
            })
            .await?;
        Ok(response.assigned_id)
    }

    async fn update_database_health(
        &self,
        database_id: &str,
        health: DatabaseHealth,
        score: f64,
    ) -> Result<()> {
        let mut client = self.client();
        let request = proto::UpdateHealthRequest {
            database_id: database_id.to_string(),
            health_status: health.as_str().to_string(),
            health_score: score,
        };
        self.with_timeout(async move { client.update_database_health(request).await })
            .await?;
        Ok(())
    }

    async fn get_system_config(&self) -> Result<SystemConfig> {
        let mut client = self.client();
        let response = self
            .with_timeout(async move {
                client
                    .get_system_config(proto::GetSystemConfigRequest {})
                    .await
                    .map(|r| r.into_inner())
            })
            .await?;
        Ok(convert::from_proto_config(response))
    }

    async fn save_system_config(&self, config: &SystemConfig) -> Result<()> {
        let mut client = self.client();
        let msg = convert::to_proto_config(config);
        self.with_timeout(async move { client.save_system_config(msg).await })
            .await?;
        Ok(())
    }
}
