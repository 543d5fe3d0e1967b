//! gRPC server for the Knowledge store.

use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::instrument;

use super::store::KnowledgeStore;
use crate::api::grpc as convert;
use crate::api::proto;
use crate::api::proto::knowledge_service_server::KnowledgeService;
use crate::contracts::ActionStatus;
use crate::error::MedicError;

/// Serves `KnowledgeService` over an in-process [`KnowledgeStore`].
pub struct KnowledgeRpcService {
    store: Arc<KnowledgeStore>,
}

impl KnowledgeRpcService {
    pub fn new(store: Arc<KnowledgeStore>) -> Self {
        Self { store }
    }

    /// The backing store, shared with the TTL sweeper.
    pub fn store(&self) -> Arc<KnowledgeStore> {
        self.store.clone()
    }
}

#[tonic::async_trait]
impl KnowledgeService for KnowledgeRpcService {
    #[instrument(skip_all)]
    async fn register_detection(
        &self,
        request: Request<proto::Detection>,
    ) -> Result<Response<proto::RegisterDetectionResponse>, Status> {
        let detection = convert::from_proto_detection(request.into_inner());
        let registered = self.store.register_detection(detection);

        Ok(Response::new(proto::RegisterDetectionResponse {
            registered,
            duplicate: !registered,
        }))
    }

    async fn is_detection_active(
        &self,
        request: Request<proto::DetectionKeyRequest>,
    ) -> Result<Response<proto::DetectionActiveResponse>, Status> {
        let active = self.store.is_detection_active(&request.into_inner().key);
        Ok(Response::new(proto::DetectionActiveResponse { active }))
    }

    async fn active_detections_by_database(
        &self,
        request: Request<proto::DatabaseIdRequest>,
    ) -> Result<Response<proto::DetectionList>, Status> {
        let detections = self
            .store
            .active_detections_by_database(&request.into_inner().database_id)
            .iter()
            .map(convert::to_proto_detection)
            .collect();
        Ok(Response::new(proto::DetectionList { detections }))
    }

    #[instrument(skip_all)]
    async fn mark_detection_resolved(
        &self,
        request: Request<proto::MarkResolvedRequest>,
    ) -> Result<Response<proto::Ack>, Status> {
        let req = request.into_inner();
        self.store
            .mark_detection_resolved(&req.detection_id, &req.solution)
            .map_err(Status::from)?;
        Ok(Response::new(proto::Ack {
            success: true,
            message: String::new(),
        }))
    }

    #[instrument(skip_all)]
    async fn register_action(
        &self,
        request: Request<proto::ActionRecord>,
    ) -> Result<Response<proto::Ack>, Status> {
        let record = convert::from_proto_action(request.into_inner());
        self.store.register_action(record).map_err(Status::from)?;
        Ok(Response::new(proto::Ack {
            success: true,
            message: String::new(),
        }))
    }

    #[instrument(skip_all)]
    async fn update_action_status(
        &self,
        request: Request<proto::UpdateActionStatusRequest>,
    ) -> Result<Response<proto::Ack>, Status> {
        let req = request.into_inner();
        let status = ActionStatus::from_tag(&req.status).ok_or_else(|| {
            Status::from(MedicError::configuration(format!(
                "Unknown action status: {}",
                req.status
            )))
        })?;

        self.store
            .update_action_status(&req.action_id, status, &req.message, &req.error)
            .map_err(Status::from)?;
        Ok(Response::new(proto::Ack {
            success: true,
            message: String::new(),
        }))
    }

    async fn pending_actions_by_database(
        &self,
        request: Request<proto::DatabaseIdRequest>,
    ) -> Result<Response<proto::ActionList>, Status> {
        let actions = self
            .store
            .pending_actions_by_database(&request.into_inner().database_id)
            .iter()
            .map(convert::to_proto_action)
            .collect();
        Ok(Response::new(proto::ActionList { actions }))
    }

    #[instrument(skip_all)]
    async fn register_database(
        &self,
        request: Request<proto::DatabaseInfo>,
    ) -> Result<Response<proto::RegisterDatabaseAck>, Status> {
        let database = convert::from_proto_database(request.into_inner());
        let assigned_id = self.store.register_database(database);
        Ok(Response::new(proto::RegisterDatabaseAck {
            success: true,
            assigned_id,
            message: String::new(),
        }))
    }

    async fn get_database(
        &self,
        request: Request<proto::DatabaseIdRequest>,
    ) -> Result<Response<proto::DatabaseInfo>, Status> {
        let id = request.into_inner().database_id;
        let database = self
            .store
            .get_database(&id)
            .ok_or_else(|| Status::from(MedicError::not_found("database", &id)))?;
        Ok(Response::new(convert::to_proto_database(&database)))
    }

    async fn list_databases(
        &self,
        request: Request<proto::ListDatabasesRequest>,
    ) -> Result<Response<proto::DatabaseList>, Status> {
        let databases = self
            .store
            .list_databases(request.into_inner().enabled_only)
            .iter()
            .map(convert::to_proto_database)
            .collect();
        Ok(Response::new(proto::DatabaseList { databases }))
    }

    async fn update_database(
        &self,
        request: Request<proto::DatabaseInfo>,
    ) -> Result<Response<proto::Ack>, Status> {
        let database = convert::from_proto_database(request.into_inner());
        self.store.update_database(database).map_err(Status::from)?;
        Ok(Response::new(proto::Ack {
            success: true,
            message: String::new(),
        }))
    }

    async fn update_database_health(
        &self,
        request: Request<proto::UpdateHealthRequest>,
    ) -> Result<Response<proto::Ack>, Status> {
        let req = request.into_inner();
        let health = crate::contracts::DatabaseHealth::from_tag(&req.health_status)
            .ok_or_else(|| {
                Status::from(MedicError::configuration(format!(
                    "Unknown health status: {}",
                    req.health_status
                )))
            })?;

        self.store
            .update_database_health(&req.database_id, health, req.health_score)
            .map_err(Status::from)?;
        Ok(Response::new(proto::Ack {
            success: true,
            message: String::new(),
        }))
    }

    async fn unregister_database(
        &self,
        request: Request<proto::DatabaseIdRequest>,
    ) -> Result<Response<proto::Ack>, Status> {
        self.store
            .unregister_database(&request.into_inner().database_id)
            .map_err(Status::from)?;
        Ok(Response::new(proto::Ack {
            success: true,
            message: String::new(),
        }))
    }

    async fn get_system_config(
        &self,
        _request: Request<proto::GetSystemConfigRequest>,
    ) -> Result<Response<proto::SystemConfig>, Status> {
        Ok(Response::new(convert::to_proto_config(
            &self.store.system_config(),
        )))
    }

    async fn save_system_config(
        &self,
        request: Request<proto::SystemConfig>,
    ) -> Result<Response<proto::Ack>, Status> {
        let config = convert::from_proto_config(request.into_inner());
        self.store.save_system_config(config);
        Ok(Response::new(proto::Ack {
            success: true,
            message: String::new(),
        }))
    }

    async fn get_system_status(
        &self,
        _request: Request<proto::SystemStatusRequest>,
    ) -> Result<Response<proto::SystemStatus>, Status> {
        let status = self.store.system_status();
        let mode = self.store.system_config().execution_mode;
        Ok(Response::new(proto::SystemStatus {
            active_detections: status.active_detections,
            pending_actions: status.pending_actions,
            registered_databases: status.registered_databases,
            execution_mode: mode.as_str().to_string(),
        }))
    }

    async fn flush_all(
        &self,
        _request: Request<proto::FlushAllRequest>,
    ) -> Result<Response<proto::Ack>, Status> {
        self.store.flush_all();
        tracing::warn!("Knowledge store flushed");
        Ok(Response::new(proto::Ack {
            success: true,
            message: String::new(),
        }))
    }
}
