//! gRPC surface for the Executor.

use std::sync::Arc;

use tonic::{Request, Response, Status};

use super::Executor;
use crate::api::grpc as convert;
use crate::api::proto;
use crate::api::proto::executor_service_server::ExecutorService;
use crate::error::MedicError;

/// Serves `ExecutorService` over the executor core.
pub struct ExecutorRpcService {
    executor: Arc<Executor>,
}

impl ExecutorRpcService {
    pub fn new(executor: Arc<Executor>) -> Self {
        Self { executor }
    }
}

#[tonic::async_trait]
impl ExecutorService for ExecutorRpcService {
    async fn health(
        &self,
        _request: Request<proto::HealthRequest>,
    ) -> Result<Response<proto::HealthResponse>, Status> {
        Ok(Response::new(proto::HealthResponse {
            status: "ok".to_string(),
            execution_mode: self.executor.execution_mode().as_str().to_string(),
            active_actions: self.executor.active_actions() as u64,
        }))
    }

    async fn get_action_status(
        &self,
        request: Request<proto::ActionIdRequest>,
    ) -> Result<Response<proto::ActionRecord>, Status> {
        let action_id = request.into_inner().action_id;
        let record = self
            .executor
            .get_action(&action_id)
            .ok_or_else(|| Status::from(MedicError::action_not_found(&action_id)))?;
        Ok(Response::new(convert::to_proto_action(&record)))
    }

    async fn list_pending_actions(
        &self,
        request: Request<proto::PendingActionsRequest>,
    ) -> Result<Response<proto::ActionList>, Status> {
        let filter = request.into_inner().database_id;
        let actions = self
            .executor
            .pending_actions(&filter)
            .iter()
            .map(convert::to_proto_action)
            .collect();
        Ok(Response::new(proto::ActionList { actions }))
    }
}
