//! The `Coordinator` gRPC service: a thin relay over `queue::QueueStore`
//! plus the in-memory `Registry` of live workers and assignments.

use std::sync::Arc;

use queue::QueueStore;
use tonic::{Request, Response, Status as RpcStatus};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::conv::{from_pb, to_pb};
use crate::pb::{self, coordinator_server::Coordinator};
use crate::registry::Registry;
use crate::CoordinatorError;

#[derive(Clone)]
pub struct CoordinatorService {
    queue: QueueStore,
    registry: Arc<Registry>,
}

impl CoordinatorService {
    pub fn new(queue: QueueStore) -> Self {
        Self { queue, registry: Arc::new(Registry::new()) }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}

fn to_rpc_status(err: CoordinatorError) -> RpcStatus {
    match err {
        CoordinatorError::UnknownRun(id) => RpcStatus::not_found(format!("no run assigned for id '{id}'")),
        other => RpcStatus::internal(other.to_string()),
    }
}

#[tonic::async_trait]
impl Coordinator for CoordinatorService {
    #[instrument(skip_all)]
    async fn dispatch(&self, request: Request<pb::DispatchRequest>) -> Result<Response<pb::DispatchResponse>, RpcStatus> {
        let Some(task) = request.into_inner().task else {
            return Err(RpcStatus::invalid_argument("task is required"));
        };
        let task = from_pb(task).map_err(to_rpc_status)?;
        let accepted = self.queue.enqueue(&task).await.map_err(CoordinatorError::from).map_err(to_rpc_status)?;
        info!(dag_run_id = %task.dag_run_id, accepted, "dispatch");
        Ok(Response::new(pb::DispatchResponse { accepted }))
    }

    #[instrument(skip_all)]
    async fn poll(&self, request: Request<pb::PollRequest>) -> Result<Response<pb::PollResponse>, RpcStatus> {
        let req = request.into_inner();
        self.registry.touch_worker(&req.worker_id, &req.labels);
        let task = self.queue.poll(&req.labels).await.map_err(CoordinatorError::from).map_err(to_rpc_status)?;
        let task = task.map(|t| to_pb(&t)).transpose().map_err(to_rpc_status)?;
        Ok(Response::new(pb::PollResponse { task }))
    }

    #[instrument(skip_all)]
    async fn ack(&self, request: Request<pb::AckRequest>) -> Result<Response<pb::AckResponse>, RpcStatus> {
        let req = request.into_inner();
        let dag_run_id: Uuid = req.dag_run_id.parse().map_err(|_| RpcStatus::invalid_argument("bad dag_run_id"))?;
        self.registry.ack(&req.worker_id, dag_run_id, req.sock_path);
        info!(worker_id = %req.worker_id, %dag_run_id, "ack");
        Ok(Response::new(pb::AckResponse { ok: true }))
    }

    #[instrument(skip_all)]
    async fn stop(&self, request: Request<pb::StopRequest>) -> Result<Response<pb::StopResponse>, RpcStatus> {
        let dag_run_id: Uuid = request.into_inner().dag_run_id.parse().map_err(|_| RpcStatus::invalid_argument("bad dag_run_id"))?;
        let Some(assignment) = self.registry.assignment(dag_run_id) else {
            return Err(to_rpc_status(CoordinatorError::UnknownRun(dag_run_id)));
        };

        match engine::ipc::send_command(std::path::Path::new(&assignment.sock_path), "stop").await {
            Ok(resp) => Ok(Response::new(pb::StopResponse { ok: true, detail: resp })),
            Err(e) => {
                // The coordinator and the worker may not share a filesystem;
                // fall back to a pending stop the worker itself drains.
                warn!(%dag_run_id, error = %e, "direct stop failed, queueing pending stop for worker");
                self.registry.queue_pending_stop(&assignment.worker_id, dag_run_id);
                Ok(Response::new(pb::StopResponse { ok: true, detail: "queued".into() }))
            }
        }
    }

    #[instrument(skip_all)]
    async fn get_workers(&self, _request: Request<pb::GetWorkersRequest>) -> Result<Response<pb::GetWorkersResponse>, RpcStatus> {
        let workers = self
            .registry
            .workers()
            .into_iter()
            .map(|(worker_id, entry)| pb::WorkerInfo {
                worker_id,
                labels: entry.labels,
                running_tasks: entry.running_tasks.iter().map(Uuid::to_string).collect(),
            })
            .collect();
        Ok(Response::new(pb::GetWorkersResponse { workers }))
    }

    #[instrument(skip_all)]
    async fn pending_stops(&self, request: Request<pb::PendingStopsRequest>) -> Result<Response<pb::PendingStopsResponse>, RpcStatus> {
        let worker_id = request.into_inner().worker_id;
        let ids = self.registry.pending_stops(&worker_id).iter().map(Uuid::to_string).collect();
        Ok(Response::new(pb::PendingStopsResponse { dag_run_ids: ids }))
    }

    #[instrument(skip_all)]
    async fn ack_stop(&self, request: Request<pb::AckStopRequest>) -> Result<Response<pb::AckStopResponse>, RpcStatus> {
        let req = request.into_inner();
        let dag_run_id: Uuid = req.dag_run_id.parse().map_err(|_| RpcStatus::invalid_argument("bad dag_run_id"))?;
        self.registry.ack_stop(&req.worker_id, dag_run_id);
        Ok(Response::new(pb::AckStopResponse { ok: true }))
    }
}
