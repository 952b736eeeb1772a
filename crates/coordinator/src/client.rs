//! Typed client wrapper over the generated tonic stub — what a worker
//! process (`cli worker`) and the `cli coordinator stop` subcommand use to
//! talk to a running `CoordinatorService`.

use std::collections::HashMap;

use tonic::transport::Channel;
use uuid::Uuid;

use crate::conv::{from_pb, to_pb};
use crate::pb;
use crate::CoordinatorError;

#[derive(Clone)]
pub struct CoordinatorClient {
    inner: pb::coordinator_client::CoordinatorClient<Channel>,
}

impl CoordinatorClient {
    pub async fn connect(addr: String) -> Result<Self, CoordinatorError> {
        let inner = pb::coordinator_client::CoordinatorClient::connect(addr).await?;
        Ok(Self { inner })
    }

    pub async fn dispatch(&mut self, task: &queue::Task) -> Result<bool, CoordinatorError> {
        let pb_task = to_pb(task)?;
        let resp = self.inner.dispatch(pb::DispatchRequest { task: Some(pb_task) }).await?;
        Ok(resp.into_inner().accepted)
    }

    pub async fn poll(&mut self, worker_id: &str, labels: &HashMap<String, String>) -> Result<Option<queue::Task>, CoordinatorError> {
        let resp = self
            .inner
            .poll(pb::PollRequest { worker_id: worker_id.to_string(), labels: labels.clone() })
            .await?
            .into_inner();
        resp.task.map(from_pb).transpose()
    }

    pub async fn ack(&mut self, worker_id: &str, dag_run_id: Uuid, sock_path: String) -> Result<(), CoordinatorError> {
        self.inner
            .ack(pb::AckRequest { worker_id: worker_id.to_string(), dag_run_id: dag_run_id.to_string(), sock_path })
            .await?;
        Ok(())
    }

    pub async fn stop(&mut self, dag_run_id: Uuid) -> Result<String, CoordinatorError> {
        let resp = self.inner.stop(pb::StopRequest { dag_run_id: dag_run_id.to_string() }).await?.into_inner();
        Ok(resp.detail)
    }

    pub async fn get_workers(&mut self) -> Result<Vec<pb::WorkerInfo>, CoordinatorError> {
        Ok(self.inner.get_workers(pb::GetWorkersRequest {}).await?.into_inner().workers)
    }

    pub async fn pending_stops(&mut self, worker_id: &str) -> Result<Vec<Uuid>, CoordinatorError> {
        let resp = self.inner.pending_stops(pb::PendingStopsRequest { worker_id: worker_id.to_string() }).await?.into_inner();
        resp.dag_run_ids.iter().map(|s| s.parse().map_err(CoordinatorError::from)).collect()
    }

    pub async fn ack_stop(&mut self, worker_id: &str, dag_run_id: Uuid) -> Result<(), CoordinatorError> {
        self.inner.ack_stop(pb::AckStopRequest { worker_id: worker_id.to_string(), dag_run_id: dag_run_id.to_string() }).await?;
        Ok(())
    }
}
