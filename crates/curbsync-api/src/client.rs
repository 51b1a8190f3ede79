use std::sync::Arc;

use curbsync_core::{WorkerId, WorkerStatus};
use serde_json::json;

use crate::config::FleetApiConfig;
use crate::error::ApiError;
use crate::records::{BinRecord, TaskRecord, VehicleRecord, WorkerRecord};
use crate::resolver::resolve_records;
use crate::transport::{ReqwestRestTransport, RequestDescriptor, RestTransport};

/// Facade over the fleet REST backend. Read paths go through the endpoint
/// resolver because several resources are still served under
/// historically-accumulated alternate paths; callers only ever see the
/// canonical records.
#[derive(Clone)]
pub struct FleetClient {
    transport: Arc<dyn RestTransport>,
}

impl FleetClient {
    pub fn new(config: &FleetApiConfig) -> Result<Self, ApiError> {
        let transport = ReqwestRestTransport::new(config)?;
        Ok(Self::with_transport(Arc::new(transport)))
    }

    pub fn from_env() -> Result<Self, ApiError> {
        let config = FleetApiConfig::from_env()?;
        Self::new(&config)
    }

    pub fn with_transport(transport: Arc<dyn RestTransport>) -> Self {
        Self { transport }
    }

    fn worker_list_candidates() -> Vec<RequestDescriptor> {
        vec![
            RequestDescriptor::get("/workers"),
            RequestDescriptor::get("/users"),
        ]
    }

    fn worker_candidates(worker_id: &WorkerId) -> Vec<RequestDescriptor> {
        vec![
            RequestDescriptor::get(format!("/workers/{}", worker_id.as_str())),
            RequestDescriptor::get(format!("/users/{}", worker_id.as_str())),
        ]
    }

    fn vehicle_list_candidates() -> Vec<RequestDescriptor> {
        vec![
            RequestDescriptor::get("/vehicles"),
            RequestDescriptor::get("/fleet/vehicles"),
        ]
    }

    pub async fn list_workers(&self) -> Result<Vec<WorkerRecord>, ApiError> {
        resolve_records(self.transport.as_ref(), &Self::worker_list_candidates()).await
    }

    pub async fn get_worker(&self, worker_id: &WorkerId) -> Result<WorkerRecord, ApiError> {
        let mut records: Vec<WorkerRecord> =
            resolve_records(self.transport.as_ref(), &Self::worker_candidates(worker_id)).await?;
        if records.is_empty() {
            return Err(ApiError::NotFound(format!(
                "worker {}",
                worker_id.as_str()
            )));
        }
        Ok(records.swap_remove(0))
    }

    pub async fn list_vehicles(&self) -> Result<Vec<VehicleRecord>, ApiError> {
        resolve_records(self.transport.as_ref(), &Self::vehicle_list_candidates()).await
    }

    pub async fn list_bins(&self) -> Result<Vec<BinRecord>, ApiError> {
        resolve_records(self.transport.as_ref(), &[RequestDescriptor::get("/bins")]).await
    }

    pub async fn list_tasks(&self) -> Result<Vec<TaskRecord>, ApiError> {
        resolve_records(self.transport.as_ref(), &[RequestDescriptor::get("/tasks")]).await
    }

    /// Dedicated status update endpoint.
    pub async fn update_worker_status(
        &self,
        worker_id: &WorkerId,
        status: WorkerStatus,
    ) -> Result<(), ApiError> {
        let request = RequestDescriptor::patch(
            format!("/workers/{}/status", worker_id.as_str()),
            json!({ "status": status.as_str() }),
        );
        self.transport.execute(&request).await.map(|_| ())
    }

    /// Generic record update carrying the status under both keys the backend
    /// has been observed to store it under.
    pub async fn update_worker_record(
        &self,
        worker_id: &WorkerId,
        status: WorkerStatus,
    ) -> Result<(), ApiError> {
        let request = RequestDescriptor::patch(
            format!("/workers/{}", worker_id.as_str()),
            json!({
                "workerStatus": status.as_str(),
                "status": status.as_str(),
            }),
        );
        self.transport.execute(&request).await.map(|_| ())
    }
}
