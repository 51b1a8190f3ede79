use curbsync_core::{BinId, TaskId, VehicleId, WorkerId, WorkerStatus};
use serde::{Deserialize, Serialize};

/// A worker as the fleet backend returns it. The backend stores the
/// operational status under two different keys depending on which service
/// answered; both are modeled and compared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRecord {
    pub id: WorkerId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub worker_status: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl WorkerRecord {
    /// The status this record effectively reports, preferring the dedicated
    /// `workerStatus` key over the generic `status` key.
    pub fn effective_status(&self) -> Option<WorkerStatus> {
        self.worker_status
            .as_deref()
            .and_then(WorkerStatus::parse)
            .or_else(|| self.status.as_deref().and_then(WorkerStatus::parse))
    }

    /// True when every status field the record carries agrees with `desired`
    /// and at least one field is present. An unparseable field counts as
    /// divergence.
    pub fn converged_on(&self, desired: WorkerStatus) -> bool {
        let mut seen = false;
        for raw in [self.worker_status.as_deref(), self.status.as_deref()]
            .into_iter()
            .flatten()
        {
            match WorkerStatus::parse(raw) {
                Some(value) if value == desired => seen = true,
                _ => return false,
            }
        }
        seen
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleRecord {
    pub id: VehicleId,
    #[serde(default)]
    pub plate: Option<String>,
    #[serde(default)]
    pub vehicle_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinRecord {
    pub id: BinId,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub fill_level: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: TaskId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub assigned_worker: Option<WorkerId>,
    #[serde(default)]
    pub assigned_vehicle: Option<VehicleId>,
}
