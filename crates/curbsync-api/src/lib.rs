pub mod client;
pub mod config;
pub mod error;
pub mod records;
pub mod resolver;
pub mod transport;

pub use client::FleetClient;
pub use config::FleetApiConfig;
pub use error::{ApiError, ResolveError};
pub use records::{BinRecord, TaskRecord, VehicleRecord, WorkerRecord};
pub use resolver::{normalize_collection, resolve, resolve_records};
pub use transport::{HttpMethod, ReqwestRestTransport, RequestDescriptor, RestTransport};
