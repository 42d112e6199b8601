//! Scout ingest - data source management, admission filtering and the
//! bounded priority queue feeding the pipeline.

pub mod queue;
pub mod service;
pub mod source;
pub mod ws;

pub use queue::TransactionQueue;
pub use service::{AdmissionFilter, HealthStatus, IngestionConfig, IngestionService};
pub use source::{DataSource, NotificationParser, RawNotification};
pub use ws::WebSocketSource;
