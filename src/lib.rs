pub mod config;
pub mod csv;
pub mod model;
pub mod service;
pub mod store;
pub mod workflow;

pub use config::WorkflowConfig;
pub use model::{Actor, AuditEntry, AuditId, Role, Transaction, TransactionStatus, TxId};
pub use service::{AdminCommand, Execution, Listing, Request, ServiceError, WorkflowService};
pub use store::{InMemoryStorage, Storage, StorageError};
pub use workflow::{
    Action, Command, GuardViolation, Rejection, Transition, Workflow, WorkflowPolicy,
};
