//! # iotagent-server
//!
//! Message handling and update dispatch for the JSON IoT agent.
//!
//! A transport hands each message to the [`MessageHandler`], which resolves
//! the device, selects the flow and lets the [`Dispatcher`] push attribute
//! updates or configuration replies through the collaborator traits in
//! [`collaborators`].

pub mod alarms;
pub mod collaborators;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod memory;
pub mod transaction;

pub use alarms::{AlarmRegistry, AlarmSink, BACKEND_ALARM, TRANSPORT_ALARM};
pub use collaborators::{
    AgentServices, ContextBackend, DeviceRegistry, GroupResolver, TransportBinding,
    TransportSelector,
};
pub use context::LogContext;
pub use dispatcher::{DispatchOutcome, DispatchSettings, Dispatcher};
pub use error::{BackendError, ConfigurationError, IngestError, RegistryError, TransportError};
pub use handler::MessageHandler;
pub use iotagent_core::{AttributeRecord, DeviceDescriptor, Dialect, Flow, RawMessage};
pub use transaction::{LoggingTransactions, Transaction, TransactionSink};
