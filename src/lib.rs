//! tflow - status synchronisation engine for workflow scheduler consoles

pub mod backend;
pub mod config;
pub mod credentials;
pub mod error;
pub mod info;
pub mod interface;
pub mod logs;
pub mod observer;
pub mod parser;
pub mod session;
pub mod status;
pub mod tree;

pub use backend::{create_backend, CdpBackend, CommandOutcome, DemoBackend, FlowBackend, FlowCommand};
pub use config::TflowConfig;
pub use credentials::{Credentials, SmsRc};
pub use error::{FixSuggestion, TflowError};
pub use info::{ExtraFlowNodeInfo, InfoKind};
pub use interface::{FlowEvent, FlowInterface};
pub use logs::{LogFile, LogsGateway};
pub use observer::{ListenerId, Observer, Subject};
pub use session::{CdpSession, SessionConfig};
pub use status::FlowStatus;
pub use tree::{FlowNode, NodeId, RootFlowNode};
