//! Entity factories: a static table of defaults and the dispatcher that
//! turns `make_<name>` calls into transport `create` requests.

pub mod dispatcher;
pub mod producers;
pub mod registry;

use crate::transport::TransportError;
use sutforge_common::ErrorCode;
use thiserror::Error;

pub use dispatcher::{FactoryDispatcher, Overrides};
pub use registry::{FactoryEntry, FactoryRegistry, FactorySpec, FieldValue, ProducerContext};

#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("Unknown factory: {0}")]
    Unknown(String),

    #[error("Unknown factory: {name} (redirect {chain} ends at a missing entry)")]
    DanglingRedirect { name: String, chain: String },

    #[error("Factory redirects form a loop: {0}")]
    RedirectLoop(String),

    #[error("No transport class matches factory {factory} (available: {available})")]
    ClassNotFound { factory: String, available: String },

    #[error("Transport for factory {0} has been dropped")]
    TransportGone(String),

    #[error("Failed to create {factory} with data:\n{options}\n{message}")]
    Failure {
        factory: String,
        /// Pretty-printed option map sent to the transport.
        options: String,
        message: String,
        #[source]
        source: TransportError,
    },
}

impl FactoryError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Unknown(_) | Self::DanglingRedirect { .. } => ErrorCode::UnknownFactory,
            Self::RedirectLoop(_) => ErrorCode::FactoryRedirectLoop,
            Self::ClassNotFound { .. } => ErrorCode::FactoryClassNotFound,
            Self::TransportGone(_) => ErrorCode::FactoryTransportGone,
            Self::Failure { .. } => ErrorCode::FactoryFailure,
        }
    }

    /// The transport error behind a failed create.
    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            Self::Failure { source, .. } => Some(source),
            _ => None,
        }
    }
}
