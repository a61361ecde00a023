//! # Keymaster Client
//!
//! Client side of the Keymaster protocol:
//!
//! - [`api_client`]: the issuer's HTTP API
//! - [`workflow`]: approval engine sessions and the polling loop
//! - [`sink`] / [`profile_store`]: merging issued credentials into the local
//!   AWS credentials file
//! - [`ci`]: the non-interactive flow that ties them together
//!
//! ## Usage
//!
//! ```ignore
//! use keymaster_client::{CiRunner, HttpIssuerApi};
//!
//! let runner = CiRunner::new(Arc::new(HttpIssuerApi::new(&request.issuer_url)));
//! let outcome = runner.run(&request).await?;
//! ```

pub mod api_client;
pub mod ci;
pub mod error;
pub mod profile_store;
pub mod sink;
pub mod workflow;

pub use api_client::{HttpIssuerApi, IssuerApi};
pub use ci::{CiOutcome, CiRequest, CiRunner};
pub use error::{ApiClientError, CiError, WorkflowError, WriteError};
pub use profile_store::ProfileStore;
pub use sink::{persist, save_iam_credentials};
pub use workflow::{
    ApprovalEngine, HttpApprovalEngine, Sleeper, TokioSleeper, WorkflowClient, WorkflowRequest, WorkflowSession,
    WorkflowState,
};
