//! Consensus node: wires the election core to cementing and the ambient
//! stack.
//!
//! The node is the central coordinator that:
//! - Feeds incoming votes and publishes into active elections
//! - Answers confirmation requests through the request aggregator
//! - Cements confirmed blocks with the bounded confirmation height processor
//! - Loads TOML configuration, installs logging and exports metrics

pub mod cementing;
pub mod config;
pub mod confirmed;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod node;

pub use cementing::{ConfirmationHeightBounded, ConfirmationHeightProcessor};
pub use config::{CementingConfig, NodeConfig};
pub use confirmed::{ConfirmedProcessor, PROCESS_CONFIRMED_ATTEMPTS};
pub use error::{CementError, NodeError};
pub use logging::{init_logging, try_init_logging, LogFormat};
pub use metrics::{NodeGauges, NodeMetrics};
pub use node::ConsensusNode;
