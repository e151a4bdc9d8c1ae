/*!
# ACLK Query - agent-to-cloud link query dispatch

Time-ordered, deduplicating work queue drained by a pool of worker threads:
- metadata pushes (on-connect, chart, chart-delete, child state)
- alarm forwarding
- cloud queries answered through the internal API (v1 text, v2 binary + gzip)
- protocol version negotiation and per-host popcorn gating
*/

pub mod config;
pub mod encode;
pub mod error;
pub mod executor;
pub mod header;
pub mod host;
pub mod negotiation;
pub mod ports;
pub mod queue;
pub mod record;
pub mod stats;
pub mod threads;
pub mod wake;

pub use config::QueryConfig;
pub use error::{AclkError, Result};
pub use executor::{Collaborators, QueryExecutor};
pub use header::SessionHeader;
pub use host::{Host, HostAclkState, HostRegistry, MetadataState, PopcornState};
pub use negotiation::{Negotiation, NegotiationCheck, NegotiationState};
pub use ports::{ApiResponse, HeaderBuilder, MetadataSource, QueryEngine, Transport};
pub use queue::{EnqueueOutcome, Pop, QueryQueue};
pub use record::{CloudRequest, Command, QueryPayload, QueryRecord, QueryRequest};
pub use stats::{QueryStats, StatsSample};
pub use threads::{AclkQuery, Tick};
pub use wake::WakeChannel;
