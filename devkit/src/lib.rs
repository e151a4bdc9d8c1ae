/*!
# ACLK DevKit - mocks and helpers for testing the query core

- In-memory transport recording every published message
- Canned query engine and metadata source
- Builders for inbound cloud messages, parsers for outbound ones
- Test harness wiring it all to a worker pool
*/

pub mod canned;
pub mod messages;
pub mod mock_transport;
pub mod test_utils;

pub use canned::{StaticMetadata, StaticQueryEngine};
pub use messages::{AclkMessageBuilder, BinaryResponse};
pub use mock_transport::{MockTransport, SentMessage};
pub use test_utils::TestHarness;
