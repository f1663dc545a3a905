//! Tower layers of the client stack.

mod retry;
mod user_agent;

pub use retry::{RetryLayer, RetryService, calculate_backoff};
pub use user_agent::{UserAgentLayer, UserAgentService};
