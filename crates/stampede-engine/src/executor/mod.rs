//! Request executor implementations.

mod browser;
mod http;
mod mock;

pub use browser::BrowserExecutor;
pub use http::HttpExecutor;
pub use mock::{MockConfig, MockExecutor};
