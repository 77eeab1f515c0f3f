use std::sync::Arc;

use crate::poller::PollMonitor;
use crate::source::HttpPositionSource;
use crate::store::SampleStore;

use super::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn SampleStore>,
    /// Shared with the poll loop; used by the fetch-now endpoint.
    pub source: Arc<HttpPositionSource>,
    pub poller: PollMonitor,
}
