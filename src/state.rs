use std::sync::Arc;

use crate::db::DatabaseProxy;
use crate::services::scheduler::SchedulerParams;

#[derive(Clone)]
pub struct AppState {
    db_proxy: Option<Arc<DatabaseProxy>>,
    scheduler_params: Arc<SchedulerParams>,
}

impl AppState {
    pub fn new(db_proxy: Option<Arc<DatabaseProxy>>, scheduler_params: SchedulerParams) -> Self {
        Self {
            db_proxy,
            scheduler_params: Arc::new(scheduler_params),
        }
    }

    pub fn db_proxy(&self) -> Option<Arc<DatabaseProxy>> {
        self.db_proxy.clone()
    }

    pub fn scheduler_params(&self) -> &SchedulerParams {
        &self.scheduler_params
    }
}
