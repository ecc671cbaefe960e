/// Runtime configuration for a fetched-records controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Diff consecutive pending refetches straight to the latest one instead
    /// of one script per queued transaction. The delivered scripts still
    /// compose to the same projection.
    pub coalesce_refetches: bool,
    /// Thread name of the controller's diff worker.
    pub diff_queue_label: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            coalesce_refetches: false,
            diff_queue_label: "livedb-diff".into(),
        }
    }
}
