//! Controller configuration.

/// Settings the lifecycle controller and dispatcher read at runtime.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Network used when a create request names none.
    pub default_network: String,
    /// Seconds passed to stop/reboot when the caller gives no timeout.
    pub default_stop_timeout: u64,
    /// Default and upper bound for list page sizes.
    pub max_list_limit: usize,
    /// Project applied to requests without an `X-Project-Id` header.
    pub default_project: String,
    /// User applied to requests without an `X-User-Id` header.
    pub default_user: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            default_network: "private".to_string(),
            default_stop_timeout: 10,
            max_list_limit: 1000,
            default_project: "default".to_string(),
            default_user: "admin".to_string(),
        }
    }
}
