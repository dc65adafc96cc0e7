//! Store key layout.
//!
//! ```text
//! /<namespace>/services/<app>                    directory, TTL refreshed
//! /<namespace>/services/<app>/<container-name>   "<host>:<port>"
//! ```

/// Builds store paths under a namespace (`deis` by default).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    namespace: String,
}

impl Default for KeyLayout {
    fn default() -> Self {
        Self::new("deis")
    }
}

impl KeyLayout {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.trim_matches('/').to_string(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// `/<namespace>/services`
    pub fn services_root(&self) -> String {
        format!("/{}/services", self.namespace)
    }

    /// Directory holding every endpoint of one application.
    pub fn app_dir(&self, app_name: &str) -> String {
        format!("{}/{app_name}", self.services_root())
    }

    /// Relative path recorded in the registration table.
    pub fn app_path(app_name: &str, container_name: &str) -> String {
        format!("{app_name}/{container_name}")
    }

    /// Endpoint key for a relative `<app>/<container>` path.
    pub fn key_for_path(&self, app_path: &str) -> String {
        format!("{}/{app_path}", self.services_root())
    }

    /// Endpoint key for one container of an application.
    pub fn endpoint_key(&self, app_name: &str, container_name: &str) -> String {
        self.key_for_path(&Self::app_path(app_name, container_name))
    }
}
