use std::sync::RwLock;

use fedrun_store::NamespaceProvider;
use tracing::info;

/// Storage namespace of the logged-in user, as last reported by the session
/// feed. Empty while nobody is logged in.
#[derive(Debug, Default)]
pub struct SessionNamespace {
    current: RwLock<String>,
}

impl SessionNamespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, namespace: &str) {
        if let Ok(mut current) = self.current.write() {
            *current = namespace.to_string();
            info!(%namespace, "storage namespace set");
        }
    }

    pub fn clear(&self) {
        if let Ok(mut current) = self.current.write() {
            current.clear();
        }
    }
}

impl NamespaceProvider for SessionNamespace {
    fn current_namespace(&self) -> String {
        self.current
            .read()
            .map(|ns| ns.clone())
            .unwrap_or_default()
    }
}
