use crate::session_cache::{SessionCacheManager, SessionError};
use std::sync::Arc;
use uuid::Uuid;

/// Maps between cluster-wide session ids and node-qualified ids
/// (`<cluster id>.<worker>`), and hands out fresh ids.
pub struct SessionIdManager {
    manager: Arc<SessionCacheManager>,
    worker_name: Option<String>,
}

impl SessionIdManager {
    pub fn new(manager: Arc<SessionCacheManager>, worker_name: Option<String>) -> Self {
        Self {
            manager,
            worker_name,
        }
    }

    pub fn worker_name(&self) -> Option<&str> {
        self.worker_name.as_deref()
    }

    /// Strips the worker suffix. A leading dot is part of the id.
    pub fn cluster_id<'a>(&self, node_id: &'a str) -> &'a str {
        match node_id.rfind('.') {
            Some(dot) if dot > 0 => &node_id[..dot],
            _ => node_id,
        }
    }

    pub fn node_id(&self, cluster_id: &str) -> String {
        match &self.worker_name {
            Some(worker) => format!("{cluster_id}.{worker}"),
            None => cluster_id.to_string(),
        }
    }

    pub fn id_in_use(&self, cluster_id: &str) -> Result<bool, SessionError> {
        Ok(self.manager.load(cluster_id)?.is_some())
    }

    pub fn new_session_id(&self) -> Result<String, SessionError> {
        loop {
            let id = Uuid::new_v4().simple().to_string();
            if !self.id_in_use(&id)? {
                return Ok(id);
            }
        }
    }
}
