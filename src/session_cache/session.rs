use crate::session_cache::{SessionCacheManager, SessionError};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// An HTTP session as seen by the cache manager.
///
/// Attribute writes are tracked by name so the manager persists only what
/// changed. `access`/`complete` bracket each request: the first concurrent
/// access may reload from the cache, the last completion may save.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedSession {
    cluster_id: String,
    created: i64,
    accessed: i64,
    attributes: BTreeMap<String, serde_json::Value>,
    dirty: BTreeSet<String>,
    version: Option<i64>,
    valid: bool,
    active: usize,
    last_sync: i64,
}

impl ManagedSession {
    /// A session created by the current request; it has never been saved.
    pub fn new(cluster_id: impl Into<String>, now: i64) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            created: now,
            accessed: now,
            attributes: BTreeMap::new(),
            dirty: BTreeSet::new(),
            version: None,
            valid: true,
            active: 0,
            last_sync: 0,
        }
    }

    pub(crate) fn restored(
        cluster_id: impl Into<String>,
        created: i64,
        accessed: i64,
        version: Option<i64>,
        attributes: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            created,
            accessed,
            attributes,
            dirty: BTreeSet::new(),
            version,
            valid: true,
            active: 0,
            last_sync: 0,
        }
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    pub fn created(&self) -> i64 {
        self.created
    }

    pub fn accessed(&self) -> i64 {
        self.accessed
    }

    pub fn version(&self) -> Option<i64> {
        self.version
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn attribute(&self, name: &str) -> Option<&serde_json::Value> {
        self.attributes.get(name)
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    fn check_valid(&self) -> Result<(), SessionError> {
        if self.valid {
            Ok(())
        } else {
            Err(SessionError::Invalidated {
                cluster_id: self.cluster_id.clone(),
            })
        }
    }

    /// Stores `value`. The name becomes dirty only when the value changes.
    pub fn set_attribute(
        &mut self,
        name: &str,
        value: serde_json::Value,
    ) -> Result<bool, SessionError> {
        self.check_valid()?;
        if self.attributes.get(name) == Some(&value) {
            return Ok(false);
        }
        self.attributes.insert(name.to_string(), value);
        self.dirty.insert(name.to_string());
        Ok(true)
    }

    pub fn remove_attribute(&mut self, name: &str) -> Result<bool, SessionError> {
        self.check_valid()?;
        if self.attributes.remove(name).is_none() {
            return Ok(false);
        }
        self.dirty.insert(name.to_string());
        Ok(true)
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn take_dirty(&mut self) -> BTreeSet<String> {
        std::mem::take(&mut self.dirty)
    }

    /// Starts a request. The first of overlapping requests refreshes when
    /// the session has not been synced within the stale period.
    pub fn access(&mut self, manager: &SessionCacheManager, now: i64) -> Result<(), SessionError> {
        self.check_valid()?;
        self.active += 1;
        if self.active == 1 {
            let stale_period = manager.config().stale_period;
            if stale_period.is_zero() || elapsed(self.last_sync, now) > stale_period {
                manager.refresh(self)?;
            }
        }
        self.accessed = now;
        Ok(())
    }

    /// Ends a request. The last of overlapping requests saves when the save
    /// period has elapsed or attributes changed.
    pub fn complete(&mut self, manager: &SessionCacheManager) -> Result<(), SessionError> {
        self.active = self.active.saturating_sub(1);
        if self.active > 0 {
            return Ok(());
        }
        let save_period = manager.config().save_period;
        if save_period.is_zero()
            || self.is_dirty()
            || elapsed(self.last_sync, self.accessed) >= save_period
        {
            manager.save(self)?;
        }
        Ok(())
    }

    /// Invalidates the session and removes its stored row.
    pub fn invalidate(&mut self, manager: &SessionCacheManager) -> Result<(), SessionError> {
        self.check_valid()?;
        self.valid = false;
        manager.save(self)?;
        Ok(())
    }

    pub(crate) fn mark_active(&mut self) {
        self.active += 1;
    }

    pub(crate) fn mark_invalid(&mut self) {
        self.valid = false;
    }

    pub(crate) fn replace_attributes(&mut self, attributes: BTreeMap<String, serde_json::Value>) {
        self.attributes = attributes;
        self.dirty.clear();
    }

    pub(crate) fn synced(&mut self, version: Option<i64>) {
        self.version = version;
        self.last_sync = self.accessed;
    }
}

fn elapsed(from: i64, to: i64) -> Duration {
    Duration::from_millis(to.saturating_sub(from).max(0).unsigned_abs())
}
