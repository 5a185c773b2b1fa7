use crate::auth::ModelUserContext;
use crate::config::SessionCacheConfig;
use crate::model::RowKey;
use crate::repository::Repository;
use crate::session::{FlushPolicy, ModelSession};
use crate::session_cache::cache::ExpiringCache;
use crate::session_cache::model::{SessionRow, SessionRowMapper};
use crate::session_cache::{ManagedSession, SessionError, epoch_millis};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Persists [`ManagedSession`]s as rows, fronted by a bounded expiring cache.
///
/// The cache memoizes absent rows too. Each stored row carries a version
/// starting at 0 and bumped by one on every save of an existing session;
/// `refresh` reloads only when the caller's version differs from the cached
/// row's. All read-modify-write sequences for one id run under that id's
/// cache lock.
pub struct SessionCacheManager {
    repository: Repository<SessionRowMapper>,
    user: ModelUserContext,
    config: SessionCacheConfig,
    cache: ExpiringCache<String, Option<SessionRow>>,
}

impl SessionCacheManager {
    pub fn new(
        session: Arc<dyn ModelSession>,
        user: ModelUserContext,
        config: SessionCacheConfig,
    ) -> Self {
        let cache = ExpiringCache::new(config.max_cache_size, config.cache_expiration, config.shards);
        Self {
            repository: Repository::new(session, SessionRowMapper),
            user,
            config,
            cache,
        }
    }

    pub fn config(&self) -> &SessionCacheConfig {
        &self.config
    }

    pub fn repository(&self) -> &Repository<SessionRowMapper> {
        &self.repository
    }

    pub fn user(&self) -> &ModelUserContext {
        &self.user
    }

    pub fn cache(&self) -> &ExpiringCache<String, Option<SessionRow>> {
        &self.cache
    }

    fn cached_row(&self, cluster_id: &str) -> Result<Option<SessionRow>, SessionError> {
        let key = cluster_id.to_string();
        self.cache.get_or_try_insert_with(&key, || -> Result<_, SessionError> {
            trace!(cluster_id, "session cache miss");
            Ok(self.repository.find_by_row_key(cluster_id, &self.user)?)
        })
    }

    /// Starts a brand new session for the current request and saves it.
    /// The returned session is already active; finish the request with
    /// [`ManagedSession::complete`].
    pub fn create(&self, cluster_id: &str, now: i64) -> Result<ManagedSession, SessionError> {
        let mut session = ManagedSession::new(cluster_id, now);
        self.save(&mut session)?;
        session.mark_active();
        Ok(session)
    }

    /// The stored session, or `None` when no row exists.
    pub fn load(&self, cluster_id: &str) -> Result<Option<ManagedSession>, SessionError> {
        let _guard = self.cache.lock_key(&cluster_id.to_string());
        let Some(row) = self.cached_row(cluster_id)? else {
            return Ok(None);
        };
        let session = ManagedSession::restored(
            cluster_id,
            row.created().unwrap_or_default(),
            row.accessed().unwrap_or_default(),
            row.version(),
            row.attributes()?,
        );
        Ok(Some(session))
    }

    /// Writes the session and returns its new version.
    ///
    /// An invalid session has its row deleted and cache entry dropped, and
    /// `None` is returned. A session without a row is created at version 0
    /// with every attribute. An existing one moves one past the newer of its
    /// own and the stored version and writes only the attributes changed since
    /// the last save (all of them when `save_all_attributes` is set). The
    /// write is flushed before returning.
    pub fn save(&self, session: &mut ManagedSession) -> Result<Option<i64>, SessionError> {
        let key = session.cluster_id().to_string();
        let _guard = self.cache.lock_key(&key);

        if !session.is_valid() {
            debug!(cluster_id = %key, "removing invalidated session");
            self.repository.delete(&RowKey::new(key.as_str()), &self.user)?;
            self.cache.invalidate(&key);
            return Ok(None);
        }

        let (mut row, is_new, version) = match self.cached_row(&key)? {
            None => {
                let mut row = SessionRow::new(&key)?;
                row.set_created(session.created());
                row.set_stored_cluster_id(&key);
                (row, true, 0)
            }
            Some(row) => {
                // A copy of the session saved elsewhere may have moved the row ahead.
                let base = session.version().max(row.version()).unwrap_or(-1);
                (row, false, base + 1)
            }
        };
        row.set_version(version);
        row.set_accessed(session.accessed());

        let mut names = session.take_dirty();
        if is_new || self.config.save_all_attributes {
            names.extend(session.attribute_names().map(str::to_string));
        }
        for name in &names {
            match session.attribute(name) {
                Some(value) => row.set_attribute(name, value)?,
                None => {
                    row.remove_attribute(name);
                }
            }
        }

        trace!(cluster_id = %key, version, attributes = names.len(), "saving session");
        self.repository.save(&row, FlushPolicy::Flush)?;
        row.mark_persisted();
        self.cache.insert(key, Some(row));
        session.synced(Some(version));
        Ok(Some(version))
    }

    /// Re-syncs `session` with the cached row.
    ///
    /// Nothing happens when the versions agree. A missing row invalidates the
    /// session. Otherwise the session's attributes are replaced by the row's
    /// and the row's access time is touched and written.
    pub fn refresh(&self, session: &mut ManagedSession) -> Result<Option<i64>, SessionError> {
        let key = session.cluster_id().to_string();
        let _guard = self.cache.lock_key(&key);

        let cached = self.cached_row(&key)?;
        if let (Some(expected), Some(row)) = (session.version(), &cached) {
            if row.version() == Some(expected) {
                return Ok(Some(expected));
            }
        }

        let Some(mut row) = cached else {
            debug!(cluster_id = %key, "session row is gone; invalidating");
            session.mark_invalid();
            self.cache.invalidate(&key);
            return Ok(None);
        };

        if session.version().is_some() {
            warn!(
                cluster_id = %key,
                session_version = ?session.version(),
                stored_version = ?row.version(),
                "session diverged from stored row; reloading"
            );
        }
        session.replace_attributes(row.attributes()?);
        row.set_accessed(epoch_millis());
        self.repository.save(&row, FlushPolicy::Default)?;
        row.mark_persisted();
        let version = row.version();
        self.cache.insert(key, Some(row));
        session.synced(version);
        Ok(version)
    }

    /// Deletes the session's row. Returns whether one existed.
    pub fn remove(&self, session: &ManagedSession) -> Result<bool, SessionError> {
        let key = session.cluster_id().to_string();
        let _guard = self.cache.lock_key(&key);
        let Some(row) = self.cached_row(&key)? else {
            return Ok(false);
        };
        self.repository.delete(row.row().row_key(), &self.user)?;
        self.cache.invalidate(&key);
        Ok(true)
    }
}
