//! Live query lifecycle: setup, change-driven refresh and teardown.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::Instrument;

use crate::backend::{Database, ListenerId, NotifyCallback, Transaction};
use crate::dependencies;
use crate::dispatcher::{self, Mailbox, RefreshTarget, WorkerHandle};
use crate::error::{LiveQueryError, Result, SetupStage, TeardownError};
use crate::ids::{IdSource, ProcessIds};
use crate::materialize;
use crate::naming;
use crate::sink::ResultsSink;
use crate::sql;
use crate::triggers::{self, ProvisionReport};
use crate::types::{LiveQueryId, LiveQueryState, QueryResults, TableRef, Value};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Creates live queries against one database session.
pub struct LiveQueryManager<D: Database> {
    db: Arc<D>,
    ids: Arc<dyn IdSource>,
}

impl<D: Database> Clone for LiveQueryManager<D> {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
            ids: Arc::clone(&self.ids),
        }
    }
}

impl<D: Database> LiveQueryManager<D> {
    /// Manager drawing ids from the process-wide counter.
    pub fn new(db: Arc<D>) -> Self {
        Self::with_id_source(db, Arc::new(ProcessIds))
    }

    pub fn with_id_source(db: Arc<D>, ids: Arc<dyn IdSource>) -> Self {
        Self { db, ids }
    }

    #[must_use]
    pub fn database(&self) -> &Arc<D> {
        &self.db
    }

    /// Register `query` as a live query delivering snapshots to `sink`.
    ///
    /// The view, its dependency triggers and the channel listeners are all
    /// in place before this returns, and `sink` has already received the
    /// initial snapshot.
    ///
    /// # Errors
    ///
    /// - [`LiveQueryError::SetupFailure`] when binding, view creation,
    ///   dependency resolution, trigger installation, commit or the initial
    ///   fetch fails. Nothing created by this call is left behind, though
    ///   triggers committed before an initial-fetch failure stay installed.
    /// - [`LiveQueryError::ListenerRegistrationFailure`] when a channel
    ///   listener cannot be registered. Listeners registered so far are
    ///   removed and the view is dropped.
    pub async fn create<S: ResultsSink>(
        &self,
        query: &str,
        params: Vec<Value>,
        sink: S,
    ) -> Result<LiveQuery<D>> {
        let id = self.ids.next_id();
        let span = tracing::info_span!("live_query", id = %id);
        self.create_with_id(id, query, params, Arc::new(sink))
            .instrument(span)
            .await
    }

    async fn create_with_id(
        &self,
        id: LiveQueryId,
        query: &str,
        params: Vec<Value>,
        sink: Arc<dyn ResultsSink>,
    ) -> Result<LiveQuery<D>> {
        let view_name = naming::view_name(id);
        let bound = sql::bind_params(query, &params)
            .map_err(LiveQueryError::setup(SetupStage::BindParameters))?;

        let (dependencies, report) = self.setup(&view_name, &bound).await?;
        let channels: Vec<String> = dependencies.iter().map(naming::channel_name).collect();

        let shared = Arc::new(Shared {
            id,
            view_name,
            db: Arc::clone(&self.db),
            sink,
            lifecycle: Mutex::new(Lifecycle {
                state: LiveQueryState::Initializing,
                closing: false,
                latest: Arc::new(QueryResults::default()),
            }),
            delivery: Mutex::new(()),
            refresh_lock: tokio::sync::Mutex::new(()),
            listeners: Mutex::new(Vec::new()),
            worker: Mutex::new(None),
        });

        // Requests queue in the mailbox until the worker starts after activation.
        let (mailbox, inbox) = dispatcher::mailbox();
        if let Err(err) = shared.register_listeners(&channels, &mailbox).await {
            shared.abandon().await;
            return Err(err);
        }

        let initial = match materialize::fetch(&*shared.db, &shared.view_name).await {
            Ok(results) => Arc::new(results),
            Err(source) => {
                shared.abandon().await;
                return Err(LiveQueryError::SetupFailure {
                    stage: SetupStage::InitialFetch,
                    source,
                });
            }
        };

        shared.activate(Arc::clone(&initial));
        let worker = dispatcher::spawn(Arc::clone(&shared), inbox);
        *lock(&shared.worker) = Some(worker);

        tracing::info!(
            view = %shared.view_name,
            dependencies = dependencies.len(),
            triggers_installed = report.installed.len(),
            rows = initial.len(),
            "live query active"
        );

        Ok(LiveQuery {
            shared,
            info: Arc::new(Info {
                query: query.to_owned(),
                params,
                dependencies,
                channels,
                report,
                initial,
            }),
        })
    }

    /// View, dependency and trigger setup in one transaction.
    async fn setup(
        &self,
        view_name: &str,
        bound_query: &str,
    ) -> Result<(Vec<TableRef>, ProvisionReport)> {
        let mut tx = self
            .db
            .begin()
            .await
            .map_err(LiveQueryError::setup(SetupStage::Begin))?;

        match Self::setup_in(&mut tx, view_name, bound_query).await {
            Ok(outcome) => {
                tx.commit()
                    .await
                    .map_err(LiveQueryError::setup(SetupStage::Commit))?;
                Ok(outcome)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "rollback of failed setup failed");
                }
                tracing::warn!(error = %err, "live query setup rolled back");
                Err(err)
            }
        }
    }

    async fn setup_in(
        tx: &mut D::Transaction,
        view_name: &str,
        bound_query: &str,
    ) -> Result<(Vec<TableRef>, ProvisionReport)> {
        materialize::create_view(tx, view_name, bound_query)
            .await
            .map_err(LiveQueryError::setup(SetupStage::MaterializeView))?;
        let dependencies = dependencies::resolve(tx, view_name)
            .await
            .map_err(LiveQueryError::setup(SetupStage::ResolveDependencies))?;
        let report = triggers::provision(tx, &dependencies)
            .await
            .map_err(LiveQueryError::setup(SetupStage::InstallTriggers))?;
        Ok((dependencies, report))
    }
}

struct Lifecycle {
    state: LiveQueryState,
    /// Set once teardown starts; no delivery may happen afterwards.
    closing: bool,
    latest: Arc<QueryResults>,
}

/// State shared by the handle, its clones and the refresh worker.
struct Shared<D: Database> {
    id: LiveQueryId,
    view_name: String,
    db: Arc<D>,
    sink: Arc<dyn ResultsSink>,
    lifecycle: Mutex<Lifecycle>,
    /// Held across the closing check and the sink call.
    delivery: Mutex<()>,
    /// Serializes notification-driven and manual refreshes.
    refresh_lock: tokio::sync::Mutex<()>,
    listeners: Mutex<Vec<(String, ListenerId)>>,
    worker: Mutex<Option<WorkerHandle>>,
}

impl<D: Database> Shared<D> {
    async fn register_listeners(&self, channels: &[String], mailbox: &Mailbox) -> Result<()> {
        for channel in channels {
            let mailbox = mailbox.clone();
            let id = self.id;
            let ch = channel.clone();
            let on_event: NotifyCallback = Arc::new(move || {
                if mailbox.notify() {
                    tracing::trace!(live_query = %id, channel = %ch, "refresh requested");
                } else {
                    tracing::trace!(live_query = %id, channel = %ch, "refresh already owed, coalesced");
                }
            });

            match self.db.listen(channel, on_event).await {
                Ok(listener) => {
                    lock(&self.listeners).push((channel.clone(), listener));
                }
                Err(source) => {
                    return Err(LiveQueryError::ListenerRegistrationFailure {
                        channel: channel.clone(),
                        source,
                    })
                }
            }
        }
        Ok(())
    }

    fn activate(&self, initial: Arc<QueryResults>) {
        let _delivery = lock(&self.delivery);
        {
            let mut lifecycle = lock(&self.lifecycle);
            lifecycle.state = LiveQueryState::Active;
            lifecycle.latest = Arc::clone(&initial);
        }
        self.sink.on_results(initial);
    }

    fn state(&self) -> LiveQueryState {
        lock(&self.lifecycle).state
    }

    /// State as seen by callers: a query being torn down is already gone.
    fn effective_state(&self) -> LiveQueryState {
        let lifecycle = lock(&self.lifecycle);
        if lifecycle.closing {
            LiveQueryState::Unsubscribed
        } else {
            lifecycle.state
        }
    }

    fn is_closing(&self) -> bool {
        lock(&self.lifecycle).closing
    }

    /// Mark teardown as started. Returns `false` if it already was.
    fn begin_teardown(&self) -> bool {
        let _delivery = lock(&self.delivery);
        let mut lifecycle = lock(&self.lifecycle);
        if lifecycle.closing {
            return false;
        }
        lifecycle.closing = true;
        true
    }

    /// Re-read the view and hand the snapshot to the sink.
    ///
    /// Returns `Ok(None)` when the live query started closing before the
    /// snapshot could be delivered; the snapshot is discarded.
    async fn refresh_and_deliver(&self) -> Result<Option<Arc<QueryResults>>> {
        let _serial = self.refresh_lock.lock().await;
        if self.is_closing() {
            return Ok(None);
        }
        let results = materialize::fetch(&*self.db, &self.view_name)
            .await
            .map_err(|source| LiveQueryError::RefreshFailure {
                id: self.id,
                source,
            })?;
        Ok(self.deliver(Arc::new(results)))
    }

    fn deliver(&self, results: Arc<QueryResults>) -> Option<Arc<QueryResults>> {
        let _delivery = lock(&self.delivery);
        {
            let mut lifecycle = lock(&self.lifecycle);
            if lifecycle.closing || lifecycle.state != LiveQueryState::Active {
                tracing::debug!(live_query = %self.id, "discarding snapshot of closing live query");
                return None;
            }
            lifecycle.latest = Arc::clone(&results);
        }
        self.sink.on_results(Arc::clone(&results));
        Some(results)
    }

    /// Remove listeners, stop the worker and drop the view, collecting failures.
    async fn teardown(&self) -> Vec<TeardownError> {
        if let Some(worker) = lock(&self.worker).take() {
            worker.stop();
        }

        let listeners = std::mem::take(&mut *lock(&self.listeners));
        let mut errors = Vec::new();
        for (channel, listener) in listeners {
            if let Err(source) = self.db.unlisten(listener).await {
                tracing::warn!(channel = %channel, error = %source, "unlisten failed");
                errors.push(TeardownError::Unlisten { channel, source });
            }
        }

        if let Err(source) = materialize::drop_view(&*self.db, &self.view_name).await {
            tracing::warn!(view = %self.view_name, error = %source, "drop view failed");
            errors.push(TeardownError::DropView {
                view: self.view_name.clone(),
                source,
            });
        }

        lock(&self.lifecycle).state = LiveQueryState::Unsubscribed;
        errors
    }

    /// Best-effort cleanup after a failure that follows a committed setup.
    async fn abandon(&self) {
        self.begin_teardown();
        let errors = self.teardown().await;
        if !errors.is_empty() {
            tracing::warn!(
                live_query = %self.id,
                failures = errors.len(),
                "cleanup after failed setup was incomplete"
            );
        }
    }
}

impl<D: Database> RefreshTarget for Shared<D> {
    async fn refresh(&self) {
        match self.refresh_and_deliver().await {
            Ok(_) => {}
            Err(err) if self.is_closing() => {
                tracing::debug!(error = %err, "refresh failed while closing, ignored");
            }
            Err(err) => {
                tracing::warn!(error = %err, "notification refresh failed");
                self.sink.on_error(&err);
            }
        }
    }
}

struct Info {
    query: String,
    params: Vec<Value>,
    dependencies: Vec<TableRef>,
    channels: Vec<String>,
    report: ProvisionReport,
    initial: Arc<QueryResults>,
}

/// Handle to a registered live query.
///
/// Clones refer to the same live query. Dropping every handle does not tear
/// it down; call [`unsubscribe`](Self::unsubscribe).
pub struct LiveQuery<D: Database> {
    shared: Arc<Shared<D>>,
    info: Arc<Info>,
}

impl<D: Database> Clone for LiveQuery<D> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            info: Arc::clone(&self.info),
        }
    }
}

impl<D: Database> std::fmt::Debug for LiveQuery<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveQuery")
            .field("id", &self.shared.id)
            .field("view_name", &self.shared.view_name)
            .field("state", &self.shared.state())
            .finish_non_exhaustive()
    }
}

impl<D: Database> LiveQuery<D> {
    #[must_use]
    pub fn id(&self) -> LiveQueryId {
        self.shared.id
    }

    #[must_use]
    pub fn view_name(&self) -> &str {
        &self.shared.view_name
    }

    /// Query text as submitted, before parameter binding.
    #[must_use]
    pub fn query(&self) -> &str {
        &self.info.query
    }

    #[must_use]
    pub fn params(&self) -> &[Value] {
        &self.info.params
    }

    /// Base tables the view reads, sorted and deduplicated.
    #[must_use]
    pub fn dependencies(&self) -> &[TableRef] {
        &self.info.dependencies
    }

    /// Channels listened on, one per dependency.
    #[must_use]
    pub fn channels(&self) -> &[String] {
        &self.info.channels
    }

    /// Which triggers this live query installed and which it found in place.
    #[must_use]
    pub fn provision_report(&self) -> &ProvisionReport {
        &self.info.report
    }

    #[must_use]
    pub fn state(&self) -> LiveQueryState {
        self.shared.state()
    }

    /// Snapshot delivered at creation.
    #[must_use]
    pub fn initial_results(&self) -> Arc<QueryResults> {
        Arc::clone(&self.info.initial)
    }

    /// Most recently delivered snapshot.
    #[must_use]
    pub fn latest_results(&self) -> Arc<QueryResults> {
        Arc::clone(&lock(&self.shared.lifecycle).latest)
    }

    /// Re-read the view now and deliver the snapshot to the sink.
    ///
    /// Serialized with notification-driven refreshes.
    ///
    /// # Errors
    ///
    /// - [`LiveQueryError::InvalidState`] if the live query is unsubscribed,
    ///   including when it was unsubscribed while this refresh ran.
    /// - [`LiveQueryError::RefreshFailure`] if the query fails. The live
    ///   query stays active and the sink is not told.
    pub async fn refresh(&self) -> Result<Arc<QueryResults>> {
        self.ensure_active()?;
        match self.shared.refresh_and_deliver().await {
            Ok(Some(results)) => Ok(results),
            Ok(None) => Err(self.invalid_state()),
            Err(_) if self.shared.is_closing() => Err(self.invalid_state()),
            Err(err) => Err(err),
        }
    }

    /// Stop watching and drop the view. Dependency triggers stay installed.
    ///
    /// Idempotent: later calls return `Ok(())` without touching the database.
    /// Once this starts, the sink receives nothing further.
    ///
    /// # Errors
    ///
    /// [`LiveQueryError::TeardownFailure`] listing every step that failed.
    /// The live query is unsubscribed regardless.
    pub async fn unsubscribe(&self) -> Result<()> {
        if !self.shared.begin_teardown() {
            return Ok(());
        }
        let span = tracing::info_span!("live_query", id = %self.shared.id);
        let errors = self.shared.teardown().instrument(span).await;
        if errors.is_empty() {
            tracing::info!(live_query = %self.shared.id, "live query unsubscribed");
            Ok(())
        } else {
            Err(LiveQueryError::TeardownFailure {
                id: self.shared.id,
                errors,
            })
        }
    }

    fn ensure_active(&self) -> Result<()> {
        match self.shared.effective_state() {
            LiveQueryState::Active => Ok(()),
            _ => Err(self.invalid_state()),
        }
    }

    fn invalid_state(&self) -> LiveQueryError {
        LiveQueryError::InvalidState {
            id: self.shared.id,
            state: self.shared.effective_state(),
        }
    }
}
