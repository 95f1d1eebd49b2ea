//! `PostgreSQL` implementation of [`Database`] over a single `tokio-postgres` session.
//!
//! A driver task polls the connection, forwarding `NOTIFY` messages to the
//! registered listeners. All statements share one client behind an async
//! mutex; an open transaction holds that mutex until it finishes, so nothing
//! else can interleave with it.

mod config;
mod decode;
mod listeners;

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio_postgres::tls::NoTlsStream;
use tokio_postgres::{AsyncMessage, Client, Connection, NoTls, Socket};

use crate::backend::{Database, ListenerId, NotifyCallback, Transaction};
use crate::error::BackendError;
use crate::sql;
use crate::types::QueryResults;

pub use config::ConnectionConfig;

use decode::run_query;
use listeners::ListenerRegistry;

/// A live-query capable postgres session.
pub struct PgDatabase {
    client: Arc<Mutex<Client>>,
    listeners: Arc<ListenerRegistry>,
    driver: JoinHandle<()>,
}

impl PgDatabase {
    /// Connect and start the notification driver.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the config is invalid or the connection fails.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self, BackendError> {
        config.validate()?;
        let (client, connection) = config.to_pg_config().connect(NoTls).await?;
        tracing::debug!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            "connected to postgres"
        );
        Ok(Self::from_parts(client, connection))
    }

    /// Wrap an already established client/connection pair.
    pub fn from_parts(client: Client, connection: Connection<Socket, NoTlsStream>) -> Self {
        let listeners = Arc::new(ListenerRegistry::default());
        let driver = spawn_driver(connection, Arc::clone(&listeners));
        Self {
            client: Arc::new(Mutex::new(client)),
            listeners,
            driver,
        }
    }

    /// Whether the connection driver has stopped.
    pub fn is_closed(&self) -> bool {
        self.driver.is_finished()
    }
}

impl Drop for PgDatabase {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

fn spawn_driver(
    mut connection: Connection<Socket, NoTlsStream>,
    listeners: Arc<ListenerRegistry>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut messages = futures_util::stream::poll_fn(move |cx| connection.poll_message(cx));
        while let Some(message) = messages.next().await {
            match message {
                Ok(AsyncMessage::Notification(notification)) => {
                    let delivered = listeners.dispatch(notification.channel());
                    tracing::trace!(
                        channel = notification.channel(),
                        delivered,
                        "notification received"
                    );
                }
                Ok(AsyncMessage::Notice(notice)) => {
                    tracing::debug!(
                        severity = notice.severity(),
                        code = notice.code().code(),
                        "postgres notice: {}",
                        notice.message()
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = %e, "postgres connection error");
                    return;
                }
            }
        }
        tracing::debug!("postgres connection closed");
    })
}

impl Database for PgDatabase {
    type Transaction = PgTransaction;

    async fn query(&self, sql: &str) -> Result<QueryResults, BackendError> {
        let client = self.client.lock().await;
        run_query(&client, sql).await
    }

    async fn exec(&self, sql: &str) -> Result<(), BackendError> {
        let client = self.client.lock().await;
        client.batch_execute(sql).await?;
        Ok(())
    }

    async fn begin(&self) -> Result<PgTransaction, BackendError> {
        let client = Arc::clone(&self.client).lock_owned().await;
        client.batch_execute("BEGIN").await?;
        Ok(PgTransaction {
            client: Some(client),
        })
    }

    async fn listen(
        &self,
        channel: &str,
        on_event: NotifyCallback,
    ) -> Result<ListenerId, BackendError> {
        let client = self.client.lock().await;
        let (id, first) = self.listeners.register(channel, on_event);
        if first {
            if let Err(e) = client
                .batch_execute(&format!("LISTEN {}", sql::ident(channel)))
                .await
            {
                self.listeners.unregister(id);
                return Err(e.into());
            }
        }
        tracing::debug!(channel, listener = %id, first, "listener registered");
        Ok(id)
    }

    async fn unlisten(&self, listener: ListenerId) -> Result<(), BackendError> {
        let client = self.client.lock().await;
        let Some((channel, last)) = self.listeners.unregister(listener) else {
            return Ok(());
        };
        if last {
            client
                .batch_execute(&format!("UNLISTEN {}", sql::ident(&channel)))
                .await?;
        }
        tracing::debug!(channel = %channel, listener = %listener, last, "listener removed");
        Ok(())
    }
}

/// Transaction holding the session exclusively until commit or rollback.
pub struct PgTransaction {
    client: Option<OwnedMutexGuard<Client>>,
}

impl PgTransaction {
    fn client(&self) -> Result<&Client, BackendError> {
        self.client.as_deref().ok_or(BackendError::ConnectionClosed)
    }

    async fn finish(&mut self, statement: &str) -> Result<(), BackendError> {
        let client = self.client.take().ok_or(BackendError::ConnectionClosed)?;
        client.batch_execute(statement).await?;
        Ok(())
    }
}

impl Transaction for PgTransaction {
    async fn query(&mut self, sql: &str) -> Result<QueryResults, BackendError> {
        run_query(self.client()?, sql).await
    }

    async fn exec(&mut self, sql: &str) -> Result<(), BackendError> {
        self.client()?.batch_execute(sql).await?;
        Ok(())
    }

    async fn commit(mut self) -> Result<(), BackendError> {
        self.finish("COMMIT").await
    }

    async fn rollback(mut self) -> Result<(), BackendError> {
        self.finish("ROLLBACK").await
    }
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };
        // The session stays locked until the rollback has been sent.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = client.batch_execute("ROLLBACK").await {
                    tracing::warn!(error = %e, "rollback of abandoned transaction failed");
                }
            });
        }
    }
}
