//! Connection handles and the connection factory.
//!
//! A [`Connection`] is a cheap, cloneable handle. Clones refer to the same
//! underlying connection, and [`Connection::same_as`] compares that identity.
//! The raw driver connection lives in a slot that is empty while closed.

use crate::db::driver::{Driver, RawConnectionGuard, cancellable};
use crate::db::server_pool::{ServerPool, ServerRole};
use crate::error::{DbError, DbResult};
use crate::models::mask_endpoint;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

struct ConnectionInner<D: Driver> {
    id: Uuid,
    endpoint: String,
    driver: D,
    raw: Arc<Mutex<Option<D::Conn>>>,
    open: AtomicBool,
}

/// Handle to a (possibly not yet opened) database connection.
pub struct Connection<D: Driver> {
    inner: Arc<ConnectionInner<D>>,
}

impl<D: Driver> Clone for Connection<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: Driver> std::fmt::Debug for Connection<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("endpoint", &mask_endpoint(&self.inner.endpoint))
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl<D: Driver> Connection<D> {
    /// Create a closed connection handle for an endpoint.
    pub fn new(driver: D, endpoint: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                id: Uuid::new_v4(),
                endpoint: endpoint.into(),
                driver,
                raw: Arc::new(Mutex::new(None)),
                open: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    pub fn driver(&self) -> &D {
        &self.inner.driver
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    /// True if both handles refer to the same connection instance.
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Open the connection. Opening an open connection is a no-op.
    pub async fn open(&self, cancel: &CancellationToken) -> DbResult<()> {
        let mut slot = self.lock()?;
        if slot.is_some() {
            return Ok(());
        }

        let conn = cancellable(
            cancel,
            "connection open",
            self.inner.driver.connect(&self.inner.endpoint),
        )
        .await?;
        *slot = Some(conn);
        self.inner.open.store(true, Ordering::Release);

        debug!(
            connection_id = %self.inner.id,
            endpoint = %mask_endpoint(&self.inner.endpoint),
            "Connection opened"
        );
        Ok(())
    }

    /// Close the connection. Closing a closed connection is a no-op.
    pub async fn close(&self) -> DbResult<()> {
        let taken = self.lock()?.take();
        self.inner.open.store(false, Ordering::Release);

        if let Some(conn) = taken {
            self.inner.driver.close(conn).await?;
            debug!(
                connection_id = %self.inner.id,
                endpoint = %mask_endpoint(&self.inner.endpoint),
                "Connection closed"
            );
        }
        Ok(())
    }

    /// Borrow the raw connection slot. Fails while a reader holds it.
    pub(crate) fn lock(&self) -> DbResult<MutexGuard<'_, Option<D::Conn>>> {
        self.inner
            .raw
            .try_lock()
            .map_err(|_| DbError::connection_busy(mask_endpoint(&self.inner.endpoint)))
    }

    /// Take an owned hold on the raw connection slot for a row stream.
    pub(crate) fn lock_owned(&self) -> DbResult<RawConnectionGuard<D::Conn>> {
        Arc::clone(&self.inner.raw)
            .try_lock_owned()
            .map_err(|_| DbError::connection_busy(mask_endpoint(&self.inner.endpoint)))
    }

    pub(crate) fn closed_error(&self) -> DbError {
        DbError::connection_closed(mask_endpoint(&self.inner.endpoint))
    }
}

/// Builds connection handles from explicit endpoints or from the server pool.
#[derive(Debug)]
pub struct ConnectionFactory<D: Driver> {
    driver: D,
    servers: Arc<ServerPool>,
    role: ServerRole,
}

impl<D: Driver> ConnectionFactory<D> {
    pub fn new(driver: D, servers: Arc<ServerPool>, role: ServerRole) -> Self {
        Self {
            driver,
            servers,
            role,
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn role(&self) -> ServerRole {
        self.role
    }

    /// Build a closed connection. Without an endpoint, one is selected from the
    /// server pool using the configured role.
    pub fn create(&self, endpoint: Option<&str>) -> DbResult<Connection<D>> {
        match endpoint {
            Some(endpoint) => {
                if endpoint.trim().is_empty() {
                    return Err(DbError::invalid_argument("endpoint cannot be blank"));
                }
                Ok(Connection::new(self.driver.clone(), endpoint))
            }
            None => self.create_for_role(self.role),
        }
    }

    /// Build a closed connection to the next endpoint of a role.
    pub fn create_for_role(&self, role: ServerRole) -> DbResult<Connection<D>> {
        let endpoint = self.servers.select(role)?;
        Ok(Connection::new(self.driver.clone(), endpoint))
    }

    /// Build and open a connection.
    pub async fn open(
        &self,
        endpoint: Option<&str>,
        cancel: &CancellationToken,
    ) -> DbResult<Connection<D>> {
        let connection = self.create(endpoint)?;
        connection.open(cancel).await?;
        Ok(connection)
    }

    /// Build and open a connection to the next endpoint of a role.
    pub async fn open_for_role(
        &self,
        role: ServerRole,
        cancel: &CancellationToken,
    ) -> DbResult<Connection<D>> {
        let connection = self.create_for_role(role)?;
        connection.open(cancel).await?;
        Ok(connection)
    }
}
