use super::session::DatabaseSession;
use super::{ConnectionSpec, Connector, Credential, Privilege};
use crate::errors::ConfigError;
use crate::model::QueryType;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

enum Slots {
    /// One physical handle behind every slot.
    Shared(Arc<DatabaseSession>),
    /// One physical handle per slot, handed out exclusively.
    Exclusive {
        idle: Arc<Mutex<Vec<Arc<DatabaseSession>>>>,
        all: Vec<Arc<DatabaseSession>>,
    },
}

/// Bounded pool of database handles for one partition.
pub struct HandleQueue {
    slots: Slots,
    permits: Arc<Semaphore>,
    size: usize,
    closed: AtomicBool,
}

/// A handle checked out of a [`HandleQueue`]; returned on drop.
pub struct HandleLease {
    session: Arc<DatabaseSession>,
    idle: Option<Arc<Mutex<Vec<Arc<DatabaseSession>>>>>,
    // released after the handle is back in `idle`
    _permit: OwnedSemaphorePermit,
}

impl HandleLease {
    pub fn session(&self) -> &Arc<DatabaseSession> {
        &self.session
    }
}

impl Drop for HandleLease {
    fn drop(&mut self) {
        if let Some(idle) = &self.idle {
            let mut idle = idle.lock().unwrap_or_else(|e| e.into_inner());
            idle.push(self.session.clone());
        }
    }
}

impl HandleQueue {
    pub fn shared(session: Arc<DatabaseSession>, size: usize) -> Self {
        let size = size.max(1);
        Self {
            slots: Slots::Shared(session),
            permits: Arc::new(Semaphore::new(size)),
            size,
            closed: AtomicBool::new(false),
        }
    }

    pub fn exclusive(sessions: Vec<Arc<DatabaseSession>>) -> Self {
        let size = sessions.len();
        Self {
            slots: Slots::Exclusive {
                idle: Arc::new(Mutex::new(sessions.clone())),
                all: sessions,
            },
            permits: Arc::new(Semaphore::new(size)),
            size,
            closed: AtomicBool::new(false),
        }
    }

    /// Logical slots.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn physical_handles(&self) -> usize {
        match &self.slots {
            Slots::Shared(_) => 1,
            Slots::Exclusive { all, .. } => all.len(),
        }
    }

    /// Waits for a free slot.
    pub async fn acquire(&self) -> anyhow::Result<HandleLease> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| anyhow::anyhow!("handle queue is closed"))?;
        match &self.slots {
            Slots::Shared(session) => Ok(HandleLease {
                session: session.clone(),
                idle: None,
                _permit: permit,
            }),
            Slots::Exclusive { idle, .. } => {
                let session = idle
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .pop()
                    .ok_or_else(|| anyhow::anyhow!("no idle handle despite free slot"))?;
                Ok(HandleLease {
                    session,
                    idle: Some(idle.clone()),
                    _permit: permit,
                })
            }
        }
    }

    /// Waits for every lease to come back, then closes each physical handle
    /// once. Later calls do nothing.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        match self.permits.acquire_many(self.size as u32).await {
            Ok(all) => all.forget(),
            Err(_) => return,
        }
        self.permits.close();

        let sessions: Vec<Arc<DatabaseSession>> = match &self.slots {
            Slots::Shared(s) => vec![s.clone()],
            Slots::Exclusive { all, .. } => all.clone(),
        };
        close_all(&sessions).await;
    }
}

async fn close_all(sessions: &[Arc<DatabaseSession>]) {
    for s in sessions {
        if let Err(e) = s.close().await {
            tracing::warn!(event = "handle_close_failed", database = %s.name(), error = %e);
        }
    }
}

/// Provisions the handles for one (dialect, database, query type) partition.
///
/// DQL and DML share one handle under a restricted credential; DDL gets one
/// fresh temporary database per slot.
pub async fn build_handle_queue(
    core: &Arc<DatabaseSession>,
    connector: &dyn Connector,
    base: &ConnectionSpec,
    query_type: QueryType,
    size: usize,
) -> anyhow::Result<HandleQueue> {
    let size = size.max(1);
    match query_type {
        QueryType::Dql | QueryType::Dml => {
            let privilege = if query_type == QueryType::Dql {
                Privilege::ReadOnly
            } else {
                Privilege::ReadWrite
            };
            let mut credential = None;
            if core.setup().is_some() {
                core.resetup(false, true).await?;
                if let Some(c) = core.temp_credentials().await {
                    let user = if query_type == QueryType::Dql {
                        c.dql_user
                    } else {
                        c.dml_user
                    };
                    credential = Some(Credential {
                        user,
                        password: c.password,
                    });
                }
            }
            let spec = base.with_access(credential, privilege);
            let db = connector.connect(&spec).await?;
            Ok(HandleQueue::shared(
                Arc::new(DatabaseSession::new(db, None)),
                size,
            ))
        }
        QueryType::Ddl => {
            let setup = core.setup().cloned().ok_or_else(|| {
                ConfigError(format!(
                    "DDL on {} requires setup scripts but none are configured",
                    core.name()
                ))
            })?;
            let scripts_only = Arc::new(setup.without_data());
            let names = core.create_temp_databases(size).await?;
            let mut sessions: Vec<Arc<DatabaseSession>> = Vec::with_capacity(names.len());
            for name in names {
                let spec = base
                    .for_database(&name)
                    .with_access(None, Privilege::Owner);
                let db = match connector.connect(&spec).await {
                    Ok(db) => db,
                    Err(e) => {
                        close_all(&sessions).await;
                        return Err(e);
                    }
                };
                sessions.push(Arc::new(DatabaseSession::new(
                    db,
                    Some(scripts_only.clone()),
                )));
            }
            Ok(HandleQueue::exclusive(sessions))
        }
    }
}
