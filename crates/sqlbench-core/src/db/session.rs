use super::Database;
use crate::config::SetupSpec;
use crate::errors::ConfigError;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempCredentials {
    pub dql_user: String,
    pub dml_user: String,
    pub password: String,
}

#[derive(Default)]
struct SessionState {
    setup_done: bool,
    temp_dbs: Vec<String>,
    temp_users: Vec<String>,
    credentials: Option<TempCredentials>,
}

/// A database handle plus the setup scripts it can be rebuilt from and the
/// temporary resources created through it.
pub struct DatabaseSession {
    db: Arc<dyn Database>,
    setup: Option<Arc<SetupSpec>>,
    state: Mutex<SessionState>,
}

impl DatabaseSession {
    pub fn new(db: Arc<dyn Database>, setup: Option<Arc<SetupSpec>>) -> Self {
        Self {
            db,
            setup,
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn db(&self) -> &Arc<dyn Database> {
        &self.db
    }

    pub fn name(&self) -> &str {
        self.db.name()
    }

    pub fn setup(&self) -> Option<&Arc<SetupSpec>> {
        self.setup.as_ref()
    }

    /// Rebuilds schema and data from the setup scripts. Once done in this
    /// session it is skipped unless `force` is set. A forced run starts from
    /// an empty schema.
    pub async fn resetup(&self, force: bool, setup_users: bool) -> anyhow::Result<()> {
        let setup = match self.setup.as_ref() {
            Some(s) if !s.is_empty() => s.clone(),
            _ => {
                return Err(ConfigError(format!(
                    "no setup scripts registered for database {}",
                    self.db.name()
                ))
                .into())
            }
        };

        let mut st = self.state.lock().await;
        if st.setup_done && !force {
            return Ok(());
        }

        if force || !setup.data.is_empty() {
            self.db.drop_all_tables().await?;
        }
        if !setup.pre_setup.is_empty() {
            self.db.batch_execute(&setup.pre_setup).await?;
        }
        if !setup.setup.is_empty() {
            self.db.batch_execute(&setup.setup).await?;
        }
        if !setup.data.is_empty() {
            self.db.insert_data(&setup.data).await?;
        }
        if !setup.post_setup.is_empty() {
            self.db.batch_execute(&setup.post_setup).await?;
        }

        if setup_users && st.credentials.is_none() {
            let creds = TempCredentials {
                dql_user: format!("tmp_dql_user_{}", generate_key()),
                dml_user: format!("tmp_dml_user_{}", generate_key()),
                password: generate_key(),
            };
            self.db
                .create_temp_users(&creds.dql_user, &creds.dml_user, &creds.password)
                .await?;
            st.temp_users
                .extend([creds.dql_user.clone(), creds.dml_user.clone()]);
            st.credentials = Some(creds);
        }

        st.setup_done = true;
        tracing::debug!(event = "database_setup", database = %self.db.name(), force);
        Ok(())
    }

    pub async fn temp_credentials(&self) -> Option<TempCredentials> {
        self.state.lock().await.credentials.clone()
    }

    /// Creates `n` uniquely named temporary databases, recorded for teardown.
    pub async fn create_temp_databases(&self, n: usize) -> anyhow::Result<Vec<String>> {
        let mut names = Vec::with_capacity(n);
        for _ in 0..n {
            let name = format!("tmp_{}_{}", self.db.name(), generate_key());
            self.db.create_temp_database(&name).await?;
            self.state.lock().await.temp_dbs.push(name.clone());
            names.push(name);
        }
        Ok(names)
    }

    /// Drops every temporary database and user created through this
    /// session. Failures are logged; teardown carries on.
    pub async fn clean_temp_creations(&self) {
        let (dbs, users) = {
            let mut st = self.state.lock().await;
            (
                std::mem::take(&mut st.temp_dbs),
                std::mem::take(&mut st.temp_users),
            )
        };
        for name in dbs {
            if let Err(e) = self.db.drop_temp_database(&name).await {
                tracing::warn!(event = "temp_db_drop_failed", database = %name, error = %e);
            }
        }
        for user in users {
            if let Err(e) = self.db.delete_temp_user(&user).await {
                tracing::warn!(event = "temp_user_drop_failed", user = %user, error = %e);
            }
        }
    }

    pub async fn close(&self) -> anyhow::Result<()> {
        self.db.close_connections().await
    }
}

fn generate_key() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..12].to_string()
}
