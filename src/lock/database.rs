//! Lock row in the shared `run_lock` table.
//!
//! The holder refreshes `heartbeat_at` from a background task. A row whose
//! heartbeat is older than `stale_after` belongs to a crashed run and may be
//! taken over by the next invocation.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::ExecutionGuard;
use crate::database::sqlite::{Database, RunLockQueries};

pub struct DatabaseLock {
    database: Database,
    name: String,
    owner: String,
    stale_after: Duration,
    heartbeat_interval: Duration,
    heartbeat: Option<JoinHandle<()>>,
}

impl DatabaseLock {
    #[inline]
    pub fn new(
        database: Database,
        name: impl Into<String>,
        stale_after: Duration,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            database,
            name: name.into(),
            owner: Uuid::new_v4().to_string(),
            stale_after,
            heartbeat_interval,
            heartbeat: None,
        }
    }

    #[inline]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    #[inline]
    pub fn is_held(&self) -> bool {
        self.heartbeat.is_some()
    }

    fn stale_cutoff(&self, now: NaiveDateTime) -> NaiveDateTime {
        let stale_after = chrono::Duration::from_std(self.stale_after)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        now - stale_after
    }

    fn start_heartbeat_task(&self) -> JoinHandle<()> {
        let database = self.database.clone();
        let name = self.name.clone();
        let owner = self.owner.clone();
        let interval = self.heartbeat_interval;

        tokio::spawn(async move {
            #[expect(
                clippy::infinite_loop,
                reason = "intended to run until handle is aborted"
            )]
            loop {
                sleep(interval).await;
                let now = Utc::now().naive_utc();
                match RunLockQueries::heartbeat(database.pool(), &name, &owner, now).await {
                    Ok(true) => debug!("Run lock heartbeat for {}", owner),
                    Ok(false) => warn!("Run lock {} is no longer owned by {}", name, owner),
                    Err(e) => error!("Failed to update run lock heartbeat: {}", e),
                }
            }
        })
    }
}

#[async_trait]
impl ExecutionGuard for DatabaseLock {
    async fn acquire(&mut self) -> Result<bool> {
        if self.is_held() {
            return Ok(true);
        }

        let now = Utc::now().naive_utc();
        let acquired = RunLockQueries::try_acquire(
            self.database.pool(),
            &self.name,
            &self.owner,
            now,
            self.stale_cutoff(now),
        )
        .await?;

        if acquired {
            self.heartbeat = Some(self.start_heartbeat_task());
        } else if let Some((holder, heartbeat_at)) =
            RunLockQueries::holder(self.database.pool(), &self.name).await?
        {
            debug!(
                "Run lock {} held by {} (last heartbeat {})",
                self.name, holder, heartbeat_at
            );
        }

        Ok(acquired)
    }

    async fn release(&mut self) -> Result<()> {
        let Some(handle) = self.heartbeat.take() else {
            return Ok(());
        };
        handle.abort();

        if !RunLockQueries::release(self.database.pool(), &self.name, &self.owner).await? {
            warn!("Run lock {} was taken over before release", self.name);
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("database lock '{}'", self.name)
    }
}

impl Drop for DatabaseLock {
    #[inline]
    fn drop(&mut self) {
        // The row goes stale without a heartbeat and can be taken over
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }
    }
}
