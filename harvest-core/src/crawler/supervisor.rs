use tracing::{error, info, warn};

use crate::browser::{AutomationSession, SessionFactory};

use super::error::{CrawlError, CrawlResult};

/// Owns the automation session and replaces it after transport faults, up to
/// `max_restarts` times per run.
pub struct ResilienceSupervisor<'a> {
    factory: &'a dyn SessionFactory,
    session: Option<Box<dyn AutomationSession>>,
    max_restarts: usize,
    restarts: usize,
}

impl<'a> ResilienceSupervisor<'a> {
    pub fn new(factory: &'a dyn SessionFactory, max_restarts: usize) -> Self {
        Self {
            factory,
            session: None,
            max_restarts,
            restarts: 0,
        }
    }

    pub fn restarts(&self) -> usize {
        self.restarts
    }

    /// The live session, creating the first one on demand.
    pub async fn session(&mut self) -> CrawlResult<&mut dyn AutomationSession> {
        if self.session.is_none() {
            let session = self
                .factory
                .create()
                .await
                .map_err(CrawlError::SessionEstablishment)?;
            self.session = Some(session);
        }
        match self.session.as_deref_mut() {
            Some(session) => Ok(session),
            None => Err(CrawlError::RestartBudgetExhausted {
                limit: self.max_restarts,
            }),
        }
    }

    /// Opens `url` on the live session. A transport timeout replaces the
    /// session and retries until the restart budget runs out.
    pub async fn open(&mut self, url: &str) -> CrawlResult<()> {
        loop {
            let session = self.session().await?;
            match session.navigate(url).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transport_timeout() => {
                    warn!(url, error = %err, "navigation timed out; replacing session");
                    self.discard().await;
                    self.charge_restart()?;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Throws the current session away; the next [`session`](Self::session)
    /// call creates a fresh one.
    pub async fn reset(&mut self) -> CrawlResult<()> {
        self.discard().await;
        self.charge_restart()
    }

    /// Throws the current session away and reopens `url` on a fresh one.
    pub async fn recover(&mut self, url: &str) -> CrawlResult<()> {
        self.reset().await?;
        self.open(url).await
    }

    fn charge_restart(&mut self) -> CrawlResult<()> {
        if self.restarts >= self.max_restarts {
            error!(limit = self.max_restarts, "session restart budget exhausted");
            return Err(CrawlError::RestartBudgetExhausted {
                limit: self.max_restarts,
            });
        }
        self.restarts += 1;
        info!(restart = self.restarts, limit = self.max_restarts, "recreating automation session");
        Ok(())
    }

    async fn discard(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(err) = session.quit().await {
                warn!(error = %err, "failed to quit stale session");
            }
        }
    }

    pub async fn shutdown(mut self) {
        self.discard().await;
    }
}
