use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::connectors::{ConnectorError, ConnectorResult};

#[derive(Debug)]
struct ActiveSession {
    client: Client,
    established_at: Instant,
}

/// Cookie-backed portal session for one branch/credential pair.
///
/// Each login gets a fresh HTTP client, and with it a fresh cookie jar, so a
/// dropped session never leaks stale cookies into the next one. Logins are
/// serialized: callers arriving while a login runs wait for its result.
#[derive(Debug)]
pub struct PortalSession {
    active: Mutex<Option<ActiveSession>>,
    max_age: Duration,
    request_timeout: Duration,
}

impl PortalSession {
    pub fn new(max_age: Duration, request_timeout: Duration) -> Self {
        Self {
            active: Mutex::new(None),
            max_age,
            request_timeout,
        }
    }

    fn build_client(&self) -> ConnectorResult<Client> {
        Client::builder()
            .cookie_store(true)
            .timeout(self.request_timeout)
            .use_rustls_tls()
            .build()
            .map_err(|err| {
                ConnectorError::transient(format!(
                    "failed to build portal client: {err}"
                ))
            })
    }

    /// Client of the current session, logging in first when there is none
    /// or it has outlived `max_age`.
    pub async fn client<F, Fut>(&self, login: F) -> ConnectorResult<Client>
    where
        F: FnOnce(Client) -> Fut,
        Fut: Future<Output = ConnectorResult<()>>,
    {
        let mut guard = self.active.lock().await;
        if let Some(session) = guard.as_ref()
            && session.established_at.elapsed() < self.max_age
        {
            return Ok(session.client.clone());
        }
        *guard = None;

        let client = self.build_client()?;
        login(client.clone()).await?;
        *guard = Some(ActiveSession {
            client: client.clone(),
            established_at: Instant::now(),
        });
        Ok(client)
    }

    pub async fn invalidate(&self) {
        self.active.lock().await.take();
    }

    pub async fn is_active(&self) -> bool {
        self.active.lock().await.is_some()
    }
}
