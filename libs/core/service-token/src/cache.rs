use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::TokenError;

struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Per-service cached tokens, refreshed when remaining TTL drops below 60s.
/// A `tokio::sync::Mutex` per service name (held across the reissue call)
/// collapses concurrent misses into a single issuance instead of a
/// thundering herd against the signing secret.
#[derive(Default)]
pub(crate) struct ServiceTokenCache {
    slots: Mutex<HashMap<String, Arc<Mutex<Option<CachedToken>>>>>,
}

const REFRESH_MARGIN_SECS: i64 = 60;

impl ServiceTokenCache {
    async fn slot(&self, service_name: &str) -> Arc<Mutex<Option<CachedToken>>> {
        let mut slots = self.slots.lock().await;
        slots
            .entry(service_name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    pub async fn get_or_refresh(
        &self,
        service_name: &str,
        issue: impl Fn(&str) -> Result<String, TokenError>,
    ) -> Result<String, TokenError> {
        let slot = self.slot(service_name).await;
        let mut guard = slot.lock().await;

        let needs_refresh = match guard.as_ref() {
            Some(cached) => (cached.expires_at - Utc::now()).num_seconds() < REFRESH_MARGIN_SECS,
            None => true,
        };

        if needs_refresh {
            let token = issue(service_name)?;
            *guard = Some(CachedToken {
                token: token.clone(),
                expires_at: Utc::now() + chrono::Duration::minutes(5),
            });
            Ok(token)
        } else {
            Ok(guard.as_ref().unwrap().token.clone())
        }
    }
}
