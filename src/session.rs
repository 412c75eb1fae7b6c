//! Session store (SPEC_FULL.md §4.6): an ordered, TTL-bounded message log
//! keyed by an opaque session id. `InMemorySessionStore` is grounded on the
//! teacher's `Mutex<VecDeque<_>>` ring-buffer idiom adapted to a keyed map;
//! `RedisSessionStore` uses the `redis` crate the way the Shannon example
//! repo does.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    fn new(id: String, metadata: serde_json::Value, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            id,
            messages: Vec::new(),
            metadata,
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("session store backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(
        &self,
        id: Option<String>,
        metadata: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<Session, SessionError>;

    async fn get(&self, id: &str) -> Result<Option<Session>, SessionError>;

    async fn add_message(&self, id: &str, message: Message) -> Result<(), SessionError>;

    async fn get_messages(
        &self,
        id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, SessionError>;

    async fn delete(&self, id: &str) -> Result<bool, SessionError>;
}

/// Process-local session store. Not shared across gateway instances.
pub struct InMemorySessionStore {
    sessions: DashMap<String, Session>,
    default_ttl: Duration,
}

impl InMemorySessionStore {
    pub fn new(default_ttl_hours: i64) -> Self {
        Self {
            sessions: DashMap::new(),
            default_ttl: Duration::hours(default_ttl_hours),
        }
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(
        &self,
        id: Option<String>,
        metadata: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<Session, SessionError> {
        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let session = Session::new(id.clone(), metadata, ttl.unwrap_or(self.default_ttl));
        self.sessions.insert(id, session.clone());
        Ok(session)
    }

    async fn get(&self, id: &str) -> Result<Option<Session>, SessionError> {
        match self.sessions.get(id) {
            Some(session) if !session.is_expired() => Ok(Some(session.clone())),
            Some(_) => {
                self.sessions.remove(id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn add_message(&self, id: &str, message: Message) -> Result<(), SessionError> {
        let mut entry = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        entry.messages.push(message);
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn get_messages(
        &self,
        id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, SessionError> {
        let session = self
            .sessions
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        let messages = session.messages.clone();
        Ok(match limit {
            Some(n) if n < messages.len() => messages[messages.len() - n..].to_vec(),
            _ => messages,
        })
    }

    async fn delete(&self, id: &str) -> Result<bool, SessionError> {
        Ok(self.sessions.remove(id).is_some())
    }
}

/// Redis-backed session store. Sessions are stored as a JSON blob under
/// `session:<id>`, with Redis's own `EXPIRE` enforcing TTL server-side.
pub struct RedisSessionStore {
    manager: redis::aio::ConnectionManager,
    default_ttl_secs: i64,
}

impl RedisSessionStore {
    pub async fn connect(redis_url: &str, default_ttl_hours: i64) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self { manager, default_ttl_secs: default_ttl_hours * 3600 })
    }

    fn key(id: &str) -> String {
        format!("session:{id}")
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn create(
        &self,
        id: Option<String>,
        metadata: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<Session, SessionError> {
        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let ttl_secs = ttl.map(|t| t.num_seconds()).unwrap_or(self.default_ttl_secs);
        let session = Session::new(id.clone(), metadata, Duration::seconds(ttl_secs));
        let payload = serde_json::to_string(&session)
            .map_err(|e| SessionError::Backend(e.to_string()))?;

        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(Self::key(&id))
            .arg(payload)
            .arg("EX")
            .arg(ttl_secs.max(1))
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| SessionError::Backend(e.to_string()))?;
        Ok(session)
    }

    async fn get(&self, id: &str) -> Result<Option<Session>, SessionError> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(Self::key(id))
            .query_async(&mut conn)
            .await
            .map_err(|e| SessionError::Backend(e.to_string()))?;
        raw.map(|s| serde_json::from_str(&s).map_err(|e| SessionError::Backend(e.to_string())))
            .transpose()
    }

    async fn add_message(&self, id: &str, message: Message) -> Result<(), SessionError> {
        let mut session = self
            .get(id)
            .await?
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        session.messages.push(message);
        session.updated_at = Utc::now();

        let ttl_secs = (session.expires_at - Utc::now()).num_seconds().max(1);
        let payload = serde_json::to_string(&session)
            .map_err(|e| SessionError::Backend(e.to_string()))?;
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(Self::key(id))
            .arg(payload)
            .arg("EX")
            .arg(ttl_secs)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| SessionError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn get_messages(
        &self,
        id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, SessionError> {
        let session = self
            .get(id)
            .await?
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        Ok(match limit {
            Some(n) if n < session.messages.len() => {
                session.messages[session.messages.len() - n..].to_vec()
            }
            _ => session.messages,
        })
    }

    async fn delete(&self, id: &str) -> Result<bool, SessionError> {
        let mut conn = self.manager.clone();
        let removed: i64 = redis::cmd("DEL")
            .arg(Self::key(id))
            .query_async(&mut conn)
            .await
            .map_err(|e| SessionError::Backend(e.to_string()))?;
        Ok(removed > 0)
    }
}

/// Build the configured session store: `REDIS_URL` selects Redis, otherwise
/// the in-memory implementation is used (SPEC_FULL.md §6).
pub async fn build_session_store(
    redis_url: Option<&str>,
    default_ttl_hours: i64,
) -> anyhow::Result<Arc<dyn SessionStore>> {
    match redis_url {
        Some(url) => {
            let store = RedisSessionStore::connect(url, default_ttl_hours).await?;
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(InMemorySessionStore::new(default_ttl_hours))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(content: &str) -> Message {
        Message { role: "user".into(), content: content.into(), name: None }
    }

    #[tokio::test]
    async fn add_message_then_get_messages_observes_tail() {
        let store = InMemorySessionStore::new(24);
        let session = store.create(None, serde_json::json!({}), None).await.unwrap();
        store.add_message(&session.id, msg("first")).await.unwrap();
        store.add_message(&session.id, msg("second")).await.unwrap();
        let messages = store.get_messages(&session.id, None).await.unwrap();
        assert_eq!(messages.last().unwrap().content, "second");
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn delete_then_recreate_yields_fresh_log() {
        let store = InMemorySessionStore::new(24);
        let session = store.create(Some("fixed".into()), serde_json::json!({}), None).await.unwrap();
        store.add_message(&session.id, msg("hi")).await.unwrap();
        assert!(store.delete("fixed").await.unwrap());

        let recreated = store.create(Some("fixed".into()), serde_json::json!({}), None).await.unwrap();
        let messages = store.get_messages(&recreated.id, None).await.unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn add_message_on_unknown_session_errors() {
        let store = InMemorySessionStore::new(24);
        let result = store.add_message("ghost", msg("hi")).await;
        assert!(matches!(result, Err(SessionError::NotFound(_))));
    }

    #[tokio::test]
    async fn limit_returns_most_recent_messages() {
        let store = InMemorySessionStore::new(24);
        let session = store.create(None, serde_json::json!({}), None).await.unwrap();
        for i in 0..5 {
            store.add_message(&session.id, msg(&i.to_string())).await.unwrap();
        }
        let messages = store.get_messages(&session.id, Some(2)).await.unwrap();
        assert_eq!(messages.iter().map(|m| m.content.clone()).collect::<Vec<_>>(), vec!["3", "4"]);
    }
}
