use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{Agreement, FieldChanges};

/// How a party search matches addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartyFilter {
    /// Exact match on `first_party_address`.
    FirstParty(String),
    /// Exact match on `second_party_address`.
    SecondParty(String),
    /// Case-insensitive match on either address.
    EitherParty(String),
}

/// Persistent store for agreements. Implementations assign sequential ids,
/// a unique random access token and the creation timestamp on insert.
#[async_trait]
pub trait AgreementStore: Send + Sync {
    /// `changes` must hold resolved values only (no pending uploads).
    async fn insert(&self, changes: &FieldChanges) -> anyhow::Result<Agreement>;
    async fn get_by_id(&self, id: i64) -> anyhow::Result<Option<Agreement>>;
    async fn get_by_token(&self, token: Uuid) -> anyhow::Result<Option<Agreement>>;
    /// Returns `None` when the record no longer exists.
    async fn update(&self, id: i64, changes: &FieldChanges) -> anyhow::Result<Option<Agreement>>;
    async fn delete(&self, id: i64) -> anyhow::Result<bool>;
    /// Matches ordered by id.
    async fn find_by_party(&self, filter: &PartyFilter) -> anyhow::Result<Vec<Agreement>>;
}

/// File storage addressed by paths relative to the media root.
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Writes `bytes` under `directory`, choosing an unused name derived from
    /// `file_name`. Returns the stored path.
    async fn save(&self, directory: &str, file_name: &str, bytes: &[u8]) -> anyhow::Result<String>;
    async fn read(&self, path: &str) -> anyhow::Result<Option<Vec<u8>>>;
    async fn delete(&self, path: &str) -> anyhow::Result<()>;
    async fn exists(&self, path: &str) -> anyhow::Result<bool>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, from: &str, to: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}
