use std::collections::BTreeMap;

use anyhow::bail;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::files::{random_file_name, sanitize_file_name};
use crate::models::{Agreement, AgreementField, FieldChanges, FieldValue};
use crate::storage::{AgreementStore, FileStorage, PartyFilter};

#[derive(Default)]
struct Records {
    next_id: i64,
    rows: BTreeMap<i64, Agreement>,
}

/// Agreement store kept in process memory.
#[derive(Default)]
pub struct MemoryAgreementStore {
    records: RwLock<Records>,
}

impl MemoryAgreementStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgreementStore for MemoryAgreementStore {
    async fn insert(&self, changes: &FieldChanges) -> anyhow::Result<Agreement> {
        if changes.uploads().next().is_some() {
            bail!("uploads must be stored before insert");
        }
        let Some(FieldValue::Text(content)) = changes.get(AgreementField::Content) else {
            bail!("content is required");
        };

        let mut records = self.records.write().await;
        records.next_id += 1;

        let mut access_token = Uuid::new_v4();
        while records
            .rows
            .values()
            .any(|row| row.access_token == access_token)
        {
            access_token = Uuid::new_v4();
        }

        let mut agreement = Agreement {
            id: records.next_id,
            access_token,
            content: content.clone(),
            email: None,
            agreement_id: None,
            agreement_type: None,
            first_party: Default::default(),
            second_party: Default::default(),
            created_at: Utc::now(),
        };
        agreement.apply(changes);
        records.rows.insert(agreement.id, agreement.clone());

        Ok(agreement)
    }

    async fn get_by_id(&self, id: i64) -> anyhow::Result<Option<Agreement>> {
        Ok(self.records.read().await.rows.get(&id).cloned())
    }

    async fn get_by_token(&self, token: Uuid) -> anyhow::Result<Option<Agreement>> {
        Ok(self
            .records
            .read()
            .await
            .rows
            .values()
            .find(|row| row.access_token == token)
            .cloned())
    }

    async fn update(&self, id: i64, changes: &FieldChanges) -> anyhow::Result<Option<Agreement>> {
        if changes.uploads().next().is_some() {
            bail!("uploads must be stored before update");
        }

        let mut records = self.records.write().await;
        Ok(records.rows.get_mut(&id).map(|row| {
            row.apply(changes);
            row.clone()
        }))
    }

    async fn delete(&self, id: i64) -> anyhow::Result<bool> {
        Ok(self.records.write().await.rows.remove(&id).is_some())
    }

    async fn find_by_party(&self, filter: &PartyFilter) -> anyhow::Result<Vec<Agreement>> {
        let records = self.records.read().await;
        let matches = records
            .rows
            .values()
            .filter(|row| match filter {
                PartyFilter::FirstParty(address) => {
                    row.first_party.address.as_deref() == Some(address.as_str())
                }
                PartyFilter::SecondParty(address) => {
                    row.second_party.address.as_deref() == Some(address.as_str())
                }
                PartyFilter::EitherParty(address) => {
                    let wanted = address.to_lowercase();
                    [&row.first_party.address, &row.second_party.address]
                        .into_iter()
                        .flatten()
                        .any(|stored| stored.to_lowercase() == wanted)
                }
            })
            .cloned()
            .collect();

        Ok(matches)
    }
}

/// File storage kept in process memory, keyed by relative path.
#[derive(Default)]
pub struct MemoryFileStorage {
    files: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryFileStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn paths(&self) -> Vec<String> {
        self.files.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl FileStorage for MemoryFileStorage {
    async fn save(&self, directory: &str, file_name: &str, bytes: &[u8]) -> anyhow::Result<String> {
        let mut files = self.files.write().await;

        let mut name = sanitize_file_name(file_name);
        let mut path = join(directory, &name);
        while files.contains_key(&path) {
            name = random_file_name(&name);
            path = join(directory, &name);
        }

        files.insert(path.clone(), bytes.to_vec());
        Ok(path)
    }

    async fn read(&self, path: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.files.read().await.get(path).cloned())
    }

    async fn delete(&self, path: &str) -> anyhow::Result<()> {
        self.files.write().await.remove(path);
        Ok(())
    }

    async fn exists(&self, path: &str) -> anyhow::Result<bool> {
        Ok(self.files.read().await.contains_key(path))
    }
}

fn join(directory: &str, name: &str) -> String {
    if directory.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", directory.trim_end_matches('/'), name)
    }
}
