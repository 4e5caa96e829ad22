use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::AgreementError;
use crate::files::rename_stored_file;
use crate::models::{Agreement, AgreementField, FieldChanges, FieldKind, FieldValue, Upload};
use crate::policy::AccessRoute;
use crate::storage::{AgreementStore, FileStorage, Notifier, PartyFilter};

pub const ACCESS_TOKEN_SUBJECT: &str = "Your Legal Agreement Access Token";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgreementSettings {
    /// Sender of access-token notifications.
    pub from_address: String,
    /// Directory uploaded files are written under.
    pub media_root: PathBuf,
    /// Prefix stored file paths are served from.
    pub storage_base_url: String,
}

impl Default for AgreementSettings {
    fn default() -> Self {
        Self {
            from_address: "webmaster@localhost".to_string(),
            media_root: PathBuf::from("media"),
            storage_base_url: "/media/".to_string(),
        }
    }
}

/// Path key of `/agreement/{key}/`: a numeric record id or an access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgreementKey {
    Id(i64),
    Token(Uuid),
}

impl FromStr for AgreementKey {
    type Err = AgreementError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if let Ok(id) = raw.parse::<i64>() {
            return Ok(AgreementKey::Id(id));
        }
        parse_access_token(raw).map(AgreementKey::Token)
    }
}

pub fn parse_access_token(raw: &str) -> Result<Uuid, AgreementError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AgreementError::missing_token());
    }
    Uuid::parse_str(raw).map_err(|_| AgreementError::invalid_token())
}

/// Which field table a token-authenticated update runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenScope {
    Full,
    Restricted,
}

impl TokenScope {
    fn route(self) -> AccessRoute {
        match self {
            TokenScope::Full => AccessRoute::TokenFull,
            TokenScope::Restricted => AccessRoute::TokenRestricted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartyQuery {
    /// Case-insensitive match on either party's address.
    Address(String),
    FirstPartyAddress(String),
    SecondPartyAddress(String),
}

impl PartyQuery {
    /// `address` wins over the older two-parameter form.
    pub fn from_params(
        address: Option<String>,
        first_party_address: Option<String>,
        second_party_address: Option<String>,
    ) -> Result<Self, AgreementError> {
        let present = |value: Option<String>| value.filter(|value| !value.is_empty());

        if let Some(address) = present(address) {
            return Ok(PartyQuery::Address(address));
        }
        if let Some(address) = present(first_party_address) {
            return Ok(PartyQuery::FirstPartyAddress(address));
        }
        if let Some(address) = present(second_party_address) {
            return Ok(PartyQuery::SecondPartyAddress(address));
        }

        Err(AgreementError::BadRequest(
            "Query parameter 'first_party_address' or 'second_party_address' is required."
                .to_string(),
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedAgreement {
    pub agreement: Agreement,
    pub access_token: Uuid,
}

/// A party search hit. The token is only revealed when the first party's
/// address matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartyMatch {
    pub agreement: Agreement,
    pub access_token: Option<Uuid>,
}

/// Mediates every read and write of agreements, enforcing the field table of
/// the route a request came through.
#[derive(Clone)]
pub struct AgreementController {
    store: Arc<dyn AgreementStore>,
    files: Arc<dyn FileStorage>,
    notifier: Arc<dyn Notifier>,
    settings: Arc<AgreementSettings>,
}

impl AgreementController {
    pub fn new(
        store: Arc<dyn AgreementStore>,
        files: Arc<dyn FileStorage>,
        notifier: Arc<dyn Notifier>,
        settings: AgreementSettings,
    ) -> Self {
        Self {
            store,
            files,
            notifier,
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &AgreementSettings {
        &self.settings
    }

    /// Persists a new agreement and mails its access token when an email is
    /// given. A failed delivery is returned as an error after the record has
    /// been stored.
    pub async fn create(&self, changes: FieldChanges) -> Result<CreatedAgreement, AgreementError> {
        let changes = AccessRoute::Create.filter(changes);
        changes.require_complete()?;

        let (resolved, uploaded) = self.store_uploads(changes).await?;
        let agreement = self.store.insert(&resolved).await?;
        let agreement = self.rename_uploads(agreement, &uploaded).await?;
        info!(agreement_id = agreement.id, "agreement created");

        if let Some(email) = agreement.email.as_deref() {
            self.send_access_token(email, agreement.access_token)
                .await
                .map_err(|err| {
                    error!(agreement_id = agreement.id, "access token delivery failed: {err:#}");
                    AgreementError::Notification(err)
                })?;
        }

        Ok(CreatedAgreement {
            access_token: agreement.access_token,
            agreement,
        })
    }

    pub async fn retrieve_by_token(&self, token: Uuid) -> Result<Agreement, AgreementError> {
        self.store.get_by_token(token).await?.ok_or_else(|| {
            warn!("rejected unknown access token");
            AgreementError::invalid_token()
        })
    }

    pub async fn retrieve_by_id(&self, id: i64) -> Result<Agreement, AgreementError> {
        self.store
            .get_by_id(id)
            .await?
            .ok_or_else(AgreementError::not_found)
    }

    /// `partial = false` is a full replacement and needs every required field.
    pub async fn update_by_token(
        &self,
        token: Uuid,
        changes: FieldChanges,
        scope: TokenScope,
        partial: bool,
    ) -> Result<Agreement, AgreementError> {
        let agreement = self.retrieve_by_token(token).await?;
        if !partial {
            changes.require_complete()?;
        }
        self.write(agreement, scope.route(), changes).await
    }

    pub async fn update_by_id(
        &self,
        id: i64,
        changes: FieldChanges,
    ) -> Result<Agreement, AgreementError> {
        let agreement = self.retrieve_by_id(id).await?;
        self.write(agreement, AccessRoute::Identifier, changes).await
    }

    /// The submitted `second_party_address` must equal the stored one
    /// (ignoring case). It is a consistency check, not a credential.
    pub async fn patch_second_party(
        &self,
        id: i64,
        mut changes: FieldChanges,
    ) -> Result<Agreement, AgreementError> {
        let agreement = self.retrieve_by_id(id).await?;

        let asserted = match changes.remove(AgreementField::SecondPartyAddress) {
            Some(FieldValue::Text(address)) => address,
            _ => {
                return Err(AgreementError::BadRequest(
                    "second_party_address is required.".to_string(),
                ));
            }
        };

        let matches = agreement
            .second_party
            .address
            .as_deref()
            .is_some_and(|stored| stored.to_lowercase() == asserted.to_lowercase());
        if !matches {
            warn!(agreement_id = id, "second party address mismatch");
            return Err(AgreementError::Forbidden(
                "second_party_address does not match this agreement.".to_string(),
            ));
        }

        self.write(agreement, AccessRoute::SecondPartyPatch, changes)
            .await
    }

    /// One-time signature of the second party.
    pub async fn sign(
        &self,
        id: i64,
        signature: Option<Upload>,
    ) -> Result<Agreement, AgreementError> {
        let agreement = self.retrieve_by_id(id).await?;
        if agreement.is_signed_by_second_party() {
            return Err(AgreementError::AlreadySigned);
        }
        let Some(signature) = signature.filter(|upload| !upload.bytes.is_empty()) else {
            return Err(AgreementError::BadRequest(
                "No signature file provided.".to_string(),
            ));
        };

        let changes = FieldChanges::new().with(
            AgreementField::SecondPartySignature,
            FieldValue::Upload(signature),
        );
        let agreement = self.write(agreement, AccessRoute::Sign, changes).await?;
        info!(agreement_id = id, "agreement signed by second party");

        Ok(agreement)
    }

    /// Stored files are left in place.
    pub async fn delete(&self, key: AgreementKey) -> Result<(), AgreementError> {
        let agreement = match key {
            AgreementKey::Id(id) => self.retrieve_by_id(id).await?,
            AgreementKey::Token(token) => self.retrieve_by_token(token).await?,
        };

        if !self.store.delete(agreement.id).await? {
            return Err(AgreementError::not_found());
        }
        info!(agreement_id = agreement.id, "agreement deleted");

        Ok(())
    }

    pub async fn find_by_party(&self, query: PartyQuery) -> Result<Vec<PartyMatch>, AgreementError> {
        let hits: Vec<PartyMatch> = match &query {
            PartyQuery::Address(address) => {
                let wanted = address.to_lowercase();
                self.store
                    .find_by_party(&PartyFilter::EitherParty(address.clone()))
                    .await?
                    .into_iter()
                    .map(|agreement| {
                        let first_matched = agreement
                            .first_party
                            .address
                            .as_deref()
                            .is_some_and(|stored| stored.to_lowercase() == wanted);
                        PartyMatch {
                            access_token: first_matched.then_some(agreement.access_token),
                            agreement,
                        }
                    })
                    .collect()
            }
            PartyQuery::FirstPartyAddress(address) => self
                .store
                .find_by_party(&PartyFilter::FirstParty(address.clone()))
                .await?
                .into_iter()
                .map(|agreement| PartyMatch {
                    access_token: Some(agreement.access_token),
                    agreement,
                })
                .collect(),
            // Second-party lookups never expose the owner's token, on any variant.
            PartyQuery::SecondPartyAddress(address) => self
                .store
                .find_by_party(&PartyFilter::SecondParty(address.clone()))
                .await?
                .into_iter()
                .map(|agreement| PartyMatch {
                    access_token: None,
                    agreement,
                })
                .collect(),
        };

        Ok(hits)
    }

    async fn write(
        &self,
        agreement: Agreement,
        route: AccessRoute,
        changes: FieldChanges,
    ) -> Result<Agreement, AgreementError> {
        let changes = route.filter(changes);
        if changes.is_empty() {
            return Ok(agreement);
        }

        let (resolved, uploaded) = self.store_uploads(changes).await?;
        let updated = self
            .store
            .update(agreement.id, &resolved)
            .await?
            .ok_or_else(AgreementError::not_found)?;
        let updated = self.rename_uploads(updated, &uploaded).await?;
        info!(agreement_id = updated.id, route = route.as_str(), "agreement updated");

        Ok(updated)
    }

    /// Writes pending uploads to storage and swaps them for their paths.
    async fn store_uploads(
        &self,
        mut changes: FieldChanges,
    ) -> Result<(FieldChanges, Vec<AgreementField>), AgreementError> {
        let pending: Vec<(AgreementField, Upload)> = changes
            .uploads()
            .map(|(field, upload)| (field, upload.clone()))
            .collect();

        let mut uploaded = Vec::with_capacity(pending.len());
        for (field, upload) in pending {
            let FieldKind::File { upload_to } = field.kind() else {
                continue;
            };
            let path = self
                .files
                .save(upload_to, &upload.file_name, &upload.bytes)
                .await?;
            changes.set(field, FieldValue::Stored(path));
            uploaded.push(field);
        }

        Ok((changes, uploaded))
    }

    /// Gives freshly stored files a random name and persists the new paths.
    async fn rename_uploads(
        &self,
        agreement: Agreement,
        fields: &[AgreementField],
    ) -> Result<Agreement, AgreementError> {
        let mut renamed = FieldChanges::new();
        for field in fields {
            let Some(path) = agreement.value(*field) else {
                continue;
            };
            let new_path = rename_stored_file(self.files.as_ref(), &path).await?;
            renamed.set(*field, FieldValue::Stored(new_path));
        }

        if renamed.is_empty() {
            return Ok(agreement);
        }

        self.store
            .update(agreement.id, &renamed)
            .await?
            .ok_or_else(AgreementError::not_found)
    }

    async fn send_access_token(&self, email: &str, token: Uuid) -> anyhow::Result<()> {
        let body = format!("Your access token for the legal agreement is: {token}");
        self.notifier
            .send(&self.settings.from_address, email, ACCESS_TOKEN_SUBJECT, &body)
            .await
    }
}
