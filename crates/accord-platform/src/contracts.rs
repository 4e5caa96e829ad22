use accord_core::{Agreement, CreatedAgreement, PartyMatch};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Turns stored file paths into URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaLinker {
    base_url: String,
    origin: Option<String>,
}

impl MediaLinker {
    /// `origin` is `scheme://host` of the current request, when known.
    pub fn new(base_url: &str, origin: Option<String>) -> Self {
        Self {
            base_url: base_url.to_string(),
            origin,
        }
    }

    pub fn url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        let base = &self.base_url;

        if base.starts_with("http://") || base.starts_with("https://") {
            return format!("{}/{}", base.trim_end_matches('/'), path);
        }

        let relative = format!("/{}/{}", base.trim_matches('/'), path).replace("//", "/");
        match &self.origin {
            Some(origin) => format!("{}{}", origin.trim_end_matches('/'), relative),
            None => relative,
        }
    }

    fn link(&self, path: &Option<String>) -> Option<String> {
        path.as_deref()
            .filter(|path| !path.is_empty())
            .map(|path| self.url(path))
    }
}

/// Whether and how the access token appears in a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenExposure {
    /// Field omitted entirely.
    Hidden,
    /// Field present, possibly `null`.
    Shown(Option<Uuid>),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgreementView {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<Option<Uuid>>,
    pub content: String,
    pub email: Option<String>,
    pub agreement_id: Option<i64>,
    #[serde(rename = "agreementType")]
    pub agreement_type: Option<String>,
    pub first_party_address: Option<String>,
    pub first_party_name: Option<String>,
    pub first_party_valid_id: Option<String>,
    pub first_party_country: Option<String>,
    pub first_party_id_type: Option<String>,
    pub first_party_signature: Option<String>,
    pub second_party_address: Option<String>,
    pub second_party_name: Option<String>,
    pub second_party_valid_id: Option<String>,
    pub second_party_country: Option<String>,
    pub second_party_id_type: Option<String>,
    pub second_party_signature: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AgreementView {
    pub fn render(agreement: &Agreement, token: TokenExposure, media: &MediaLinker) -> Self {
        let first = &agreement.first_party;
        let second = &agreement.second_party;

        Self {
            id: agreement.id,
            access_token: match token {
                TokenExposure::Hidden => None,
                TokenExposure::Shown(token) => Some(token),
            },
            content: agreement.content.clone(),
            email: agreement.email.clone(),
            agreement_id: agreement.agreement_id,
            agreement_type: agreement.agreement_type.clone(),
            first_party_address: first.address.clone(),
            first_party_name: first.name.clone(),
            first_party_valid_id: media.link(&first.valid_id),
            first_party_country: first.country.clone(),
            first_party_id_type: first.id_type.clone(),
            first_party_signature: media.link(&first.signature),
            second_party_address: second.address.clone(),
            second_party_name: second.name.clone(),
            second_party_valid_id: media.link(&second.valid_id),
            second_party_country: second.country.clone(),
            second_party_id_type: second.id_type.clone(),
            second_party_signature: media.link(&second.signature),
            created_at: agreement.created_at,
        }
    }

    /// Full representation for holders of the access token.
    pub fn for_owner(agreement: &Agreement, media: &MediaLinker) -> Self {
        Self::render(
            agreement,
            TokenExposure::Shown(Some(agreement.access_token)),
            media,
        )
    }

    /// Representation for holders of the record id only.
    pub fn for_counterparty(agreement: &Agreement, media: &MediaLinker) -> Self {
        Self::render(agreement, TokenExposure::Hidden, media)
    }

    pub fn for_party_match(hit: &PartyMatch, media: &MediaLinker) -> Self {
        Self::render(&hit.agreement, TokenExposure::Shown(hit.access_token), media)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateAgreementResponse {
    pub agreement: AgreementView,
    pub access_token: Uuid,
}

impl CreateAgreementResponse {
    pub fn render(created: &CreatedAgreement, media: &MediaLinker) -> Self {
        Self {
            agreement: AgreementView::for_owner(&created.agreement, media),
            access_token: created.access_token,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessTokenQuery {
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartyQueryParams {
    pub address: Option<String>,
    pub first_party_address: Option<String>,
    pub second_party_address: Option<String>,
}
