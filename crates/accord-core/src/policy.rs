use tracing::debug;

use crate::models::{AgreementField, FieldChanges};

/// Entry point a write arrives through. Each route carries its own field table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessRoute {
    Create,
    /// `/agreement/<access_token>/`
    TokenFull,
    /// `/agreement/access_token_update/`
    TokenRestricted,
    /// `/agreement/<id>/`
    Identifier,
    /// `/agreement/<id>/patch_second_party/`
    SecondPartyPatch,
    /// `/agreement/<id>/sign/`
    Sign,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Allowed,
    Denied,
}

impl AccessRoute {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessRoute::Create => "create",
            AccessRoute::TokenFull => "token_full",
            AccessRoute::TokenRestricted => "token_restricted",
            AccessRoute::Identifier => "identifier",
            AccessRoute::SecondPartyPatch => "second_party_patch",
            AccessRoute::Sign => "sign",
        }
    }

    pub fn permission(self, field: AgreementField) -> Permission {
        use AgreementField::*;

        let allowed = match self {
            AccessRoute::Create | AccessRoute::TokenFull => true,
            AccessRoute::TokenRestricted => !matches!(
                field,
                SecondPartyValidId | SecondPartyCountry | SecondPartyIdType | SecondPartySignature
            ),
            AccessRoute::Identifier | AccessRoute::SecondPartyPatch => matches!(
                field,
                SecondPartyName
                    | SecondPartyValidId
                    | SecondPartyCountry
                    | SecondPartyIdType
                    | SecondPartySignature
            ),
            AccessRoute::Sign => field == SecondPartySignature,
        };

        if allowed {
            Permission::Allowed
        } else {
            Permission::Denied
        }
    }

    pub fn allows(self, field: AgreementField) -> bool {
        self.permission(field) == Permission::Allowed
    }

    /// Drops every change this route may not write. Dropped fields are not an
    /// error.
    pub fn filter(self, mut changes: FieldChanges) -> FieldChanges {
        changes.retain(|field| {
            let allowed = self.allows(field);
            if !allowed {
                debug!(route = self.as_str(), field = field.as_str(), "dropping field");
            }
            allowed
        });
        changes
    }
}
