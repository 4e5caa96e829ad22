pub mod controller;
pub mod error;
pub mod files;
pub mod memory;
pub mod models;
pub mod policy;
pub mod storage;

pub use controller::{
    AgreementController, AgreementKey, AgreementSettings, CreatedAgreement, PartyMatch,
    PartyQuery, TokenScope, parse_access_token,
};
pub use error::AgreementError;
pub use memory::{MemoryAgreementStore, MemoryFileStorage};
pub use models::{
    Agreement, AgreementField, FieldChanges, FieldKind, FieldValue, PartyDetails, SubmittedValue,
    Upload,
};
pub use policy::{AccessRoute, Permission};
pub use storage::{AgreementStore, FileStorage, Notifier, PartyFilter};
