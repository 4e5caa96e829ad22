pub mod config;
pub mod contracts;
pub mod db;
pub mod local_storage;
pub mod mailer;
pub mod pg_store;

pub use config::{ServiceConfig, SmtpSettings};
pub use contracts::{
    AccessTokenQuery, AgreementView, CreateAgreementResponse, MediaLinker, PartyQueryParams,
    TokenExposure,
};
pub use db::{connect_database, ensure_schema};
pub use local_storage::LocalFileStorage;
pub use mailer::{LogNotifier, SmtpNotifier};
pub use pg_store::PgAgreementStore;
