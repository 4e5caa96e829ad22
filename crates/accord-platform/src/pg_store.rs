use accord_core::{
    Agreement, AgreementField, AgreementStore, FieldChanges, FieldKind, FieldValue, PartyDetails,
    PartyFilter,
};
use anyhow::{Result, bail};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

const AGREEMENT_COLUMNS: &str = r#"
    id,
    access_token,
    content,
    email,
    agreement_id,
    agreement_type,
    first_party_address,
    first_party_name,
    first_party_valid_id,
    first_party_country,
    first_party_id_type,
    first_party_signature,
    second_party_address,
    second_party_name,
    second_party_valid_id,
    second_party_country,
    second_party_id_type,
    second_party_signature,
    created_at
"#;

#[derive(Clone)]
pub struct PgAgreementStore {
    pool: PgPool,
}

impl PgAgreementStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AgreementStore for PgAgreementStore {
    async fn insert(&self, changes: &FieldChanges) -> Result<Agreement> {
        ensure_resolved(changes)?;

        let mut builder = QueryBuilder::<Postgres>::new("INSERT INTO legal_agreements (");
        for (index, (field, _)) in changes.iter().enumerate() {
            if index > 0 {
                builder.push(", ");
            }
            builder.push(field.column());
        }
        builder.push(") VALUES (");
        for (index, (field, value)) in changes.iter().enumerate() {
            if index > 0 {
                builder.push(", ");
            }
            push_value(&mut builder, field, value);
        }
        builder.push(") RETURNING ");
        builder.push(AGREEMENT_COLUMNS);

        let row = builder.build().fetch_one(&self.pool).await?;
        Ok(agreement_from_row(&row)?)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Agreement>> {
        let row = sqlx::query(&format!(
            "SELECT {AGREEMENT_COLUMNS} FROM legal_agreements WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(agreement_from_row).transpose()?)
    }

    async fn get_by_token(&self, token: Uuid) -> Result<Option<Agreement>> {
        let row = sqlx::query(&format!(
            "SELECT {AGREEMENT_COLUMNS} FROM legal_agreements WHERE access_token = $1"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(agreement_from_row).transpose()?)
    }

    async fn update(&self, id: i64, changes: &FieldChanges) -> Result<Option<Agreement>> {
        ensure_resolved(changes)?;
        if changes.is_empty() {
            return self.get_by_id(id).await;
        }

        let mut builder = QueryBuilder::<Postgres>::new("UPDATE legal_agreements SET ");
        for (index, (field, value)) in changes.iter().enumerate() {
            if index > 0 {
                builder.push(", ");
            }
            builder.push(field.column());
            builder.push(" = ");
            push_value(&mut builder, field, value);
        }
        builder.push(" WHERE id = ");
        builder.push_bind(id);
        builder.push(" RETURNING ");
        builder.push(AGREEMENT_COLUMNS);

        let row = builder.build().fetch_optional(&self.pool).await?;
        Ok(row.as_ref().map(agreement_from_row).transpose()?)
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM legal_agreements WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_by_party(&self, filter: &PartyFilter) -> Result<Vec<Agreement>> {
        let (predicate, address) = match filter {
            PartyFilter::FirstParty(address) => ("first_party_address = $1", address),
            PartyFilter::SecondParty(address) => ("second_party_address = $1", address),
            PartyFilter::EitherParty(address) => (
                "LOWER(first_party_address) = LOWER($1) OR LOWER(second_party_address) = LOWER($1)",
                address,
            ),
        };

        let rows = sqlx::query(&format!(
            "SELECT {AGREEMENT_COLUMNS} FROM legal_agreements WHERE {predicate} ORDER BY id"
        ))
        .bind(address)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(agreement_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }
}

fn ensure_resolved(changes: &FieldChanges) -> Result<()> {
    if let Some((field, _)) = changes.uploads().next() {
        bail!("{field} still holds an unsaved upload");
    }
    Ok(())
}

fn push_value(builder: &mut QueryBuilder<'_, Postgres>, field: AgreementField, value: &FieldValue) {
    match (field.kind(), value) {
        (FieldKind::Integer, FieldValue::Integer(number)) => {
            builder.push_bind(*number);
        }
        (FieldKind::Integer, _) => {
            builder.push_bind(None::<i64>);
        }
        (_, FieldValue::Text(text) | FieldValue::Stored(text)) => {
            builder.push_bind(text.clone());
        }
        (_, FieldValue::Integer(number)) => {
            builder.push_bind(number.to_string());
        }
        (_, FieldValue::Null | FieldValue::Upload(_)) => {
            builder.push_bind(None::<String>);
        }
    }
}

fn agreement_from_row(row: &PgRow) -> Result<Agreement, sqlx::Error> {
    Ok(Agreement {
        id: row.try_get("id")?,
        access_token: row.try_get("access_token")?,
        content: row.try_get("content")?,
        email: row.try_get("email")?,
        agreement_id: row.try_get("agreement_id")?,
        agreement_type: row.try_get("agreement_type")?,
        first_party: PartyDetails {
            address: row.try_get("first_party_address")?,
            name: row.try_get("first_party_name")?,
            valid_id: row.try_get("first_party_valid_id")?,
            country: row.try_get("first_party_country")?,
            id_type: row.try_get("first_party_id_type")?,
            signature: row.try_get("first_party_signature")?,
        },
        second_party: PartyDetails {
            address: row.try_get("second_party_address")?,
            name: row.try_get("second_party_name")?,
            valid_id: row.try_get("second_party_valid_id")?,
            country: row.try_get("second_party_country")?,
            id_type: row.try_get("second_party_id_type")?,
            signature: row.try_get("second_party_signature")?,
        },
        created_at: row.try_get("created_at")?,
    })
}
