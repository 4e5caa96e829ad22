use accord_core::{SubmittedValue, Upload};
use axum::{
    Form,
    body::Bytes,
    extract::{FromRequest, Multipart, Request},
    http::{StatusCode, header::CONTENT_TYPE},
};
use serde_json::{Map, Value};

use crate::invalid_request;

/// Raw key/value pairs of a write request, from a multipart form, an
/// urlencoded form or a JSON object. An empty body yields no entries.
#[derive(Debug, Default)]
pub struct AgreementPayload(pub Vec<(String, SubmittedValue)>);

impl AgreementPayload {
    /// First file submitted under any of `names`.
    pub fn take_file(&mut self, names: &[&str]) -> Option<Upload> {
        let position = self.0.iter().position(|(name, value)| {
            names.contains(&name.as_str()) && matches!(value, SubmittedValue::File(_))
        })?;

        match self.0.remove(position).1 {
            SubmittedValue::File(upload) => Some(upload),
            _ => None,
        }
    }
}

impl<S> FromRequest<S> for AgreementPayload
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, String);

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("multipart/form-data") {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|rejection| (rejection.status(), rejection.body_text()))?;
            return read_multipart(multipart).await.map(Self);
        }

        if content_type.starts_with("application/x-www-form-urlencoded") {
            let Form(pairs) = Form::<Vec<(String, String)>>::from_request(req, state)
                .await
                .map_err(|rejection| (rejection.status(), rejection.body_text()))?;
            return Ok(Self(
                pairs
                    .into_iter()
                    .map(|(name, value)| (name, SubmittedValue::Text(value)))
                    .collect(),
            ));
        }

        let body = Bytes::from_request(req, state)
            .await
            .map_err(|rejection| (rejection.status(), rejection.body_text()))?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }

        let object: Map<String, Value> = serde_json::from_slice(&body)
            .map_err(|err| invalid_request(format!("Malformed request body: {err}")))?;

        Ok(Self(
            object
                .into_iter()
                .map(|(name, value)| (name, SubmittedValue::Json(value)))
                .collect(),
        ))
    }
}

async fn read_multipart(
    mut multipart: Multipart,
) -> Result<Vec<(String, SubmittedValue)>, (StatusCode, String)> {
    let mut entries = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        let value = match field.file_name().map(str::to_string) {
            Some(file_name) => {
                let bytes = field.bytes().await.map_err(malformed)?;
                // Browsers send an untouched file input as an empty, unnamed part.
                if file_name.trim().is_empty() && bytes.is_empty() {
                    continue;
                }
                SubmittedValue::File(Upload {
                    file_name,
                    bytes: bytes.to_vec(),
                })
            }
            None => SubmittedValue::Text(field.text().await.map_err(malformed)?),
        };
        entries.push((name, value));
    }

    Ok(entries)
}

fn malformed(err: axum::extract::multipart::MultipartError) -> (StatusCode, String) {
    (err.status(), err.body_text())
}
