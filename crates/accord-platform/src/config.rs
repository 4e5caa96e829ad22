use std::path::PathBuf;

use accord_core::AgreementSettings;
use anyhow::{Context, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: bool,
}

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    /// Absent means agreements are kept in memory.
    pub database_url: Option<String>,
    pub http_addr: String,
    pub from_address: String,
    pub media_root: PathBuf,
    pub storage_base_url: String,
    /// Absent means notifications are only logged.
    pub smtp: Option<SmtpSettings>,
}

impl ServiceConfig {
    pub fn from_env(default_http_addr: &str) -> Result<Self> {
        Self::from_lookup(default_http_addr, |key| std::env::var(key).ok())
    }

    pub fn from_lookup(
        default_http_addr: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let database_url = var("DATABASE_URL");
        let http_addr = var("HTTP_ADDR").unwrap_or_else(|| default_http_addr.to_string());
        let from_address =
            var("DEFAULT_FROM_EMAIL").unwrap_or_else(|| "webmaster@localhost".to_string());
        let media_root = PathBuf::from(var("MEDIA_ROOT").unwrap_or_else(|| "media".to_string()));
        let storage_base_url = normalize_base_url(
            &var("MEDIA_URL").unwrap_or_else(|| "/media/".to_string()),
        );

        let smtp = match var("SMTP_HOST") {
            Some(host) => {
                let port = var("SMTP_PORT")
                    .map(|port| port.parse::<u16>())
                    .transpose()
                    .context("SMTP_PORT must be a port number")?
                    .unwrap_or(587);
                let tls = var("SMTP_TLS")
                    .map(|flag| parse_flag(&flag))
                    .transpose()
                    .context("SMTP_TLS must be true or false")?
                    .unwrap_or(true);

                Some(SmtpSettings {
                    host,
                    port,
                    username: var("SMTP_USERNAME"),
                    password: var("SMTP_PASSWORD"),
                    tls,
                })
            }
            None => None,
        };

        Ok(Self {
            database_url,
            http_addr,
            from_address,
            media_root,
            storage_base_url,
            smtp,
        })
    }

    pub fn agreement_settings(&self) -> AgreementSettings {
        AgreementSettings {
            from_address: self.from_address.clone(),
            media_root: self.media_root.clone(),
            storage_base_url: self.storage_base_url.clone(),
        }
    }
}

fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    }
}

fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("unrecognized flag '{other}'"),
    }
}
