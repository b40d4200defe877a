use serde::{Deserialize, Deserializer, Serialize};
use std::{fs, io, path::PathBuf};
use validator::{Validate, ValidationError};

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("File {0} not found")]
    FileNotFound(String),

    #[error("Parsing error: {0}")]
    ParsingError(String),

    #[error("Validation errors: {0}")]
    ValidationError(String),

    #[error("Unknown error occurred: {0}")]
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredentialType {
    #[serde(rename = "CLI")]
    Cli,
    ServiceRole,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CredentialConfig {
    #[serde(
        rename = "Type",
        default,
        deserialize_with = "deserialize_credential_type",
        skip_serializing_if = "Option::is_none"
    )]
    pub kind: Option<CredentialType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "PascalCase")]
pub struct Tag {
    #[validate(length(min = 1, message = "tag keys must not be empty"))]
    pub key: String,

    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "PascalCase")]
pub struct Filters {
    #[serde(default)]
    #[validate(custom = "validate_regions")]
    pub regions: Vec<String>,

    #[serde(default)]
    #[validate]
    pub stack_tags: Vec<Tag>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_name_regex: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_name_prefix: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "PascalCase")]
pub struct RootConfig {
    #[serde(default)]
    pub credential: CredentialConfig,

    #[serde(default)]
    #[validate]
    pub filters: Filters,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "PascalCase")]
pub struct AccountConfig {
    #[serde(default)]
    pub name: String,

    #[serde(
        default,
        deserialize_with = "deserialize_account_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,

    #[serde(default)]
    pub credential: CredentialConfig,

    #[serde(default)]
    #[validate]
    pub filters: Filters,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "PascalCase")]
pub struct Config {
    #[serde(default)]
    #[validate]
    pub root_config: RootConfig,

    #[serde(default)]
    #[validate]
    pub account_configs: Vec<AccountConfig>,
}

pub fn parse(path: &PathBuf) -> Result<Config, Error> {
    let contents = match fs::read_to_string(path) {
        Ok(raw_contents) => Ok(raw_contents),
        Err(error) => match error.kind() {
            io::ErrorKind::NotFound => Err(Error::FileNotFound(path.display().to_string())),
            _ => Err(Error::Unknown(error.to_string())),
        },
    }?;

    let config: Config = match serde_yaml::from_str(&contents) {
        Ok(data) => Ok(data),
        Err(error) => Err(Error::ParsingError(error.to_string())),
    }?;

    match config.validate() {
        Ok(_) => (),
        Err(error) => return Err(Error::ValidationError(error.to_string())),
    }

    tracing::debug!(
        path = %path.display(),
        accounts = config.account_configs.len(),
        "loaded configuration"
    );

    return Ok(config);
}

/// Account ids are 12 digits; a bare YAML integer loses its leading zeros, so they are restored.
fn deserialize_account_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawAccountId {
        Text(String),
        Number(u64),
    }

    let raw = Option::<RawAccountId>::deserialize(deserializer)?;
    let id = raw.map(|raw| match raw {
        RawAccountId::Text(text) => text,
        RawAccountId::Number(number) => format!("{:012}", number),
    });

    return Ok(id);
}

/// An empty `Type` is unset, so the account inherits the root credential type.
fn deserialize_credential_type<'de, D>(deserializer: D) -> Result<Option<CredentialType>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    let kind = match raw.as_deref().map(str::trim) {
        None | Some("") => None,
        Some("CLI") => Some(CredentialType::Cli),
        Some("ServiceRole") => Some(CredentialType::ServiceRole),
        Some(other) => {
            return Err(serde::de::Error::unknown_variant(
                other,
                &["CLI", "ServiceRole"],
            ))
        }
    };

    return Ok(kind);
}

fn validate_regions(regions: &Vec<String>) -> Result<(), ValidationError> {
    if regions.iter().any(|region| region.trim().is_empty()) {
        return Err(ValidationError::new("region names must not be empty"));
    }

    return Ok(());
}
