use crate::config::{self, AccountConfig, Config, CredentialType, Filters, RootConfig};
use crate::matcher::{NameFilter, TagFilter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Cli { profile_name: String },
    ServiceRole,
}

/// One account/region pair to scan, with everything inherited from the root config already applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub account_id: String,
    pub account_name: String,
    pub region: String,
    pub credential: Credential,
    pub name_filter: NameFilter,
    pub tag_filters: Vec<TagFilter>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|value| !value.is_empty())
}

/// Picks the name filter defined at one level, if any. Both kinds at once is a contradiction.
fn name_filter(filters: &Filters, location: &str) -> Result<Option<NameFilter>, String> {
    match (
        non_empty(&filters.stack_name_regex),
        non_empty(&filters.stack_name_prefix),
    ) {
        (Some(_), Some(_)) => Err(format!(
            "{}.StackNameRegex and {}.StackNamePrefix are mutually exclusive",
            location, location
        )),
        (Some(pattern), None) => Ok(Some(NameFilter::regex(pattern))),
        (None, Some(prefix)) => Ok(Some(NameFilter::prefix(prefix))),
        (None, None) => Ok(None),
    }
}

fn resolve_account(
    index: usize,
    account: &AccountConfig,
    root: &RootConfig,
    root_name_filter: &Option<NameFilter>,
    errors: &mut Vec<String>,
) -> Vec<Target> {
    let error_count = errors.len();

    let kind = account
        .credential
        .kind
        .or(root.credential.kind)
        .unwrap_or(CredentialType::ServiceRole);
    let profile_name = non_empty(&account.credential.profile_name)
        .or_else(|| non_empty(&root.credential.profile_name));
    let credential = match (kind, profile_name) {
        (CredentialType::Cli, Some(profile_name)) => Some(Credential::Cli {
            profile_name: profile_name.to_string(),
        }),
        (CredentialType::Cli, None) => {
            errors.push(format!(
                "you must specify AccountConfigs[{}].Credential.ProfileName if you select AccountConfigs[{}].Credential.Type as CLI",
                index, index
            ));
            None
        }
        (CredentialType::ServiceRole, _) => Some(Credential::ServiceRole),
    };

    let regions = if account.filters.regions.is_empty() {
        &root.filters.regions
    } else {
        &account.filters.regions
    };
    if regions.is_empty() {
        errors.push(format!(
            "you must specify at least 1 region at either AccountConfigs[{}].Filters.Regions or RootConfig.Filters.Regions",
            index
        ));
    }

    let account_id = non_empty(&account.id);
    if account_id.is_none() {
        errors.push(format!("AccountConfigs[{}].Id is required", index));
    }

    let name_filter =
        match name_filter(&account.filters, &format!("AccountConfigs[{}].Filters", index)) {
            Ok(Some(name_filter)) => name_filter,
            Ok(None) => root_name_filter.clone().unwrap_or(NameFilter::Any),
            Err(error) => {
                errors.push(error);
                NameFilter::Any
            }
        };

    let stack_tags = if account.filters.stack_tags.is_empty() {
        &root.filters.stack_tags
    } else {
        &account.filters.stack_tags
    };
    let tag_filters: Vec<TagFilter> = stack_tags
        .iter()
        .map(|tag| TagFilter {
            key: tag.key.clone(),
            value: tag.value.clone(),
        })
        .collect();

    let (Some(account_id), Some(credential)) = (account_id, credential) else {
        return vec![];
    };
    if errors.len() > error_count {
        return vec![];
    }

    if let NameFilter::Malformed { pattern, reason } = &name_filter {
        tracing::warn!(
            account_id,
            pattern = %pattern,
            reason = %reason,
            "stack name pattern does not compile, no stacks will match"
        );
    }

    let mut targets: Vec<Target> = Vec::with_capacity(regions.len());
    for region in regions {
        if targets.iter().any(|target| &target.region == region) {
            tracing::debug!(account_id, region = %region, "skipping duplicate region");
            continue;
        }
        targets.push(Target {
            account_id: account_id.to_string(),
            account_name: account.name.clone(),
            region: region.clone(),
            credential: credential.clone(),
            name_filter: name_filter.clone(),
            tag_filters: tag_filters.clone(),
        });
    }

    targets
}

/// Expands every account into one target per region.
///
/// Account fields override the root defaults only when set. All validation problems across
/// all accounts are reported together; no targets are produced if there is any.
pub fn resolve(config: &Config) -> Result<Vec<Target>, config::Error> {
    let mut errors: Vec<String> = vec![];

    let root_name_filter = match name_filter(&config.root_config.filters, "RootConfig.Filters") {
        Ok(name_filter) => name_filter,
        Err(error) => {
            errors.push(error);
            None
        }
    };

    let mut targets: Vec<Target> = vec![];
    for (index, account) in config.account_configs.iter().enumerate() {
        targets.extend(resolve_account(
            index,
            account,
            &config.root_config,
            &root_name_filter,
            &mut errors,
        ));
    }

    if !errors.is_empty() {
        return Err(config::Error::ValidationError(errors.join("; ")));
    }

    tracing::debug!(targets = targets.len(), "resolved scan targets");
    return Ok(targets);
}
