use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::BehaviorVersion;
use aws_sdk_cloudformation as cfn;
use aws_sdk_cloudformation::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_types::region::Region;

use crate::targets::{Credential, Target};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Service error ocurred: {0}.")]
    ServiceError(String),

    #[error("Unknown error ocurred: {0}.")]
    UnknownError(String),

    #[error("Stack not found: {0}")]
    NotFoundError(String),
}

impl Error {
    fn from_sdk<E, R>(error: SdkError<E, R>, stack_name: Option<&str>) -> Self
    where
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
        R: std::fmt::Debug + Send + Sync + 'static,
    {
        match error {
            SdkError::ServiceError(context) => {
                let err = context.err();
                let missing = err.code() == Some("ValidationError")
                    && err.message().unwrap_or_default().contains("does not exist");
                match stack_name {
                    Some(stack_name) if missing => Error::NotFoundError(stack_name.to_string()),
                    _ => Error::ServiceError(DisplayErrorContext(err).to_string()),
                }
            }
            other => Error::UnknownError(DisplayErrorContext(&other).to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StackTag {
    pub key: String,
    pub value: String,
}

/// A value the stack was deployed with, keyed by the template parameter name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StackParameter {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StackOutput {
    pub key: String,
    pub value: String,
    pub description: String,
    pub export_name: String,
}

/// One stack as returned by the listing call. Absent upstream fields are empty strings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawStack {
    pub name: String,
    pub tags: Vec<StackTag>,
    pub parameters: Vec<StackParameter>,
    pub outputs: Vec<StackOutput>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StackPage {
    pub stacks: Vec<RawStack>,
    pub next_token: Option<String>,
}

/// A parameter as declared by the stack's template.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterDeclaration {
    pub key: String,
    pub kind: String,
    pub description: String,
    pub default_value: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StackResource {
    pub physical_id: String,
    pub logical_id: String,
    pub kind: String,
    pub description: String,
    pub status: String,
    pub drift_status: String,
}

/// The slice of the CloudFormation API the views are built from.
#[async_trait]
pub trait StackApi: Send + Sync {
    async fn list_stacks(&self, next_token: Option<String>) -> Result<StackPage, Error>;

    async fn get_template_summary(
        &self,
        stack_name: &str,
    ) -> Result<Vec<ParameterDeclaration>, Error>;

    async fn describe_stack_resources(&self, stack_name: &str)
        -> Result<Vec<StackResource>, Error>;
}

/// Builds the API client a single target is scanned with.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Api: StackApi + 'static;

    async fn connect(&self, target: &Target) -> Result<Self::Api, Error>;
}

pub struct AwsConnector;

#[async_trait]
impl Connector for AwsConnector {
    type Api = CloudFormationClient;

    async fn connect(&self, target: &Target) -> Result<Self::Api, Error> {
        return Ok(CloudFormationClient::new(target).await);
    }
}

pub struct CloudFormationClient {
    client: cfn::Client,
}

impl CloudFormationClient {
    pub async fn new(target: &Target) -> Self {
        // One attempt per call; a failed call becomes an error record instead.
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(target.region.clone()))
            .retry_config(RetryConfig::disabled());
        if let Credential::Cli { profile_name } = &target.credential {
            loader = loader.profile_name(profile_name);
        }

        let sdk_config = loader.load().await;
        let client = cfn::Client::new(&sdk_config);

        return Self { client };
    }
}

#[async_trait]
impl StackApi for CloudFormationClient {
    async fn list_stacks(&self, next_token: Option<String>) -> Result<StackPage, Error> {
        let result = self
            .client
            .describe_stacks()
            .set_next_token(next_token)
            .send()
            .await;

        let result = match result {
            Ok(data) => data,
            Err(err) => return Err(Error::from_sdk(err, None)),
        };

        let stacks = result
            .stacks
            .unwrap_or_default()
            .into_iter()
            .map(raw_stack)
            .collect();

        return Ok(StackPage {
            stacks,
            next_token: result.next_token,
        });
    }

    async fn get_template_summary(
        &self,
        stack_name: &str,
    ) -> Result<Vec<ParameterDeclaration>, Error> {
        let result = self
            .client
            .get_template_summary()
            .stack_name(stack_name)
            .send()
            .await;

        let result = match result {
            Ok(data) => data,
            Err(err) => return Err(Error::from_sdk(err, Some(stack_name))),
        };

        let declarations = result
            .parameters
            .unwrap_or_default()
            .into_iter()
            .map(|parameter| ParameterDeclaration {
                key: parameter.parameter_key.unwrap_or_default(),
                kind: parameter.parameter_type.unwrap_or_default(),
                description: parameter.description.unwrap_or_default(),
                default_value: parameter.default_value.unwrap_or_default(),
            })
            .collect();

        return Ok(declarations);
    }

    async fn describe_stack_resources(
        &self,
        stack_name: &str,
    ) -> Result<Vec<StackResource>, Error> {
        let result = self
            .client
            .describe_stack_resources()
            .stack_name(stack_name)
            .send()
            .await;

        let result = match result {
            Ok(data) => data,
            Err(err) => return Err(Error::from_sdk(err, Some(stack_name))),
        };

        let resources = result
            .stack_resources
            .unwrap_or_default()
            .into_iter()
            .map(|resource| StackResource {
                physical_id: resource.physical_resource_id.unwrap_or_default(),
                logical_id: resource.logical_resource_id.unwrap_or_default(),
                kind: resource.resource_type.unwrap_or_default(),
                description: resource.description.unwrap_or_default(),
                status: resource
                    .resource_status
                    .map(|status| status.as_str().to_string())
                    .unwrap_or_default(),
                drift_status: resource
                    .drift_information
                    .and_then(|drift| drift.stack_resource_drift_status)
                    .map(|status| status.as_str().to_string())
                    .unwrap_or_default(),
            })
            .collect();

        return Ok(resources);
    }
}

fn raw_stack(stack: cfn::types::Stack) -> RawStack {
    let tags = stack
        .tags
        .unwrap_or_default()
        .into_iter()
        .map(|tag| StackTag {
            key: tag.key.unwrap_or_default(),
            value: tag.value.unwrap_or_default(),
        })
        .collect();

    let parameters = stack
        .parameters
        .unwrap_or_default()
        .into_iter()
        .map(|parameter| StackParameter {
            key: parameter.parameter_key.unwrap_or_default(),
            value: parameter.parameter_value.unwrap_or_default(),
        })
        .collect();

    let outputs = stack
        .outputs
        .unwrap_or_default()
        .into_iter()
        .map(|output| StackOutput {
            key: output.output_key.unwrap_or_default(),
            value: output.output_value.unwrap_or_default(),
            description: output.description.unwrap_or_default(),
            export_name: output.export_name.unwrap_or_default(),
        })
        .collect();

    RawStack {
        name: stack.stack_name.unwrap_or_default(),
        tags,
        parameters,
        outputs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::NameFilter;

    fn target(credential: Credential) -> Target {
        Target {
            account_id: String::from("123456789012"),
            account_name: String::from("main-account"),
            region: String::from("ap-northeast-1"),
            credential,
            name_filter: NameFilter::Any,
            tag_filters: vec![],
        }
    }

    #[tokio::test]
    async fn client_makes_a_single_attempt_per_call() {
        let client = CloudFormationClient::new(&target(Credential::ServiceRole)).await;

        let retry_config = client.client.config().retry_config().unwrap();
        assert_eq!(1, retry_config.max_attempts());
    }

    #[tokio::test]
    async fn client_uses_the_target_region() {
        let client = CloudFormationClient::new(&target(Credential::Cli {
            profile_name: String::from("not-exist-profile"),
        }))
        .await;

        assert_eq!(
            Some("ap-northeast-1"),
            client.client.config().region().map(|region| region.as_ref())
        );
    }
}
