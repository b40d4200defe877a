use async_trait::async_trait;
use serde::Serialize;

use crate::stacks::{self, RawStack, StackApi, StackParameter};
use crate::targets::Target;

/// The report shape shared by every facet: one record per stack, or one per failed target.
///
/// A record with `error` set never carries facets.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ViewRecord<F> {
    pub account_id: String,
    pub account_name: String,
    pub region: String,
    pub stack_name: String,
    pub facets: Vec<F>,
    pub error: Option<String>,
}

impl<F> ViewRecord<F> {
    pub fn stack(target: &Target, stack_name: &str, facets: Vec<F>) -> Self {
        Self {
            account_id: target.account_id.clone(),
            account_name: target.account_name.clone(),
            region: target.region.clone(),
            stack_name: stack_name.to_string(),
            facets,
            error: None,
        }
    }

    pub fn stack_error(target: &Target, stack_name: &str, error: impl ToString) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::stack(target, stack_name, vec![])
        }
    }

    /// The whole account/region could not be scanned.
    pub fn target_error(target: &Target, error: impl ToString) -> Self {
        Self::stack_error(target, "", error)
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacetKind {
    Parameters,
    Resources,
    Outputs,
}

impl FacetKind {
    pub fn name(&self) -> &'static str {
        match self {
            FacetKind::Parameters => "parameters",
            FacetKind::Resources => "resources",
            FacetKind::Outputs => "outputs",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "Type")]
    pub kind: String,
    pub description: String,
    pub default_value: String,
    pub actual_value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Resource {
    pub physical_id: String,
    pub logical_id: String,
    #[serde(rename = "Type")]
    pub kind: String,
    pub description: String,
    pub status: String,
    pub drift_status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Output {
    pub name: String,
    pub description: String,
    pub value: String,
    pub export_name: String,
}

/// Turns one matched stack into the facet items of a view.
#[async_trait]
pub trait FacetExtractor: Send + Sync + 'static {
    type Facet: Send + 'static;

    fn kind(&self) -> FacetKind;

    async fn extract(
        &self,
        api: &dyn StackApi,
        stack: &RawStack,
    ) -> Result<Vec<Self::Facet>, stacks::Error>;

    /// Failures stay scoped to the stack, so siblings in the same target are unaffected.
    async fn view(
        &self,
        api: &dyn StackApi,
        target: &Target,
        stack: &RawStack,
    ) -> ViewRecord<Self::Facet> {
        match self.extract(api, stack).await {
            Ok(facets) => ViewRecord::stack(target, &stack.name, facets),
            Err(error) => {
                tracing::warn!(
                    stack_name = %stack.name,
                    facet = self.kind().name(),
                    error = %error,
                    "failed to describe stack"
                );
                ViewRecord::stack_error(target, &stack.name, error)
            }
        }
    }
}

pub struct ParametersExtractor;

/// The value the stack was deployed with, or empty when the template default applies.
fn actual_value(key: &str, parameters: &[StackParameter]) -> String {
    parameters
        .iter()
        .find(|parameter| parameter.key == key)
        .map(|parameter| parameter.value.clone())
        .unwrap_or_default()
}

#[async_trait]
impl FacetExtractor for ParametersExtractor {
    type Facet = Parameter;

    fn kind(&self) -> FacetKind {
        FacetKind::Parameters
    }

    async fn extract(
        &self,
        api: &dyn StackApi,
        stack: &RawStack,
    ) -> Result<Vec<Parameter>, stacks::Error> {
        let declarations = api.get_template_summary(&stack.name).await?;

        let parameters = declarations
            .into_iter()
            .map(|declaration| Parameter {
                actual_value: actual_value(&declaration.key, &stack.parameters),
                name: declaration.key,
                kind: declaration.kind,
                description: declaration.description,
                default_value: declaration.default_value,
            })
            .collect();

        return Ok(parameters);
    }
}

pub struct ResourcesExtractor;

#[async_trait]
impl FacetExtractor for ResourcesExtractor {
    type Facet = Resource;

    fn kind(&self) -> FacetKind {
        FacetKind::Resources
    }

    async fn extract(
        &self,
        api: &dyn StackApi,
        stack: &RawStack,
    ) -> Result<Vec<Resource>, stacks::Error> {
        let resources = api.describe_stack_resources(&stack.name).await?;

        return Ok(resources
            .into_iter()
            .map(|resource| Resource {
                physical_id: resource.physical_id,
                logical_id: resource.logical_id,
                kind: resource.kind,
                description: resource.description,
                status: resource.status,
                drift_status: resource.drift_status,
            })
            .collect());
    }
}

/// Outputs come with the stack listing, so no further call is made.
pub struct OutputsExtractor;

#[async_trait]
impl FacetExtractor for OutputsExtractor {
    type Facet = Output;

    fn kind(&self) -> FacetKind {
        FacetKind::Outputs
    }

    async fn extract(
        &self,
        _api: &dyn StackApi,
        stack: &RawStack,
    ) -> Result<Vec<Output>, stacks::Error> {
        return Ok(stack
            .outputs
            .iter()
            .map(|output| Output {
                name: output.key.clone(),
                description: output.description.clone(),
                value: output.value.clone(),
                export_name: output.export_name.clone(),
            })
            .collect());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::NameFilter;
    use crate::stacks::{ParameterDeclaration, StackOutput, StackPage, StackResource};
    use crate::targets::Credential;

    struct FixedApi {
        declarations: Result<Vec<ParameterDeclaration>, stacks::Error>,
        resources: Result<Vec<StackResource>, stacks::Error>,
    }

    #[async_trait]
    impl StackApi for FixedApi {
        async fn list_stacks(&self, _next_token: Option<String>) -> Result<StackPage, stacks::Error> {
            Ok(StackPage::default())
        }

        async fn get_template_summary(
            &self,
            _stack_name: &str,
        ) -> Result<Vec<ParameterDeclaration>, stacks::Error> {
            self.declarations.clone()
        }

        async fn describe_stack_resources(
            &self,
            _stack_name: &str,
        ) -> Result<Vec<StackResource>, stacks::Error> {
            self.resources.clone()
        }
    }

    fn target() -> Target {
        Target {
            account_id: String::from("123456789012"),
            account_name: String::from("main-account"),
            region: String::from("ap-northeast-1"),
            credential: Credential::ServiceRole,
            name_filter: NameFilter::Any,
            tag_filters: vec![],
        }
    }

    fn declaration(key: &str, default_value: &str) -> ParameterDeclaration {
        ParameterDeclaration {
            key: key.to_string(),
            kind: String::from("String"),
            description: String::new(),
            default_value: default_value.to_string(),
        }
    }

    #[tokio::test]
    async fn parameters_resolve_actual_values_by_key() {
        let api = FixedApi {
            declarations: Ok(vec![declaration("Env", "dev"), declaration("Size", "1")]),
            resources: Ok(vec![]),
        };
        let stack = RawStack {
            name: String::from("CfnGlobalViews"),
            parameters: vec![StackParameter {
                key: String::from("Env"),
                value: String::from("test"),
            }],
            ..Default::default()
        };

        let record = ParametersExtractor.view(&api, &target(), &stack).await;
        assert_eq!(None, record.error);
        assert_eq!("CfnGlobalViews", record.stack_name);
        assert_eq!(2, record.facets.len());
        assert_eq!("Env", record.facets[0].name);
        assert_eq!("test", record.facets[0].actual_value);
        assert_eq!("dev", record.facets[0].default_value);
        assert_eq!("Size", record.facets[1].name);
        assert_eq!("", record.facets[1].actual_value);
    }

    #[tokio::test]
    async fn failed_lookup_becomes_a_stack_error_record() {
        let api = FixedApi {
            declarations: Err(stacks::Error::ServiceError(String::from("throttled"))),
            resources: Err(stacks::Error::NotFoundError(String::from("gone"))),
        };
        let stack = RawStack {
            name: String::from("gone"),
            ..Default::default()
        };

        let record = ParametersExtractor.view(&api, &target(), &stack).await;
        assert!(record.is_error());
        assert!(record.facets.is_empty());
        assert_eq!("gone", record.stack_name);
        assert_eq!("123456789012", record.account_id);

        let record = ResourcesExtractor.view(&api, &target(), &stack).await;
        assert_eq!(Some(String::from("Stack not found: gone")), record.error);
    }

    #[tokio::test]
    async fn resources_are_copied_field_by_field() {
        let api = FixedApi {
            declarations: Ok(vec![]),
            resources: Ok(vec![StackResource {
                physical_id: String::from("bucket-1234"),
                logical_id: String::from("Bucket"),
                kind: String::from("AWS::S3::Bucket"),
                description: String::new(),
                status: String::from("CREATE_COMPLETE"),
                drift_status: String::from("NOT_CHECKED"),
            }]),
        };
        let stack = RawStack {
            name: String::from("CfnGlobalViews"),
            ..Default::default()
        };

        let record = ResourcesExtractor.view(&api, &target(), &stack).await;
        assert_eq!(
            vec![Resource {
                physical_id: String::from("bucket-1234"),
                logical_id: String::from("Bucket"),
                kind: String::from("AWS::S3::Bucket"),
                description: String::new(),
                status: String::from("CREATE_COMPLETE"),
                drift_status: String::from("NOT_CHECKED"),
            }],
            record.facets
        );
    }

    #[tokio::test]
    async fn outputs_need_no_api_call() {
        let api = FixedApi {
            declarations: Err(stacks::Error::UnknownError(String::from("unused"))),
            resources: Err(stacks::Error::UnknownError(String::from("unused"))),
        };
        let stack = RawStack {
            name: String::from("CfnGlobalViews"),
            outputs: vec![StackOutput {
                key: String::from("BucketName"),
                value: String::from("bucket-1234"),
                description: String::new(),
                export_name: String::from("shared-bucket"),
            }],
            ..Default::default()
        };

        let record = OutputsExtractor.view(&api, &target(), &stack).await;
        assert_eq!(None, record.error);
        assert_eq!(1, record.facets.len());
        assert_eq!("BucketName", record.facets[0].name);
        assert_eq!("shared-bucket", record.facets[0].export_name);
    }

    #[test]
    fn target_error_has_no_stack_name() {
        let record: ViewRecord<Output> = ViewRecord::target_error(&target(), "denied");
        assert_eq!("", record.stack_name);
        assert_eq!(Some(String::from("denied")), record.error);
        assert!(record.facets.is_empty());
    }
}
