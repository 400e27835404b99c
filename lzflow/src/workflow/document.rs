//! Parses automation documents (`schemaVersion` / `parameters` / `mainSteps`)
//! into workflow definitions.
//!
//! Supported actions: `aws:executeAwsApi`, `aws:branch`,
//! `aws:waitForAwsResourceProperty`, `aws:sleep` and `aws:executeAutomation`.
//! Steps may set `onFailure: Continue` to become best-effort, plus the
//! extensions `alreadySatisfiedCodes` and `pollIntervalSeconds`.

use super::definition::{
    BranchSpec, Choice, Comparator, DelegateSpec, InvokeSpec, ParameterSpec, SleepSpec, StepAction,
    StepSpec, WaitSpec, WorkflowDefinition,
};
use super::value::InputValue;
use crate::errors::{codes, ContractErrorInfo, WorkflowValidationError};
use crate::remote::Selector;
use crate::utils::{parse_iso8601_duration, parse_seconds};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Document {
    #[serde(default)]
    description: String,
    #[serde(default)]
    parameters: BTreeMap<String, DocumentParameter>,
    main_steps: Vec<DocumentStep>,
}

#[derive(Debug, Deserialize)]
struct DocumentParameter {
    #[serde(default)]
    description: String,
    #[serde(default)]
    default: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentStep {
    name: String,
    action: String,
    #[serde(default)]
    inputs: Map<String, Value>,
    #[serde(default)]
    outputs: Vec<DocumentOutput>,
    next_step: Option<String>,
    #[serde(default)]
    is_end: bool,
    timeout_seconds: Option<Value>,
    on_failure: Option<String>,
    #[serde(default)]
    already_satisfied_codes: Vec<String>,
    poll_interval_seconds: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DocumentOutput {
    name: String,
    selector: String,
}

struct StepParser<'a> {
    id: &'a str,
    step: &'a str,
}

impl StepParser<'_> {
    fn error(&self, message: impl std::fmt::Display) -> WorkflowValidationError {
        let message = format!("step '{}': {message}", self.step);
        WorkflowValidationError::new(self.id, message.clone())
            .with_steps(vec![self.step.to_string()])
            .with_error_info(ContractErrorInfo::new(codes::DOCUMENT, message))
    }

    fn take_str(&self, inputs: &mut Map<String, Value>, key: &str) -> Result<String, WorkflowValidationError> {
        match inputs.remove(key) {
            Some(Value::String(s)) if !s.is_empty() => Ok(s),
            Some(_) => Err(self.error(format!("input '{key}' must be a non-empty string"))),
            None => Err(self.error(format!("missing input '{key}'"))),
        }
    }

    fn selector(&self, text: &str) -> Result<Selector, WorkflowValidationError> {
        Selector::parse(text).map_err(|e| self.error(e))
    }

    fn templates(inputs: Map<String, Value>) -> BTreeMap<String, InputValue> {
        inputs.into_iter().map(|(k, v)| (k, InputValue::parse(&v))).collect()
    }

    fn invoke(&self, raw: &DocumentStep, mut inputs: Map<String, Value>) -> Result<InvokeSpec, WorkflowValidationError> {
        inputs.remove("Service");
        let api = self.take_str(&mut inputs, "Api")?;
        let mut spec = InvokeSpec::new(api);
        spec.inputs = Self::templates(inputs);
        for output in &raw.outputs {
            spec = spec.with_output(output.name.clone(), self.selector(&output.selector)?);
        }
        spec.already_satisfied_codes.clone_from(&raw.already_satisfied_codes);
        Ok(spec)
    }

    fn wait(&self, raw: &DocumentStep, mut inputs: Map<String, Value>) -> Result<WaitSpec, WorkflowValidationError> {
        inputs.remove("Service");
        let api = self.take_str(&mut inputs, "Api")?;
        let selector = self.selector(&self.take_str(&mut inputs, "PropertySelector")?)?;
        let desired = match inputs.remove("DesiredValues") {
            Some(Value::Array(values)) if !values.is_empty() => values
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| self.error("DesiredValues must be strings"))?,
            _ => return Err(self.error("DesiredValues must be a non-empty list")),
        };
        let mut spec = WaitSpec::new(api, selector, desired);
        spec.inputs = Self::templates(inputs);
        if let Some(interval) = &raw.poll_interval_seconds {
            spec = spec.with_poll_interval(parse_seconds(interval).map_err(|e| self.error(e))?);
        }
        Ok(spec)
    }

    fn comparator(&self, name: &str, operand: &Value) -> Result<Comparator, WorkflowValidationError> {
        let number = || operand.as_f64().ok_or_else(|| self.error(format!("{name} needs a number")));
        let boolean = || operand.as_bool().ok_or_else(|| self.error(format!("{name} needs a boolean")));
        Ok(match name {
            "StringEquals" => Comparator::StringEquals(InputValue::parse(operand)),
            "StringNotEquals" => Comparator::StringNotEquals(InputValue::parse(operand)),
            "BooleanEquals" => Comparator::BooleanEquals(boolean()?),
            "NumericEquals" => Comparator::NumericEquals(number()?),
            "NumericGreater" => Comparator::NumericGreater(number()?),
            "NumericLesser" => Comparator::NumericLesser(number()?),
            "IsPresent" => Comparator::IsPresent(boolean()?),
            other => return Err(self.error(format!("unsupported operator '{other}'"))),
        })
    }

    fn branch(&self, mut inputs: Map<String, Value>) -> Result<BranchSpec, WorkflowValidationError> {
        let Some(Value::Array(raw_choices)) = inputs.remove("Choices") else {
            return Err(self.error("Choices must be a list"));
        };
        let mut choices = Vec::with_capacity(raw_choices.len());
        for raw in raw_choices {
            let Value::Object(mut fields) = raw else {
                return Err(self.error("each choice must be an object"));
            };
            let next = self.take_str(&mut fields, "NextStep")?;
            let variable = fields
                .remove("Variable")
                .ok_or_else(|| self.error("choice without Variable"))?;
            let mut operators = fields.into_iter();
            let (Some((name, operand)), None) = (operators.next(), operators.next()) else {
                return Err(self.error("each choice needs exactly one operator"));
            };
            choices.push(Choice::new(
                InputValue::parse(&variable),
                self.comparator(&name, &operand)?,
                next,
            ));
        }
        let mut spec = BranchSpec::new(choices);
        if inputs.contains_key("Default") {
            spec = spec.with_default(self.take_str(&mut inputs, "Default")?);
        }
        Ok(spec)
    }

    fn sleep(&self, inputs: &Map<String, Value>) -> Result<Duration, WorkflowValidationError> {
        match inputs.get("Duration") {
            Some(Value::String(text)) if text.starts_with('P') => {
                parse_iso8601_duration(text).map_err(|e| self.error(e))
            }
            Some(value) => parse_seconds(value).map_err(|e| self.error(e)),
            None => Err(self.error("missing input 'Duration'")),
        }
    }

    fn delegate(&self, mut inputs: Map<String, Value>) -> Result<DelegateSpec, WorkflowValidationError> {
        let document = self.take_str(&mut inputs, "DocumentName")?;
        let location = match inputs.remove("TargetLocations") {
            Some(Value::Array(mut locations)) if locations.len() == 1 => match locations.remove(0) {
                Value::Object(location) => location,
                _ => return Err(self.error("target location must be an object")),
            },
            _ => return Err(self.error("TargetLocations must hold exactly one location")),
        };
        let first = |key: &str| -> Result<Value, WorkflowValidationError> {
            match location.get(key) {
                Some(Value::Array(values)) if values.len() == 1 => Ok(values[0].clone()),
                _ => Err(self.error(format!("{key} must hold exactly one entry"))),
            }
        };
        let role = location
            .get("ExecutionRoleName")
            .cloned()
            .ok_or_else(|| self.error("missing ExecutionRoleName"))?;

        let mut spec = DelegateSpec::definition(
            InputValue::parse(&first("Accounts")?),
            InputValue::parse(&role),
            InputValue::parse(&first("Regions")?),
            document,
        );
        if let Some(parameters) = inputs.remove("RuntimeParameters") {
            let Value::Object(parameters) = parameters else {
                return Err(self.error("RuntimeParameters must be an object"));
            };
            for (name, value) in parameters {
                // Runtime parameters are lists of strings; single entries are unwrapped.
                let value = match value {
                    Value::Array(mut values) if values.len() == 1 => values.remove(0),
                    other => other,
                };
                spec = spec.with_parameter(name, InputValue::parse(&value));
            }
        }
        Ok(spec)
    }
}

/// Builds a definition named `id` from an automation document.
///
/// # Errors
///
/// Returns a `WORKFLOW-000-DOCUMENT` error for malformed documents. The
/// result still has to pass registration-time validation.
pub fn from_document(id: &str, document: &Value) -> Result<WorkflowDefinition, WorkflowValidationError> {
    let parsed: Document = serde_json::from_value(document.clone()).map_err(|e| {
        let message = format!("malformed document: {e}");
        WorkflowValidationError::new(id, message.clone())
            .with_error_info(ContractErrorInfo::new(codes::DOCUMENT, message))
    })?;

    let mut definition = WorkflowDefinition::new(id).with_description(parsed.description);
    for (name, param) in parsed.parameters {
        let spec = match param.default {
            Some(default) => ParameterSpec::optional(name, default),
            None => ParameterSpec::required(name),
        };
        definition = definition.with_parameter(spec.with_description(param.description));
    }

    for raw in &parsed.main_steps {
        let parser = StepParser { id, step: &raw.name };
        let inputs = raw.inputs.clone();
        let action = match raw.action.as_str() {
            "aws:executeAwsApi" => StepAction::Invoke(parser.invoke(raw, inputs)?),
            "aws:branch" => StepAction::Branch(parser.branch(inputs)?),
            "aws:waitForAwsResourceProperty" => StepAction::WaitForProperty(parser.wait(raw, inputs)?),
            "aws:sleep" => StepAction::Sleep(SleepSpec {
                duration: parser.sleep(&inputs)?,
            }),
            "aws:executeAutomation" => StepAction::Delegate(parser.delegate(inputs)?),
            other => return Err(parser.error(format!("unsupported action '{other}'"))),
        };

        let mut step = StepSpec::new(raw.name.clone(), action);
        step.next_step.clone_from(&raw.next_step);
        step.is_end = raw.is_end;
        if let Some(timeout) = &raw.timeout_seconds {
            step.timeout = Some(parse_seconds(timeout).map_err(|e| parser.error(e))?);
        }
        step.best_effort = match raw.on_failure.as_deref() {
            None | Some("Abort") => false,
            Some("Continue") => true,
            Some(other) => return Err(parser.error(format!("unsupported onFailure '{other}'"))),
        };
        definition = definition.with_step(step);
    }
    Ok(definition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::definition::DelegateBody;
    use crate::workflow::value::ValueRef;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn code(err: &WorkflowValidationError) -> &str {
        err.code().unwrap_or_default()
    }

    #[test]
    fn test_parses_all_actions() {
        let doc = json!({
            "schemaVersion": "0.3",
            "parameters": {
                "AuditAccountId": {"type": "String"},
                "Region": {"type": "String", "default": "eu-west-1"}
            },
            "mainSteps": [
                {
                    "name": "Check",
                    "action": "aws:executeAwsApi",
                    "inputs": {"Service": "securityhub", "Api": "ListOrganizationAdminAccounts"},
                    "outputs": [{"Name": "AdminAccountId", "Selector": "$.AdminAccounts[0].AdminAccountId", "Type": "String"}]
                },
                {
                    "name": "Choice",
                    "action": "aws:branch",
                    "inputs": {
                        "Choices": [{"NextStep": "Sleep", "Variable": "{{ Check.AdminAccountId }}", "StringEquals": "{{ AuditAccountId }}"}],
                        "Default": "Wait"
                    }
                },
                {
                    "name": "Wait",
                    "action": "aws:waitForAwsResourceProperty",
                    "timeoutSeconds": 60,
                    "onFailure": "Continue",
                    "inputs": {
                        "Service": "organizations",
                        "Api": "ListDelegatedAdministrators",
                        "ServicePrincipal": "securityhub.amazonaws.com",
                        "PropertySelector": "$.DelegatedAdministrators[0].Status",
                        "DesiredValues": ["ACTIVE"]
                    }
                },
                {"name": "Sleep", "action": "aws:sleep", "inputs": {"Duration": "PT120S"}},
                {
                    "name": "Delegate",
                    "action": "aws:executeAutomation",
                    "isEnd": true,
                    "inputs": {
                        "DocumentName": "Child",
                        "TargetLocations": [{"Accounts": ["{{ AuditAccountId }}"], "Regions": ["{{ Region }}"], "ExecutionRoleName": "AWSControlTowerExecution"}],
                        "RuntimeParameters": {"LogArchiveAWSAccountId": ["333"]}
                    }
                }
            ]
        });

        let def = from_document("wf", &doc).unwrap();
        assert_eq!(def.steps.len(), 5);
        assert_eq!(def.parameter("Region").unwrap().default, Some(json!("eu-west-1")));
        assert!(def.parameter("AuditAccountId").unwrap().default.is_none());

        let StepAction::Invoke(invoke) = &def.steps[0].action else { panic!("expected invoke") };
        assert_eq!(invoke.api, "ListOrganizationAdminAccounts");
        assert!(invoke.inputs.is_empty());
        assert_eq!(invoke.outputs[0].name, "AdminAccountId");

        let StepAction::Branch(branch) = &def.steps[1].action else { panic!("expected branch") };
        assert_eq!(branch.default.as_deref(), Some("Wait"));
        assert_eq!(
            branch.choices[0].variable,
            InputValue::Ref(ValueRef::output("Check", "AdminAccountId"))
        );

        let wait = &def.steps[2];
        assert_eq!(wait.timeout, Some(Duration::from_secs(60)));
        assert!(wait.best_effort);
        let StepAction::WaitForProperty(spec) = &wait.action else { panic!("expected wait") };
        assert_eq!(spec.desired_values, vec!["ACTIVE".to_string()]);
        assert!(spec.inputs.contains_key("ServicePrincipal"));

        assert_eq!(
            def.steps[3].action,
            StepAction::Sleep(SleepSpec {
                duration: Duration::from_secs(120)
            })
        );

        let StepAction::Delegate(delegate) = &def.steps[4].action else { panic!("expected delegate") };
        assert_eq!(delegate.body, DelegateBody::Definition("Child".to_string()));
        assert_eq!(delegate.parameters["LogArchiveAWSAccountId"], InputValue::Literal(json!("333")));
        assert!(def.steps[4].is_end);
    }

    #[test]
    fn test_rejects_unknown_action() {
        let doc = json!({"mainSteps": [{"name": "X", "action": "aws:runCommand"}]});
        let err = from_document("wf", &doc).unwrap_err();
        assert_eq!(code(&err), codes::DOCUMENT);
        assert!(err.to_string().contains("aws:runCommand"));
    }

    #[test]
    fn test_rejects_bad_selector_and_operator() {
        let bad_selector = json!({"mainSteps": [{
            "name": "X", "action": "aws:executeAwsApi",
            "inputs": {"Api": "ListDetectors"},
            "outputs": [{"Name": "Id", "Selector": "DetectorIds[0]"}]
        }]});
        assert_eq!(code(&from_document("wf", &bad_selector).unwrap_err()), codes::DOCUMENT);

        let bad_operator = json!({"mainSteps": [{
            "name": "X", "action": "aws:branch",
            "inputs": {"Choices": [{"NextStep": "X", "Variable": "a", "Contains": "b"}]}
        }]});
        assert!(from_document("wf", &bad_operator)
            .unwrap_err()
            .to_string()
            .contains("Contains"));
    }

    #[test]
    fn test_rejects_missing_main_steps() {
        let err = from_document("wf", &json!({"schemaVersion": "0.3"})).unwrap_err();
        assert_eq!(code(&err), codes::DOCUMENT);
    }
}
