//! Registration-time checks of workflow definitions.

use super::definition::{DelegateBody, DelegateSpec, StepAction, WorkflowDefinition};
use super::value::ValueRef;
use crate::errors::{codes, ContractErrorInfo, CycleDetectedError, WorkflowValidationError};
use crate::remote::RemoteOperation;
use std::collections::{HashMap, HashSet};

fn invalid(definition: &WorkflowDefinition, code: &str, message: String, steps: Vec<String>) -> WorkflowValidationError {
    let mut info = ContractErrorInfo::new(code, message.clone());
    if !steps.is_empty() {
        info = info.with_context_entry("steps", steps.join(", "));
    }
    WorkflowValidationError::new(definition.id.clone(), message)
        .with_steps(steps)
        .with_error_info(info)
}

/// Validates a definition. `lookup` resolves definitions that delegate steps
/// may run.
///
/// # Errors
///
/// Returns the first problem found, with a contract error code.
pub fn validate_definition<'a>(
    definition: &WorkflowDefinition,
    lookup: &dyn Fn(&str) -> Option<&'a WorkflowDefinition>,
) -> Result<(), WorkflowValidationError> {
    if definition.steps.is_empty() {
        return Err(invalid(
            definition,
            codes::EMPTY,
            format!("Workflow '{}' has no steps", definition.id),
            Vec::new(),
        ));
    }
    check_unique_names(definition)?;
    check_targets(definition)?;
    check_apis(definition)?;
    let outputs = declared_outputs(definition, lookup)?;
    check_references(definition, &outputs)?;
    if let Some(cycle) = detect_cycle(definition) {
        return Err(CycleDetectedError::new(cycle).into_validation_error(&definition.id));
    }
    Ok(())
}

fn check_unique_names(definition: &WorkflowDefinition) -> Result<(), WorkflowValidationError> {
    let mut seen = HashSet::new();
    for step in &definition.steps {
        if !seen.insert(step.name.as_str()) {
            return Err(invalid(
                definition,
                codes::DUPLICATE,
                format!("Duplicate step name '{}'", step.name),
                vec![step.name.clone()],
            ));
        }
    }
    let mut params = HashSet::new();
    for param in &definition.parameters {
        if !params.insert(param.name.as_str()) {
            return Err(invalid(
                definition,
                codes::DUPLICATE,
                format!("Duplicate parameter name '{}'", param.name),
                Vec::new(),
            ));
        }
    }
    Ok(())
}

fn check_targets(definition: &WorkflowDefinition) -> Result<(), WorkflowValidationError> {
    for step in &definition.steps {
        let mut targets: Vec<&str> = step.next_step.iter().map(String::as_str).collect();
        if let StepAction::Branch(branch) = &step.action {
            targets.extend(branch.targets());
        }
        if let Some(missing) = targets.into_iter().find(|t| definition.step(t).is_none()) {
            return Err(invalid(
                definition,
                codes::DANGLING_TARGET,
                format!("Step '{}' targets unknown step '{missing}'", step.name),
                vec![step.name.clone(), missing.to_string()],
            ));
        }
    }
    Ok(())
}

fn check_apis(definition: &WorkflowDefinition) -> Result<(), WorkflowValidationError> {
    for step in &definition.steps {
        let problem = match &step.action {
            StepAction::Invoke(invoke)
            | StepAction::Delegate(DelegateSpec {
                body: DelegateBody::Invoke(invoke),
                ..
            }) if !RemoteOperation::is_known_api(&invoke.api) => {
                Some(format!("Step '{}' calls unknown API '{}'", step.name, invoke.api))
            }
            StepAction::WaitForProperty(wait) if !RemoteOperation::is_read_only_api(&wait.api) => {
                Some(format!(
                    "Step '{}' polls '{}', which is not a known read-only API",
                    step.name, wait.api
                ))
            }
            _ => None,
        };
        if let Some(message) = problem {
            return Err(invalid(definition, codes::UNKNOWN_API, message, vec![step.name.clone()]));
        }
    }
    Ok(())
}

/// Output keys (`Step.Output`) every step declares. Delegated definitions
/// contribute everything they declare, nested delegations included, under
/// the delegate step's name.
fn declared_outputs<'a>(
    definition: &WorkflowDefinition,
    lookup: &dyn Fn(&str) -> Option<&'a WorkflowDefinition>,
) -> Result<HashSet<String>, WorkflowValidationError> {
    let mut visiting = vec![definition.id.clone()];
    collect_outputs(definition, lookup, &mut visiting)
}

fn collect_outputs<'a>(
    definition: &WorkflowDefinition,
    lookup: &dyn Fn(&str) -> Option<&'a WorkflowDefinition>,
    visiting: &mut Vec<String>,
) -> Result<HashSet<String>, WorkflowValidationError> {
    let mut outputs = HashSet::new();
    for step in &definition.steps {
        match &step.action {
            StepAction::Invoke(invoke)
            | StepAction::Delegate(DelegateSpec {
                body: DelegateBody::Invoke(invoke),
                ..
            }) => {
                outputs.extend(invoke.output_names().map(|o| format!("{}.{o}", step.name)));
            }
            StepAction::Delegate(DelegateSpec {
                body: DelegateBody::Definition(id),
                ..
            }) => {
                let Some(child) = lookup(id) else {
                    return Err(invalid(
                        definition,
                        codes::UNKNOWN_DEFINITION,
                        format!("Step '{}' delegates unknown workflow '{id}'", step.name),
                        vec![step.name.clone()],
                    ));
                };
                // A replaced definition can close a delegation loop; the
                // runtime depth limit ends it, so stop descending here.
                if visiting.contains(&child.id) {
                    continue;
                }
                visiting.push(child.id.clone());
                let inner = collect_outputs(child, lookup, visiting)?;
                visiting.pop();
                outputs.extend(inner.into_iter().map(|key| format!("{}.{key}", step.name)));
            }
            _ => {}
        }
    }
    Ok(outputs)
}

fn check_references(definition: &WorkflowDefinition, outputs: &HashSet<String>) -> Result<(), WorkflowValidationError> {
    for step in &definition.steps {
        let mut references: Vec<&ValueRef> = step.inputs().into_iter().flat_map(|i| i.references()).collect();
        if let StepAction::Branch(branch) = &step.action {
            references.extend(branch.choices.iter().flat_map(|c| c.comparator.references()));
        }
        for reference in references {
            let known = match reference {
                ValueRef::Parameter(name) => definition.parameter(name).is_some(),
                ValueRef::Output { .. } => outputs.contains(&reference.key()),
            };
            if !known {
                return Err(invalid(
                    definition,
                    codes::UNKNOWN_REFERENCE,
                    format!("Step '{}' references unknown value {reference}", step.name),
                    vec![step.name.clone()],
                ));
            }
        }
    }
    Ok(())
}

/// Depth-first search over the successor graph.
fn detect_cycle(definition: &WorkflowDefinition) -> Option<Vec<String>> {
    let index: HashMap<&str, usize> = definition
        .steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.name.as_str(), i))
        .collect();
    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut path = Vec::new();

    for step in &definition.steps {
        if !visited.contains(step.name.as_str()) {
            if let Some(cycle) = dfs_cycle(definition, &index, &step.name, &mut visited, &mut rec_stack, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}

fn dfs_cycle<'a>(
    definition: &'a WorkflowDefinition,
    index: &HashMap<&str, usize>,
    node: &'a str,
    visited: &mut HashSet<&'a str>,
    rec_stack: &mut HashSet<&'a str>,
    path: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    visited.insert(node);
    rec_stack.insert(node);
    path.push(node);

    if let Some(&i) = index.get(node) {
        for next in definition.successors(i) {
            if !visited.contains(next) {
                if let Some(cycle) = dfs_cycle(definition, index, next, visited, rec_stack, path) {
                    return Some(cycle);
                }
            } else if rec_stack.contains(next) {
                let start = path.iter().position(|n| *n == next).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|s| (*s).to_string()).collect();
                cycle.push(next.to_string());
                return Some(cycle);
            }
        }
    }

    path.pop();
    rec_stack.remove(node);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::Selector;
    use crate::workflow::definition::{
        BranchSpec, Choice, Comparator, DelegateSpec, InvokeSpec, ParameterSpec, StepSpec, WaitSpec,
    };
    use std::time::Duration;

    fn none(_: &str) -> Option<&'static WorkflowDefinition> {
        None
    }

    fn sel(path: &str) -> Selector {
        Selector::parse(path).unwrap()
    }

    fn code_of(def: &WorkflowDefinition) -> String {
        validate_definition(def, &none)
            .unwrap_err()
            .code()
            .unwrap_or_default()
            .to_string()
    }

    fn valid() -> WorkflowDefinition {
        WorkflowDefinition::new("wf")
            .with_parameter(ParameterSpec::required("AuditAccountId"))
            .with_step(StepSpec::invoke(
                "GetDetectorId",
                InvokeSpec::new("ListDetectors").with_output("DetectorId", sel("$.DetectorIds[0]")),
            ))
            .with_step(StepSpec::invoke(
                "Describe",
                InvokeSpec::new("DescribeAccount").with_input("AccountId", "{{ AuditAccountId }}"),
            ))
    }

    #[test]
    fn test_valid_definition_passes() {
        assert!(validate_definition(&valid(), &none).is_ok());
    }

    #[test]
    fn test_empty_definition() {
        assert_eq!(code_of(&WorkflowDefinition::new("wf")), codes::EMPTY);
    }

    #[test]
    fn test_duplicate_step() {
        let def = valid().with_step(StepSpec::sleep("Describe", Duration::from_secs(1)));
        assert_eq!(code_of(&def), codes::DUPLICATE);
    }

    #[test]
    fn test_dangling_target() {
        let def = valid().with_step(
            StepSpec::branch(
                "Choose",
                BranchSpec::new(vec![Choice::new(
                    ValueRef::output("GetDetectorId", "DetectorId"),
                    Comparator::IsPresent(true),
                    "Nowhere",
                )]),
            ),
        );
        let err = validate_definition(&def, &none).unwrap_err();
        assert_eq!(err.code(), Some(codes::DANGLING_TARGET));
        assert!(err.to_string().contains("Nowhere"));
    }

    #[test]
    fn test_unknown_references() {
        let param = valid().with_step(StepSpec::invoke(
            "X",
            InvokeSpec::new("DescribeAccount").with_input("AccountId", "{{ LogArchiveAccountId }}"),
        ));
        assert_eq!(code_of(&param), codes::UNKNOWN_REFERENCE);

        let output = valid().with_step(StepSpec::invoke(
            "X",
            InvokeSpec::new("CreateMembers").with_input("DetectorId", "{{ GetDetectorId.Missing }}"),
        ));
        assert_eq!(code_of(&output), codes::UNKNOWN_REFERENCE);
    }

    #[test]
    fn test_unknown_api_and_mutating_wait() {
        let api = valid().with_step(StepSpec::invoke("X", InvokeSpec::new("DeleteEverything")));
        assert_eq!(code_of(&api), codes::UNKNOWN_API);

        let wait = valid().with_step(StepSpec::wait(
            "W",
            WaitSpec::new("CreatePolicy", sel("$.Policy"), ["x"]),
        ));
        assert_eq!(code_of(&wait), codes::UNKNOWN_API);
    }

    #[test]
    fn test_cycle_detected() {
        let def = WorkflowDefinition::new("loop")
            .with_step(StepSpec::sleep("A", Duration::from_secs(1)))
            .with_step(StepSpec::sleep("B", Duration::from_secs(1)).with_next_step("A"));
        let err = validate_definition(&def, &none).unwrap_err();
        assert_eq!(err.code(), Some(codes::CYCLE));
        assert!(err.to_string().contains("A -> B -> A"));
    }

    #[test]
    fn test_delegated_definition_outputs() {
        let child = WorkflowDefinition::new("child").with_step(StepSpec::invoke(
            "Inner",
            InvokeSpec::new("ListDetectors").with_output("Id", sel("$.DetectorIds[0]")),
        ));
        let parent = WorkflowDefinition::new("parent")
            .with_step(StepSpec::delegate("Run", DelegateSpec::definition("222", "Role", "eu-west-1", "child")))
            .with_step(StepSpec::invoke(
                "Use",
                InvokeSpec::new("DescribeAccount").with_input("AccountId", "{{ Run.Inner.Id }}"),
            ));

        let lookup = |id: &str| if id == "child" { Some(&child) } else { None };
        assert!(validate_definition(&parent, &lookup).is_ok());
        assert_eq!(code_of(&parent), codes::UNKNOWN_DEFINITION);
    }

    #[test]
    fn test_nested_delegation_outputs() {
        let leaf = WorkflowDefinition::new("leaf").with_step(StepSpec::invoke(
            "Roots",
            InvokeSpec::new("ListRoots").with_output("RootId", sel("$.Roots[0].Id")),
        ));
        let child = WorkflowDefinition::new("child")
            .with_step(StepSpec::delegate(
                "Inner",
                DelegateSpec::invoke(
                    "222",
                    "Role",
                    "eu-west-1",
                    InvokeSpec::new("ListDetectors").with_output("Id", sel("$.DetectorIds[0]")),
                ),
            ))
            .with_step(StepSpec::delegate("Deeper", DelegateSpec::definition("333", "Role", "eu-west-1", "leaf")));
        let parent = WorkflowDefinition::new("parent")
            .with_step(StepSpec::delegate("Run", DelegateSpec::definition("222", "Role", "eu-west-1", "child")))
            .with_step(StepSpec::invoke(
                "Use",
                InvokeSpec::new("DescribeAccount")
                    .with_input("AccountId", "{{ Run.Inner.Id }}")
                    .with_input("Root", "{{ Run.Deeper.Roots.RootId }}"),
            ));

        let lookup = |id: &str| match id {
            "child" => Some(&child),
            "leaf" => Some(&leaf),
            _ => None,
        };
        assert!(validate_definition(&parent, &lookup).is_ok());

        let wrong = parent.clone().with_step(StepSpec::invoke(
            "Bad",
            InvokeSpec::new("DescribeAccount").with_input("AccountId", "{{ Run.Inner.Missing }}"),
        ));
        let err = validate_definition(&wrong, &lookup).unwrap_err();
        assert_eq!(err.code(), Some(codes::UNKNOWN_REFERENCE));
    }

    #[test]
    fn test_delegation_loop_does_not_recurse_forever() {
        let a = WorkflowDefinition::new("a")
            .with_step(StepSpec::delegate("ToB", DelegateSpec::definition("222", "Role", "eu-west-1", "b")));
        let b = WorkflowDefinition::new("b")
            .with_step(StepSpec::delegate("ToA", DelegateSpec::definition("222", "Role", "eu-west-1", "a")));
        let lookup = |id: &str| match id {
            "a" => Some(&a),
            "b" => Some(&b),
            _ => None,
        };
        assert!(validate_definition(&a, &lookup).is_ok());
    }
}
