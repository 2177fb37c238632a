//! Step Registry
//!
//! Ordered step lists for the NORMAL, ERROR and EXIT scopes. Every
//! descriptor is validated before it is stored; a rejected descriptor
//! leaves the registry untouched.

use std::collections::HashSet;

use crate::error::StepValidationError;

use super::context::NORMAL_ERROR_KEY;
use super::step::{ExecutionMode, NamedBody, Scope, StepDescriptor, StepKind};

/// Registered steps, partitioned by scope, in registration order.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    normal: Vec<StepDescriptor>,
    error: Vec<StepDescriptor>,
    exit: Vec<StepDescriptor>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Steps of `scope` in registration order.
    pub fn steps(&self, scope: Scope) -> &[StepDescriptor] {
        match scope {
            Scope::Normal => &self.normal,
            Scope::Error => &self.error,
            Scope::Exit => &self.exit,
        }
    }

    fn steps_mut(&mut self, scope: Scope) -> &mut Vec<StepDescriptor> {
        match scope {
            Scope::Normal => &mut self.normal,
            Scope::Error => &mut self.error,
            Scope::Exit => &mut self.exit,
        }
    }

    /// Validates `step` and appends it to its scope.
    pub fn register(&mut self, step: StepDescriptor) -> Result<(), StepValidationError> {
        validate_descriptor(&step)?;

        if self.steps(step.scope).iter().any(|s| s.name() == step.name()) {
            return Err(StepValidationError::DuplicateName {
                scope: step.scope,
                name: step.name().to_string(),
            });
        }

        self.steps_mut(step.scope).push(step);
        Ok(())
    }

    /// Most recently registered step of `scope`.
    pub fn last(&self, scope: Scope) -> Option<&StepDescriptor> {
        self.steps(scope).last()
    }

    /// Finds a step by name, searching NORMAL, then ERROR, then EXIT.
    pub fn find(&self, name: &str) -> Option<&StepDescriptor> {
        Scope::ALL
            .iter()
            .flat_map(|scope| self.steps(*scope))
            .find(|s| s.name() == name)
    }

    /// Whether any registered step can write `key` into the context.
    pub fn writes_key(&self, key: &str) -> bool {
        Scope::ALL
            .iter()
            .flat_map(|scope| self.steps(*scope))
            .any(|s| s.name() == key || s.result_keys().contains(&key))
    }

    pub fn len(&self) -> usize {
        self.normal.len() + self.error.len() + self.exit.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn check_name(name: &str, scope: Scope) -> Result<(), StepValidationError> {
    if name.is_empty() {
        return Err(StepValidationError::EmptyName(scope));
    }
    if name == NORMAL_ERROR_KEY {
        return Err(StepValidationError::ReservedName(name.to_string()));
    }
    Ok(())
}

/// Checks a descriptor's own shape. Cross-step rules live in [`Registry::register`].
fn validate_descriptor(step: &StepDescriptor) -> Result<(), StepValidationError> {
    check_name(step.name(), step.scope)?;

    match &step.kind {
        StepKind::Simple(_) => {}
        StepKind::Conditional {
            on_true, on_false, ..
        } => {
            validate_branch(step, on_true)?;
            validate_branch(step, on_false)?;
        }
        StepKind::Parallel { members, mode } => validate_members(step, members, *mode)?,
    }

    if let Some(fallback) = &step.fallback {
        check_name(&fallback.name, step.scope)?;
    }

    Ok(())
}

/// A branch needs at least one step and unique names within itself. The
/// two branches never both run, so they may reuse each other's names.
fn validate_branch(step: &StepDescriptor, branch: &[NamedBody]) -> Result<(), StepValidationError> {
    if branch.is_empty() {
        return Err(StepValidationError::EmptyBranch(step.name().to_string()));
    }

    let mut seen = HashSet::new();
    for named in branch {
        check_name(&named.name, step.scope)?;
        if !seen.insert(named.name.as_str()) {
            return Err(StepValidationError::DuplicateBranch {
                step: step.name().to_string(),
                name: named.name.clone(),
            });
        }
    }
    Ok(())
}

fn validate_members(
    step: &StepDescriptor,
    members: &[NamedBody],
    mode: ExecutionMode,
) -> Result<(), StepValidationError> {
    if members.is_empty() {
        return Err(StepValidationError::EmptyParallelGroup(step.name().to_string()));
    }

    let mut seen = HashSet::new();
    for member in members {
        check_name(&member.name, step.scope)?;
        if !seen.insert(member.name.as_str()) {
            return Err(StepValidationError::DuplicateMember {
                step: step.name().to_string(),
                member: member.name.clone(),
            });
        }
        if mode == ExecutionMode::Process && !member.body.is_command() {
            return Err(StepValidationError::ProcessModeRequiresCommand {
                step: step.name().to_string(),
                member: member.name.clone(),
            });
        }
    }
    Ok(())
}
