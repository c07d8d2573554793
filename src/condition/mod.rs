// ABOUTME: Condition well-formedness checking and runtime evaluation
// ABOUTME: Conditions gate actions; malformed ones are rejected when the graph is built

use regex::Regex;
use thiserror::Error;

use crate::context::{BranchContext, VAR_PREVIOUS_EXIT_CODE};
use crate::parser::job::{VariableDecl, VariableType};
use crate::parser::{Condition, Operator};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConditionError {
    #[error("Operator '{operator}' requires a numeric value, got '{value}'")]
    NonNumericValue { operator: Operator, value: String },

    #[error("Operator '{operator}' requires a numeric variable, but '{variable}' is declared as {var_type:?}")]
    NonNumericVariable {
        operator: Operator,
        variable: String,
        var_type: VariableType,
    },

    #[error("Invalid regex '{pattern}': {message}")]
    InvalidRegex { pattern: String, message: String },

    #[error("Cannot evaluate '{variable} {operator} {value}': {message}")]
    EvaluationFailed {
        variable: String,
        operator: Operator,
        value: String,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, ConditionError>;

fn has_token(text: &str) -> bool {
    text.contains("${")
}

fn is_numeric(text: &str) -> bool {
    text.trim().parse::<f64>().is_ok()
}

/// Check a condition for well-formedness against the job's declared
/// variables. Values containing `${NAME}` tokens are deferred to runtime.
pub fn validate(
    condition: &Condition,
    declared: &indexmap::IndexMap<String, VariableDecl>,
) -> Result<()> {
    match condition.operator {
        Operator::Gt | Operator::Lt => {
            if !has_token(&condition.value) && !is_numeric(&condition.value) {
                return Err(ConditionError::NonNumericValue {
                    operator: condition.operator,
                    value: condition.value.clone(),
                });
            }
            if let Some(decl) = declared.get(&condition.variable) {
                if decl.var_type != VariableType::Number {
                    return Err(ConditionError::NonNumericVariable {
                        operator: condition.operator,
                        variable: condition.variable.clone(),
                        var_type: decl.var_type,
                    });
                }
            }
        }
        Operator::Matches => {
            if !has_token(&condition.value) {
                Regex::new(&condition.value).map_err(|e| ConditionError::InvalidRegex {
                    pattern: condition.value.clone(),
                    message: e.to_string(),
                })?;
            }
        }
        Operator::Eq | Operator::Ne | Operator::Contains => {}
    }
    Ok(())
}

/// Evaluate a condition list against the branch context. The empty list is
/// true; multiple conditions combine with AND.
pub fn evaluate(conditions: &[Condition], ctx: &mut BranchContext) -> Result<bool> {
    for condition in conditions {
        if !evaluate_one(condition, ctx)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn evaluate_one(condition: &Condition, ctx: &mut BranchContext) -> Result<bool> {
    // A missing variable compares as the empty string; the substitution
    // layer reports the unresolved name separately.
    let left = ctx.lookup(&condition.variable).unwrap_or_default();
    let right = ctx.resolve(&condition.value);

    match condition.operator {
        Operator::Eq => Ok(left == right),
        Operator::Ne => Ok(left != right),
        Operator::Gt | Operator::Lt => {
            let lhs = parse_number(condition, &left, &condition.variable)?;
            let rhs = parse_number(condition, &right, &right)?;
            Ok(match condition.operator {
                Operator::Gt => lhs > rhs,
                _ => lhs < rhs,
            })
        }
        Operator::Contains => Ok(left.contains(&right)),
        Operator::Matches => {
            let re = Regex::new(&right).map_err(|e| ConditionError::EvaluationFailed {
                variable: condition.variable.clone(),
                operator: condition.operator,
                value: condition.value.clone(),
                message: format!("invalid regex after substitution: {e}"),
            })?;
            Ok(re.is_match(&left))
        }
    }
}

fn parse_number(condition: &Condition, text: &str, what: &str) -> Result<f64> {
    text.trim()
        .parse::<f64>()
        .map_err(|_| ConditionError::EvaluationFailed {
            variable: condition.variable.clone(),
            operator: condition.operator,
            value: condition.value.clone(),
            message: format!("'{what}' resolved to non-numeric '{text}'"),
        })
}

/// True when the condition reads a previous-action variable; such conditions
/// only make sense once a result has been recorded on the branch.
pub fn reads_previous_result(condition: &Condition) -> bool {
    condition.variable == VAR_PREVIOUS_EXIT_CODE
        || condition.variable == crate::context::VAR_PREVIOUS_OUTPUT
}
