//! Auto-quarantine rules: operator-defined predicates over exception-report
//! fields that decide skip/log/silence behaviour for future matching reports.

pub mod expression;

pub use expression::{CompiledExpression, ExpressionError, compile};

use crate::db::tables::quarantine_rules::QuarantineRule;

/// A durable rule paired with its compiled predicate.
///
/// The full list is recompiled and swapped atomically on every rule add or
/// delete, so evaluations always see a complete rule set.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule: QuarantineRule,
    pub predicate: CompiledExpression,
}

impl CompiledRule {
    pub fn compile(rule: QuarantineRule) -> Result<Self, ExpressionError> {
        let predicate = compile(&rule.expression)?;
        Ok(Self { rule, predicate })
    }
}
