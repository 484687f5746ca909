//! Gate decision engine.
//!
//! Scores every enabled gate/validation rule of a gate, aggregates a weighted score and
//! maps it to a [`Decision`] using the gate's threshold and allowed decision options.

use chrono::Utc;
use serde_json::{Map, Value, json};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::GateDefaults;
use crate::error::{FlowgateError, Result};
use crate::models::{
    AuditEventType, Decision, GateDecision, GateEvaluation, GateNodeConfig, Node, Rule, RuleResult,
    RuleStatus, RuleType,
};
use crate::rules::actions::apply_action;
use crate::rules::expression::{CheckTrace, Expression, context_snapshot, string_form};
use crate::storage::FlowStore;

/// Score of a passing rule.
const FULL_SCORE: f64 = 100.0;

/// Gate settings after applying defaults to a node's config.
#[derive(Debug, Clone, PartialEq)]
pub struct GateSettings {
    /// Human gates never decide on their own.
    pub human: bool,
    /// Score needed for a pass-class decision.
    pub pass_threshold: f64,
    /// Fraction of the threshold separating marginal from insufficient.
    pub marginal_ratio: f64,
    /// Decisions the gate may emit.
    pub decision_options: Vec<Decision>,
}

impl GateSettings {
    /// Merges a gate node's config over `defaults`.
    pub fn resolve(config: &GateNodeConfig, defaults: &GateDefaults) -> Self {
        let gate_type = config.gate_type.as_deref().unwrap_or(&defaults.gate_type);
        Self {
            human: gate_type.eq_ignore_ascii_case("human"),
            pass_threshold: config.pass_threshold.unwrap_or(defaults.pass_threshold),
            marginal_ratio: defaults.marginal_ratio,
            decision_options: config
                .decision_options
                .clone()
                .filter(|options| !options.is_empty())
                .unwrap_or_else(|| defaults.decision_options.clone()),
        }
    }

    /// GO when allowed, else the first allowed pass-class option, else PASS.
    pub fn pass_decision(&self) -> Decision {
        if self.decision_options.contains(&Decision::Go) {
            return Decision::Go;
        }
        self.decision_options.iter().copied().find(|d| d.is_pass()).unwrap_or(Decision::Pass)
    }

    /// RECYCLE when allowed, else HOLD.
    pub fn recycle_decision(&self) -> Decision {
        if self.decision_options.contains(&Decision::Recycle) { Decision::Recycle } else { Decision::Hold }
    }

    /// KILL when allowed, else REJECT. Used for the insufficient-score band only.
    pub fn kill_decision(&self) -> Decision {
        if self.decision_options.contains(&Decision::Kill) { Decision::Kill } else { Decision::Reject }
    }
}

/// Evaluates rules and gates.
#[derive(Debug, Clone, Default)]
pub struct GateEngine {
    defaults: GateDefaults,
}

impl GateEngine {
    /// Creates an engine using `defaults` for settings a gate leaves out.
    pub fn new(defaults: GateDefaults) -> Self {
        Self { defaults }
    }

    /// Gate defaults in effect.
    pub fn defaults(&self) -> &GateDefaults {
        &self.defaults
    }

    /// Evaluates one rule. Structural problems become an `error` result, never a panic or `Err`.
    pub fn evaluate_rule(&self, rule: &Rule, context: &Value) -> RuleResult {
        let weight = rule.metadata.weight.unwrap_or(self.defaults.default_rule_weight);

        let (status, score, reason, context_snapshot) = match Expression::parse(&rule.condition) {
            Ok(expression) => {
                let evaluation = expression.evaluate(context);
                let snapshot = context_snapshot(&expression, context);
                if evaluation.result {
                    (RuleStatus::Pass, FULL_SCORE, format!("Rule '{}' passed: all conditions met", rule.name), snapshot)
                } else {
                    let failed: Vec<String> = evaluation.failed_checks().map(describe_check).collect();
                    let reason = if failed.is_empty() {
                        format!("Rule '{}' failed", rule.name)
                    } else {
                        format!("Rule '{}' failed: {}", rule.name, failed.join("; "))
                    };
                    (RuleStatus::Fail, 0.0, reason, snapshot)
                }
            }
            Err(e) => (RuleStatus::Error, 0.0, format!("Rule evaluation error: {}", e), Map::new()),
        };

        debug!(rule_id = %rule.id, rule = %rule.name, status = %status, "Evaluated rule");
        RuleResult {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            status,
            score,
            weight,
            reason,
            context_snapshot,
        }
    }

    /// Scores `rules` against `context` and picks a decision. Pure; nothing is recorded.
    ///
    /// `rules` are expected in evaluation order (descending priority).
    pub fn decide(&self, gate: &Node, settings: &GateSettings, rules: &[Rule], context: &Value) -> GateDecision {
        if rules.is_empty() {
            if settings.human {
                return outcome(gate, Decision::PendingHumanReview, FULL_SCORE, Vec::new(), "Human review required", Vec::new());
            }
            return GateDecision {
                passed: true,
                ..outcome(
                    gate,
                    settings.pass_decision(),
                    FULL_SCORE,
                    Vec::new(),
                    "No rules configured, automatic pass",
                    Vec::new(),
                )
            };
        }

        let mut results = Vec::with_capacity(rules.len());
        let mut critical_failures: Vec<&str> = Vec::new();
        let mut recommendations = Vec::new();
        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;

        for (idx, rule) in rules.iter().enumerate() {
            let result = self.evaluate_rule(rule, context);
            weighted_sum += result.weight * result.score;
            total_weight += result.weight;

            if result.status == RuleStatus::Fail && rule.metadata.auto_kill_if_fail {
                let recommendations = vec![format!("Fix: {}", result.reason)];
                results.push(result);
                results.extend(rules[idx + 1..].iter().map(|skipped| self.skipped(skipped)));

                let reason = format!("Critical failure: {}", rule.name);
                return outcome(gate, Decision::Kill, 0.0, results, &reason, recommendations);
            }

            let errored = result.status == RuleStatus::Error;
            if !result.passed() {
                if rule.metadata.critical || errored {
                    critical_failures.push(&rule.name);
                }
                if rule.metadata.requires_human_if_fail || errored {
                    recommendations.push(format!("Human review required for: {}", rule.name));
                }
            }
            results.push(result);
        }

        let score = if total_weight > 0.0 {
            weighted_sum / total_weight
        } else if results.iter().all(RuleResult::passed) {
            FULL_SCORE
        } else {
            0.0
        };

        if settings.human {
            return outcome(gate, Decision::PendingHumanReview, score, results, "Human review required", recommendations);
        }

        if !critical_failures.is_empty() {
            let reason = format!("Critical failures: {}", critical_failures.join(", "));
            return outcome(gate, settings.recycle_decision(), score, results, &reason, recommendations);
        }

        let threshold = settings.pass_threshold;
        let marginal = threshold * settings.marginal_ratio;
        if score >= threshold {
            let reason = if results.iter().all(RuleResult::passed) {
                format!("All checks passed (score: {:.1})", score)
            } else {
                format!("Score meets threshold ({:.1} >= {:.1})", score, threshold)
            };
            return GateDecision {
                passed: true,
                ..outcome(gate, settings.pass_decision(), score, results, &reason, recommendations)
            };
        }

        if score >= marginal {
            if recommendations.is_empty() {
                let reason = format!("Score below threshold ({:.1} < {:.1})", score, threshold);
                return outcome(gate, settings.recycle_decision(), score, results, &reason, recommendations);
            }
            let reason = format!("Marginal score ({:.1}), human review recommended", score);
            return outcome(gate, Decision::PendingHumanReview, score, results, &reason, recommendations);
        }

        let reason = format!("Insufficient score ({:.1} < {:.1})", score, marginal);
        outcome(gate, settings.kill_decision(), score, results, &reason, recommendations)
    }

    /// Evaluates a gate node and records the outcome.
    ///
    /// Writes one gate evaluation per rule and a `gate_evaluation` audit entry before
    /// returning, on every decision path.
    ///
    /// # Errors
    /// * `FlowgateError::InvalidNodeConfig` - If the gate's config cannot be read
    /// * `FlowgateError::Storage` - If rules cannot be loaded or records written
    pub fn evaluate_gate(
        &self,
        store: &dyn FlowStore,
        gate: &Node,
        context: &Value,
        execution_id: &str,
    ) -> Result<GateDecision> {
        let config = GateNodeConfig::from_node(gate)
            .map_err(|e| FlowgateError::InvalidNodeConfig { node: gate.name.clone(), reason: e.to_string() })?;
        let settings = GateSettings::resolve(&config, &self.defaults);

        let rules: Vec<Rule> = store
            .get_rules_for_node(&gate.id)?
            .into_iter()
            .filter(|rule| matches!(rule.rule_type, RuleType::Gate | RuleType::Validation))
            .collect();

        let decision = self.decide(gate, &settings, &rules, context);

        let evaluated_at = Utc::now();
        let evaluations: Vec<GateEvaluation> = decision
            .rule_results
            .iter()
            .map(|result| GateEvaluation {
                id: Uuid::new_v4().to_string(),
                execution_id: execution_id.to_string(),
                gate_node_id: gate.id.clone(),
                rule_id: result.rule_id.clone(),
                status: result.status,
                decision: decision.decision,
                score: result.score,
                reason: result.reason.clone(),
                context_snapshot: Value::Object(result.context_snapshot.clone()),
                evaluated_at,
            })
            .collect();
        store.append_gate_evaluations(&evaluations)?;

        let rules_passed = decision.rule_results.iter().filter(|r| r.passed()).count();
        store.append_audit(
            Some(execution_id),
            Some(&gate.id),
            AuditEventType::GateEvaluation,
            &json!({
                "gate_id": gate.id,
                "gate_name": gate.name,
                "decision": decision.decision,
                "score": decision.overall_score,
                "passed": decision.passed,
                "reason": decision.reason,
                "rules_evaluated": decision.rule_results.len(),
                "rules_passed": rules_passed,
                "recommendations": decision.recommendations,
            }),
        )?;

        info!(
            execution_id = %execution_id,
            gate = %gate.name,
            decision = %decision.decision,
            score = decision.overall_score,
            "Gate evaluated"
        );
        Ok(decision)
    }

    /// First rule, in the given order, whose condition holds.
    pub fn first_match<'a>(&self, rules: &'a [Rule], context: &Value) -> Option<(&'a Rule, RuleResult)> {
        rules.iter().find_map(|rule| {
            let result = self.evaluate_rule(rule, context);
            result.passed().then_some((rule, result))
        })
    }

    /// Applies the action of every transformation rule whose condition holds, in order.
    ///
    /// Returns the names of the rules that fired.
    ///
    /// # Errors
    /// * `FlowgateError::Expression` - If a firing rule carries an unsupported action
    pub fn apply_transformations(&self, rules: &[Rule], context: &mut Value) -> Result<Vec<String>> {
        let mut fired = Vec::new();
        for rule in rules.iter().filter(|rule| rule.rule_type == RuleType::Transformation) {
            let Some(action) = &rule.action else {
                continue;
            };
            if self.evaluate_rule(rule, context).passed() {
                apply_action(action, context)?;
                fired.push(rule.name.clone());
            }
        }
        Ok(fired)
    }

    fn skipped(&self, rule: &Rule) -> RuleResult {
        RuleResult {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            status: RuleStatus::Skipped,
            score: 0.0,
            weight: rule.metadata.weight.unwrap_or(self.defaults.default_rule_weight),
            reason: format!("Rule '{}' skipped after critical failure", rule.name),
            context_snapshot: Map::new(),
        }
    }
}

fn outcome(
    gate: &Node,
    decision: Decision,
    overall_score: f64,
    rule_results: Vec<RuleResult>,
    reason: &str,
    recommendations: Vec<String>,
) -> GateDecision {
    GateDecision {
        gate_node_id: gate.id.clone(),
        decision,
        overall_score,
        passed: false,
        rule_results,
        reason: reason.to_string(),
        recommendations,
    }
}

fn describe_check(check: &CheckTrace) -> String {
    let actual = check.actual.as_ref().map_or_else(|| "nothing".to_string(), string_form);
    match check.operator.as_str() {
        "IS NULL" | "IS NOT NULL" => format!("{}: expected {}, got {}", check.field, check.operator, actual),
        operator => format!("{}: expected {} {}, got {}", check.field, operator, string_form(&check.expected), actual),
    }
}
