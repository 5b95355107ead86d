//! Playbook templates: a validated graph of steps.
//!
//! Templates are validated once at save time; the routing engine only follows
//! edges at run time and never re-checks or mutates topology. Steps live in
//! an arena keyed by id, with transitions as label → target edges.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, WardenError};
use crate::store::store_err;
use crate::types::ExecutorKind;

/// Key: template uuid (16 bytes). Value: JSON-encoded PlaybookTemplate.
const TEMPLATES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("templates");

// ---------------------------------------------------------------------------
// Conditions (Check / Branch predicates)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CondOp {
    Eq,
    Ne,
    Exists,
    Gt,
    Lt,
}

/// A pure predicate over run variables. No I/O, so step evaluation is
/// deterministic given the run state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub var: String,
    pub op: CondOp,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl Condition {
    pub fn eval(&self, variables: &serde_json::Map<String, serde_json::Value>) -> bool {
        let current = variables.get(&self.var);
        match self.op {
            CondOp::Exists => current.is_some(),
            CondOp::Eq => current == Some(&self.value),
            CondOp::Ne => current != Some(&self.value),
            CondOp::Gt => match (current.and_then(|v| v.as_f64()), self.value.as_f64()) {
                (Some(a), Some(b)) => a > b,
                _ => false,
            },
            CondOp::Lt => match (current.and_then(|v| v.as_f64()), self.value.as_f64()) {
                (Some(a), Some(b)) => a < b,
                _ => false,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchCase {
    pub label: String,
    pub condition: Condition,
}

/// Step behavior. Each kind produces a fixed set of outcome labels, and
/// validation requires the step's transitions to cover exactly that set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    /// Dispatch through the execution adapter. Labels: success, failure.
    Action {
        kind: ExecutorKind,
        payload: serde_json::Value,
    },
    /// Evaluate a predicate over run variables. Labels: true, false.
    Check { condition: Condition },
    /// Multi-way predicate. Labels: each case label, plus default.
    Branch { cases: Vec<BranchCase> },
    /// Suspend until an external resume event. Label: resumed.
    Wait,
}

impl StepKind {
    /// The outcome labels this step can produce.
    pub fn expected_labels(&self) -> Vec<String> {
        match self {
            StepKind::Action { .. } => vec!["success".into(), "failure".into()],
            StepKind::Check { .. } => vec!["true".into(), "false".into()],
            StepKind::Branch { cases } => {
                let mut labels: Vec<String> = cases.iter().map(|c| c.label.clone()).collect();
                labels.push("default".into());
                labels
            }
            StepKind::Wait => vec!["resumed".into()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepTarget {
    Step { id: String },
    Terminal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybookStep {
    pub id: String,
    #[serde(flatten)]
    pub kind: StepKind,
    /// Outcome label → where to go next.
    pub transitions: BTreeMap<String, StepTarget>,
    /// Required on loop headers: the run fails once a step is entered more
    /// than this many times.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
}

// ---------------------------------------------------------------------------
// PlaybookTemplate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybookTemplate {
    pub id: Uuid,
    pub name: String,
    pub entry: String,
    pub steps: BTreeMap<String, PlaybookStep>,
    pub created_at: DateTime<Utc>,
}

impl PlaybookTemplate {
    pub fn new(name: impl Into<String>, entry: impl Into<String>, steps: Vec<PlaybookStep>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            entry: entry.into(),
            steps: steps.into_iter().map(|s| (s.id.clone(), s)).collect(),
            created_at: Utc::now(),
        }
    }

    pub fn step(&self, id: &str) -> Result<&PlaybookStep> {
        self.steps.get(id).ok_or_else(|| WardenError::InvalidTemplate {
            template: self.name.clone(),
            reason: format!("unknown step: {id}"),
        })
    }

    /// Full structural validation, run at save time.
    ///
    /// Accepts a template iff:
    /// - the entry step exists;
    /// - every step's transitions cover exactly its possible outcome labels;
    /// - every transition target exists;
    /// - every step is reachable from the entry;
    /// - every cycle passes through a step with a `max_iterations` guard.
    pub fn validate(&self) -> Result<()> {
        let fail = |reason: String| {
            Err(WardenError::InvalidTemplate {
                template: self.name.clone(),
                reason,
            })
        };

        if self.steps.is_empty() {
            return fail("template has no steps".into());
        }
        if !self.steps.contains_key(&self.entry) {
            return fail(format!("entry step '{}' does not exist", self.entry));
        }

        for step in self.steps.values() {
            let expected: HashSet<String> = step.kind.expected_labels().into_iter().collect();
            let actual: HashSet<String> = step.transitions.keys().cloned().collect();
            for label in expected.difference(&actual) {
                return fail(format!("step '{}' is missing a transition for '{label}'", step.id));
            }
            for label in actual.difference(&expected) {
                return fail(format!("step '{}' has a transition for impossible label '{label}'", step.id));
            }
            for target in step.transitions.values() {
                if let StepTarget::Step { id } = target {
                    if !self.steps.contains_key(id) {
                        return fail(format!("step '{}' points at unknown step '{id}'", step.id));
                    }
                }
            }
        }

        // Reachability + cycle check in one DFS. A back edge closes a cycle;
        // its target (the loop header) must carry a max_iterations guard.
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Grey,
            Black,
        }
        let mut colors: BTreeMap<&str, Color> =
            self.steps.keys().map(|k| (k.as_str(), Color::White)).collect();

        // Iterative DFS with an explicit enter/exit stack.
        enum Frame<'a> {
            Enter(&'a str),
            Exit(&'a str),
        }
        let mut stack = vec![Frame::Enter(self.entry.as_str())];
        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Enter(id) => {
                    if colors[id] != Color::White {
                        continue;
                    }
                    colors.insert(id, Color::Grey);
                    stack.push(Frame::Exit(id));
                    let step = &self.steps[id];
                    for target in step.transitions.values() {
                        if let StepTarget::Step { id: next } = target {
                            match colors[next.as_str()] {
                                Color::White => stack.push(Frame::Enter(next)),
                                Color::Grey => {
                                    // Cycle closing at `next`.
                                    if self.steps[next].max_iterations.is_none() {
                                        return fail(format!(
                                            "cycle through step '{next}' has no max_iterations guard"
                                        ));
                                    }
                                }
                                Color::Black => {}
                            }
                        }
                    }
                }
                Frame::Exit(id) => {
                    colors.insert(id, Color::Black);
                }
            }
        }

        for (id, color) in &colors {
            if *color != Color::Black {
                return fail(format!("step '{id}' is unreachable from the entry step"));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TemplateStore
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct TemplateStore {
    db: Arc<Database>,
}

impl TemplateStore {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let wt = db.begin_write().map_err(store_err)?;
        wt.open_table(TEMPLATES).map_err(store_err)?;
        wt.commit().map_err(store_err)?;
        Ok(Self { db })
    }

    /// Validate and persist. Invalid templates never reach the store, so the
    /// routing engine can trust every template it loads.
    pub fn save(&self, template: &PlaybookTemplate) -> Result<()> {
        template.validate()?;
        let value = serde_json::to_vec(template)?;
        let wt = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = wt.open_table(TEMPLATES).map_err(store_err)?;
            table
                .insert(template.id.as_bytes().as_slice(), value.as_slice())
                .map_err(store_err)?;
        }
        wt.commit().map_err(store_err)?;
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Result<PlaybookTemplate> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(TEMPLATES).map_err(store_err)?;
        let guard = table
            .get(id.as_bytes().as_slice())
            .map_err(store_err)?
            .ok_or_else(|| WardenError::TemplateNotFound(id.to_string()))?;
        Ok(serde_json::from_slice(guard.value())?)
    }

    pub fn list(&self) -> Result<Vec<PlaybookTemplate>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(TEMPLATES).map_err(store_err)?;
        let mut result = Vec::new();
        for entry in table.iter().map_err(store_err)? {
            let (_, v) = entry.map_err(store_err)?;
            result.push(serde_json::from_slice::<PlaybookTemplate>(v.value())?);
        }
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
