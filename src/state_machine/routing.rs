//! Turn routing
//!
//! Maps (sender, message text) to the next floor holder. Rules are evaluated
//! in declaration order per sender and the first match wins; when none
//! matches, the sender's declared default applies. Routing never fails.

use super::phrases::SafetyPhrases;
use super::state::Role;
use crate::error::RelayError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Literal test against message text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "phrase", rename_all = "snake_case")]
pub enum Predicate {
    Always,
    StartsWith(String),
    Contains(String),
}

impl Predicate {
    #[must_use]
    pub fn matches(&self, text: &str) -> bool {
        match self {
            Predicate::Always => true,
            Predicate::StartsWith(phrase) => text.starts_with(phrase.as_str()),
            Predicate::Contains(phrase) => text.contains(phrase.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub sender: Role,
    pub predicate: Predicate,
    pub recipient: Role,
}

impl RoutingRule {
    #[must_use]
    pub fn new(sender: &Role, predicate: Predicate, recipient: &Role) -> Self {
        Self {
            sender: sender.clone(),
            predicate,
            recipient: recipient.clone(),
        }
    }
}

/// Validated routing table: every role has a default recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTable {
    roles: Vec<Role>,
    rules: Vec<RoutingRule>,
    defaults: BTreeMap<Role, Role>,
}

impl RoutingTable {
    /// `roles[0]` is the primary participant, `roles[1]` the secondary.
    ///
    /// # Errors
    ///
    /// Rejects fewer than two roles, duplicates, a role without a default
    /// recipient, and rules or defaults naming unknown roles.
    pub fn new(
        roles: Vec<Role>,
        rules: Vec<RoutingRule>,
        defaults: BTreeMap<Role, Role>,
    ) -> Result<Self, RelayError> {
        if roles.len() < 2 {
            return Err(RelayError::setup(
                "a relay needs at least two participant roles",
            ));
        }
        for (i, role) in roles.iter().enumerate() {
            if roles[..i].contains(role) {
                return Err(RelayError::setup(format!("duplicate role: {role}")));
            }
            match defaults.get(role) {
                Some(recipient) if roles.contains(recipient) => {}
                Some(recipient) => {
                    return Err(RelayError::setup(format!(
                        "default recipient {recipient} of {role} is not a participant"
                    )))
                }
                None => {
                    return Err(RelayError::setup(format!(
                        "role {role} has no default recipient"
                    )))
                }
            }
        }
        if let Some(rule) = rules
            .iter()
            .find(|r| !roles.contains(&r.sender) || !roles.contains(&r.recipient))
        {
            return Err(RelayError::setup(format!(
                "rule {} -> {} references an unknown role",
                rule.sender, rule.recipient
            )));
        }
        Ok(Self {
            roles,
            rules,
            defaults,
        })
    }

    #[must_use]
    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    #[must_use]
    pub fn primary(&self) -> &Role {
        &self.roles[0]
    }

    #[must_use]
    pub fn secondary(&self) -> &Role {
        &self.roles[1]
    }

    #[must_use]
    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }
}

/// Built-in participant layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    /// Two peers, strict alternation A -> B -> A
    #[default]
    Pair,
    /// Planner / Coder / QA supervised relay
    Triad,
}

impl Topology {
    #[must_use]
    pub fn roles(self) -> Vec<Role> {
        match self {
            Topology::Pair => vec![Role::new("A"), Role::new("B")],
            Topology::Triad => vec![Role::new("Planner"), Role::new("Coder"), Role::new("QA")],
        }
    }

    /// Routing table of this topology
    ///
    /// # Errors
    ///
    /// Only if the built-in table fails validation.
    pub fn table(self, phrases: &SafetyPhrases) -> Result<RoutingTable, RelayError> {
        let roles = self.roles();
        let (rules, defaults) = match self {
            Topology::Pair => {
                let (a, b) = (&roles[0], &roles[1]);
                let rules = vec![
                    RoutingRule::new(a, Predicate::Always, b),
                    RoutingRule::new(b, Predicate::Always, a),
                ];
                let defaults = BTreeMap::from([(a.clone(), b.clone()), (b.clone(), a.clone())]);
                (rules, defaults)
            }
            Topology::Triad => {
                let (planner, coder, qa) = (&roles[0], &roles[1], &roles[2]);
                let accept = || Predicate::StartsWith(phrases.accept.clone());
                let rules = vec![
                    // Plans and chatter alike go to the executor
                    RoutingRule::new(
                        planner,
                        Predicate::StartsWith(phrases.plan_created.clone()),
                        coder,
                    ),
                    RoutingRule::new(planner, Predicate::Always, coder),
                    // Forwarded approval closes the subtask upward
                    RoutingRule::new(coder, accept(), planner),
                    RoutingRule::new(coder, Predicate::Always, qa),
                    RoutingRule::new(qa, accept(), coder),
                    RoutingRule::new(qa, Predicate::StartsWith(phrases.reject.clone()), coder),
                ];
                let defaults = BTreeMap::from([
                    (planner.clone(), coder.clone()),
                    (coder.clone(), qa.clone()),
                    (qa.clone(), coder.clone()),
                ]);
                (rules, defaults)
            }
        };
        RoutingTable::new(roles, rules, defaults)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Topology::Pair => "pair",
            Topology::Triad => "triad",
        }
    }
}

impl FromStr for Topology {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pair" | "two-party" | "2" => Ok(Topology::Pair),
            "triad" | "three-party" | "3" => Ok(Topology::Triad),
            other => Err(format!("unknown topology: {other}")),
        }
    }
}

/// Why a recipient was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RouteBasis {
    /// Matched the rule at this index of the table
    Rule { index: usize },
    /// Nothing matched; the sender's declared default applied
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    Deliver { recipient: Role, basis: RouteBasis },
    /// Termination phrase seen; no further hops
    Terminal,
}

impl RouteDecision {
    #[must_use]
    pub fn is_ambiguous(&self) -> bool {
        matches!(
            self,
            RouteDecision::Deliver {
                basis: RouteBasis::Default,
                ..
            }
        )
    }
}

/// Pure routing function over a validated table
#[derive(Debug, Clone)]
pub struct TurnRouter {
    table: RoutingTable,
    phrases: SafetyPhrases,
}

impl TurnRouter {
    #[must_use]
    pub fn new(table: RoutingTable, phrases: SafetyPhrases) -> Self {
        Self { table, phrases }
    }

    /// # Errors
    ///
    /// See [`Topology::table`].
    pub fn for_topology(topology: Topology, phrases: SafetyPhrases) -> Result<Self, RelayError> {
        Ok(Self::new(topology.table(&phrases)?, phrases))
    }

    #[must_use]
    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    #[must_use]
    pub fn phrases(&self) -> &SafetyPhrases {
        &self.phrases
    }

    /// Decide the next holder. The termination check outranks every rule.
    #[must_use]
    pub fn route(&self, sender: &Role, text: &str) -> RouteDecision {
        if self.phrases.is_termination(text) {
            return RouteDecision::Terminal;
        }

        let matched = self
            .table
            .rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| &rule.sender == sender)
            .find(|(_, rule)| rule.predicate.matches(text));

        if let Some((index, rule)) = matched {
            return RouteDecision::Deliver {
                recipient: rule.recipient.clone(),
                basis: RouteBasis::Rule { index },
            };
        }

        // Unknown senders cannot come from a validated relay, but routing
        // stays total: fall back to the primary.
        let recipient = self
            .table
            .defaults
            .get(sender)
            .unwrap_or_else(|| self.table.primary())
            .clone();
        RouteDecision::Deliver {
            recipient,
            basis: RouteBasis::Default,
        }
    }
}
