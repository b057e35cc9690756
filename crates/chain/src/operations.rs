//! Declarative registry of remote operations.
//!
//! Deployed contracts of the same economic model drift in naming across
//! forks (`buyCorn` / `buyEggs` / `bakePizza`, ...). Each canonical
//! operation therefore maps to an ordered list of candidate signatures,
//! most-current-first, which the facade tries in order.
//!
//! The declared order is authoritative: which deployed variant is live is
//! unknown until runtime, so lists are never re-sorted.
//!
//! # Argument binding
//!
//! An operation declares its canonical parameters by role (see [`ArgRole`]).
//! A candidate with `n` inputs binds the first `n` canonical parameters, so
//! `getMyEggs()` and `getMyEggs(address)` can serve the same operation.
//!
//! # Composite candidates
//!
//! A candidate written as `a(address)+b(address)` dispatches every component
//! and sums the results (reads with a `uint` output only).

use alloy::dyn_abi::DynSolValue;
use alloy::json_abi::Function;
use alloy::primitives::{Address, U256};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Canonical operation names used by the client.
pub mod canonical {
    /// Whether the contract has been opened (bool)
    pub const INITIALIZED: &str = "initialized";
    /// Market-wide yield supply (uint)
    pub const MARKET_SUPPLY: &str = "marketSupply";
    /// Producing units owned by an account (uint)
    pub const UNIT_COUNT: &str = "unitCount";
    /// Accrued yield of an account (uint)
    pub const YIELD_UNITS: &str = "yieldUnits";
    /// Native value of an amount of yield (uint)
    pub const YIELD_VALUE: &str = "yieldValue";
    /// Buy units with native value (payable)
    pub const ACQUIRE: &str = "acquire";
    /// Convert accrued yield into units
    pub const COMPOUND: &str = "compound";
    /// Convert accrued yield into native value
    pub const LIQUIDATE: &str = "liquidate";
}

/// How an operation touches the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// `view` call, no transaction
    Read,
    /// Non-payable transaction
    Write,
    /// Transaction carrying native value
    Payable,
}

impl OperationKind {
    /// Whether this operation submits a transaction.
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Write | Self::Payable)
    }
}

/// Type of value a read operation yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// uint256
    Uint,
    /// bool
    Bool,
    /// address
    Address,
    /// No return value (writes)
    None,
}

impl ValueKind {
    fn solidity_type(&self) -> Option<&'static str> {
        match self {
            Self::Uint => Some("uint256"),
            Self::Bool => Some("bool"),
            Self::Address => Some("address"),
            Self::None => None,
        }
    }
}

/// Role of a canonical parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgRole {
    /// The connected account
    Account,
    /// Referral address (defaults to the account)
    Referrer,
    /// An amount of yield units
    Units,
}

/// Values for canonical parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallArgs {
    pub account: Option<Address>,
    pub referrer: Option<Address>,
    pub units: Option<U256>,
}

impl CallArgs {
    /// No arguments.
    pub fn none() -> Self {
        Self::default()
    }

    /// Arguments for per-account reads.
    pub fn account(account: Address) -> Self {
        Self {
            account: Some(account),
            ..Self::default()
        }
    }

    /// Arguments for referral-carrying writes.
    pub fn referrer(referrer: Address) -> Self {
        Self {
            referrer: Some(referrer),
            ..Self::default()
        }
    }

    /// Arguments for unit-valued reads.
    pub fn units(units: U256) -> Self {
        Self {
            units: Some(units),
            ..Self::default()
        }
    }

    /// Resolve a role to an ABI value.
    pub fn value_for(&self, role: ArgRole) -> Option<DynSolValue> {
        match role {
            ArgRole::Account => self.account.map(DynSolValue::Address),
            ArgRole::Referrer => self.referrer.map(DynSolValue::Address),
            ArgRole::Units => self.units.map(|u| DynSolValue::Uint(u, 256)),
        }
    }
}

/// One candidate remote signature (or a sum of several).
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Declared text, e.g. `getMyCorns(address)`
    label: String,
    /// Parsed functions; more than one means "sum the results"
    calls: SmallVec<[Function; 2]>,
}

impl Candidate {
    /// Parse a candidate declaration for an operation of the given shape.
    pub fn parse(declaration: &str, kind: OperationKind, output: ValueKind) -> Result<Self> {
        let declaration = declaration.trim();
        let mut calls = SmallVec::new();

        for part in declaration.split('+') {
            let part = part.trim();
            if part.is_empty() {
                bail!("Empty signature in candidate '{}'", declaration);
            }
            let text = match (kind, output.solidity_type()) {
                (OperationKind::Read, Some(ty)) => format!("function {part} view returns ({ty})"),
                (OperationKind::Read, None) => bail!("Read candidate '{}' needs an output type", part),
                (OperationKind::Write, _) => format!("function {part}"),
                (OperationKind::Payable, _) => format!("function {part} payable"),
            };
            let function = Function::parse(&text)
                .with_context(|| format!("Invalid candidate signature '{}'", part))?;
            calls.push(function);
        }

        if calls.len() > 1 && (kind.is_write() || output != ValueKind::Uint) {
            bail!(
                "Composite candidate '{}' is only allowed for uint reads",
                declaration
            );
        }

        Ok(Self {
            label: declaration.to_string(),
            calls,
        })
    }

    /// Declared text.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Component functions, in dispatch order.
    pub fn calls(&self) -> &[Function] {
        &self.calls
    }

    /// Whether results of several functions are summed.
    pub fn is_composite(&self) -> bool {
        self.calls.len() > 1
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// A canonical operation with its prioritized candidates.
#[derive(Debug, Clone)]
pub struct RemoteOperation {
    /// Stable UI-level name
    pub canonical: String,
    /// Read / Write / Payable
    pub kind: OperationKind,
    /// Output type (reads)
    pub output: ValueKind,
    /// Canonical parameters, bound positionally
    pub params: Vec<ArgRole>,
    /// Candidates, most-current-first. Never empty.
    pub candidates: Vec<Candidate>,
}

impl RemoteOperation {
    /// Build an operation from candidate declarations.
    pub fn new(
        canonical: impl Into<String>,
        kind: OperationKind,
        output: ValueKind,
        params: Vec<ArgRole>,
        declarations: &[&str],
    ) -> Result<Self> {
        let canonical = canonical.into();
        if declarations.is_empty() {
            bail!("Operation '{}' has no candidate signatures", canonical);
        }
        let candidates = declarations
            .iter()
            .map(|d| Candidate::parse(d, kind, output))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("Operation '{}'", canonical))?;

        Ok(Self {
            canonical,
            kind,
            output,
            params,
            candidates,
        })
    }

    /// Encode the input values a function takes from the canonical args.
    /// `None` if the function wants more parameters than the operation
    /// declares or a value is missing.
    pub fn bind_args(&self, function: &Function, args: &CallArgs) -> Option<Vec<DynSolValue>> {
        let arity = function.inputs.len();
        if arity > self.params.len() {
            return None;
        }
        self.params[..arity]
            .iter()
            .map(|role| args.value_for(*role))
            .collect()
    }
}

/// Raw operation declaration as found in TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationSpec {
    /// Canonical name
    pub name: String,
    /// Operation kind
    pub kind: OperationKind,
    /// Output type (reads only)
    #[serde(default = "default_output")]
    pub output: ValueKind,
    /// Canonical parameters
    #[serde(default)]
    pub params: Vec<ArgRole>,
    /// Candidate signatures, most-current-first
    pub candidates: Vec<String>,
}

fn default_output() -> ValueKind {
    ValueKind::None
}

#[derive(Debug, Deserialize)]
struct OperationsFile {
    #[serde(default)]
    operations: Vec<OperationSpec>,
}

impl OperationSpec {
    fn compile(&self) -> Result<RemoteOperation> {
        let declarations: Vec<&str> = self.candidates.iter().map(String::as_str).collect();
        RemoteOperation::new(
            self.name.clone(),
            self.kind,
            self.output,
            self.params.clone(),
            &declarations,
        )
    }
}

/// Statically loaded set of operations, keyed by canonical name.
#[derive(Debug, Clone)]
pub struct OperationRegistry {
    operations: HashMap<String, Arc<RemoteOperation>>,
}

impl OperationRegistry {
    /// Built-in registry covering the known fork family.
    pub fn builtin() -> Self {
        use ArgRole::*;
        use OperationKind::*;

        let table: [(&str, OperationKind, ValueKind, Vec<ArgRole>, &[&str]); 8] = [
            (canonical::INITIALIZED, Read, ValueKind::Bool, vec![], &["initialized()"]),
            (
                canonical::MARKET_SUPPLY,
                Read,
                ValueKind::Uint,
                vec![],
                &["marketCorns()", "marketEggs()", "pizzaRewards()"],
            ),
            (
                canonical::UNIT_COUNT,
                Read,
                ValueKind::Uint,
                vec![Account],
                &[
                    "getMyHarvesters(address)",
                    "hatcheryHarvesters(address)",
                    "getMyMiners(address)",
                    "getChefs(address)",
                    "hatcheryMiners(address)",
                ],
            ),
            (
                canonical::YIELD_UNITS,
                Read,
                ValueKind::Uint,
                vec![Account],
                &[
                    "getMyCorns(address)",
                    "claimedCorns(address)+getCornsSinceLastHatch(address)",
                    "getMyEggs(address)",
                    "getMyEggs()",
                ],
            ),
            (
                canonical::YIELD_VALUE,
                Read,
                ValueKind::Uint,
                vec![Units],
                &["calculateCornSell(uint256)", "calculateEggSell(uint256)"],
            ),
            (
                canonical::ACQUIRE,
                Payable,
                ValueKind::None,
                vec![Referrer],
                &["buyCorn(address)", "buyEggs(address)", "bakePizza(address)"],
            ),
            (
                canonical::COMPOUND,
                Write,
                ValueKind::None,
                vec![Referrer],
                &[
                    "popCorn(address)",
                    "hatchEggs(address)",
                    "rebakePizza(address)",
                    "rebakePizza()",
                ],
            ),
            (
                canonical::LIQUIDATE,
                Write,
                ValueKind::None,
                vec![],
                &["sellCorn()", "sellEggs()", "eatPizza()", "sellPizza()"],
            ),
        ];

        let mut operations = HashMap::with_capacity(table.len());
        for (name, kind, output, params, declarations) in table {
            // Built-in declarations are static and covered by tests.
            let op = RemoteOperation::new(name, kind, output, params, declarations)
                .expect("built-in operation table is valid");
            operations.insert(name.to_string(), Arc::new(op));
        }

        Self { operations }
    }

    /// Parse operations from TOML (`[[operations]]` tables).
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: OperationsFile = toml::from_str(content).context("Failed to parse operations")?;
        let mut operations = HashMap::with_capacity(file.operations.len());
        for spec in &file.operations {
            let op = spec.compile()?;
            if operations.insert(op.canonical.clone(), Arc::new(op)).is_some() {
                bail!("Operation '{}' declared twice", spec.name);
            }
        }
        Ok(Self { operations })
    }

    /// Load operations from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read operations file {:?}", path))?;
        Self::from_toml_str(&content)
    }

    /// Built-in registry with operations from `overrides` replacing the
    /// built-in entries of the same name.
    pub fn with_overrides(mut self, overrides: OperationRegistry) -> Self {
        self.operations.extend(overrides.operations);
        self
    }

    /// Look up an operation.
    pub fn get(&self, canonical: &str) -> Option<Arc<RemoteOperation>> {
        self.operations.get(canonical).cloned()
    }

    /// Number of operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
