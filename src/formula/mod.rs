//! Formula engine: resolves `${kind:id}` references against the store,
//! evaluates the parsed AST, rejects dependency cycles, and maintains the
//! change-gated monitor value cache.

pub mod parser;

pub use parser::{classify, ParseError};

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::errors::{CoreError, CoreResult};
use crate::models::MonitorValue;
use crate::store::Store;

/// Two consecutive cached values must differ by more than this to produce a
/// new row.
pub const VALUE_EPSILON: f64 = 1e-10;

pub struct FormulaEngine {
    store: Arc<Store>,
}

impl FormulaEngine {
    pub fn new(store: Arc<Store>) -> Self {
        FormulaEngine { store }
    }

    /// Sorted dependency list of a formula.
    pub fn dependencies_of(&self, formula: &str) -> Result<Vec<String>, ParseError> {
        let expr = parser::parse(formula)?;
        Ok(parser::dependencies(&expr).into_iter().collect())
    }

    /// Evaluate a formula against current data. `None` means the formula does
    /// not parse, a dependency has no data yet, or the arithmetic failed
    /// (division by zero, non-finite result) — never a crash, never a
    /// substituted zero.
    pub fn evaluate(&self, formula: &str) -> Option<f64> {
        let expr = match parser::parse(formula) {
            Ok(expr) => expr,
            Err(e) => {
                warn!(formula, error = %e, "Formula does not parse");
                return None;
            }
        };

        let deps = parser::dependencies(&expr);
        let mut vars = HashMap::with_capacity(deps.len());
        for dep in &deps {
            match self.resolve(dep) {
                Some(value) => {
                    vars.insert(dep.clone(), value);
                }
                None => {
                    debug!(formula, dep, "Unresolved dependency, formula yields null");
                    return None;
                }
            }
        }

        match parser::eval(&expr, &vars) {
            Ok(value) if value.is_finite() => Some(value),
            Ok(_) => {
                warn!(formula, "Formula evaluated to a non-finite value");
                None
            }
            Err(e) => {
                warn!(formula, error = %e, "Formula evaluation failed");
                None
            }
        }
    }

    /// Resolve one `kind:id` dependency to its current scalar.
    fn resolve(&self, dep: &str) -> Option<f64> {
        let (kind, id) = dep.split_once(':')?;
        match kind {
            "monitor" => {
                let monitor = self.store.get_monitor(id).ok().flatten()?;
                self.evaluate(&monitor.formula)
            }
            "webhook" => self.store.latest_sample(id).ok().flatten()?.value,
            "funding" => {
                let (exchange, symbol) = split_market_ref(id)?;
                self.store
                    .latest_funding(exchange, symbol)
                    .ok()
                    .flatten()
                    .map(|r| r.annualized_rate)
            }
            "spot" => {
                let (exchange, symbol) = split_market_ref(id)?;
                self.store
                    .latest_spot(exchange, symbol)
                    .ok()
                    .flatten()
                    .map(|p| p.price)
            }
            other => {
                warn!(kind = other, id, "Unknown dependency kind");
                None
            }
        }
    }

    /// Evaluate a monitor's formula and cache the result. A new MonitorValue
    /// row is written only when the value is non-null and moved by more than
    /// [`VALUE_EPSILON`] since the last cached row (or no row exists yet).
    pub fn compute_monitor_value(&self, monitor_id: &str) -> Option<f64> {
        let monitor = self.store.get_monitor(monitor_id).ok().flatten()?;
        if !monitor.enabled {
            return None;
        }

        let value = self.evaluate(&monitor.formula)?;
        let dependencies = self.dependencies_of(&monitor.formula).unwrap_or_default();

        let previous: Option<MonitorValue> =
            self.store.latest_monitor_value(monitor_id).ok().flatten();
        let changed = match &previous {
            None => true,
            Some(prev) => (value - prev.value).abs() > VALUE_EPSILON,
        };

        if changed {
            if let Err(e) =
                self.store
                    .insert_monitor_value(monitor_id, value, Utc::now(), &dependencies)
            {
                warn!(monitor_id, error = %e, "Failed to cache monitor value");
            } else {
                debug!(
                    monitor_id,
                    previous = ?previous.map(|p| p.value),
                    value,
                    "Updated monitor value"
                );
            }
        }

        Some(value)
    }

    /// Recompute every enabled monitor whose dependency set contains `dep`
    /// (e.g. `webhook:pricing_page` after a webhook lands). Returns the ids
    /// that produced a value.
    pub fn recompute_for_dependency(&self, dep: &str) -> Vec<String> {
        let monitors = match self.store.list_monitors(true) {
            Ok(monitors) => monitors,
            Err(e) => {
                warn!(error = %e, "Failed to list monitors for recompute");
                return Vec::new();
            }
        };

        let mut recomputed = Vec::new();
        for monitor in monitors {
            let deps = match self.dependencies_of(&monitor.formula) {
                Ok(deps) => deps,
                Err(_) => continue,
            };
            if deps.iter().any(|d| d == dep)
                && self.compute_monitor_value(&monitor.id).is_some()
            {
                recomputed.push(monitor.id);
            }
        }
        recomputed
    }

    /// Periodic safety-net sweep over every enabled monitor. Returns how many
    /// evaluated to a value.
    pub fn recompute_all(&self) -> usize {
        let monitors = match self.store.list_monitors(true) {
            Ok(monitors) => monitors,
            Err(e) => {
                warn!(error = %e, "Failed to list monitors for sweep");
                return 0;
            }
        };

        monitors
            .iter()
            .filter(|m| self.compute_monitor_value(&m.id).is_some())
            .count()
    }

    /// Reject a formula that would make the monitor dependency graph cyclic.
    /// DFS across `monitor:` references with a path set; a back-edge (or a
    /// reference reaching back to `monitor_id`) is a cycle.
    pub fn check_cycles(&self, monitor_id: &str, formula: &str) -> CoreResult<()> {
        let mut visited = BTreeSet::new();
        let mut path = BTreeSet::new();
        path.insert(monitor_id.to_string());
        self.walk_monitor_deps(monitor_id, formula, &mut path, &mut visited)
    }

    fn walk_monitor_deps(
        &self,
        root: &str,
        formula: &str,
        path: &mut BTreeSet<String>,
        visited: &mut BTreeSet<String>,
    ) -> CoreResult<()> {
        let deps = self
            .dependencies_of(formula)
            .map_err(|e| CoreError::Validation(format!("invalid formula: {e}")))?;

        for dep in deps {
            let Some(dep_id) = dep.strip_prefix("monitor:") else {
                continue;
            };

            if dep_id == root || path.contains(dep_id) {
                warn!(monitor_id = root, dep_id, "Circular dependency detected");
                return Err(CoreError::CycleDetected(format!("{root} -> {dep_id}")));
            }

            if visited.insert(dep_id.to_string()) {
                if let Some(monitor) = self.store.get_monitor(dep_id).map_err(CoreError::Store)? {
                    path.insert(dep_id.to_string());
                    self.walk_monitor_deps(root, &monitor.formula, path, visited)?;
                    path.remove(dep_id);
                }
            }
        }

        Ok(())
    }
}

fn split_market_ref(id: &str) -> Option<(&str, &str)> {
    match id.split_once('-') {
        Some((exchange, symbol)) if !exchange.is_empty() && !symbol.is_empty() => {
            Some((exchange, symbol))
        }
        _ => {
            warn!(id, "Invalid market reference, expected exchange-SYMBOL");
            None
        }
    }
}
