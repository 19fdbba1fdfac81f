//! System State Machine and Circuit Breaker
//!
//! The system moves Standby → Indexing → Indexed ↔ Indexing, drops to Error
//! from anywhere, and leaves Error only through explicit recovery. The
//! vector and graph sub-components carry independent states; the system
//! state aggregates them (any sub-error ⇒ Error, else any sub-indexing ⇒
//! Indexing).
//!
//! A per-component circuit breaker counts consecutive failures; at the
//! threshold the component is marked resource-exhausted and writes to it
//! stop until the cooldown elapses or a probe succeeds.

use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{categorize, CategorizedError, EngineError, ErrorCategory, Result};

// ============================================================================
// States
// ============================================================================

/// Top-level system state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemState {
    Standby,
    Indexing,
    Indexed,
    Error,
}

impl SystemState {
    /// Get the string representation used in progress events.
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemState::Standby => "standby",
            SystemState::Indexing => "indexing",
            SystemState::Indexed => "indexed",
            SystemState::Error => "error",
        }
    }
}

/// Per-component (vector, graph) state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComponentState {
    Disabled,
    Idle,
    Indexing,
    Error,
    ResourceExhausted,
}

impl ComponentState {
    /// Get the string representation used in progress events.
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentState::Disabled => "disabled",
            ComponentState::Idle => "idle",
            ComponentState::Indexing => "indexing",
            ComponentState::Error => "error",
            ComponentState::ResourceExhausted => "resource-exhausted",
        }
    }
}

/// Which sub-component a state change refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Vector,
    Graph,
}

// ============================================================================
// Circuit breaker
// ============================================================================

/// Consecutive failures before a component's circuit opens.
pub const BREAKER_THRESHOLD: u32 = 3;

/// Default cooldown before a probe is allowed through an open circuit.
pub const BREAKER_COOLDOWN: Duration = Duration::from_secs(30);

/// Failure-counting breaker for one sub-component.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    /// Create a breaker with the default threshold and cooldown.
    pub fn new() -> Self {
        Self::with_limits(BREAKER_THRESHOLD, BREAKER_COOLDOWN)
    }

    /// Create a breaker with explicit limits.
    pub fn with_limits(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            consecutive_failures: 0,
            opened_at: None,
        }
    }

    /// Record a failure. Returns `true` when this failure opened the circuit.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.threshold && self.opened_at.is_none() {
            self.opened_at = Some(Instant::now());
            return true;
        }
        false
    }

    /// Record a success; closes the circuit and resets the count.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.opened_at = None;
    }

    /// Whether writes should be withheld right now.
    ///
    /// After the cooldown the circuit half-opens: one probe is allowed
    /// through, and its outcome decides whether the circuit closes.
    pub fn is_open(&self) -> bool {
        match self.opened_at {
            Some(opened) => opened.elapsed() < self.cooldown,
            None => false,
        }
    }

    /// Current consecutive-failure count.
    pub fn failures(&self) -> u32 {
        self.consecutive_failures
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// State manager
// ============================================================================

#[derive(Debug)]
struct StateInner {
    system: SystemState,
    vector: ComponentState,
    graph: ComponentState,
    /// Whether a full index has ever completed (Indexed vs Standby baseline)
    indexed_once: bool,
    message: Option<String>,
    last_error: Option<CategorizedError>,
}

/// Snapshot of all state for status output.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub system: SystemState,
    pub vector: ComponentState,
    pub graph: ComponentState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<CategorizedError>,
}

/// Tracks system and sub-component health.
#[derive(Debug)]
pub struct StateManager {
    inner: RwLock<StateInner>,
    vector_breaker: RwLock<CircuitBreaker>,
    graph_breaker: RwLock<CircuitBreaker>,
}

impl StateManager {
    /// Create a manager in Standby, with the graph disabled unless enabled.
    pub fn new(graph_enabled: bool) -> Self {
        Self {
            inner: RwLock::new(StateInner {
                system: SystemState::Standby,
                vector: ComponentState::Idle,
                graph: if graph_enabled {
                    ComponentState::Idle
                } else {
                    ComponentState::Disabled
                },
                indexed_once: false,
                message: None,
                last_error: None,
            }),
            vector_breaker: RwLock::new(CircuitBreaker::new()),
            graph_breaker: RwLock::new(CircuitBreaker::new()),
        }
    }

    /// Current states.
    pub fn snapshot(&self) -> StateSnapshot {
        let inner = self.inner.read();
        StateSnapshot {
            system: inner.system,
            vector: inner.vector,
            graph: inner.graph,
            message: inner.message.clone(),
            last_error: inner.last_error.clone(),
        }
    }

    /// Current system state.
    pub fn system(&self) -> SystemState {
        self.inner.read().system
    }

    /// Transition into Indexing. Rejected while in Error.
    pub fn begin_indexing(&self) -> Result<()> {
        let mut inner = self.inner.write();
        match inner.system {
            SystemState::Error => Err(EngineError::Configuration(
                inner
                    .message
                    .clone()
                    .unwrap_or_else(|| "system is in error state".to_string()),
            )),
            SystemState::Indexing => Err(EngineError::AlreadyIndexing),
            _ => {
                inner.system = SystemState::Indexing;
                if inner.vector != ComponentState::Disabled {
                    inner.vector = ComponentState::Indexing;
                }
                if inner.graph != ComponentState::Disabled
                    && inner.graph != ComponentState::Error
                    && inner.graph != ComponentState::ResourceExhausted
                {
                    inner.graph = ComponentState::Indexing;
                }
                inner.message = None;
                Ok(())
            }
        }
    }

    /// Transition to Indexed after a completed run.
    pub fn finish_indexing(&self) {
        let mut inner = self.inner.write();
        inner.indexed_once = true;
        if inner.vector == ComponentState::Indexing {
            inner.vector = ComponentState::Idle;
        }
        if inner.graph == ComponentState::Indexing {
            inner.graph = ComponentState::Idle;
        }
        Self::aggregate(&mut inner);
    }

    /// Transition to Standby after a user cancellation. Not an error.
    pub fn cancelled(&self) {
        let mut inner = self.inner.write();
        inner.system = SystemState::Standby;
        if inner.vector == ComponentState::Indexing {
            inner.vector = ComponentState::Idle;
        }
        if inner.graph == ComponentState::Indexing {
            inner.graph = ComponentState::Idle;
        }
        inner.message = Some("cancelled by user".to_string());
        info!("Indexing cancelled by user");
    }

    /// Drop to Error with a user-facing message.
    pub fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        let mut inner = self.inner.write();
        inner.system = SystemState::Error;
        inner.last_error = Some(categorize(&message));
        inner.message = Some(message);
    }

    /// Error → Standby via explicit recovery.
    pub fn recover(&self) {
        let mut inner = self.inner.write();
        if inner.system == SystemState::Error {
            inner.system = SystemState::Standby;
            inner.message = None;
            if inner.vector == ComponentState::Error {
                inner.vector = ComponentState::Idle;
            }
            if inner.graph == ComponentState::Error {
                inner.graph = ComponentState::Idle;
            }
        }
        self.vector_breaker.write().record_success();
        self.graph_breaker.write().record_success();
    }

    /// Set a sub-component's state directly and re-aggregate.
    pub fn set_component(&self, component: Component, state: ComponentState) {
        let mut inner = self.inner.write();
        match component {
            Component::Vector => inner.vector = state,
            Component::Graph => inner.graph = state,
        }
        Self::aggregate(&mut inner);
    }

    /// Component states.
    pub fn component(&self, component: Component) -> ComponentState {
        let inner = self.inner.read();
        match component {
            Component::Vector => inner.vector,
            Component::Graph => inner.graph,
        }
    }

    /// Record a component failure: categorize, bump the breaker, degrade the
    /// component state. Returns the categorized error.
    pub fn record_component_error(&self, component: Component, message: &str) -> CategorizedError {
        let categorized = categorize(message);
        let opened = {
            let breaker = match component {
                Component::Vector => &self.vector_breaker,
                Component::Graph => &self.graph_breaker,
            };
            breaker.write().record_failure()
        };

        let state = if opened || categorized.category == ErrorCategory::ResourceExhausted {
            if opened {
                warn!("Circuit opened for {:?} after consecutive failures", component);
            }
            ComponentState::ResourceExhausted
        } else {
            ComponentState::Error
        };

        {
            let mut inner = self.inner.write();
            match component {
                Component::Vector => inner.vector = state,
                Component::Graph => inner.graph = state,
            }
            inner.last_error = Some(categorized.clone());
            Self::aggregate(&mut inner);
        }

        categorized
    }

    /// Record a component success: closes its breaker and heals a degraded
    /// component state (a successful probe ends the open-circuit period).
    pub fn record_component_success(&self, component: Component) {
        let breaker = match component {
            Component::Vector => &self.vector_breaker,
            Component::Graph => &self.graph_breaker,
        };
        breaker.write().record_success();

        let mut inner = self.inner.write();
        let current = match component {
            Component::Vector => inner.vector,
            Component::Graph => inner.graph,
        };
        if matches!(current, ComponentState::Error | ComponentState::ResourceExhausted) {
            let healed = if inner.system == SystemState::Indexing
                || [inner.vector, inner.graph].contains(&ComponentState::Indexing)
            {
                ComponentState::Indexing
            } else {
                ComponentState::Idle
            };
            match component {
                Component::Vector => inner.vector = healed,
                Component::Graph => inner.graph = healed,
            }
            Self::aggregate(&mut inner);
        }
    }

    /// Whether writes to a component should currently be withheld.
    pub fn writes_suspended(&self, component: Component) -> bool {
        let breaker = match component {
            Component::Vector => &self.vector_breaker,
            Component::Graph => &self.graph_breaker,
        };
        breaker.read().is_open()
    }

    /// Aggregation rule: a vector error fails the system; a graph error
    /// only degrades (the graph is optional, and indexing of the other
    /// sub-components continues). Any sub-indexing keeps the system in
    /// Indexing, otherwise the Indexed/Standby baseline applies.
    fn aggregate(inner: &mut StateInner) {
        if inner.vector == ComponentState::Error {
            inner.system = SystemState::Error;
        } else if [inner.vector, inner.graph].contains(&ComponentState::Indexing) {
            inner.system = SystemState::Indexing;
        } else if inner.system != SystemState::Error {
            inner.system = if inner.indexed_once {
                SystemState::Indexed
            } else {
                SystemState::Standby
            };
        }
    }

    /// Reset to a pristine Standby after `clear_index_data`.
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        inner.system = SystemState::Standby;
        inner.indexed_once = false;
        inner.message = None;
        inner.last_error = None;
        if inner.vector != ComponentState::Disabled {
            inner.vector = ComponentState::Idle;
        }
        if inner.graph != ComponentState::Disabled {
            inner.graph = ComponentState::Idle;
        }
        self.vector_breaker.write().record_success();
        self.graph_breaker.write().record_success();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        let state = StateManager::new(true);
        assert_eq!(state.system(), SystemState::Standby);

        state.begin_indexing().unwrap();
        assert_eq!(state.system(), SystemState::Indexing);
        assert!(matches!(state.begin_indexing(), Err(EngineError::AlreadyIndexing)));

        state.finish_indexing();
        assert_eq!(state.system(), SystemState::Indexed);

        // Indexed ↔ Indexing
        state.begin_indexing().unwrap();
        assert_eq!(state.system(), SystemState::Indexing);
        state.finish_indexing();
        assert_eq!(state.system(), SystemState::Indexed);
    }

    #[test]
    fn test_error_requires_recovery() {
        let state = StateManager::new(false);
        state.fail("invalid configuration: bad url");
        assert_eq!(state.system(), SystemState::Error);
        assert!(state.begin_indexing().is_err());

        state.recover();
        assert_eq!(state.system(), SystemState::Standby);
        assert!(state.begin_indexing().is_ok());
    }

    #[test]
    fn test_cancellation_is_not_an_error() {
        let state = StateManager::new(false);
        state.begin_indexing().unwrap();
        state.cancelled();
        assert_eq!(state.system(), SystemState::Standby);
        assert_eq!(state.snapshot().message.as_deref(), Some("cancelled by user"));
    }

    #[test]
    fn test_vector_error_aggregates_to_system_error() {
        let state = StateManager::new(true);
        state.set_component(Component::Vector, ComponentState::Error);
        assert_eq!(state.system(), SystemState::Error);
    }

    #[test]
    fn test_graph_error_degrades_without_failing_system() {
        let state = StateManager::new(true);
        state.begin_indexing().unwrap();
        state.set_component(Component::Graph, ComponentState::Error);
        state.finish_indexing();
        // The optional graph backend failing leaves the system usable
        assert_eq!(state.system(), SystemState::Indexed);
        assert_eq!(state.component(Component::Graph), ComponentState::Error);
    }

    #[test]
    fn test_graph_disabled_when_not_enabled() {
        let state = StateManager::new(false);
        assert_eq!(state.component(Component::Graph), ComponentState::Disabled);
    }

    #[test]
    fn test_breaker_opens_after_threshold() {
        let state = StateManager::new(true);
        for _ in 0..2 {
            state.record_component_error(Component::Graph, "connection refused");
            assert!(!state.writes_suspended(Component::Graph));
        }
        state.record_component_error(Component::Graph, "connection refused");
        assert!(state.writes_suspended(Component::Graph));
        assert_eq!(state.component(Component::Graph), ComponentState::ResourceExhausted);

        // Probe success closes the circuit
        state.record_component_success(Component::Graph);
        assert!(!state.writes_suspended(Component::Graph));
    }

    #[test]
    fn test_breaker_half_opens_after_cooldown() {
        let mut breaker = CircuitBreaker::with_limits(1, Duration::from_millis(0));
        assert!(breaker.record_failure());
        // Zero cooldown: immediately half-open
        assert!(!breaker.is_open());
        breaker.record_success();
        assert_eq!(breaker.failures(), 0);
    }

    #[test]
    fn test_categorized_error_recorded() {
        let state = StateManager::new(true);
        let categorized = state.record_component_error(Component::Vector, "429 rate limit");
        assert_eq!(categorized.category, ErrorCategory::RateLimit);
        let snapshot = state.snapshot();
        assert_eq!(snapshot.last_error.unwrap().category, ErrorCategory::RateLimit);
    }
}
