//! Simulation identity, records, and start results

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::cancel::CancelToken;

/// Milliseconds since the unix epoch.
pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Unique identifier for a running simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SimulationId(pub Uuid);

impl SimulationId {
    /// Generate a new random simulation ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from an existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for SimulationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SimulationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SimulationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// The four workload families the lab can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationKind {
    /// Duty-cycle CPU saturation on dedicated threads
    Cpu,
    /// Retained memory blocks held until released
    Memory,
    /// Shared-pool workers blocked synchronously
    ThreadBlock,
    /// Request-shaped degrading load on the shared pool
    LoadTest,
}

impl SimulationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SimulationKind::Cpu => "cpu",
            SimulationKind::Memory => "memory",
            SimulationKind::ThreadBlock => "thread_block",
            SimulationKind::LoadTest => "load_test",
        }
    }
}

impl std::fmt::Display for SimulationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Live catalog entry for one running simulation.
///
/// A record exists in the registry exactly while its workload is executing or
/// holding resources; the component that registered it removes it through its
/// cleanup path, and removal is the single signal that the simulation ended.
#[derive(Debug)]
pub struct SimulationRecord {
    pub id: SimulationId,
    pub kind: SimulationKind,
    /// Unix millis at registration
    pub started_at_ms: u64,
    /// Post-validation parameters, as actually applied (clamped values, not
    /// the raw request)
    pub params: HashMap<String, Value>,
    /// Cancellation handle shared with the workload's workers
    pub cancel: CancelToken,
}

impl SimulationRecord {
    pub fn new(kind: SimulationKind) -> Self {
        Self {
            id: SimulationId::new(),
            kind,
            started_at_ms: unix_millis(),
            params: HashMap::new(),
            cancel: CancelToken::new(),
        }
    }

    /// Attach one applied parameter (builder style).
    pub fn param<V: Into<Value>>(mut self, key: &str, value: V) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    /// Read-only copy safe to hand out while the record stays registered.
    pub fn summary(&self) -> SimulationSummary {
        SimulationSummary {
            id: self.id,
            kind: self.kind,
            started_at_ms: self.started_at_ms,
            params: self.params.clone(),
        }
    }
}

/// Point-in-time copy of a registry entry
#[derive(Debug, Clone, Serialize)]
pub struct SimulationSummary {
    pub id: SimulationId,
    pub kind: SimulationKind,
    pub started_at_ms: u64,
    pub params: HashMap<String, Value>,
}

/// Outcome of a start request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationStatus {
    /// The workload is registered and running
    Started,
    /// The request was refused (capacity, allocation failure); nothing was
    /// registered
    Rejected,
}

impl SimulationStatus {
    pub fn is_started(&self) -> bool {
        matches!(self, SimulationStatus::Started)
    }
}

/// Immediate acknowledgment returned by every start operation.
///
/// A `Started` result means the simulation is in the registry; anything that
/// goes wrong afterwards surfaces only as its disappearance from the
/// registry, never as an error to this caller. A `Rejected` result's id never
/// appears in the registry.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationResult {
    pub id: SimulationId,
    pub status: SimulationStatus,
    pub message: String,
    /// Applied (possibly clamped) parameters
    pub actual_params: HashMap<String, Value>,
    pub started_at_ms: u64,
    /// Expected natural end, where one exists (held-open workloads have none)
    pub estimated_end_ms: Option<u64>,
}

impl SimulationResult {
    pub fn started<S: Into<String>>(record: &SimulationRecord, message: S) -> Self {
        Self {
            id: record.id,
            status: SimulationStatus::Started,
            message: message.into(),
            actual_params: record.params.clone(),
            started_at_ms: record.started_at_ms,
            estimated_end_ms: None,
        }
    }

    pub fn rejected<S: Into<String>>(message: S) -> Self {
        Self {
            id: SimulationId::new(),
            status: SimulationStatus::Rejected,
            message: message.into(),
            actual_params: HashMap::new(),
            started_at_ms: unix_millis(),
            estimated_end_ms: None,
        }
    }

    /// Echo one parameter into the result (builder style).
    pub fn param<V: Into<Value>>(mut self, key: &str, value: V) -> Self {
        self.actual_params.insert(key.to_string(), value.into());
        self
    }

    pub fn with_estimated_end(mut self, at_ms: u64) -> Self {
        self.estimated_end_ms = Some(at_ms);
        self
    }

    pub fn is_started(&self) -> bool {
        self.status.is_started()
    }
}
