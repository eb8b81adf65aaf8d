//! Run trace: ordered lifecycle events, best-effort.
//!
//! The trace is a product artifact (one JSON object per line) and is separate
//! from `tracing` diagnostics. Sinks never fail the run; write errors are
//! logged and dropped.

use std::cell::RefCell;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::warn;

use crate::core::kb::KbWriteOutcome;
use crate::core::types::{AgentType, KbKind, NodeId, NodeStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TracedKbWrite {
    pub id: String,
    pub kind: KbKind,
    pub outcome: KbWriteOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    RunStart {
        config: String,
    },
    AgentSpawn {
        id: NodeId,
        parent: NodeId,
        agent_type: AgentType,
        linked: bool,
    },
    AgentStart {
        id: NodeId,
        agent_type: AgentType,
        step: u32,
    },
    AgentEnd {
        id: NodeId,
        agent_type: AgentType,
        status: NodeStatus,
        spawned: usize,
    },
    KbWrite {
        node: NodeId,
        entries: Vec<TracedKbWrite>,
    },
    RunEnd {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

/// Write-only destination for trace events.
pub trait TraceSink {
    fn record(&mut self, event: &TraceEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTrace;

impl TraceSink for NullTrace {
    fn record(&mut self, _event: &TraceEvent) {}
}

/// Collects events in memory; clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct MemoryTrace {
    events: Rc<RefCell<Vec<TraceEvent>>>,
}

impl MemoryTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.borrow().clone()
    }
}

impl TraceSink for MemoryTrace {
    fn record(&mut self, event: &TraceEvent) {
        self.events.borrow_mut().push(event.clone());
    }
}

#[derive(Serialize)]
struct TraceLine<'a> {
    ts: String,
    #[serde(flatten)]
    event: &'a TraceEvent,
}

/// Appends timestamped JSON lines to a file, flushing after each event.
pub struct JsonlTrace {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonlTrace {
    /// Create (truncate) the trace file, creating parent directories.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create trace dir {}", parent.display()))?;
        }
        let file =
            File::create(path).with_context(|| format!("create trace {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    fn write_line(&mut self, event: &TraceEvent) -> Result<()> {
        let line = TraceLine {
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            event,
        };
        serde_json::to_writer(&mut self.writer, &line).context("serialize trace event")?;
        self.writer.write_all(b"\n").context("write trace newline")?;
        self.writer.flush().context("flush trace")
    }
}

impl TraceSink for JsonlTrace {
    fn record(&mut self, event: &TraceEvent) {
        if let Err(err) = self.write_line(event) {
            warn!(path = %self.path.display(), err = %format!("{err:#}"), "dropping trace event");
        }
    }
}
