//! Conversation state manager
//!
//! The only writer of a conversation's stage. Active and paused
//! conversations live in two tables behind one manager-wide lock; every
//! read-modify-write holds it for its whole duration and never across an
//! await.

pub mod clock;
pub mod escalation;
pub mod rules;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::StateConfig;
use crate::conversation::{Amendment, Context, EscalationFlag, Stage, TransitionKind};
use crate::error::{LoanflowError, OptionExt, Result, TransitionError};

pub use clock::{Clock, ManualClock, SystemClock};

/// Point-in-time copy of a conversation, recorded on every applied change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSnapshot {
    pub stage: Stage,
    pub at: DateTime<Utc>,
    pub context_json: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransitionOutcome {
    pub from: Stage,
    pub to: Stage,
    /// False when the conversation was already at the target
    pub applied: bool,
    pub escalation: BTreeSet<EscalationFlag>,
}

#[derive(Debug, Default)]
pub struct SweepReport {
    /// Evicted for inactivity, marked abandoned
    pub abandoned: Vec<Context>,
    /// Paused past the pause window and discarded
    pub expired: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationAnalytics {
    pub active: usize,
    pub paused: usize,
    pub by_stage: BTreeMap<Stage, usize>,
    pub escalated: usize,
    pub average_transitions: f64,
}

struct ActiveEntry {
    context: Context,
    snapshots: VecDeque<StateSnapshot>,
    /// Last time the manager saw activity; drives abandonment
    touched: DateTime<Utc>,
}

struct PausedEntry {
    context: Context,
    snapshots: VecDeque<StateSnapshot>,
    paused_at: DateTime<Utc>,
    reason: String,
}

#[derive(Default)]
struct Tables {
    active: HashMap<String, ActiveEntry>,
    paused: HashMap<String, PausedEntry>,
}

impl Tables {
    fn active_mut(&mut self, id: &str) -> Result<&mut ActiveEntry> {
        self.active.get_mut(id).ok_or_not_found(id)
    }

    fn exists(&self, id: &str) -> bool {
        self.active.contains_key(id) || self.paused.contains_key(id)
    }
}

pub struct StateManager {
    config: StateConfig,
    clock: Arc<dyn Clock>,
    tables: Mutex<Tables>,
}

impl StateManager {
    pub fn new(config: StateConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: StateConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            tables: Mutex::new(Tables::default()),
        }
    }

    pub fn config(&self) -> &StateConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn snapshot(&self, entry: &mut ActiveEntry, at: DateTime<Utc>) -> Result<()> {
        let snapshot = StateSnapshot {
            stage: entry.context.stage(),
            at,
            context_json: serde_json::to_string(&entry.context)?,
        };
        entry.snapshots.push_back(snapshot);
        while entry.snapshots.len() > self.config.snapshot_limit {
            entry.snapshots.pop_front();
        }
        Ok(())
    }

    /// Count a change, refresh activity and re-derive escalation
    fn record_change(&self, entry: &mut ActiveEntry, now: DateTime<Utc>) -> Result<()> {
        let meta = &mut entry.context.metadata;
        meta.transition_count += 1;
        meta.transitions_since_reset += 1;
        meta.last_activity = now;
        entry.touched = now;
        entry.context.metadata.escalation =
            escalation::derive(&entry.context, &self.config.escalation, now);
        self.snapshot(entry, now)
    }

    /// Start a conversation at Greeting
    pub fn begin(&self, id: &str) -> Result<Context> {
        let now = self.clock.now();
        let mut tables = self.tables.lock();
        if tables.exists(id) {
            return Err(LoanflowError::AlreadyExists { id: id.to_string() });
        }
        let context = Context::new(id, now);
        tables.active.insert(
            id.to_string(),
            ActiveEntry {
                context: context.clone(),
                snapshots: VecDeque::new(),
                touched: now,
            },
        );
        info!(conversation = id, "conversation started");
        Ok(context)
    }

    /// Re-admit a conversation loaded from persistence
    pub fn restore(&self, context: Context) -> Result<()> {
        let now = self.clock.now();
        let mut tables = self.tables.lock();
        if tables.exists(&context.id) {
            return Err(LoanflowError::AlreadyExists { id: context.id });
        }
        debug!(conversation = %context.id, stage = %context.stage(), "conversation restored");
        tables.active.insert(
            context.id.clone(),
            ActiveEntry {
                context,
                snapshots: VecDeque::new(),
                touched: now,
            },
        );
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Context> {
        self.tables.lock().active.get(id).map(|e| e.context.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tables.lock().active.contains_key(id)
    }

    pub fn is_paused(&self, id: &str) -> bool {
        self.tables.lock().paused.contains_key(id)
    }

    /// Store what responders changed on a working copy. Stage and the
    /// transition counters stay as the manager last wrote them.
    pub fn commit(&self, working: &Context) -> Result<()> {
        let now = self.clock.now();
        let mut tables = self.tables.lock();
        let entry = tables.active_mut(&working.id)?;

        let stored = &entry.context.metadata;
        let mut next = working.clone();
        next.set_stage(entry.context.stage());
        next.metadata.created_at = stored.created_at;
        next.metadata.transition_count = stored.transition_count;
        next.metadata.transitions_since_reset = stored.transitions_since_reset;
        next.metadata.abandoned = false;
        next.metadata.last_activity = now;
        next.metadata.escalation = escalation::derive(&next, &self.config.escalation, now);

        entry.context = next;
        entry.touched = now;
        Ok(())
    }

    /// Validate and apply a stage change
    pub fn transition(&self, id: &str, target: Stage, kind: TransitionKind) -> Result<TransitionOutcome> {
        let now = self.clock.now();
        let mut tables = self.tables.lock();
        let entry = tables.active_mut(id)?;
        let from = entry.context.stage();

        if from == target {
            return Ok(TransitionOutcome {
                from,
                to: target,
                applied: false,
                escalation: entry.context.metadata.escalation.clone(),
            });
        }

        rules::check(&entry.context, target, kind)?;
        entry.context.set_stage(target);
        self.record_change(entry, now)?;

        info!(conversation = id, %from, to = %target, %kind, "stage transition");
        Ok(TransitionOutcome {
            from,
            to: target,
            applied: true,
            escalation: entry.context.metadata.escalation.clone(),
        })
    }

    /// Correct a confirmed loan field. Clears any decision; a conversation
    /// waiting on documents goes back to Decisioning.
    pub fn amend(&self, id: &str, amendment: Amendment) -> Result<Context> {
        let now = self.clock.now();
        let mut tables = self.tables.lock();
        let entry = tables.active_mut(id)?;
        let stage = entry.context.stage();

        if stage.is_terminal() {
            return Err(TransitionError::Terminal { stage }.into());
        }
        let loan = entry
            .context
            .loan
            .as_ref()
            .ok_or_invalid("No loan request has been confirmed yet.")?;
        let amended = amendment.apply(loan)?;

        let ctx = &mut entry.context;
        ctx.draft.sync_from(&amended);
        ctx.loan = Some(amended);
        ctx.decision = None;
        if stage == Stage::DocumentCheck {
            ctx.set_stage(Stage::Decisioning);
        }
        self.record_change(entry, now)?;

        info!(conversation = id, change = %amendment.describe(), "loan amended");
        Ok(entry.context.clone())
    }

    /// Move a conversation to the paused table, unchanged
    pub fn pause(&self, id: &str, reason: impl Into<String>) -> Result<()> {
        let now = self.clock.now();
        let mut tables = self.tables.lock();
        let entry = tables.active.remove(id).ok_or_not_found(id)?;
        let reason = reason.into();
        info!(conversation = id, reason = %reason, "conversation paused");
        tables.paused.insert(
            id.to_string(),
            PausedEntry {
                context: entry.context,
                snapshots: entry.snapshots,
                paused_at: now,
                reason,
            },
        );
        Ok(())
    }

    /// Bring a paused conversation back. Past the pause window the
    /// conversation is discarded for good.
    pub fn resume(&self, id: &str) -> Result<Context> {
        let now = self.clock.now();
        let mut tables = self.tables.lock();
        let paused = tables.paused.remove(id).ok_or_not_found(id)?;

        if now - paused.paused_at > self.pause_window() {
            info!(conversation = id, "pause window elapsed; conversation discarded");
            return Err(LoanflowError::not_found(id));
        }

        debug!(conversation = id, reason = %paused.reason, "conversation resumed");
        let context = paused.context.clone();
        tables.active.insert(
            id.to_string(),
            ActiveEntry {
                context: paused.context,
                snapshots: paused.snapshots,
                touched: now,
            },
        );
        Ok(context)
    }

    /// Audit history, oldest first
    pub fn snapshots(&self, id: &str) -> Result<Vec<StateSnapshot>> {
        let tables = self.tables.lock();
        let snapshots = match (tables.active.get(id), tables.paused.get(id)) {
            (Some(entry), _) => &entry.snapshots,
            (None, Some(entry)) => &entry.snapshots,
            (None, None) => return Err(LoanflowError::not_found(id)),
        };
        Ok(snapshots.iter().cloned().collect())
    }

    pub fn reset_escalation(&self, id: &str) -> Result<()> {
        let mut tables = self.tables.lock();
        let entry = tables.active_mut(id)?;
        entry.context.metadata.escalation.clear();
        entry.context.metadata.transitions_since_reset = 0;
        Ok(())
    }

    /// Evict idle active conversations and expired paused ones
    pub fn sweep(&self) -> SweepReport {
        let now = self.clock.now();
        let abandonment = Duration::seconds(self.config.abandonment_secs as i64);
        let pause_window = self.pause_window();
        let mut tables = self.tables.lock();
        let mut report = SweepReport::default();

        let idle: Vec<String> = tables
            .active
            .iter()
            .filter(|(_, e)| now - e.touched > abandonment)
            .map(|(id, _)| id.clone())
            .collect();
        for id in idle {
            if let Some(mut entry) = tables.active.remove(&id) {
                entry.context.metadata.abandoned = true;
                report.abandoned.push(entry.context);
            }
        }

        tables.paused.retain(|id, e| {
            let keep = now - e.paused_at <= pause_window;
            if !keep {
                report.expired.push(id.clone());
            }
            keep
        });

        if !report.abandoned.is_empty() || !report.expired.is_empty() {
            info!(
                abandoned = report.abandoned.len(),
                expired = report.expired.len(),
                "sweep evicted conversations"
            );
        }
        report
    }

    pub fn analytics(&self) -> ConversationAnalytics {
        let tables = self.tables.lock();
        let mut by_stage = BTreeMap::new();
        let mut escalated = 0;
        for entry in tables.active.values() {
            *by_stage.entry(entry.context.stage()).or_insert(0) += 1;
            if entry.context.is_escalated() {
                escalated += 1;
            }
        }

        let counts: Vec<u32> = tables
            .active
            .values()
            .map(|e| e.context.metadata.transition_count)
            .chain(tables.paused.values().map(|e| e.context.metadata.transition_count))
            .collect();
        let average_transitions = if counts.is_empty() {
            0.0
        } else {
            counts.iter().map(|c| *c as f64).sum::<f64>() / counts.len() as f64
        };

        ConversationAnalytics {
            active: tables.active.len(),
            paused: tables.paused.len(),
            by_stage,
            escalated,
            average_transitions,
        }
    }

    /// Drop a conversation from both tables
    pub fn end(&self, id: &str) -> Option<Context> {
        let mut tables = self.tables.lock();
        tables
            .active
            .remove(id)
            .map(|e| e.context)
            .or_else(|| tables.paused.remove(id).map(|e| e.context))
    }

    fn pause_window(&self) -> Duration {
        Duration::seconds(self.config.pause_window_secs as i64)
    }
}
