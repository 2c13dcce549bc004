//! Session manager (§4.10): admission, FIFO queueing, cooperative
//! cancellation, shutdown drain, and a numbered event log with
//! `last_event_id` replay, layered on top of [`AppRunner`].
//!
//! One [`AppRunner`] is constructed per session rather than shared, because
//! each session owns its own [`CostTracker`](crate::cost::CostTracker) (§5:
//! "cost tracker instance-per-session, no cross-session sharing") and the
//! node instances the research graph wires in close over that tracker.
//! Collaborators that *are* process-wide (the LLM client, search backend,
//! scrape extractor, key rotator, LLM cache) are held as `Arc`s and cloned
//! into each session's graph.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{instrument, warn};

use crate::cache::prompt_cache::CacheTracker;
use crate::channels::Channel as _;
use crate::compaction::ContextManager;
use crate::cost::{CostTracker, ModelPrice};
use crate::domain::{DomainUpdate, DomainView, ErrorLogEntry};
use crate::graphs::research::{build_research_graph, ResearchCollaborators};
use crate::nodes::PipelineConfig;
use crate::runtimes::{AppRunner, CheckpointerType, RunnerError, StepResult};
use crate::state::VersionedState;

/// Lifecycle status of a session, per §3.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// One numbered progress event, persisted one-per-line to
/// `events/<session_id>.jsonl` and replayable by id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionEvent {
    pub id: u64,
    pub session_id: String,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

/// Caller-facing view of a session's progress, returned by admission,
/// lookup, and listing calls.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionRecord {
    pub session_id: String,
    pub query: String,
    pub status: SessionStatus,
    pub progress: f32,
    pub cost_usd: f64,
    pub tokens_used: u64,
    pub queued_position: Option<usize>,
    pub error: Option<String>,
    /// Set once the final report has been written to disk (§6 persistent
    /// layout: `<sanitized-query>_<timestamp>.md` + sibling `.meta.json`).
    pub report_path: Option<String>,
}

/// Lowercases, replaces runs of non-alphanumerics with `_`, and truncates —
/// mirrors the filename-safety the teacher's own `sanitize` module applies
/// to scraped HTML, applied here to the user's free-form query instead.
fn sanitize_filename_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_sep = false;
    for ch in raw.chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "query".to_string()
    } else {
        trimmed.chars().take(60).collect()
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum SessionManagerError {
    #[error("queue overflow: {queue_limit} sessions already queued")]
    #[diagnostic(code(research_agent::session_manager::queue_overflow))]
    QueueOverflow { queue_limit: usize },

    #[error("session not found: {session_id}")]
    #[diagnostic(code(research_agent::session_manager::not_found))]
    NotFound { session_id: String },

    #[error(transparent)]
    #[diagnostic(code(research_agent::session_manager::runner))]
    Runner(#[from] RunnerError),
}

/// Admission/queue/retry knobs, mirroring §6's configuration surface.
#[derive(Clone, Debug)]
pub struct SessionManagerConfig {
    pub max_concurrent_sessions: usize,
    pub queue_limit: usize,
    pub drain_timeout: std::time::Duration,
    pub event_ring_capacity: usize,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: 4,
            queue_limit: 16,
            drain_timeout: std::time::Duration::from_secs(30),
            event_ring_capacity: 200,
        }
    }
}

/// Process-wide collaborators shared across every session's research graph.
/// Cloning this struct is cheap (everything is `Arc`/`Clone`); only the
/// per-session `CostTracker` is constructed fresh in [`SessionManager::submit`].
#[derive(Clone)]
pub struct SharedCollaborators {
    pub llm: Arc<dyn crate::collab::LlmClient>,
    pub search_backend: Arc<dyn crate::collab::SearchBackend>,
    pub scrape_extractor: Arc<dyn crate::collab::ScrapeExtractor>,
    pub llm_cache: Option<Arc<crate::cache::LlmCache>>,
    pub model_prices: FxHashMap<String, ModelPrice>,
    pub pipeline_config: PipelineConfig,
    pub warn_at_percentage: f64,
}

struct RunningSession {
    record: Mutex<SessionRecord>,
    cost: CostTracker,
    cancel_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

/// Append-only per-session event log: a capped in-memory ring for replay, an
/// optional JSONL file sink, and a broadcast channel for live subscribers.
struct EventLog {
    next_id: AtomicU64,
    ring: Mutex<FxHashMap<String, VecDeque<SessionEvent>>>,
    ring_capacity: usize,
    events_dir: Option<std::path::PathBuf>,
    live: broadcast::Sender<SessionEvent>,
}

impl EventLog {
    fn new(ring_capacity: usize, events_dir: Option<std::path::PathBuf>) -> Self {
        let (live, _) = broadcast::channel(1024);
        Self {
            next_id: AtomicU64::new(1),
            ring: Mutex::new(FxHashMap::default()),
            ring_capacity,
            events_dir,
            live,
        }
    }

    fn publish(&self, session_id: &str, event_type: &str, payload: Value) -> SessionEvent {
        let event = SessionEvent {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            session_id: session_id.to_string(),
            event_type: event_type.to_string(),
            timestamp: Utc::now(),
            payload,
        };

        {
            let mut ring = self.ring.lock();
            let buf = ring.entry(session_id.to_string()).or_default();
            buf.push_back(event.clone());
            while buf.len() > self.ring_capacity {
                buf.pop_front();
            }
        }

        if let Some(dir) = &self.events_dir {
            if let Err(err) = self.append_jsonl(dir, &event) {
                warn!(session_id, %err, "event_jsonl_write_failed");
            }
        }

        let _ = self.live.send(event.clone());
        event
    }

    fn append_jsonl(&self, dir: &std::path::Path, event: &SessionEvent) -> std::io::Result<()> {
        use std::io::Write as _;
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.jsonl", event.session_id));
        let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
        let line = serde_json::to_string(event).expect("SessionEvent serializes");
        writeln!(file, "{line}")
    }

    /// Buffered events with `id > last_event_id`, for new-subscriber catch-up.
    fn catch_up(&self, session_id: &str, last_event_id: u64) -> Vec<SessionEvent> {
        self.ring
            .lock()
            .get(session_id)
            .map(|buf| {
                buf.iter()
                    .filter(|e| e.id > last_event_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.live.subscribe()
    }
}

/// Owns concurrent session lifecycle: admission, FIFO queueing,
/// cancellation, shutdown, and the event log. See module docs.
pub struct SessionManager {
    collaborators: SharedCollaborators,
    config: SessionManagerConfig,
    checkpointer_type: CheckpointerType,
    sessions: Mutex<FxHashMap<String, Arc<RunningSession>>>,
    queue: Mutex<VecDeque<String>>,
    pending_queries: Mutex<FxHashMap<String, (String, f64)>>,
    event_log: Arc<EventLog>,
    admitting: std::sync::atomic::AtomicBool,
    report_dir: std::path::PathBuf,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        collaborators: SharedCollaborators,
        config: SessionManagerConfig,
        checkpointer_type: CheckpointerType,
        events_dir: Option<std::path::PathBuf>,
        report_dir: std::path::PathBuf,
    ) -> Arc<Self> {
        Arc::new(Self {
            collaborators,
            event_log: Arc::new(EventLog::new(config.event_ring_capacity, events_dir)),
            config,
            checkpointer_type,
            sessions: Mutex::new(FxHashMap::default()),
            queue: Mutex::new(VecDeque::new()),
            pending_queries: Mutex::new(FxHashMap::default()),
            admitting: std::sync::atomic::AtomicBool::new(true),
            report_dir,
        })
    }

    /// Submit a new query under the given budget. Starts immediately if
    /// under `max_concurrent_sessions`; otherwise enqueues FIFO, rejecting
    /// with [`SessionManagerError::QueueOverflow`] once `queue_limit` is hit.
    #[instrument(skip(self))]
    pub async fn submit(
        self: &Arc<Self>,
        query: String,
        budget_usd: f64,
    ) -> Result<SessionRecord, SessionManagerError> {
        if !self.admitting.load(Ordering::SeqCst) {
            return Err(SessionManagerError::NotFound {
                session_id: "<shutting down>".to_string(),
            });
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        let active = self.sessions.lock().len();

        if active < self.config.max_concurrent_sessions {
            self.start_session(session_id.clone(), query, budget_usd)
                .await
        } else {
            let mut queue = self.queue.lock();
            if queue.len() >= self.config.queue_limit {
                return Err(SessionManagerError::QueueOverflow {
                    queue_limit: self.config.queue_limit,
                });
            }
            queue.push_back(session_id.clone());
            let queued_position = queue.len();
            drop(queue);

            let record = SessionRecord {
                session_id: session_id.clone(),
                query: query.clone(),
                status: SessionStatus::Queued,
                progress: 0.0,
                cost_usd: 0.0,
                tokens_used: 0,
                queued_position: Some(queued_position),
                error: None,
                report_path: None,
            };
            // Queued sessions are tracked for cancellation purposes but have
            // no running cost tracker yet; stash the query for later start.
            self.pending_queries.lock().insert(session_id.clone(), (query, budget_usd));
            self.event_log.publish(
                &session_id,
                "queued",
                serde_json::json!({ "queued_position": queued_position }),
            );
            Ok(record)
        }
    }

    async fn start_session(
        self: &Arc<Self>,
        session_id: String,
        query: String,
        budget_usd: f64,
    ) -> Result<SessionRecord, SessionManagerError> {
        let cost = CostTracker::new(
            self.collaborators.model_prices.clone(),
            budget_usd,
            self.collaborators.warn_at_percentage,
        );

        let config = self.collaborators.pipeline_config.clone();
        let context = Arc::new(Mutex::new(ContextManager::new(
            config.compaction_window_turns,
            config.compaction_max_tokens,
            config.compaction_cooldown_turns,
        )));
        let collab = ResearchCollaborators {
            llm: Arc::clone(&self.collaborators.llm),
            search_backend: Arc::clone(&self.collaborators.search_backend),
            scrape_extractor: Arc::clone(&self.collaborators.scrape_extractor),
            cost: cost.clone(),
            llm_cache: self.collaborators.llm_cache.clone(),
            config,
            cache_tracker: Arc::new(Mutex::new(CacheTracker::new())),
            context,
        };
        let app = build_research_graph(collab);
        let mut runner = AppRunner::new(app, self.checkpointer_type).await;

        let initial_state = {
            let mut state = VersionedState::new_with_user_message(&query);
            let extra = DomainUpdate::new().set_query(query.clone()).into_map();
            for (k, v) in extra {
                state.extra.get_mut().insert(k, v);
            }
            state
        };
        runner
            .create_session(session_id.clone(), initial_state)
            .await?;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(false);

        let record = SessionRecord {
            session_id: session_id.clone(),
            query: query.clone(),
            status: SessionStatus::Running,
            progress: 0.0,
            cost_usd: 0.0,
            tokens_used: 0,
            queued_position: None,
            error: None,
            report_path: None,
        };
        let running = Arc::new(RunningSession {
            record: Mutex::new(record.clone()),
            cost,
            cancel_tx,
            done_rx,
        });
        self.sessions.lock().insert(session_id.clone(), Arc::clone(&running));

        self.event_log.publish(&session_id, "session_start", serde_json::json!({ "query": query }));

        let manager = Arc::clone(self);
        let sid = session_id.clone();
        tokio::spawn(async move {
            manager.drive_session(sid, runner, running, cancel_rx, done_tx).await;
        });

        Ok(record)
    }

    /// Drives one session's supersteps to completion, checking the
    /// cooperative cancel signal and the cost-tracker budget gate between
    /// each superstep (§5's suspension-point granularity).
    async fn drive_session(
        self: Arc<Self>,
        session_id: String,
        mut runner: AppRunner,
        running: Arc<RunningSession>,
        mut cancel_rx: watch::Receiver<bool>,
        done_tx: watch::Sender<bool>,
    ) {
        let final_status = loop {
            if *cancel_rx.borrow() {
                break SessionStatus::Cancelled;
            }

            let frontier_is_terminal = runner
                .get_session(&session_id)
                .map(|s| s.frontier.is_empty() || s.frontier.iter().all(|n| matches!(n, crate::types::NodeKind::End)))
                .unwrap_or(true);
            if frontier_is_terminal {
                break SessionStatus::Completed;
            }

            if running.cost.remaining_budget() <= 0.0 {
                self.fail_for_budget_exhaustion(&session_id, &mut runner, &running).await;
                break SessionStatus::Failed;
            }

            match runner.run_step(&session_id, Default::default()).await {
                Ok(StepResult::Completed(report)) => {
                    self.update_progress(&session_id, &running, &runner);
                    self.event_log.publish(
                        &session_id,
                        "step_end",
                        serde_json::json!({
                            "step": report.step,
                            "ran_nodes": report.ran_nodes.iter().map(|n| format!("{n:?}")).collect::<Vec<_>>(),
                        }),
                    );
                    if report.completed {
                        break SessionStatus::Completed;
                    }
                }
                Ok(StepResult::Paused(_)) => {
                    // drive_session never sets interrupt options, so this
                    // branch is unreachable in normal operation.
                    break SessionStatus::Failed;
                }
                Err(err) => {
                    warn!(session_id, %err, "session_step_failed");
                    self.event_log.publish(
                        &session_id,
                        "error",
                        serde_json::json!({ "error": err.to_string() }),
                    );
                    break SessionStatus::Failed;
                }
            }
        };

        let report_path = if final_status == SessionStatus::Completed {
            self.persist_report(&session_id, &runner)
        } else {
            None
        };

        {
            let mut record = running.record.lock();
            record.status = final_status;
            record.cost_usd = running.cost.total_cost();
            record.report_path = report_path;
            if final_status == SessionStatus::Failed && record.error.is_none() {
                record.error = Some("session step failed".to_string());
            }
        }
        self.event_log.publish(
            &session_id,
            "session_end",
            serde_json::json!({ "status": format!("{final_status:?}") }),
        );
        let _ = done_tx.send(true);

        self.sessions.lock().remove(&session_id);
        self.admit_next_queued().await;
    }

    /// Writes the completed session's report to `<sanitized-query>_<timestamp>.md`
    /// under `report_dir`, plus a sibling `.meta.json` (§6 persistent layout).
    /// Returns the `.md` path on success; failures are logged and swallowed —
    /// a write failure here must not flip a completed session to FAILED.
    fn persist_report(&self, session_id: &str, runner: &AppRunner) -> Option<String> {
        let session_state = runner.get_session(session_id)?;
        let snapshot = session_state.state.snapshot();
        let view = DomainView::new(&snapshot.extra);
        let report = view.final_report()?;

        let query = {
            let q = view.query();
            if q.is_empty() { session_id.to_string() } else { q }
        };
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let stem = format!("{}_{timestamp}", sanitize_filename_component(&query));
        let md_path = self.report_dir.join(format!("{stem}.md"));
        let meta_path = self.report_dir.join(format!("{stem}.meta.json"));

        if let Err(err) = std::fs::create_dir_all(&self.report_dir) {
            warn!(session_id, %err, "report_dir_create_failed");
            return None;
        }
        if let Err(err) = std::fs::write(&md_path, &report) {
            warn!(session_id, %err, "report_write_failed");
            return None;
        }
        let meta = serde_json::json!({
            "query": query,
            "generated_at": Utc::now().to_rfc3339(),
            "word_count": report.split_whitespace().count(),
            "filename": md_path.file_name().and_then(|n| n.to_str()),
            "session_id": session_id,
        });
        if let Err(err) = std::fs::write(&meta_path, serde_json::to_vec_pretty(&meta).ok()?) {
            warn!(session_id, %err, "report_meta_write_failed");
        }
        md_path.to_str().map(str::to_string)
    }

    /// Read back a persisted report's Markdown content, for the HTTP/MCP
    /// surfaces' report-fetch endpoints.
    pub fn read_report(&self, session_id: &str) -> Option<String> {
        let path = self.get(session_id)?.report_path?;
        std::fs::read_to_string(path).ok()
    }

    async fn fail_for_budget_exhaustion(&self, session_id: &str, runner: &mut AppRunner, running: &RunningSession) {
        warn!(session_id, "budget_exhausted_pre_dispatch");
        let extra = DomainUpdate::new()
            .append_error_log(&[ErrorLogEntry {
                step: "budget_gate".to_string(),
                message: "budget exhausted before dispatch".to_string(),
                recoverable: false,
            }])
            .into_map();
        if let Err(err) = runner.inject_extra(session_id, extra).await {
            warn!(session_id, %err, "budget_exhaustion_error_log_write_failed");
        }
        running.record.lock().error = Some("budget exhausted before dispatch".to_string());
        self.event_log.publish(
            session_id,
            "budget_exhausted",
            serde_json::json!({ "reason": "budget exhausted" }),
        );
    }

    fn update_progress(&self, session_id: &str, running: &RunningSession, runner: &AppRunner) {
        let progress = runner
            .get_session(session_id)
            .map(|s| {
                let view = DomainView::new(&s.state.snapshot().extra);
                let has_report = view.final_report().is_some();
                if has_report {
                    100.0
                } else if !view.summaries().is_empty() {
                    80.0
                } else if !view.scraped_content().is_empty() {
                    60.0
                } else if !view.search_results().is_empty() {
                    30.0
                } else {
                    10.0
                }
            })
            .unwrap_or(0.0);
        let mut record = running.record.lock();
        record.progress = progress;
        record.cost_usd = running.cost.total_cost();
    }

    async fn admit_next_queued(self: &Arc<Self>) {
        let next = self.queue.lock().pop_front();
        if let Some(session_id) = next {
            if let Some((query, budget_usd)) = self.pending_queries.lock().remove(&session_id) {
                if let Err(err) = self.start_session(session_id.clone(), query, budget_usd).await {
                    warn!(session_id, %err, "dequeued_session_start_failed");
                }
            }
        }
    }

    /// Cancel a session. A queued session transitions directly to
    /// `CANCELLED`; a running session is signaled cooperatively.
    pub fn cancel(&self, session_id: &str) -> Result<(), SessionManagerError> {
        if let Some(running) = self.sessions.lock().get(session_id) {
            let _ = running.cancel_tx.send(true);
            return Ok(());
        }
        let mut queue = self.queue.lock();
        if let Some(pos) = queue.iter().position(|id| id == session_id) {
            queue.remove(pos);
            self.event_log.publish(session_id, "cancelled", serde_json::json!({}));
            return Ok(());
        }
        Err(SessionManagerError::NotFound { session_id: session_id.to_string() })
    }

    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<SessionRecord> {
        self.sessions
            .lock()
            .get(session_id)
            .map(|r| r.record.lock().clone())
    }

    #[must_use]
    pub fn list(&self) -> Vec<SessionRecord> {
        self.sessions.lock().values().map(|r| r.record.lock().clone()).collect()
    }

    /// Subscribe to a session's event stream. Buffered events with
    /// `id > last_event_id` are drained before live delivery begins (S6).
    pub fn subscribe(
        &self,
        session_id: &str,
        last_event_id: u64,
    ) -> (Vec<SessionEvent>, broadcast::Receiver<SessionEvent>) {
        let catch_up = self.event_log.catch_up(session_id, last_event_id);
        let live = self.event_log.subscribe();
        (catch_up, live)
    }

    /// Stop admitting, signal all running sessions to cancel, wait up to
    /// `drain_timeout`, then mark stragglers cancelled.
    pub async fn shutdown(&self) {
        self.admitting.store(false, Ordering::SeqCst);
        let sessions: Vec<Arc<RunningSession>> = self.sessions.lock().values().cloned().collect();
        for session in &sessions {
            let _ = session.cancel_tx.send(true);
        }
        let deadline = tokio::time::Instant::now() + self.config.drain_timeout;
        for session in &sessions {
            let mut done_rx = session.done_rx.clone();
            let _ = tokio::time::timeout_at(deadline, done_rx.changed()).await;
        }
        for (_, queued_id) in self.pending_queries.lock().drain() {
            let _ = queued_id;
        }
        self.queue.lock().clear();
    }
}
