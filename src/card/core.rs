//! Public card instance surface.
//!
//! A `Card` is a thin handle: id plus a shared reference to the runtime
//! core. Every operation locks the core, mutates, then dispatches any
//! emitted events after the lock is released, so handlers may re-enter
//! the card API. Operations on a destroyed card are silent no-ops.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use crate::boundary::Boundary;
use crate::config::CardOptions;
use crate::engine::{EnginePhase, EngineState, content_hash};
use crate::error::{CardError, Result};
use crate::events::{EventType, Handler, ListenerRegistry};
use crate::images::{SettlementReport, SettlementTracker, SettlementWait};
use crate::logging::{LogLevel, json_kv};
use crate::runtime::{RuntimeCore, TaskId, TaskKind, dispatch_pending};

/// Runtime-unique card identifier. Ids are never reused, including after
/// destruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CardId(u64);

impl CardId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "card-{}", self.0)
    }
}

/// An unresolved `wait_for_images` call, owned by the card until its
/// tracker settles or the timeout task fires.
pub(crate) struct PendingWait {
    pub tracker: SettlementTracker,
    pub timeout_task: TaskId,
    pub cell: SettlementWait,
}

/// Everything the runtime holds per card.
pub(crate) struct CardState {
    pub id: CardId,
    pub options: CardOptions,
    pub boundary: Boundary,
    pub listeners: ListenerRegistry,
    pub engine: EngineState,
    pub waits: Vec<PendingWait>,
    pub destroyed: bool,
}

impl CardState {
    pub fn new(id: CardId, options: CardOptions, boundary: Boundary) -> Self {
        let hash = content_hash(&options.html, &options.data);
        let engine = EngineState::new(options.target_width, hash);
        Self {
            id,
            options,
            boundary,
            listeners: ListenerRegistry::new(),
            engine,
            waits: Vec::new(),
            destroyed: false,
        }
    }
}

/// Handle to one card instance. Cheap to clone; all clones refer to the
/// same underlying card.
#[derive(Clone)]
pub struct Card {
    id: CardId,
    core: Arc<Mutex<RuntimeCore>>,
}

impl std::fmt::Debug for Card {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Card").field("id", &self.id).finish()
    }
}

impl Card {
    pub(crate) fn new(id: CardId, core: Arc<Mutex<RuntimeCore>>) -> Self {
        Self { id, core }
    }

    pub fn id(&self) -> CardId {
        self.id
    }

    fn with_core<R>(&self, op: impl FnOnce(&mut RuntimeCore) -> R) -> R {
        let result = {
            let mut core = self.core.lock().expect("runtime mutex poisoned");
            op(&mut core)
        };
        dispatch_pending(&self.core);
        result
    }

    pub fn is_destroyed(&self) -> bool {
        self.with_core(|core| {
            core.cards
                .get(&self.id)
                .map(|card| card.destroyed)
                .unwrap_or(true)
        })
    }

    /// Replace the card's markup. Invalidates the measurement cache and
    /// schedules a resize. Parse failures leave the card unchanged and are
    /// surfaced through the `error` event.
    pub fn set_html(&self, html: &str) -> &Self {
        let _ = self.with_core(|core| core.op_set_html(self.id, html));
        self
    }

    /// Update the injected stylesheet. `reset` replaces previously applied
    /// author css instead of appending.
    pub fn set_style(&self, css: &str, reset: bool) -> &Self {
        let _ = self.with_core(|core| core.op_set_style(self.id, css, reset));
        self
    }

    /// Replace markup and/or field data in one call. Emits `content-change`
    /// per field whose value actually changed.
    pub fn set_content(&self, html: Option<&str>, data: BTreeMap<String, String>) -> &Self {
        let _ = self.with_core(|core| core.op_set_content(self.id, html, data));
        self
    }

    /// Apply theme variables. Unrecognized keys are ignored.
    pub fn set_css_variables(&self, vars: &BTreeMap<String, String>) -> &Self {
        let _ = self.with_core(|core| core.op_set_css_variables(self.id, vars));
        self
    }

    /// Request a resize toward `width` (or the current target width).
    /// Debounced; rapid calls coalesce into one physical pass.
    pub fn resize(&self, width: Option<f64>) -> &Self {
        self.with_core(|core| core.request_resize(self.id, width));
        self
    }

    /// Wait for the images currently in the content region to settle.
    /// Resolves with a report on full settlement or when `timeout`
    /// (default: the runtime's image timeout) elapses on the virtual clock.
    pub fn wait_for_images(&self, timeout: Option<Duration>) -> SettlementWait {
        self.with_core(|core| core.op_wait_for_images(self.id, timeout))
    }

    pub fn on(&self, event: EventType, handler: Handler) -> &Self {
        self.with_core(|core| {
            if let Some(card) = core.cards.get_mut(&self.id) {
                if !card.destroyed {
                    card.listeners.on(event, handler);
                }
            }
        });
        self
    }

    pub fn off(&self, event: EventType, handler: Option<&Handler>) -> &Self {
        self.with_core(|core| {
            if let Some(card) = core.cards.get_mut(&self.id) {
                if !card.destroyed {
                    card.listeners.off(event, handler);
                }
            }
        });
        self
    }

    /// Tear the card down: cancel outstanding tasks, resolve outstanding
    /// waits, detach the subtree, drop listeners. Idempotent.
    pub fn destroy(&self) -> &Self {
        self.with_core(|core| core.op_destroy(self.id));
        self
    }

    /// Scale currently applied to the content region.
    pub fn applied_scale(&self) -> f64 {
        self.with_core(|core| {
            core.cards
                .get(&self.id)
                .map(|card| card.engine.applied_scale)
                .unwrap_or(1.0)
        })
    }

    pub fn phase(&self) -> EnginePhase {
        self.with_core(|core| {
            core.cards
                .get(&self.id)
                .map(|card| card.engine.phase)
                .unwrap_or(EnginePhase::Idle)
        })
    }

    pub fn host_node(&self) -> Option<crate::dom::NodeId> {
        self.with_core(|core| core.cards.get(&self.id).map(|card| card.boundary.host))
    }

    pub fn content_node(&self) -> Option<crate::dom::NodeId> {
        self.with_core(|core| core.cards.get(&self.id).map(|card| card.boundary.content))
    }
}

impl RuntimeCore {
    /// The `Err(Destroyed)` of every `op_*` method is the expected
    /// post-teardown race; `Card` swallows it at the API boundary.
    pub(crate) fn op_set_html(&mut self, card_id: CardId, html: &str) -> Result<()> {
        let markup_result;
        {
            let Some(card) = self.cards.get_mut(&card_id) else {
                return Err(CardError::Destroyed);
            };
            if card.destroyed {
                return Err(CardError::Destroyed);
            }
            markup_result = card.boundary.set_markup(&mut self.doc, html, &self.allow);
            if markup_result.is_ok() {
                card.options.html = html.to_string();
                let data: Vec<(String, String)> = card
                    .options
                    .data
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                for (key, value) in &data {
                    card.boundary.apply_field(&mut self.doc, key, value);
                }
                card.engine.content_hash = content_hash(&card.options.html, &card.options.data);
            }
        }
        match markup_result {
            // `content-change` announces field-data changes; a full markup
            // swap only schedules the resize.
            Ok(()) => self.request_resize(card_id, None),
            Err(err) => self.report_operation_failure(card_id, "set_html", &err.to_string()),
        }
        Ok(())
    }

    pub(crate) fn op_set_style(&mut self, card_id: CardId, css: &str, reset: bool) -> Result<()> {
        {
            let Some(card) = self.cards.get_mut(&card_id) else {
                return Err(CardError::Destroyed);
            };
            if card.destroyed {
                return Err(CardError::Destroyed);
            }
            card.boundary.set_style_text(&mut self.doc, css, reset);
            if reset {
                card.options.css = css.to_string();
            } else {
                card.options.css.push_str(css);
            }
        }
        self.request_resize(card_id, None);
        Ok(())
    }

    pub(crate) fn op_set_content(
        &mut self,
        card_id: CardId,
        html: Option<&str>,
        data: BTreeMap<String, String>,
    ) -> Result<()> {
        let mut changed: Vec<(String, String)> = Vec::new();
        {
            let Some(card) = self.cards.get_mut(&card_id) else {
                return Err(CardError::Destroyed);
            };
            if card.destroyed {
                return Err(CardError::Destroyed);
            }
            if let Some(html) = html {
                match card.boundary.set_markup(&mut self.doc, html, &self.allow) {
                    Ok(()) => card.options.html = html.to_string(),
                    Err(err) => {
                        let message = err.to_string();
                        self.report_operation_failure(card_id, "set_content", &message);
                        return Ok(());
                    }
                }
            }
            for (key, value) in data {
                if card.options.data.get(&key) != Some(&value) {
                    changed.push((key.clone(), value.clone()));
                }
                card.options.data.insert(key, value);
            }
            // Re-apply the full data set so a fresh markup swap gets every
            // slot filled, not just the changed ones.
            let all: Vec<(String, String)> = card
                .options
                .data
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            for (key, value) in &all {
                card.boundary.apply_field(&mut self.doc, key, value);
            }
            card.engine.content_hash = content_hash(&card.options.html, &card.options.data);
        }
        for (key, value) in changed {
            self.emit(
                card_id,
                EventType::ContentChange,
                vec![json_kv("field", json!(key)), json_kv("value", json!(value))],
            );
        }
        self.request_resize(card_id, None);
        Ok(())
    }

    pub(crate) fn op_set_css_variables(
        &mut self,
        card_id: CardId,
        vars: &BTreeMap<String, String>,
    ) -> Result<()> {
        let Some(card) = self.cards.get_mut(&card_id) else {
            return Err(CardError::Destroyed);
        };
        if card.destroyed {
            return Err(CardError::Destroyed);
        }
        card.boundary.apply_style_variables(
            &mut self.doc,
            vars.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        );
        for (key, value) in vars {
            card.options.styles.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    pub(crate) fn op_wait_for_images(
        &mut self,
        card_id: CardId,
        timeout: Option<Duration>,
    ) -> SettlementWait {
        let timeout = timeout.unwrap_or(self.config.image_timeout);
        let Some(card) = self.cards.get_mut(&card_id) else {
            return SettlementWait::resolved(destroyed_report());
        };
        if card.destroyed {
            return SettlementWait::resolved(destroyed_report());
        }
        let tracker = SettlementTracker::observe(&self.doc, card.boundary.content);
        if let Some(report) = tracker.report() {
            return SettlementWait::resolved(report);
        }
        let cell = SettlementWait::new();
        let timeout_task = self
            .scheduler
            .schedule(timeout, TaskKind::WaitTimeout(card_id));
        card.waits.push(PendingWait {
            tracker,
            timeout_task,
            cell: cell.clone(),
        });
        cell
    }

    pub(crate) fn op_destroy(&mut self, card_id: CardId) {
        {
            let Some(card) = self.cards.get_mut(&card_id) else {
                return;
            };
            if card.destroyed {
                return;
            }
            card.destroyed = true;
            if let Some(task) = card.engine.debounce_task.take() {
                self.scheduler.cancel(task);
            }
            if let Some(task) = card.engine.hide_task.take() {
                self.scheduler.cancel(task);
            }
            if let Some(task) = card.engine.relaunch_task.take() {
                self.scheduler.cancel(task);
            }
            if let Some(pass) = card.engine.settlement.take() {
                self.scheduler.cancel(pass.timeout_task);
            }
            for mut wait in card.waits.drain(..) {
                self.scheduler.cancel(wait.timeout_task);
                if let Some(report) = wait.tracker.resolve_timed_out() {
                    wait.cell.fill(report);
                }
            }
            card.engine.pending_width = None;
            card.engine.phase = EnginePhase::Idle;
            card.listeners.clear();
            self.hosts.remove(&card.boundary.host);
            self.doc.remove_subtree(card.boundary.host);
        }
        self.with_metrics(|metrics| metrics.record_card_destroyed());
        self.log(
            LogLevel::Info,
            "card::runtime",
            "card_destroyed",
            vec![json_kv("card", json!(card_id.to_string()))],
        );
    }

    /// Post-construction failures are recovered locally: log, emit `error`,
    /// leave the card as it was.
    pub(crate) fn report_operation_failure(&mut self, card_id: CardId, op: &str, message: &str) {
        let err = CardError::operation(format!("{op}: {message}"));
        self.log(
            LogLevel::Warn,
            "card::runtime",
            "operation_failed",
            vec![
                json_kv("card", json!(card_id.to_string())),
                json_kv("op", json!(op)),
                json_kv("message", json!(message)),
            ],
        );
        self.emit_error(card_id, err.to_string());
    }
}

fn destroyed_report() -> SettlementReport {
    SettlementReport {
        all_loaded: true,
        failed: 0,
        total: 0,
        timed_out: false,
    }
}
