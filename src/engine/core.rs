//! Resize/scale engine.
//!
//! One state machine per card coordinates debounced resize requests,
//! image settlement, natural-size measurement and scale application. The
//! serialization invariant: at most one physical measurement/scale pass is
//! in flight per card, and a request arriving mid-pass is coalesced into a
//! single pending follow-up carrying the most recently requested width.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::json;

use crate::card::CardId;
use crate::dom::ImageState;
use crate::geometry::{Size, fit_scale};
use crate::images::{SettlementReport, SettlementTracker};
use crate::logging::{LogLevel, json_kv};
use crate::measure;
use crate::runtime::{RuntimeCore, TaskId, TaskKind};

/// Externally observable engine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    Idle,
    Debouncing,
    Measuring,
    Scaling,
    Settling,
}

impl EnginePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Debouncing => "debouncing",
            Self::Measuring => "measuring",
            Self::Scaling => "scaling",
            Self::Settling => "settling",
        }
    }
}

/// Natural-size snapshot, valid while the content hash matches.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MeasureCache {
    pub content_hash: blake3::Hash,
    pub natural: Size,
}

/// Settlement wait owned by an in-flight pass.
#[derive(Debug)]
pub(crate) struct PassSettlement {
    pub tracker: SettlementTracker,
    pub timeout_task: TaskId,
}

#[derive(Debug)]
pub(crate) struct EngineState {
    pub phase: EnginePhase,
    /// Width the next debounce fire will use (most recent request wins).
    pub requested_width: f64,
    /// Width remembered while a pass is in flight; relaunched afterwards.
    pub pending_width: Option<f64>,
    pub in_flight_width: f64,
    pub debounce_task: Option<TaskId>,
    pub hide_task: Option<TaskId>,
    pub relaunch_task: Option<TaskId>,
    pub settlement: Option<PassSettlement>,
    pub cache: Option<MeasureCache>,
    pub content_hash: blake3::Hash,
    pub applied_scale: f64,
}

impl EngineState {
    pub fn new(width: f64, content_hash: blake3::Hash) -> Self {
        Self {
            phase: EnginePhase::Idle,
            requested_width: width,
            pending_width: None,
            in_flight_width: width,
            debounce_task: None,
            hide_task: None,
            relaunch_task: None,
            settlement: None,
            cache: None,
            content_hash,
            applied_scale: 1.0,
        }
    }

    pub fn pass_in_flight(&self) -> bool {
        matches!(
            self.phase,
            EnginePhase::Measuring | EnginePhase::Scaling | EnginePhase::Settling
        )
    }
}

/// Content revision hash: markup plus field data, so either kind of
/// mutation invalidates cached measurements.
pub(crate) fn content_hash(html: &str, data: &BTreeMap<String, String>) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(html.as_bytes());
    for (key, value) in data {
        hasher.update(&[0x1f]);
        hasher.update(key.as_bytes());
        hasher.update(&[0x1e]);
        hasher.update(value.as_bytes());
    }
    hasher.finalize()
}

impl RuntimeCore {
    /// Public resize entry point. Restarts the debounce window so bursts
    /// of rapid mutations coalesce into one physical pass.
    pub(crate) fn request_resize(&mut self, card_id: CardId, width: Option<f64>) {
        let debounce = self.config.debounce;
        let mut coalesced = false;
        let requested;
        let phase;
        {
            let Some(card) = self.cards.get_mut(&card_id) else {
                return;
            };
            if card.destroyed {
                return;
            }
            requested = width.unwrap_or(card.options.target_width);
            card.engine.requested_width = requested;
            if let Some(task) = card.engine.debounce_task.take() {
                self.scheduler.cancel(task);
                coalesced = true;
            }
            let task = self.scheduler.schedule(debounce, TaskKind::Debounce(card_id));
            card.engine.debounce_task = Some(task);
            if card.engine.phase == EnginePhase::Idle {
                card.engine.phase = EnginePhase::Debouncing;
            }
            phase = card.engine.phase;
        }
        self.with_metrics(|metrics| {
            metrics.record_resize_request();
            if coalesced {
                metrics.record_coalesced();
            }
        });
        self.log(
            LogLevel::Debug,
            "card::engine",
            "resize_requested",
            vec![
                json_kv("card", json!(card_id.to_string())),
                json_kv("width", json!(requested)),
                json_kv("coalesced", json!(coalesced)),
                json_kv("phase", json!(phase.as_str())),
            ],
        );
    }

    pub(crate) fn on_debounce(&mut self, card_id: CardId, task: TaskId) {
        let width;
        {
            let Some(card) = self.cards.get_mut(&card_id) else {
                return;
            };
            if card.destroyed || card.engine.debounce_task != Some(task) {
                return;
            }
            card.engine.debounce_task = None;
            width = card.engine.requested_width;
            if card.engine.pass_in_flight() {
                // Wait for the in-flight pass; last width wins.
                card.engine.pending_width = Some(width);
                return;
            }
        }
        self.start_pass(card_id, width);
    }

    /// Begin the physical pass: validate the width, show the overlay, pin
    /// the host width, then wait for image settlement.
    pub(crate) fn start_pass(&mut self, card_id: CardId, width: f64) {
        let bounds = self.config.resize_bounds;
        let image_timeout = self.config.image_timeout;
        let mut resolved: Option<SettlementReport> = None;
        {
            let Some(card) = self.cards.get_mut(&card_id) else {
                return;
            };
            if card.destroyed {
                return;
            }
            if !bounds.contains(width) {
                // Out-of-range requests usually come from transient or
                // racing callers; drop them without an error.
                card.engine.phase = EnginePhase::Idle;
                self.log(
                    LogLevel::Debug,
                    "card::engine",
                    "resize_dropped",
                    vec![
                        json_kv("card", json!(card_id.to_string())),
                        json_kv("width", json!(width)),
                    ],
                );
                return;
            }
            card.engine.phase = EnginePhase::Measuring;
            card.engine.in_flight_width = width;
            if let Some(stale) = card.engine.hide_task.take() {
                // A hide scheduled by a previous pass must not race this
                // pass's overlay show.
                self.scheduler.cancel(stale);
            }
            card.boundary.show_overlay(&mut self.doc);
            card.boundary.set_host_width(&mut self.doc, width);

            let tracker = SettlementTracker::observe(&self.doc, card.boundary.content);
            if tracker.is_resolved() {
                resolved = tracker.report();
            } else {
                let timeout = self
                    .scheduler
                    .schedule(image_timeout, TaskKind::PassTimeout(card_id));
                card.engine.settlement = Some(PassSettlement {
                    tracker,
                    timeout_task: timeout,
                });
                card.engine.phase = EnginePhase::Scaling;
            }
        }
        self.with_metrics(|metrics| metrics.record_resize_pass());
        if let Some(report) = resolved {
            self.with_metrics(|metrics| metrics.record_settlement_wait(false));
            self.finish_pass(card_id, report);
        }
    }

    /// Settlement arrived (or timed out): measure, scale, schedule the
    /// overlay hide for the next paint opportunity.
    pub(crate) fn finish_pass(&mut self, card_id: CardId, report: SettlementReport) {
        if !report.all_loaded {
            self.log(
                LogLevel::Warn,
                "card::engine",
                "images_unsettled",
                vec![
                    json_kv("card", json!(card_id.to_string())),
                    json_kv("failed", json!(report.failed)),
                    json_kv("total", json!(report.total)),
                    json_kv("timed_out", json!(report.timed_out)),
                ],
            );
        }
        self.mark_failed_images(card_id, report.timed_out);

        let frame_interval = self.config.frame_interval;
        let mut cache_hit = false;
        let applied: Option<(f64, f64, Size)>;
        {
            let Some(card) = self.cards.get_mut(&card_id) else {
                return;
            };
            if card.destroyed {
                return;
            }
            card.engine.settlement = None;
            if !self.doc.is_alive(card.boundary.content) {
                applied = None;
            } else {
                card.engine.phase = EnginePhase::Scaling;
                // Recheck cache validity: a content mutation may have landed
                // while this pass was waiting on images.
                let hash = card.engine.content_hash;
                let natural = match card.engine.cache {
                    Some(cache) if cache.content_hash == hash => {
                        cache_hit = true;
                        cache.natural
                    }
                    _ => {
                        card.boundary.reset_transform(&mut self.doc);
                        let measured = measure::natural_size(&self.doc, card.boundary.content);
                        card.engine.cache = Some(MeasureCache {
                            content_hash: hash,
                            natural: measured,
                        });
                        measured
                    }
                };
                let target = card.engine.in_flight_width;
                let scale = fit_scale(target, natural.width);
                card.boundary.apply_scale(&mut self.doc, scale, target, natural);
                card.engine.applied_scale = scale;
                card.options.target_width = target;

                if let Some(stale) = card.engine.hide_task.take() {
                    self.scheduler.cancel(stale);
                }
                let hide = self.scheduler.schedule(frame_interval, TaskKind::Frame(card_id));
                card.engine.hide_task = Some(hide);
                card.engine.phase = EnginePhase::Settling;
                applied = Some((target, scale, natural));
            }
        }

        match applied {
            Some((target, scale, natural)) => {
                self.with_metrics(|metrics| metrics.record_measurement(cache_hit));
                self.log(
                    LogLevel::Info,
                    "card::engine",
                    "resize_applied",
                    vec![
                        json_kv("card", json!(card_id.to_string())),
                        json_kv("target_width", json!(target)),
                        json_kv("scale", json!(scale)),
                        json_kv("natural_width", json!(natural.width)),
                        json_kv("natural_height", json!(natural.height)),
                        json_kv("cache_hit", json!(cache_hit)),
                    ],
                );
            }
            None => self.fail_pass(card_id, "content region detached during resize"),
        }
    }

    /// Recovery path: never leave a stuck overlay or half-applied scale.
    pub(crate) fn fail_pass(&mut self, card_id: CardId, reason: &str) {
        {
            let Some(card) = self.cards.get_mut(&card_id) else {
                return;
            };
            if card.destroyed {
                return;
            }
            if let Some(pass) = card.engine.settlement.take() {
                self.scheduler.cancel(pass.timeout_task);
            }
            if let Some(hide) = card.engine.hide_task.take() {
                self.scheduler.cancel(hide);
            }
            card.engine.pending_width = None;
            card.engine.phase = EnginePhase::Idle;
            card.boundary.hide_overlay(&mut self.doc);
        }
        self.log(
            LogLevel::Warn,
            "card::engine",
            "resize_failed",
            vec![
                json_kv("card", json!(card_id.to_string())),
                json_kv("reason", json!(reason)),
            ],
        );
        self.emit_error(card_id, reason.to_string());
    }

    /// Paint opportunity: hide the overlay, then either go idle or hand a
    /// remembered pending width to a fresh scheduling turn.
    pub(crate) fn on_frame(&mut self, card_id: CardId, task: TaskId) {
        let Some(card) = self.cards.get_mut(&card_id) else {
            return;
        };
        if card.destroyed || card.engine.hide_task != Some(task) {
            return;
        }
        card.engine.hide_task = None;
        card.boundary.hide_overlay(&mut self.doc);
        match card.engine.pending_width.take() {
            Some(width) => {
                // Relaunch on a fresh turn so this pass's cleanup has fully
                // completed before the next one enters.
                let relaunch = self
                    .scheduler
                    .schedule(Duration::ZERO, TaskKind::Relaunch(card_id, width));
                card.engine.relaunch_task = Some(relaunch);
                card.engine.phase = EnginePhase::Idle;
            }
            None => {
                card.engine.phase = EnginePhase::Idle;
            }
        }
    }

    pub(crate) fn on_relaunch(&mut self, card_id: CardId, width: f64) {
        let in_flight = {
            let Some(card) = self.cards.get_mut(&card_id) else {
                return;
            };
            if card.destroyed {
                return;
            }
            card.engine.relaunch_task = None;
            if card.engine.pass_in_flight() {
                card.engine.pending_width = Some(width);
                true
            } else {
                false
            }
        };
        if !in_flight {
            self.start_pass(card_id, width);
        }
    }

    pub(crate) fn on_pass_timeout(&mut self, card_id: CardId, task: TaskId) {
        let resolved = {
            let Some(card) = self.cards.get_mut(&card_id) else {
                return;
            };
            if card.destroyed {
                return;
            }
            match card.engine.settlement.as_mut() {
                Some(pass) if pass.timeout_task == task => {
                    let pending = pass.tracker.pending_nodes().len();
                    pass.tracker
                        .resolve_timed_out()
                        .map(|report| (report, pending))
                }
                _ => None,
            }
        };
        if let Some((report, pending)) = resolved {
            self.log(
                LogLevel::Warn,
                "card::engine",
                "settlement_timed_out",
                vec![
                    json_kv("card", json!(card_id.to_string())),
                    json_kv("pending", json!(pending)),
                ],
            );
            self.with_metrics(|metrics| metrics.record_settlement_wait(true));
            self.finish_pass(card_id, report);
        }
    }

    /// Route one image transition into the card's active waits.
    pub(crate) fn note_image_settled(&mut self, card_id: CardId, node: crate::dom::NodeId, ok: bool) {
        let mut pass_report: Option<SettlementReport> = None;
        let mut resolved_waits = 0u64;
        {
            let Some(card) = self.cards.get_mut(&card_id) else {
                return;
            };
            if card.destroyed {
                return;
            }
            if let Some(pass) = card.engine.settlement.as_mut() {
                if let Some(report) = pass.tracker.note_settled(node, ok) {
                    self.scheduler.cancel(pass.timeout_task);
                    card.engine.settlement = None;
                    pass_report = Some(report);
                }
            }
            card.waits.retain_mut(|wait| {
                if let Some(report) = wait.tracker.note_settled(node, ok) {
                    wait.cell.fill(report);
                    self.scheduler.cancel(wait.timeout_task);
                    resolved_waits += 1;
                    false
                } else {
                    true
                }
            });
        }
        if resolved_waits > 0 {
            self.with_metrics(|metrics| {
                for _ in 0..resolved_waits {
                    metrics.record_settlement_wait(false);
                }
            });
        }
        if let Some(report) = pass_report {
            self.with_metrics(|metrics| metrics.record_settlement_wait(false));
            self.finish_pass(card_id, report);
        }
    }

    pub(crate) fn on_wait_timeout(&mut self, card_id: CardId, task: TaskId) {
        let mut timed_out = false;
        {
            let Some(card) = self.cards.get_mut(&card_id) else {
                return;
            };
            card.waits.retain_mut(|wait| {
                if wait.timeout_task == task {
                    if let Some(report) = wait.tracker.resolve_timed_out() {
                        wait.cell.fill(report);
                    }
                    timed_out = true;
                    false
                } else {
                    true
                }
            });
        }
        if timed_out {
            self.with_metrics(|metrics| metrics.record_settlement_wait(true));
        }
    }

    /// Apply the failure marker class to settled-failed images (and, after
    /// a timeout, to images still pending).
    fn mark_failed_images(&mut self, card_id: CardId, include_pending: bool) {
        let Some(card) = self.cards.get(&card_id) else {
            return;
        };
        let content = card.boundary.content;
        let failed: Vec<_> = self
            .doc
            .images_under(content)
            .into_iter()
            .filter(|&img| match self.doc.image_state(img) {
                Some(ImageState::Failed) => true,
                Some(ImageState::Pending) => include_pending,
                _ => false,
            })
            .collect();
        for img in failed {
            self.doc.add_class(img, crate::boundary::IMG_FAILED_CLASS);
        }
    }
}
