//! The boot cycle post code log.
//!
//! Holds the codes of the current boot cycle in memory and keeps past cycles
//! in a ring of `max_boot_cycle_num` slots on disk. The current cycle is
//! written to its slot on a coalescing timer and once more when the host
//! powers off. The slot index advances on the first code of a new cycle.
//!
//! Nothing in here fails towards the caller: storage errors are logged and the
//! in memory state stays authoritative until the next flush succeeds. A cycle
//! sealed while storage is failing is held back with its slot and retried on
//! every tick ahead of the current cycle.

use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::{
    actions::ActionDispatcher,
    codes::{BootCycle, PostCode, RotationState},
    config::ManagerConfig,
    persist::{CycleStorage, error::PersistError},
};

pub mod clock;
pub mod flush;

use clock::{Anchor, Clock};
use flush::FlushTimer;

/// Store settings for one host node
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub dir: PathBuf,
    pub max_boot_cycle_num: u16,
    pub max_post_codes_per_cycle: usize,
    pub flush_interval: Duration,
    pub bios_post_code_log: bool,
}

impl StoreSettings {
    pub fn new(cfg: &ManagerConfig, node: u16) -> Self {
        Self {
            dir: cfg.node_dir(node),
            max_boot_cycle_num: cfg.max_boot_cycle_num,
            max_post_codes_per_cycle: cfg.max_post_codes_per_cycle,
            flush_interval: cfg.flush_interval(),
            bios_post_code_log: cfg.bios_post_code_log,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreStatus {
    pub current_boot_cycle_index: u16,
    pub current_boot_cycle_count: u16,
    pub max_boot_cycle_num: u16,
}

pub struct PostCodeStore {
    settings: StoreSettings,
    storage: CycleStorage,
    actions: ActionDispatcher,
    clock: Box<dyn Clock>,
    codes: BootCycle,
    rotation: RotationState,
    anchor: Option<Anchor>,
    flush: FlushTimer,
    dirty: bool,
    /// Sealed cycles whose final write failed, oldest first, with their slots
    unsaved: Vec<(u16, BootCycle)>,
    current_tx: watch::Sender<Option<PostCode>>,
}

impl PostCodeStore {
    /// Opens the node directory and restores the rotation counters
    pub async fn open(
        settings: StoreSettings,
        actions: ActionDispatcher,
        clock: Box<dyn Clock>,
    ) -> Self {
        let storage = CycleStorage::new(&settings.dir);
        if let Err(e) = storage.ensure_dir().await {
            error!("{e}");
        }

        let rotation = match storage.read_rotation_state().await {
            Ok(Some(rotation)) => rotation.clamped(settings.max_boot_cycle_num),
            Ok(None) => RotationState::default(),
            Err(e) => {
                error!("restoring rotation state, starting from zero: {e}");
                RotationState::default()
            }
        };
        info!(
            index = rotation.index,
            count = rotation.count,
            dir = %settings.dir.display(),
            "post code store opened"
        );

        let (current_tx, _) = watch::channel(None);

        Self {
            settings,
            storage,
            actions,
            clock,
            codes: BootCycle::new(),
            rotation,
            anchor: None,
            flush: FlushTimer::Idle,
            dirty: false,
            unsaved: Vec::new(),
            current_tx,
        }
    }

    pub fn status(&self) -> StoreStatus {
        StoreStatus {
            current_boot_cycle_index: self.rotation.index,
            current_boot_cycle_count: self.rotation.count,
            max_boot_cycle_num: self.settings.max_boot_cycle_num,
        }
    }

    /// Receiver of the last code recorded, `None` after a reset
    pub fn subscribe_current(&self) -> watch::Receiver<Option<PostCode>> {
        self.current_tx.subscribe()
    }

    pub fn flush_deadline(&self) -> Option<tokio::time::Instant> {
        self.flush.deadline()
    }

    pub fn on_post_code(&mut self, code: PostCode) {
        let (steady, wall_us) = self.clock.now();

        let anchor = match self.anchor {
            Some(anchor) if !self.codes.is_empty() => anchor,
            _ => {
                self.rotation.advance(self.settings.max_boot_cycle_num);
                info!(index = self.rotation.index, "new boot cycle");
                // the ring came back around to a slot still waiting for its write
                let index = self.rotation.index;
                self.unsaved.retain(|(slot, _)| *slot != index);
                let anchor = Anchor::new(steady, wall_us);
                self.anchor = Some(anchor);
                anchor
            }
        };

        let timestamp = self.codes.insert(anchor.timestamp_at(steady), code.clone());
        let evicted = self.codes.evict_to(self.settings.max_post_codes_per_cycle);
        if evicted > 0 {
            debug!(evicted, "boot cycle full, dropped oldest post codes");
        }

        self.dirty = true;
        self.flush.arm(self.settings.flush_interval);

        if self.settings.bios_post_code_log {
            let offset_us = timestamp.saturating_sub(anchor.wall_us());
            info!(
                REDFISH_MESSAGE_ID = BIOS_POST_CODE_MESSAGE_ID,
                REDFISH_MESSAGE_ARGS = %bios_post_code_args(self.rotation.index, offset_us, code.primary),
                "BIOS POST Code"
            );
        }

        self.current_tx.send_replace(Some(code.clone()));
        self.actions.dispatch(&code);
    }

    /// Seals the current cycle: flushes it and starts over with an empty map.
    /// Does nothing while no code was recorded.
    pub async fn on_host_powered_off(&mut self) {
        if self.codes.is_empty() {
            info!(
                index = self.rotation.index,
                "host powered off with an empty post code log, keeping boot cycle"
            );
            return;
        }

        self.dirty = true;
        self.flush_now().await;

        let sealed = std::mem::take(&mut self.codes);
        self.anchor = None;
        if self.dirty {
            warn!(
                index = self.rotation.index,
                "sealed boot cycle not saved, retrying on the next tick"
            );
            let slot = self.rotation.index;
            self.unsaved.retain(|(s, _)| *s != slot);
            self.unsaved.push((slot, sealed));
            self.dirty = false;
            self.flush.rearm(self.settings.flush_interval);
        } else {
            self.flush.disarm();
        }
        info!(index = self.rotation.index, "host powered off, boot cycle sealed");
    }

    /// Codes of the cycle `requested` cycles back, 1 being the current one
    pub async fn list_codes(&self, requested: u16) -> Vec<PostCode> {
        if requested == 1 && !self.codes.is_empty() {
            return self.codes.codes();
        }
        self.load_cycle(requested).await.codes()
    }

    pub async fn list_codes_with_timestamps(&self, requested: u16) -> BTreeMap<u64, PostCode> {
        if requested == 1 && !self.codes.is_empty() {
            return self.codes.clone().into_map();
        }
        self.load_cycle(requested).await.into_map()
    }

    /// Deletes every stored cycle and resets the counters.
    /// When the removal fails before touching any record the previous state
    /// is left untouched.
    pub async fn clear_all(&mut self) {
        match self.storage.clear().await {
            Ok(removed) => info!(
                removed,
                dir = %self.storage.dir().display(),
                "deleted all post code records"
            ),
            Err(e @ PersistError::PartialClear { .. }) => {
                // records may be gone, continue from an empty state
                error!("deleting post code records: {e}");
            }
            Err(e) => {
                error!("deleting post code records: {e}");
                return;
            }
        }
        self.reset();
    }

    /// Runs when the flush deadline passes
    pub async fn on_flush_tick(&mut self) {
        self.flush_now().await;
        if self.dirty || !self.unsaved.is_empty() {
            self.flush.rearm(self.settings.flush_interval);
        } else {
            self.flush.disarm();
        }
    }

    /// Writes a held back sealed cycle, then the current cycle if anything
    /// changed since the last write
    pub async fn flush_now(&mut self) {
        while let Some((slot, sealed)) = self.unsaved.first() {
            let slot = *slot;
            if let Err(e) = self.storage.write_cycle(slot, self.rotation, sealed).await {
                error!("flushing sealed boot cycle {slot}: {e}");
                return;
            }
            info!(slot, "sealed boot cycle saved");
            self.unsaved.remove(0);
        }

        if !self.dirty || self.rotation.index == 0 {
            return;
        }

        match self
            .storage
            .write_cycle(self.rotation.index, self.rotation, &self.codes)
            .await
        {
            Ok(()) => self.dirty = false,
            Err(e) => error!("flushing boot cycle {}: {e}", self.rotation.index),
        }
    }

    fn reset(&mut self) {
        self.codes.clear();
        self.anchor = None;
        self.rotation = RotationState::default();
        self.flush.disarm();
        self.dirty = false;
        self.unsaved.clear();
        self.current_tx.send_replace(None);
    }

    async fn load_cycle(&self, requested: u16) -> BootCycle {
        let Some(slot) = self
            .rotation
            .slot_for(requested, self.settings.max_boot_cycle_num)
        else {
            return BootCycle::new();
        };
        if let Some((_, sealed)) = self.unsaved.iter().find(|(s, _)| *s == slot) {
            return sealed.clone();
        }

        match self.storage.read_cycle(slot).await {
            Ok(cycle) => cycle.unwrap_or_default(),
            Err(e) => {
                error!("reading boot cycle slot {slot}: {e}");
                BootCycle::new()
            }
        }
    }
}

pub const BIOS_POST_CODE_MESSAGE_ID: &str = "OpenBMC.0.1.BIOSPOSTCode";

/// `<boot cycle>,<seconds since the first code>,<primary code>` as carried
/// by the BIOS POST code log record
pub fn bios_post_code_args(index: u16, offset_us: u64, primary: u64) -> String {
    format!(
        "{index},{:.4},0x{primary:02x}",
        offset_us as f64 / 1_000_000.0
    )
}
