//! Grid layer executor
//!
//! Maps a grid signal onto a free layer and sizes it. Each `GridId`
//! (direction + level index) holds at most one position, and each direction
//! holds at most `max_layers_per_side` layers. Lot size grows with layer depth
//! and shrinks after consecutive losses.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use super::strategy::GridHoldReason;
use crate::config::ExecutorConfig;
use crate::{Direction, GridId, Money};

/// Lot assigned to a free layer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayerPlan {
    pub grid_id: GridId,
    pub lot_size: f64,
}

/// Open lots per direction from the occupancy map
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GridExposure {
    pub long: f64,
    pub short: f64,
    pub net: f64,
    pub long_layers: usize,
    pub short_layers: usize,
}

#[derive(Debug, Clone)]
pub struct GridExecutor {
    config: ExecutorConfig,
    min_lot: f64,
    occupied: BTreeMap<GridId, f64>,
    consecutive_losses: usize,
    consecutive_wins: usize,
}

impl GridExecutor {
    pub fn new(config: ExecutorConfig, min_lot: f64) -> Self {
        Self {
            config,
            min_lot,
            occupied: BTreeMap::new(),
            consecutive_losses: 0,
            consecutive_wins: 0,
        }
    }

    pub fn is_occupied(&self, grid_id: GridId) -> bool {
        self.occupied.contains_key(&grid_id)
    }

    pub fn open_layers(&self, direction: Direction) -> usize {
        self.occupied
            .keys()
            .filter(|id| id.direction == direction)
            .count()
    }

    pub fn consecutive_losses(&self) -> usize {
        self.consecutive_losses
    }

    pub fn consecutive_wins(&self) -> usize {
        self.consecutive_wins
    }

    fn streak_factor(table: &[f64], streak: usize) -> f64 {
        table
            .get(streak)
            .or_else(|| table.last())
            .copied()
            .unwrap_or(1.0)
    }

    /// Raw lot before the balance cap and the minimum lot
    pub fn layer_lot(&self, level: usize, confidence: f64) -> f64 {
        let c = &self.config;
        c.base_lot
            * (1.0 + c.layer_size_step * level as f64)
            * confidence.clamp(0.0, 1.0)
            * Self::streak_factor(&c.loss_streak_factors, self.consecutive_losses)
            * Self::streak_factor(&c.win_streak_factors, self.consecutive_wins)
    }

    /// Choose the layer for a grid signal, or the reason to hold
    pub fn plan_entry(
        &self,
        direction: Direction,
        level: usize,
        confidence: f64,
        balance: Money,
    ) -> Result<LayerPlan, GridHoldReason> {
        let grid_id = GridId::new(direction, level);
        if self.is_occupied(grid_id) {
            debug!(grid_id = %grid_id, "Grid layer occupied");
            return Err(GridHoldReason::LayerOccupied);
        }
        if self.open_layers(direction) >= self.config.max_layers_per_side {
            debug!(
                direction = %direction,
                max = self.config.max_layers_per_side,
                "Grid layer cap reached"
            );
            return Err(GridHoldReason::LayerCapReached);
        }

        let cap = balance.to_f64() / self.config.balance_per_lot;
        let lot = self.layer_lot(level, confidence).min(cap).max(self.min_lot);
        let lot = ((lot * 100.0).round() / 100.0).max(self.min_lot);

        Ok(LayerPlan {
            grid_id,
            lot_size: lot,
        })
    }

    pub fn mark_open(&mut self, grid_id: GridId, lot_size: f64) {
        self.occupied.insert(grid_id, lot_size);
    }

    pub fn release(&mut self, grid_id: GridId) {
        self.occupied.remove(&grid_id);
    }

    /// Update win/loss streaks from a closed trade's P&L
    pub fn record_close(&mut self, pnl: Money) {
        if pnl.is_positive() {
            self.consecutive_wins += 1;
            self.consecutive_losses = 0;
        } else if pnl.is_negative() {
            self.consecutive_losses += 1;
            self.consecutive_wins = 0;
        } else {
            self.consecutive_wins = 0;
            self.consecutive_losses = 0;
        }
    }

    pub fn exposure(&self) -> GridExposure {
        let mut exposure = GridExposure::default();
        for (id, lot) in &self.occupied {
            match id.direction {
                Direction::Long => {
                    exposure.long += lot;
                    exposure.long_layers += 1;
                }
                Direction::Short => {
                    exposure.short += lot;
                    exposure.short_layers += 1;
                }
            }
        }
        exposure.net = exposure.long - exposure.short;
        exposure
    }
}
