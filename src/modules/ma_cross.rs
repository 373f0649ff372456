//! Moving-average-crossover strategy module
//!
//! Consumes price ticks, maintains a capped per-pair price history, and
//! emits a signal whenever the fast moving average crosses the slow one in a
//! new direction. Signals strong enough for the configured thresholds are
//! turned into order requests sized from the account value read through the
//! state store.
//!
//! The module is a pure collaborator of the store: it watches
//! [`ACCOUNT_VALUE_KEY`] to keep its cached account value current and
//! publishes its latest signal under `signal.<pair>` with a TTL so stale
//! signals read as absent.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::StrategyConfig;
use crate::core::events::{ChangeNotifier, Event, OrderTicket, PriceTick, Side, Signal};
use crate::core::state::StateStore;
use crate::error::Result;

use super::Module;

/// State key the account module publishes the total account value under
pub const ACCOUNT_VALUE_KEY: &str = "account.value";

/// Account value assumed until the store provides one
const DEFAULT_ACCOUNT_VALUE: f64 = 10_000.0;

/// Last observed crossover direction per pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cross {
    None,
    Up,
    Down,
}

pub struct MovingAverageCross {
    module_id: String,
    params: StrategyConfig,
    store: Arc<StateStore>,
    bus: Arc<dyn ChangeNotifier>,
    history: HashMap<String, Vec<f64>>,
    last_cross: HashMap<String, Cross>,
    account_value: f64,
    active: bool,
}

impl MovingAverageCross {
    pub fn new(params: StrategyConfig, store: Arc<StateStore>, bus: Arc<dyn ChangeNotifier>) -> Self {
        Self {
            module_id: params.id.clone(),
            params,
            store,
            bus,
            history: HashMap::new(),
            last_cross: HashMap::new(),
            account_value: DEFAULT_ACCOUNT_VALUE,
            active: false,
        }
    }

    fn refresh_account_value(&mut self) {
        self.account_value = self
            .store
            .get_state(ACCOUNT_VALUE_KEY)
            .and_then(|v| v.as_f64())
            .unwrap_or(DEFAULT_ACCOUNT_VALUE);
    }

    /// Evaluate one tick; returns the signal when a crossover flips direction.
    fn process_tick(&mut self, tick: &PriceTick) -> Option<Signal> {
        let history = self.history.get_mut(&tick.pair)?;

        history.push(tick.price);

        // Cap history at twice the slow window
        let max_len = self.params.slow_ma.max(self.params.fast_ma) * 2;
        if history.len() > max_len {
            let excess = history.len() - max_len;
            history.drain(..excess);
        }

        if history.len() < self.params.slow_ma {
            return None;
        }
        if tick.volume < self.params.min_volume {
            return None;
        }

        let fast = mean(&history[history.len() - self.params.fast_ma..]);
        let slow = mean(&history[history.len() - self.params.slow_ma..]);

        let last = self
            .last_cross
            .get(&tick.pair)
            .copied()
            .unwrap_or(Cross::None);

        if fast > slow {
            if last != Cross::Up {
                self.last_cross.insert(tick.pair.clone(), Cross::Up);
                Some(Signal {
                    pair: tick.pair.clone(),
                    direction: Side::Buy,
                    strength: (fast - slow) / slow,
                    price: tick.price,
                })
            } else {
                None
            }
        } else if last != Cross::Down {
            self.last_cross.insert(tick.pair.clone(), Cross::Down);
            Some(Signal {
                pair: tick.pair.clone(),
                direction: Side::Sell,
                strength: (slow - fast) / slow,
                price: tick.price,
            })
        } else {
            None
        }
    }

    /// Turn a signal into an order request, or `None` when the signal is too
    /// weak or the risk budget is exceeded.
    fn generate_order(&self, signal: &Signal) -> Option<OrderTicket> {
        let threshold = match signal.direction {
            Side::Buy => self.params.entry_threshold,
            Side::Sell => self.params.exit_threshold,
        };
        if signal.strength < threshold {
            debug!(
                pair = %signal.pair,
                strength = signal.strength,
                threshold,
                "signal below threshold, no order"
            );
            return None;
        }

        let risk_amount = self.account_value * self.params.risk_per_trade;
        if risk_amount <= 0.0 {
            warn!(pair = %signal.pair, account_value = self.account_value, "no risk budget, order dropped");
            return None;
        }
        let size = risk_amount / signal.price;

        Some(OrderTicket {
            pair: signal.pair.clone(),
            side: signal.direction,
            size,
            price: signal.price,
            risk_amount,
        })
    }

    fn on_tick(&mut self, tick: &PriceTick) -> Result<()> {
        let Some(signal) = self.process_tick(tick) else {
            return Ok(());
        };

        info!(
            pair = %signal.pair,
            direction = %signal.direction,
            strength = signal.strength,
            price = signal.price,
            "crossover signal generated"
        );

        // Publish the signal into the store so other modules can poll it;
        // transient by design (non-persistent, TTL-bounded)
        self.store.set_state(
            &format!("signal.{}", signal.pair),
            json!({
                "direction": signal.direction,
                "strength": signal.strength,
                "price": signal.price,
            }),
            &self.module_id,
            Some(self.params.signal_ttl_secs),
            false,
        );

        let order = self.generate_order(&signal);
        self.bus.publish(Event::SignalGenerated(signal))?;

        if let Some(order) = order {
            info!(
                pair = %order.pair,
                side = %order.side,
                size = order.size,
                risk_amount = order.risk_amount,
                "order request published"
            );
            self.bus.publish(Event::OrderRequest(order))?;
        }

        Ok(())
    }
}

#[async_trait]
impl Module for MovingAverageCross {
    fn module_id(&self) -> &str {
        &self.module_id
    }

    async fn initialize(&mut self) -> Result<()> {
        for pair in &self.params.pairs {
            self.history.insert(pair.clone(), Vec::new());
            self.last_cross.insert(pair.clone(), Cross::None);
        }

        self.store.watch_state(ACCOUNT_VALUE_KEY, &self.module_id);
        self.refresh_account_value();
        self.active = true;

        info!(
            module_id = %self.module_id,
            pairs = ?self.params.pairs,
            fast_ma = self.params.fast_ma,
            slow_ma = self.params.slow_ma,
            "strategy initialized"
        );
        Ok(())
    }

    async fn handle_event(&mut self, event: &Event) -> Result<()> {
        if !self.active {
            return Ok(());
        }

        match event {
            Event::PriceUpdate(tick) => self.on_tick(tick),
            Event::StateWatch(notification)
                if notification.module_id == self.module_id
                    && notification.key == ACCOUNT_VALUE_KEY =>
            {
                if let Some(value) = notification.value.as_f64() {
                    debug!(account_value = value, "account value refreshed");
                    self.account_value = value;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.active = false;
        self.store.unwatch_state(ACCOUNT_VALUE_KEY, &self.module_id);
        info!(module_id = %self.module_id, "strategy stopped");
        Ok(())
    }
}

fn mean(window: &[f64]) -> f64 {
    window.iter().sum::<f64>() / window.len() as f64
}
