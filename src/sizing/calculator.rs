//! Position sizing: converts a follower's allocation config and a master
//! trade into a concrete position size and leverage. Pure functions, no I/O.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::models::{AllocationMode, CalculatedPosition, FollowerSubscription, TradeSide};

/// Calculator for follower position sizes and PnL.
pub struct PositionSizer;

impl PositionSizer {
    /// Size a follower's position for one master trade.
    ///
    /// PERCENT mode allocates `allocation_value` percent of equity; FIXED
    /// mode allocates `min(allocation_value, equity)`. The risk multiplier
    /// scales the base allocation linearly; the final size is clamped to
    /// [0, equity]. Zero or negative equity (or entry price) yields a
    /// zero-size result; callers must treat that as "insufficient equity"
    /// rather than an error.
    pub fn size(
        sub: &FollowerSubscription,
        master_size: Decimal,
        master_entry_price: Decimal,
        follower_equity: Decimal,
        master_leverage: Option<Decimal>,
    ) -> CalculatedPosition {
        let leverage = Self::resolve_leverage(sub.max_leverage, master_leverage);

        if follower_equity <= Decimal::ZERO
            || master_entry_price <= Decimal::ZERO
            || master_size <= Decimal::ZERO
        {
            return CalculatedPosition::zero(leverage);
        }

        let base = match sub.allocation_mode {
            AllocationMode::Percent => {
                let raw = follower_equity * sub.allocation_value / dec!(100);
                raw.clamp(Decimal::ZERO, follower_equity)
            }
            AllocationMode::Fixed => sub.allocation_value.min(follower_equity),
        };

        let adjusted = base * sub.risk_multiplier;
        let position_size = adjusted.clamp(Decimal::ZERO, follower_equity);

        let allocation_before = (adjusted / follower_equity * dec!(100)).min(dec!(100));

        CalculatedPosition {
            position_size,
            leverage,
            allocation_before,
            allocation_after: allocation_before,
        }
    }

    /// Follower leverage: capped at the follower's max when the master
    /// traded with leverage, otherwise the follower's max unchanged (spot
    /// trades effectively ignore leverage).
    fn resolve_leverage(max_leverage: Decimal, master_leverage: Option<Decimal>) -> Decimal {
        match master_leverage {
            Some(lev) if lev > Decimal::ZERO => lev.min(max_leverage),
            _ => max_leverage,
        }
    }

    /// PnL as a percentage of position size for a round trip.
    ///
    /// Long: `(exit - entry) / entry * 100`; short: the negation. Amplified
    /// by leverage when leverage > 1. Zero entry yields zero.
    pub fn pnl_percent(
        entry_price: Decimal,
        exit_price: Decimal,
        side: TradeSide,
        leverage: Decimal,
    ) -> Decimal {
        if entry_price <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let raw = match side {
            TradeSide::Buy => (exit_price - entry_price) / entry_price * dec!(100),
            TradeSide::Sell => (entry_price - exit_price) / entry_price * dec!(100),
        };

        if leverage > Decimal::ONE {
            raw * leverage
        } else {
            raw
        }
    }

    /// PnL in quote currency for a position of `position_size`.
    pub fn pnl_amount(position_size: Decimal, pnl_percent: Decimal) -> Decimal {
        position_size * pnl_percent / dec!(100)
    }
}
