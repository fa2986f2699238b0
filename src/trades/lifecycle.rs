//! Trade lifecycle: the periodic tracking pass
//!
//! Fetches a price for every active trade (one ticker call per exchange),
//! closes trades whose bounds were hit and advances the trailing-stop
//! state machine on the rest. Per-trade failures are isolated; a pass
//! never aborts because one trade misbehaved.

use super::db::Database;
use super::trailing::{self, TrailingAction};
use super::types::{Trade, TradeStatus};
use crate::config::{Settings, TIMEFRAME};
use crate::errors::{EngineError, EngineResult};
use crate::exchange::adapter::exit_adapter_for;
use crate::exchange::{Candle, ExchangeClients, ExchangeId, MarketData};
use crate::logger::{self, LogTag};
use crate::notifications::{Notification, Notifier};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;

/// Candle window for EMA/ATR trailing computations
const TRAILING_CANDLE_LIMIT: usize = 60;

/// What one tracking pass did
#[derive(Debug, Default, PartialEq)]
pub struct TrackReport {
    pub checked: usize,
    pub closed: usize,
    pub stops_raised: usize,
    pub failures: usize,
}

enum TradeOutcome {
    Held,
    StopRaised,
    Closed,
}

/// One tracking pass over every active trade
pub async fn track_open_trades(
    clients: &ExchangeClients,
    db: &Database,
    settings: &mut Settings,
    notifier: &dyn Notifier,
) -> TrackReport {
    let mut report = TrackReport::default();

    let trades = match db.list_active_trades() {
        Ok(trades) => trades,
        Err(e) => {
            logger::error(LogTag::Trades, &format!("Cannot list active trades: {}", e));
            report.failures += 1;
            return report;
        }
    };
    if trades.is_empty() {
        return report;
    }

    let prices = fetch_prices(clients, &trades).await;

    for trade in &trades {
        let price = match prices
            .get(&trade.exchange)
            .and_then(|map| map.get(&trade.symbol))
        {
            Some(price) => *price,
            None => {
                logger::debug(
                    LogTag::Trades,
                    &format!(
                        "No price for {} on {} this pass, skipping #{}",
                        trade.symbol, trade.exchange, trade.id
                    ),
                );
                continue;
            }
        };

        report.checked += 1;
        match check_single_trade(trade, price, clients, db, settings, notifier).await {
            Ok(TradeOutcome::Held) => {}
            Ok(TradeOutcome::StopRaised) => report.stops_raised += 1,
            Ok(TradeOutcome::Closed) => report.closed += 1,
            Err(e) => {
                report.failures += 1;
                if e.is_critical() {
                    logger::error(
                        LogTag::Trades,
                        &format!("Trade #{} {}: {}", trade.id, trade.symbol, e),
                    );
                } else {
                    logger::warning(
                        LogTag::Trades,
                        &format!("Trade #{} {} skipped this pass: {}", trade.id, trade.symbol, e),
                    );
                }
            }
        }
    }

    if report.closed > 0 || report.stops_raised > 0 {
        logger::info(
            LogTag::Trades,
            &format!(
                "📈 Tracking pass: {} checked, {} closed, {} stops raised, {} failures",
                report.checked, report.closed, report.stops_raised, report.failures
            ),
        );
    }
    report
}

/// One ticker snapshot per exchange that carries active trades
async fn fetch_prices(
    clients: &ExchangeClients,
    trades: &[Trade],
) -> HashMap<ExchangeId, HashMap<String, f64>> {
    let mut exchanges: Vec<ExchangeId> = trades.iter().map(|t| t.exchange).collect();
    exchanges.sort_by_key(|e| e.as_str());
    exchanges.dedup();

    let mut prices = HashMap::new();
    for exchange in exchanges {
        let client = match clients.get(&exchange) {
            Some(client) => client,
            None => continue,
        };
        match client.fetch_tickers().await {
            Ok(tickers) => {
                let map: HashMap<String, f64> = tickers
                    .into_iter()
                    .filter(|t| t.last_price > 0.0)
                    .map(|t| (t.symbol, t.last_price))
                    .collect();
                prices.insert(exchange, map);
            }
            Err(e) => {
                logger::warning(
                    LogTag::Trades,
                    &format!("Ticker fetch failed for {}: {}", exchange, e),
                );
            }
        }
    }
    prices
}

async fn check_single_trade(
    trade: &Trade,
    price: f64,
    clients: &ExchangeClients,
    db: &Database,
    settings: &mut Settings,
    notifier: &dyn Notifier,
) -> EngineResult<TradeOutcome> {
    // Stop first: when a gap crosses both bounds in one interval, the
    // conservative outcome wins
    if price <= trade.stop_loss {
        let pnl = trade.unrealized_pnl(price);
        let status = if pnl > 0.0 {
            TradeStatus::ClosedStopProfit
        } else {
            TradeStatus::ClosedStopLoss
        };
        close_trade(trade, status, price, db, settings, notifier).await?;
        return Ok(TradeOutcome::Closed);
    }
    if price >= trade.take_profit {
        close_trade(trade, TradeStatus::ClosedWin, price, db, settings, notifier).await?;
        return Ok(TradeOutcome::Closed);
    }

    // Automation is suspended while a human untangles lost protection
    if trade.needs_intervention {
        return Ok(TradeOutcome::Held);
    }

    let candles = trailing_candles(trade, clients, settings).await?;
    match trailing::advance(trade, price, &candles, settings) {
        TrailingAction::Hold => {
            if price > trade.highest_price {
                db.update_peak_price(trade.id, price)?;
            }
            Ok(TradeOutcome::Held)
        }
        action @ (TrailingAction::Activate { .. } | TrailingAction::Raise { .. }) => {
            let new_stop = match action {
                TrailingAction::Activate { new_stop } | TrailingAction::Raise { new_stop } => {
                    new_stop
                }
                TrailingAction::Hold => unreachable!(),
            };
            apply_stop_update(trade, price, new_stop, clients, db, settings, notifier).await?;
            if matches!(action, TrailingAction::Activate { .. }) {
                notifier
                    .notify(Notification::TrailingActivated {
                        trade_id: trade.id,
                        symbol: trade.symbol.clone(),
                    })
                    .await;
            }
            Ok(TradeOutcome::StopRaised)
        }
    }
}

/// Candles for EMA/ATR trailing; empty when the strategy needs none
async fn trailing_candles(
    trade: &Trade,
    clients: &ExchangeClients,
    settings: &Settings,
) -> EngineResult<Vec<Candle>> {
    if !(settings.trailing_sl_enabled && trade.trailing_active) {
        return Ok(Vec::new());
    }
    let strategy = trailing::strategy_for_trade(trade, settings);
    if !strategy.needs_candles() {
        return Ok(Vec::new());
    }
    let client = client_for(trade, clients)?;
    client
        .fetch_ohlcv(&trade.symbol, TIMEFRAME, TRAILING_CANDLE_LIMIT)
        .await
}

fn client_for<'a>(
    trade: &Trade,
    clients: &'a ExchangeClients,
) -> EngineResult<&'a Arc<dyn MarketData>> {
    clients.get(&trade.exchange).ok_or_else(|| {
        EngineError::Config(format!("no client connected for {}", trade.exchange))
    })
}

/// Raise the stop in the right order: exchange first for automated real
/// trades, then the database
async fn apply_stop_update(
    trade: &Trade,
    price: f64,
    new_stop: f64,
    clients: &ExchangeClients,
    db: &Database,
    settings: &Settings,
    notifier: &dyn Notifier,
) -> EngineResult<()> {
    let new_highest = trade.highest_price.max(price);

    if trade.is_real() {
        return apply_real_stop_update(
            trade, price, new_stop, new_highest, clients, db, settings, notifier,
        )
        .await;
    }

    db.update_stop(trade.id, new_stop, new_highest, None)?;
    logger::info(
        LogTag::Trades,
        &format!(
            "🔒 Trade #{} {}: stop raised {:.8} -> {:.8}",
            trade.id, trade.symbol, trade.stop_loss, new_stop
        ),
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn apply_real_stop_update(
    trade: &Trade,
    price: f64,
    new_stop: f64,
    new_highest: f64,
    clients: &ExchangeClients,
    db: &Database,
    settings: &Settings,
    notifier: &dyn Notifier,
) -> EngineResult<()> {
    if !settings.automate_real_tsl {
        // Manual mode: record our view and ask the human to move the order
        db.update_stop(trade.id, new_stop, new_highest, None)?;
        notifier
            .notify(Notification::TrailingManualAction {
                trade_id: trade.id,
                symbol: trade.symbol.clone(),
                current_price: price,
                new_stop,
            })
            .await;
        return Ok(());
    }

    let refs = trade.exit_order_refs.as_ref().ok_or_else(|| {
        EngineError::InvariantViolation(format!(
            "trade #{} is real and automated but has no exit-order refs",
            trade.id
        ))
    })?;

    let client = client_for(trade, clients)?;
    let adapter = exit_adapter_for(client.clone());
    match adapter
        .update_trailing_stop(&trade.symbol, trade.quantity, trade.take_profit, new_stop, refs)
        .await
    {
        Ok(new_refs) => {
            db.update_stop(trade.id, new_stop, new_highest, Some(&new_refs))?;
            logger::info(
                LogTag::Trades,
                &format!(
                    "🔒 Trade #{} {}: exchange stop raised to {:.8}",
                    trade.id, trade.symbol, new_stop
                ),
            );
            Ok(())
        }
        Err(e @ EngineError::ProtectionLost { .. }) => {
            // Old orders are gone and new ones never landed. Freeze
            // automation and surface it immediately.
            db.mark_needs_intervention(trade.id)?;
            notifier
                .notify(Notification::ExitProtectionLost {
                    trade_id: trade.id,
                    symbol: trade.symbol.clone(),
                    detail: e.to_string(),
                })
                .await;
            Err(e)
        }
        Err(e) => Err(e),
    }
}

/// Terminal transition plus its side effects: durable close, virtual
/// balance adjustment, closure notification
async fn close_trade(
    trade: &Trade,
    status: TradeStatus,
    exit_price: f64,
    db: &Database,
    settings: &mut Settings,
    notifier: &dyn Notifier,
) -> EngineResult<()> {
    let pnl = trade.unrealized_pnl(exit_price);
    db.close_trade(trade.id, status, exit_price, pnl)?;

    if !trade.is_real() {
        settings.virtual_portfolio_balance_usdt += pnl;
    }

    let pnl_percent = if trade.entry_value_usdt > 0.0 {
        pnl / trade.entry_value_usdt * 100.0
    } else {
        0.0
    };
    notifier
        .notify(Notification::TradeClosed {
            trade_id: trade.id,
            symbol: trade.symbol.clone(),
            status,
            is_real_trade: trade.is_real(),
            pnl_usdt: pnl,
            pnl_percent,
            duration: trade.duration_string(Utc::now()),
        })
        .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::adapter::ExitOrderRefs;
    use crate::exchange::mock::MockExchange;
    use crate::exchange::Ticker;
    use crate::notifications::capture::CaptureNotifier;
    use crate::trades::types::TradeMode;
    use std::sync::Arc;

    fn ticker(symbol: &str, price: f64) -> Ticker {
        Ticker {
            symbol: symbol.to_string(),
            last_price: price,
            quote_volume_24h: 1_000_000.0,
            bid: None,
            ask: None,
        }
    }

    fn setup(price: f64) -> (ExchangeClients, Arc<MockExchange>) {
        let mock = Arc::new(MockExchange::new(ExchangeId::Binance));
        mock.set_tickers(vec![ticker("BTC/USDT", price)]);
        let mut clients = ExchangeClients::new();
        clients.insert(
            ExchangeId::Binance,
            mock.clone() as Arc<dyn MarketData>,
        );
        (clients, mock)
    }

    fn open_virtual(db: &Database) -> Trade {
        let mut trade = Trade::open(
            ExchangeId::Binance,
            "BTC/USDT",
            100.0,
            110.0,
            95.0,
            1.0,
            TradeMode::Virtual,
            "support_rebound",
        )
        .unwrap();
        trade.id = db.insert_trade(&trade).unwrap();
        trade
    }

    #[tokio::test]
    async fn test_take_profit_closes_as_win() {
        let db = Database::open_in_memory().unwrap();
        let trade = open_virtual(&db);
        let (clients, _) = setup(111.0);
        let mut settings = Settings::default();
        let balance_before = settings.virtual_portfolio_balance_usdt;
        let notifier = CaptureNotifier::new();

        let report = track_open_trades(&clients, &db, &mut settings, &notifier).await;
        assert_eq!(report.closed, 1);

        let closed = db.get_trade(trade.id).unwrap();
        assert_eq!(closed.status, TradeStatus::ClosedWin);
        // Virtual balance grows by realized pnl: (111 - 100) * 1.0
        assert!((settings.virtual_portfolio_balance_usdt - balance_before - 11.0).abs() < 1e-9);
        assert!(notifier
            .events()
            .iter()
            .any(|n| matches!(n, Notification::TradeClosed { status, .. } if status.is_win())));
    }

    #[tokio::test]
    async fn test_raised_stop_hit_in_profit_is_a_win() {
        let db = Database::open_in_memory().unwrap();
        let trade = open_virtual(&db);
        // Trail armed earlier and the stop sits above entry now
        db.update_stop(trade.id, 105.0, 108.0, None).unwrap();

        let (clients, _) = setup(104.0); // below the stop, above entry
        let mut settings = Settings::default();
        let notifier = CaptureNotifier::new();

        let report = track_open_trades(&clients, &db, &mut settings, &notifier).await;
        assert_eq!(report.closed, 1);
        assert_eq!(
            db.get_trade(trade.id).unwrap().status,
            TradeStatus::ClosedStopProfit
        );
    }

    #[tokio::test]
    async fn test_stop_wins_when_both_bounds_crossed() {
        let db = Database::open_in_memory().unwrap();
        let trade = open_virtual(&db);
        // Strong run-up trailed the stop past the take-profit
        db.update_stop(trade.id, 112.0, 120.0, None).unwrap();

        // 111 is above TP (110) and below the stop (112) at once; the
        // stop outcome must win
        let (clients, _) = setup(111.0);
        let mut settings = Settings::default();
        let notifier = CaptureNotifier::new();

        let report = track_open_trades(&clients, &db, &mut settings, &notifier).await;
        assert_eq!(report.closed, 1);
        assert_eq!(
            db.get_trade(trade.id).unwrap().status,
            TradeStatus::ClosedStopProfit
        );
    }

    #[tokio::test]
    async fn test_stop_hit_below_entry_is_a_loss() {
        let db = Database::open_in_memory().unwrap();
        let trade = open_virtual(&db);
        let (clients, _) = setup(94.0);
        let mut settings = Settings::default();
        let balance_before = settings.virtual_portfolio_balance_usdt;
        let notifier = CaptureNotifier::new();

        track_open_trades(&clients, &db, &mut settings, &notifier).await;
        assert_eq!(
            db.get_trade(trade.id).unwrap().status,
            TradeStatus::ClosedStopLoss
        );
        assert!(settings.virtual_portfolio_balance_usdt < balance_before);
    }

    #[tokio::test]
    async fn test_activation_arms_and_raises_stop_to_entry() {
        let db = Database::open_in_memory().unwrap();
        let trade = open_virtual(&db);
        let (clients, _) = setup(101.6); // +1.6% > 1.5% activation
        let mut settings = Settings::default();
        let notifier = CaptureNotifier::new();

        let report = track_open_trades(&clients, &db, &mut settings, &notifier).await;
        assert_eq!(report.stops_raised, 1);

        let armed = db.get_trade(trade.id).unwrap();
        assert!(armed.trailing_active);
        assert_eq!(armed.stop_loss, 100.0);
        assert!(notifier
            .events()
            .iter()
            .any(|n| matches!(n, Notification::TrailingActivated { .. })));
    }

    #[tokio::test]
    async fn test_small_gain_leaves_trade_unarmed() {
        let db = Database::open_in_memory().unwrap();
        let trade = open_virtual(&db);
        let (clients, _) = setup(101.4); // +1.4% < activation
        let mut settings = Settings::default();
        let notifier = CaptureNotifier::new();

        let report = track_open_trades(&clients, &db, &mut settings, &notifier).await;
        assert_eq!(report.stops_raised, 0);
        assert_eq!(report.closed, 0);

        let held = db.get_trade(trade.id).unwrap();
        assert!(!held.trailing_active);
        assert_eq!(held.stop_loss, 95.0);
        // Peak still recorded
        assert!((held.highest_price - 101.4).abs() < 1e-9);
    }

    fn open_real_with_refs(db: &Database) -> Trade {
        let mut trade = Trade::open(
            ExchangeId::Binance,
            "BTC/USDT",
            100.0,
            110.0,
            95.0,
            1.0,
            TradeMode::Real,
            "support_rebound",
        )
        .unwrap();
        trade.exit_order_refs = Some(ExitOrderRefs::Oco {
            oco_id: "oco-old".to_string(),
        });
        trade.id = db.insert_trade(&trade).unwrap();
        trade
    }

    #[tokio::test(start_paused = true)]
    async fn test_automated_real_trade_replaces_exchange_orders() {
        let db = Database::open_in_memory().unwrap();
        let trade = open_real_with_refs(&db);
        let (clients, mock) = setup(101.6);
        let mut settings = Settings::default();
        settings.automate_real_tsl = true;
        let notifier = CaptureNotifier::new();

        let report = track_open_trades(&clients, &db, &mut settings, &notifier).await;
        assert_eq!(report.stops_raised, 1);
        assert_eq!(mock.cancelled_ids(), vec!["oco-old".to_string()]);

        let updated = db.get_trade(trade.id).unwrap();
        assert_eq!(updated.stop_loss, 100.0);
        assert!(matches!(
            updated.exit_order_refs,
            Some(ExitOrderRefs::Oco { ref oco_id }) if oco_id != "oco-old"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_protection_freezes_trade_and_alerts() {
        let db = Database::open_in_memory().unwrap();
        let trade = open_real_with_refs(&db);
        let (clients, mock) = setup(101.6);
        mock.fail_next_create_with_transient();
        let mut settings = Settings::default();
        settings.automate_real_tsl = true;
        let notifier = CaptureNotifier::new();

        let report = track_open_trades(&clients, &db, &mut settings, &notifier).await;
        assert_eq!(report.failures, 1);

        let frozen = db.get_trade(trade.id).unwrap();
        assert!(frozen.needs_intervention);
        assert!(frozen.exit_order_refs.is_none());
        assert!(notifier
            .events()
            .iter()
            .any(|n| matches!(n, Notification::ExitProtectionLost { .. })));
    }

    #[tokio::test]
    async fn test_manual_real_trade_gets_action_notification() {
        let db = Database::open_in_memory().unwrap();
        let trade = open_real_with_refs(&db);
        let (clients, mock) = setup(101.6);
        let mut settings = Settings::default(); // automate_real_tsl = false
        let notifier = CaptureNotifier::new();

        let report = track_open_trades(&clients, &db, &mut settings, &notifier).await;
        assert_eq!(report.stops_raised, 1);
        // Exchange orders were not touched
        assert!(mock.cancelled_ids().is_empty());
        assert_eq!(db.get_trade(trade.id).unwrap().stop_loss, 100.0);
        assert!(notifier
            .events()
            .iter()
            .any(|n| matches!(n, Notification::TrailingManualAction { .. })));
    }
}
