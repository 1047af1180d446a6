use std::collections::BTreeMap;
use tracing::debug;
use tradetrack_core::*;

/// Group normalized deals by position key. Ordered so output is deterministic.
pub fn group_by_position(deals: &[RawDeal]) -> BTreeMap<i64, Vec<&RawDeal>> {
    let mut groups: BTreeMap<i64, Vec<&RawDeal>> = BTreeMap::new();
    for deal in deals {
        groups.entry(deal.position_key()).or_default().push(deal);
    }
    groups
}

/// Pair entry and exit legs into completed trades.
///
/// Every exit leg closes (part of) its position and yields one trade named
/// after that leg, so a stored trade always covers the same deals whichever
/// window produced it. Positions without an exit leg are still open and are
/// skipped; they come back in a later window once closed.
pub fn reconcile(deals: &[RawDeal]) -> Vec<CompletedTrade> {
    let groups = group_by_position(deals);
    let positions = groups.len();

    let mut trades: Vec<CompletedTrade> = groups
        .into_iter()
        .flat_map(|(position_id, legs)| reconcile_position(position_id, &legs))
        .collect();

    trades.sort_by(|a, b| {
        a.exit_time
            .cmp(&b.exit_time)
            .then(a.position_id.cmp(&b.position_id))
            .then(a.exit_ticket.cmp(&b.exit_ticket))
    });

    debug!(
        positions,
        closed = trades.len(),
        "Reconciled deals into trades"
    );
    trades
}

/// Build the trades for one position group, one per exit leg.
///
/// The earliest entry leg supplies the entry time and price for each of them;
/// scaled-in positions are not averaged. Volume and amounts come from the exit
/// leg alone.
fn reconcile_position(position_id: i64, legs: &[&RawDeal]) -> Vec<CompletedTrade> {
    let entry = legs
        .iter()
        .filter(|d| d.entry_type == EntryType::Entry)
        .min_by_key(|d| (d.time, d.ticket));

    legs.iter()
        .filter(|d| d.entry_type == EntryType::Exit)
        .map(|exit| {
            let (entry_time, entry_time_synthetic) = match entry {
                Some(e) => (e.time.min(exit.time), false),
                None => (exit.time - CompletedTrade::synthetic_entry_offset(), true),
            };
            CompletedTrade {
                terminal_trade_id: CompletedTrade::trade_id_for(position_id, exit.ticket),
                position_id,
                exit_ticket: exit.ticket,
                symbol: exit.symbol.clone(),
                direction: exit.direction,
                quantity: exit.volume,
                entry_time,
                exit_time: exit.time,
                entry_time_synthetic,
                entry_price: entry.map(|e| e.price),
                exit_price: exit.price,
                profit: exit.profit,
                commission: exit.commission,
                swap: exit.swap,
            }
        })
        .collect()
}
