use super::amount;
use chainflip_core::{ChainFlipClient, LoggedEvent, Session, Snapshot};

/// Follow contract events until Ctrl-C, printing each burst and a short
/// summary of the refreshed views.
pub async fn watch(client: &ChainFlipClient, session: &Session) -> anyhow::Result<()> {
    println!(
        "Watching {} every {}s (Ctrl-C to stop)",
        session.chain,
        client.config().poll_interval.as_secs()
    );

    tokio::select! {
        _ = client.run(session, client.subscriber(), |events, snapshot| {
            print_update(events, snapshot, session)
        }) => {}
        _ = tokio::signal::ctrl_c() => {
            println!("Stopped.");
        }
    }

    Ok(())
}

fn print_update(events: &[LoggedEvent], snapshot: &Snapshot, session: &Session) {
    let at = snapshot.taken_at.with_timezone(&chrono::Local).format("%H:%M:%S");

    for logged in events {
        println!("[{}] block {}: {}", at, logged.block_number, logged.event);
    }

    let listing = match snapshot.listing_classified() {
        Ok(c) => format!("{} active, {} ended", c.active.len(), c.ended.len()),
        Err(_) => "listing unavailable".to_string(),
    };
    let refund = snapshot
        .player
        .as_ref()
        .and_then(|p| p.refund.as_ref().ok())
        .filter(|r| r.as_wei() > 0)
        .map(|r| format!(", refund {}", amount(*r, session)))
        .unwrap_or_default();

    println!(
        "[{}] #{}: {}, {} pending{}",
        at,
        snapshot.sequence,
        listing,
        snapshot.pending.len(),
        refund
    );
    for pending in &snapshot.pending {
        println!("    waiting on {} ({}s)", pending.key, pending.age().as_secs());
    }
}
