use super::{amount, match_table, show, submit};
use chainflip_core::stats::{self, NetGain, RatingBand};
use chainflip_core::{Address, ChainFlipClient, Session, WriteCall};
use clap::Subcommand;
use comfy_table::{presets::UTF8_FULL, Table};

#[derive(Subcommand)]
pub enum PlayerCommands {
    /// Win rate, ratio and net gain for a player
    Stats {
        /// Player address (defaults to your account)
        address: Option<Address>,
    },
    /// Your active and ended matches
    Games,
    /// Claim refunds from canceled matches
    WithdrawRefund {
        /// Wait for the RefundIssued event
        #[arg(short, long)]
        wait: bool,
    },
}

pub async fn handle_player_command(
    cmd: PlayerCommands,
    client: &ChainFlipClient,
    session: &Session,
) -> anyhow::Result<()> {
    match cmd {
        PlayerCommands::Stats { address } => {
            let account = match address {
                Some(address) => address,
                None => session.account()?,
            };
            let gateway = client.gateway();
            let (player_stats, refund) =
                tokio::join!(gateway.player_stats(account), gateway.refund(account));

            println!("Player {}:", account);
            match player_stats {
                Ok(s) => {
                    println!("  Matches: {}", s.total_matches);
                    println!(
                        "  Wins / Losses / Canceled: {} / {} / {}",
                        s.total_wins, s.total_losses, s.total_canceled
                    );
                    println!("  Win rate: {:.1}%", stats::win_percentage(&s));
                    println!(
                        "  Win/loss ratio: {} ({})",
                        stats::win_loss_ratio(&s),
                        RatingBand::of(&s).label()
                    );
                    println!("  Invested: {}", amount(s.amount_invested, session));
                    println!("  Won: {}", amount(s.amount_won, session));
                    let net = NetGain::of(&s);
                    println!("  Net: {} {}", net, session.chain.native_currency());
                }
                Err(failure) => {
                    println!("  Stats unavailable ({})", failure);
                }
            }
            println!("  Refund available: {}", show(&refund, |r| amount(*r, session)));
        }

        PlayerCommands::Games => {
            let account = session.account()?;
            let snapshot = client.refresh(session).await;
            let player = snapshot
                .player
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("no player view for {}", account))?;

            if let Err(failure) = &player.match_ids {
                anyhow::bail!("could not load your matches: {}", failure);
            }
            let missing = player.failures().len();
            let mine = snapshot.my_matches().unwrap_or_default();

            if mine.active.is_empty() && mine.ended.is_empty() {
                println!("You have not played any matches yet.");
                return Ok(());
            }

            let fee = &snapshot.protocol.fee_percent;
            println!("Active ({}):", mine.active.len());
            println!("{}", match_table(&mine.active, fee, session));
            println!();
            println!("Ended ({}):", mine.ended.len());
            println!("{}", match_table(&mine.ended, fee, session));

            if missing > 0 {
                println!("{} match(es) could not be loaded.", missing);
            }
        }

        PlayerCommands::WithdrawRefund { wait } => {
            let account = session.account()?;
            match client.gateway().refund(account).await {
                Ok(refund) if refund.as_wei() == 0 => {
                    println!("No refund to claim.");
                    return Ok(());
                }
                Ok(refund) => println!("Claiming {}", amount(refund, session)),
                Err(failure) => tracing::warn!("{}; submitting anyway", failure),
            }
            submit(client, session, WriteCall::WithdrawRefund, wait).await?;
        }
    }

    Ok(())
}

pub async fn show_leaderboard(
    client: &ChainFlipClient,
    session: &Session,
    top: usize,
) -> anyhow::Result<()> {
    println!("Scanning matches...");
    let board = client
        .gateway()
        .leaderboard()
        .await
        .map_err(|f| anyhow::anyhow!("could not build leaderboard: {}", f))?;

    if board.entries.is_empty() {
        println!("No finished matches yet.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Rank", "Player", "Wins"]);

    for (rank, entry) in board.entries.iter().take(top).enumerate() {
        let mut player = entry.address.to_string();
        if session.account == Some(entry.address) {
            player.push_str(" (you)");
        }
        table.add_row(vec![
            (rank + 1).to_string(),
            player,
            entry.wins.to_string(),
        ]);
    }

    println!("{table}");
    println!(
        "Scanned {} matches at {}",
        board.scanned,
        board
            .computed_at
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S")
    );
    if !board.failed.is_empty() {
        println!("{} match(es) could not be read and were skipped.", board.failed.len());
    }

    Ok(())
}
