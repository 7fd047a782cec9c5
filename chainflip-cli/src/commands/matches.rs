use super::{amount, confirm, match_table, show, submit};
use chainflip_core::{stats, ChainFlipClient, CoinSide, MatchId, Session, Wei, WriteCall};
use clap::Subcommand;

#[derive(Subcommand)]
pub enum MatchCommands {
    /// List matches, active first
    List {
        /// First match to list
        #[arg(long, default_value_t = 0)]
        offset: u64,
        /// Page size (defaults to the configured page size)
        #[arg(long)]
        limit: Option<u64>,
    },
    /// Show one match in detail
    Show {
        /// Match ID
        id: MatchId,
    },
    /// Open a new match
    Create {
        /// Your call (heads or tails)
        choice: CoinSide,
        /// Wager in the chain's native currency, e.g. 0.1
        amount: String,
        /// Wait for the MatchCreated event
        #[arg(short, long)]
        wait: bool,
    },
    /// Join a waiting match, matching its wager
    Join {
        /// Match ID
        id: MatchId,
        /// Wait for the MatchJoined event
        #[arg(short, long)]
        wait: bool,
    },
    /// Cancel a match you created that nobody joined
    Cancel {
        /// Match ID
        id: MatchId,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
        /// Wait for the cancel event
        #[arg(short, long)]
        wait: bool,
    },
}

pub async fn handle_match_command(
    cmd: MatchCommands,
    client: &ChainFlipClient,
    session: &Session,
) -> anyhow::Result<()> {
    match cmd {
        MatchCommands::List { offset, limit } => {
            let limit = limit.unwrap_or(client.config().page_size);
            let gateway = client.gateway();
            let (listing, fee_percent) =
                tokio::join!(gateway.listing(offset, limit), gateway.fee_percent());

            let matches = listing
                .matches
                .map_err(|f| anyhow::anyhow!("could not load matches: {}", f))?;
            if matches.is_empty() {
                println!("No matches found.");
                return Ok(());
            }

            let classified = stats::classify(&matches);
            println!("Active matches ({}):", classified.active.len());
            println!("{}", match_table(&classified.active, &fee_percent, session));
            println!();
            println!("Ended matches ({}):", classified.ended.len());
            println!("{}", match_table(&classified.ended, &fee_percent, session));

            if fee_percent.is_err() {
                println!("Fee percent unavailable; prize pools not shown.");
            }
        }

        MatchCommands::Show { id } => {
            let gateway = client.gateway();
            let (found, fee_percent) = tokio::join!(gateway.match_by_id(id), gateway.fee_percent());
            let m = found.map_err(|f| anyhow::anyhow!("{}", f))?;

            println!("Match #{}:", m.id);
            println!("  State: {}", m.state);
            println!("  Bet: {}", amount(m.bet_amount, session));
            println!(
                "  Prize pool: {}",
                show(&fee_percent, |fee| amount(
                    stats::adjusted_prize_pool(m.bet_amount, *fee),
                    session
                ))
            );
            println!("  Creator: {} ({})", m.player1, m.player1_choice);
            if m.is_joined() {
                println!("  Opponent: {} ({})", m.player2, m.player2_choice);
            } else {
                println!("  Opponent: waiting");
            }
            if let Some(start) = m.start_time {
                println!("  Started: {}", start.format("%Y-%m-%d %H:%M:%S"));
            }
            if let Some(end) = m.end_time {
                println!("  Ended: {}", end.format("%Y-%m-%d %H:%M:%S"));
            }
            if m.has_winner() {
                let side = CoinSide::from_bool(m.result);
                println!("  Result: {}, winner {}", side, m.winner);
            }
        }

        MatchCommands::Create {
            choice,
            amount: wager,
            wait,
        } => {
            let wager = Wei::parse_ether(&wager)?;
            println!(
                "Creating match: {} on {}",
                amount(wager, session),
                choice
            );
            submit(client, session, WriteCall::CreateMatch { choice, wager }, wait).await?;
        }

        MatchCommands::Join { id, wait } => {
            let m = client
                .gateway()
                .match_by_id(id)
                .await
                .map_err(|f| anyhow::anyhow!("{}", f))?;

            println!(
                "Joining match #{} for {} (creator called {})",
                id,
                amount(m.bet_amount, session),
                m.player1_choice
            );
            submit(
                client,
                session,
                WriteCall::JoinMatch {
                    match_id: id,
                    wager: m.bet_amount,
                },
                wait,
            )
            .await?;
        }

        MatchCommands::Cancel { id, force, wait } => {
            if !confirm(format!("Cancel match #{}?", id), force)? {
                println!("Cancel aborted.");
                return Ok(());
            }
            submit(client, session, WriteCall::CancelMatch { match_id: id }, wait).await?;
        }
    }

    Ok(())
}
