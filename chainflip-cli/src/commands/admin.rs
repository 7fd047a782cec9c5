use super::{amount, confirm, show, submit};
use chainflip_core::gateway::ProtocolSnapshot;
use chainflip_core::{Address, ChainFlipClient, Session, Wei, WriteCall};
use clap::Subcommand;
use comfy_table::{presets::UTF8_FULL, Table};

/// Highest fee the contract accepts, in basis points.
const MAX_FEE_BASIS_POINTS: u64 = 10_000;

#[derive(Subcommand)]
pub enum AdminCommands {
    /// Show protocol settings and collected fees
    Show,
    /// Set the protocol fee in basis points (500 = 5%)
    SetFee {
        basis_points: u64,
        #[arg(short, long)]
        force: bool,
        #[arg(short, long)]
        wait: bool,
    },
    /// Set the minimum wager, e.g. 0.1
    SetMinBet {
        amount: String,
        #[arg(short, long)]
        force: bool,
        #[arg(short, long)]
        wait: bool,
    },
    /// Set how long a match may wait on the oracle before it can be canceled
    SetTimeout {
        seconds: u64,
        #[arg(short, long)]
        force: bool,
        #[arg(short, long)]
        wait: bool,
    },
    /// Withdraw collected fees
    WithdrawFees {
        /// Recipient (defaults to your account)
        #[arg(long)]
        recipient: Option<Address>,
        /// Amount to withdraw (defaults to everything collected)
        #[arg(long)]
        amount: Option<String>,
        #[arg(short, long)]
        force: bool,
        #[arg(short, long)]
        wait: bool,
    },
}

pub async fn handle_admin_command(
    cmd: AdminCommands,
    client: &ChainFlipClient,
    session: &Session,
) -> anyhow::Result<()> {
    let protocol = client.gateway().protocol().await;

    let (call, prompt, wait) = match cmd {
        AdminCommands::Show => {
            print_protocol(&protocol, session);
            return Ok(());
        }
        AdminCommands::SetFee {
            basis_points,
            force,
            wait,
        } => {
            if basis_points > MAX_FEE_BASIS_POINTS {
                anyhow::bail!("fee must be at most {} basis points", MAX_FEE_BASIS_POINTS);
            }
            let prompt = format!(
                "Set fee to {:.2}% (currently {})?",
                basis_points as f64 / 100.0,
                show(&protocol.fee_percent, |f| format!("{:.2}%", *f as f64 / 100.0))
            );
            (WriteCall::SetFeePercent { basis_points }, (prompt, force), wait)
        }
        AdminCommands::SetMinBet {
            amount: value,
            force,
            wait,
        } => {
            let new_min = Wei::parse_ether(&value)?;
            let prompt = format!(
                "Set minimum bet to {} (currently {})?",
                amount(new_min, session),
                show(&protocol.minimum_bet, |m| amount(*m, session))
            );
            (
                WriteCall::SetMinimumBetAmount { amount: new_min },
                (prompt, force),
                wait,
            )
        }
        AdminCommands::SetTimeout {
            seconds,
            force,
            wait,
        } => {
            let prompt = format!(
                "Set stuck-match timeout to {}s (currently {})?",
                seconds,
                show(&protocol.timeout, |t| format!("{}s", t))
            );
            (WriteCall::SetTimeOut { seconds }, (prompt, force), wait)
        }
        AdminCommands::WithdrawFees {
            recipient,
            amount: value,
            force,
            wait,
        } => {
            let recipient = match recipient {
                Some(recipient) => recipient,
                None => session.account()?,
            };
            let withdraw = match value {
                Some(value) => Wei::parse_ether(&value)?,
                None => match &protocol.collected_fees {
                    Ok(fees) => *fees,
                    Err(failure) => anyhow::bail!("collected fees unavailable: {}", failure),
                },
            };
            if !protocol.can_withdraw_fees() {
                println!("No collected fees reported.");
            }
            let prompt = format!("Withdraw {} to {}?", amount(withdraw, session), recipient);
            (
                WriteCall::WithdrawFees {
                    recipient,
                    amount: withdraw,
                },
                (prompt, force),
                wait,
            )
        }
    };

    let account = session.account()?;
    if protocol.owner.is_ok() && !protocol.is_owner(&account) {
        println!(
            "Warning: {} is not the contract owner; the transaction will likely revert.",
            account
        );
    }

    let (prompt, force) = prompt;
    if !confirm(prompt, force)? {
        println!("Aborted.");
        return Ok(());
    }
    submit(client, session, call, wait).await
}

fn print_protocol(protocol: &ProtocolSnapshot, session: &Session) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Setting", "Value"]);

    table.add_row(vec![
        "Owner".to_string(),
        show(&protocol.owner, |o| o.to_string()),
    ]);
    table.add_row(vec![
        "Fee".to_string(),
        show(&protocol.fee_percent, |f| format!("{:.2}% ({} bps)", *f as f64 / 100.0, f)),
    ]);
    table.add_row(vec![
        "Minimum bet".to_string(),
        show(&protocol.minimum_bet, |m| amount(*m, session)),
    ]);
    table.add_row(vec![
        "Collected fees".to_string(),
        show(&protocol.collected_fees, |c| amount(*c, session)),
    ]);
    table.add_row(vec![
        "Stuck-match timeout".to_string(),
        show(&protocol.timeout, |t| format!("{}s", t)),
    ]);
    table.add_row(vec![
        "Matches created".to_string(),
        show(&protocol.current_match_id, |id| id.to_string()),
    ]);

    println!("{table}");

    if let Some(account) = session.account {
        if protocol.is_owner(&account) {
            println!("You are the contract owner.");
            if protocol.can_withdraw_fees() {
                println!("Fees are available to withdraw.");
            }
        }
    }
}
