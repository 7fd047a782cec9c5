pub mod admin;
pub mod config;
pub mod matches;
pub mod player;
pub mod watch;

pub use admin::{handle_admin_command, AdminCommands};
pub use config::{handle_config_command, ConfigCommands};
pub use matches::{handle_match_command, MatchCommands};
pub use player::{handle_player_command, show_leaderboard, PlayerCommands};
pub use watch::watch;

use chainflip_core::gateway::Read;
use chainflip_core::{ChainFlipClient, Match, Session, Wei, WriteCall};
use comfy_table::{presets::UTF8_FULL, Table};
use dialoguer::Confirm;
use std::time::Duration;

/// How long `--wait` follows events before giving up.
const CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(180);

pub(crate) fn amount(wei: Wei, session: &Session) -> String {
    format!("{} {}", wei.format_ether(), session.chain.native_currency())
}

pub(crate) fn show<T>(read: &Read<T>, render: impl FnOnce(&T) -> String) -> String {
    match read {
        Ok(value) => render(value),
        Err(_) => "unavailable".to_string(),
    }
}

pub(crate) fn confirm(prompt: String, force: bool) -> anyhow::Result<bool> {
    if force {
        return Ok(true);
    }
    Ok(Confirm::new().with_prompt(prompt).default(false).interact()?)
}

pub(crate) fn match_table(
    matches: &[Match],
    fee_percent: &Read<u64>,
    session: &Session,
) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["ID", "State", "Creator", "Opponent", "Bet", "Prize", "Winner"]);

    for m in matches {
        let opponent = if m.is_joined() {
            m.player2.short()
        } else {
            "-".to_string()
        };
        let winner = if m.has_winner() {
            m.winner.short()
        } else {
            "-".to_string()
        };
        let prize = show(fee_percent, |fee| {
            amount(chainflip_core::stats::adjusted_prize_pool(m.bet_amount, *fee), session)
        });

        table.add_row(vec![
            m.id.to_string(),
            m.state.to_string(),
            m.player1.short(),
            opponent,
            amount(m.bet_amount, session),
            prize,
            winner,
        ]);
    }

    table
}

/// Submit through the overlay and optionally follow events until the write
/// is confirmed.
pub(crate) async fn submit(
    client: &ChainFlipClient,
    session: &Session,
    call: WriteCall,
    wait: bool,
) -> anyhow::Result<()> {
    let start = client.block_number().await?;
    let submitted = client.perform(session, call).await?;
    println!("Transaction submitted: {}", submitted.tx);

    if !wait {
        println!("Pending confirmation. Use 'chainflip watch' to follow it.");
        return Ok(());
    }

    println!("Waiting for confirmation...");
    let mut subscription = client.subscriber().starting_at(start).spawn();
    let deadline = tokio::time::sleep(CONFIRMATION_TIMEOUT);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                println!(
                    "No confirmation after {}s; the transaction may still land.",
                    CONFIRMATION_TIMEOUT.as_secs()
                );
                break;
            }
            next = subscription.recv() => {
                let Some(logged) = next else { break };
                client.handle_event(session, &logged.event).await;
                if !client.overlay().is_pending(&submitted.key) {
                    println!("Confirmed: {} (block {})", logged.event, logged.block_number);
                    break;
                }
            }
        }
    }

    subscription.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainflip_core::contract::mock::MockContract;
    use chainflip_core::{
        ActionKey, ActionKind, Address, Chain, ClientConfig, CoinSide, ContractEvent, MatchState,
        ReadFailure, RequestId,
    };
    use std::sync::Arc;

    fn addr(byte: u8) -> Address {
        Address::new([byte; 20])
    }

    fn waiting(id: u64, creator: Address) -> Match {
        Match {
            id,
            state: MatchState::Waiting,
            player1: creator,
            player2: Address::ZERO,
            bet_amount: Wei::parse_ether("1").unwrap(),
            winner: Address::ZERO,
            result: false,
            start_time: None,
            end_time: None,
            player1_choice: CoinSide::Heads,
            player2_choice: CoinSide::Tails,
            vrf_request_id: RequestId::ZERO,
        }
    }

    fn setup() -> (Arc<MockContract>, ChainFlipClient, Session) {
        let mock = Arc::new(MockContract::new());
        let mut config = ClientConfig::new(Chain::Anvil);
        config.poll_interval = Duration::from_millis(20);
        let client = ChainFlipClient::new(mock.clone(), config);
        let session = Session::new(Chain::Anvil).with_account(addr(1));
        (mock, client, session)
    }

    #[test]
    fn test_match_table_marks_unavailable_prize() {
        let session = Session::new(Chain::Sepolia);
        let fee: Read<u64> = Err(ReadFailure {
            call: "getFeePercent".to_string(),
            reason: "timeout".to_string(),
        });

        let rendered = match_table(&[waiting(3, addr(2))], &fee, &session).to_string();
        assert!(rendered.contains("unavailable"));
        assert!(rendered.contains("1 ETH"));

        let rendered = match_table(&[waiting(3, addr(2))], &Ok(500), &session).to_string();
        assert!(rendered.contains("1.9 ETH"));
    }

    #[tokio::test]
    async fn test_submit_without_wait_leaves_action_pending() {
        let (mock, client, session) = setup();
        mock.insert_match(waiting(4, addr(2)));

        submit(
            &client,
            &session,
            WriteCall::JoinMatch {
                match_id: 4,
                wager: Wei::parse_ether("1").unwrap(),
            },
            false,
        )
        .await
        .unwrap();

        let key = ActionKey::on_match(ActionKind::JoinMatch, 4);
        assert!(client.overlay().is_pending(&key));
        assert_eq!(mock.submissions().len(), 1);
    }

    #[tokio::test]
    async fn test_submit_with_wait_returns_once_confirmed() {
        let (mock, client, session) = setup();
        mock.insert_match(waiting(4, addr(2)));

        let emitter = mock.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            emitter.emit(ContractEvent::MatchJoined {
                match_id: 4,
                player2: addr(1),
                choice: CoinSide::Tails,
                bet_amount: Wei::parse_ether("1").unwrap(),
            });
        });

        submit(
            &client,
            &session,
            WriteCall::JoinMatch {
                match_id: 4,
                wager: Wei::parse_ether("1").unwrap(),
            },
            true,
        )
        .await
        .unwrap();

        let key = ActionKey::on_match(ActionKind::JoinMatch, 4);
        assert!(!client.overlay().is_pending(&key));
    }
}
