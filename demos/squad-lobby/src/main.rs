//! Scripted squad: three members gather, one drops and comes back, the
//! owner starts, and every member prints the seat it was given.

use std::sync::Arc;
use std::time::Duration;

use squadforge::prelude::*;

// ---------------------------------------------------------------------------
// Frame helpers
// ---------------------------------------------------------------------------

fn frame(intent: ClientIntent) -> Result<Vec<u8>, SquadforgeError> {
    let envelope = Envelope {
        seq: 0,
        timestamp: 0,
        delivery: Delivery::ReliableOrdered,
        channel: None,
        payload: Payload::Intent(intent),
    };
    Ok(JsonCodec.encode(&envelope)?)
}

/// Prints every frame already queued on the link.
fn print_frames(name: &str, link: &mut ClientLink) -> Result<(), SquadforgeError> {
    while let Some(bytes) = link.try_recv() {
        let envelope: Envelope = JsonCodec.decode(&bytes)?;
        let Payload::Message(msg) = envelope.payload else {
            continue;
        };
        match msg {
            ServerMessage::State(view) => {
                let roster: Vec<String> = view
                    .members
                    .iter()
                    .map(|m| format!("{}:{}", m.name, m.state))
                    .collect();
                println!(
                    "{name:<5} #{:<3} state   [{}] ready={} started={}",
                    envelope.seq,
                    roster.join(", "),
                    view.ready_to_start,
                    view.started
                );
            }
            ServerMessage::Reservation(seat) => {
                println!(
                    "{name:<5} #{:<3} seat    instance={} token={} expires_in={}s",
                    envelope.seq, seat.match_instance_id, seat.seat_token, seat.expiry
                );
            }
            other => {
                println!("{name:<5} #{:<3} {}", envelope.seq, serde_json::to_string(&other).unwrap_or_default());
            }
        }
    }
    Ok(())
}

async fn settle<H: MatchHost>(gateway: &Gateway<H>, squad: SquadId) -> Result<(), SquadforgeError> {
    gateway.snapshot(squad).await?;
    tokio::time::sleep(Duration::from_millis(20)).await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Scenario
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    squadforge::telemetry::init_tracing("info");

    let host = Arc::new(InMemoryMatchHost::new().with_capacity(8));
    let gateway = GatewayBuilder::new()
        .squad_config(SquadConfig {
            reconnect_grace: Duration::from_secs(2),
            ..SquadConfig::default()
        })
        .build(Arc::clone(&host));

    let squad = gateway.open_squad().await;
    let names = ["Ann", "Bob", "Cid"];
    let mut links = Vec::new();
    for (i, name) in names.iter().enumerate() {
        let member = MemberId(i as u64 + 1);
        links.push(gateway.connect(squad, member, Some(name.to_string())).await?);
    }

    for link in &links {
        gateway
            .handle_frame(link.member_id(), &frame(ClientIntent::Ready { ready: true })?)
            .await?;
    }
    gateway
        .handle_frame(MemberId(2), &frame(ClientIntent::Move { x: Some(1.5), y: None })?)
        .await?;

    // Bob's connection drops and comes back inside the grace window.
    let bob_token = links[1].ticket.reconnect_token.clone();
    gateway.disconnect(MemberId(2), false).await?;
    settle(&gateway, squad).await?;
    links[1] = gateway.reconnect(squad, &bob_token).await?;
    gateway
        .handle_frame(MemberId(2), &frame(ClientIntent::Ready { ready: true })?)
        .await?;

    gateway.handle_frame(MemberId(1), &frame(ClientIntent::Start)?).await?;
    for _ in 0..50 {
        if gateway.squad_info(squad).await?.phase == LobbyPhase::Launched {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    settle(&gateway, squad).await?;

    for (name, link) in names.iter().zip(links.iter_mut()) {
        print_frames(name, link)?;
    }

    let info = gateway.squad_info(squad).await?;
    tracing::info!(
        squad_id = %info.squad_id,
        phase = %info.phase,
        seats = host.reserved_seats().await,
        "scenario finished"
    );
    gateway.retire_finished().await;
    Ok(())
}
