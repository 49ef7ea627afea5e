use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use session_core::{
    extract, fetch_baseline, handle_for, ClientEvent, Faucet, HttpBackend, OwnerSession,
    PeerClient, StoreEvent,
};
use shared::{
    domain::{Handle, PartySymbol, PeerId},
    protocol::Registry,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "http://127.0.0.1:1999")]
    server_url: String,
    #[arg(long, default_value = "main")]
    room: String,
    /// Defaults to a fresh random id.
    #[arg(long)]
    peer_id: Option<String>,
    /// Defaults to a handle derived from the peer id.
    #[arg(long)]
    handle: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the party table a program declares.
    Extract { path: String },
    /// Print the room baseline without joining.
    Baseline,
    /// Join the room and print every change to the local view.
    Watch,
    /// Publish a program, bind parties and wait until every input is stored.
    Host(HostArgs),
    /// Request test funds for an address.
    Fund {
        address: String,
        #[arg(long, default_value = "http://127.0.0.1:8000")]
        backend: String,
    },
}

#[derive(Args, Debug)]
struct HostArgs {
    path: String,
    #[arg(long, default_value = "main")]
    name: String,
    #[arg(long, default_value = "http://127.0.0.1:8000")]
    backend: String,
    /// `peerId=partySymbol`, once per declared party.
    #[arg(long = "assign", value_parser = parse_assignment)]
    assignments: Vec<(PeerId, PartySymbol)>,
    #[arg(long, default_value_t = 300)]
    timeout_secs: u64,
}

fn parse_assignment(raw: &str) -> Result<(PeerId, PartySymbol), String> {
    let (peer, party) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected peerId=partySymbol, got `{raw}`"))?;
    if peer.is_empty() || party.is_empty() {
        return Err(format!("expected peerId=partySymbol, got `{raw}`"));
    }
    Ok((PeerId::from(peer), PartySymbol::from(party)))
}

fn room_listing(registry: &Registry) -> String {
    let mut listing = format!("{} peer(s) in room", registry.len());
    for (peer_id, handle) in registry.handles() {
        listing.push_str(&format!("\n  {handle} ({peer_id})"));
    }
    listing
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();

    let peer_id = PeerId::new(
        cli.peer_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
    );
    let handle = cli
        .handle
        .clone()
        .map(Handle::new)
        .unwrap_or_else(|| handle_for(&peer_id));

    match cli.command {
        Command::Extract { path } => {
            let source = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("failed to read {path}"))?;
            let parties = extract(&source)?;
            println!("{}", serde_json::to_string_pretty(&parties)?);
        }
        Command::Baseline => {
            let baseline = fetch_baseline(&cli.server_url, &cli.room).await?;
            println!("{}", serde_json::to_string_pretty(&baseline)?);
        }
        Command::Watch => {
            let client = PeerClient::connect(&cli.server_url, &cli.room, handle, peer_id).await?;
            println!("joined {} as {}", cli.room, client.me().handle);
            let mut events = client.subscribe();
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    event = events.recv() => match event {
                        Ok(ClientEvent::Disconnected) | Err(_) => break,
                        Ok(ClientEvent::Store(StoreEvent::RegistryReplaced { .. })) => {
                            let snapshot = client.snapshot().await;
                            println!("{}", room_listing(snapshot.registry()));
                        }
                        Ok(event) => println!("{event:?}"),
                    },
                }
            }
            client.close();
        }
        Command::Host(args) => {
            let client = PeerClient::connect(&cli.server_url, &cli.room, handle, peer_id.clone()).await?;
            let result = host(&client, peer_id, args).await;
            client.close();
            result?;
        }
        Command::Fund { address, backend } => {
            let receipt = HttpBackend::new(backend).fund(&address).await?;
            println!("funded {address}: tx={}", receipt.tx.as_deref().unwrap_or("-"));
        }
    }

    Ok(())
}

async fn host(client: &PeerClient, peer_id: PeerId, args: HostArgs) -> Result<()> {
    if args.assignments.is_empty() {
        bail!("at least one --assign peerId=partySymbol is required");
    }
    let source = tokio::fs::read_to_string(&args.path)
        .await
        .with_context(|| format!("failed to read {}", args.path))?;
    let timeout = Duration::from_secs(args.timeout_secs);

    let mut owner = OwnerSession::new(peer_id, args.name.as_str());
    owner.edit_source(source)?;
    let program_id = client
        .publish(&mut owner, &HttpBackend::new(args.backend.as_str()))
        .await?;
    println!("published {program_id}");

    let wanted: Vec<PeerId> = args.assignments.iter().map(|(peer, _)| peer.clone()).collect();
    client
        .wait_until(timeout, |store| wanted.iter().all(|peer| store.registry().contains(peer)))
        .await
        .context("assigned peers did not join the room")?;

    for (peer, party) in args.assignments {
        owner.select(peer, party)?;
    }
    client.submit_bindings(&mut owner).await?;
    info!(%program_id, "bindings sent; waiting for contributions");

    client
        .wait_until(timeout, |store| store.is_complete())
        .await
        .context("contributions did not complete")?;

    let snapshot = client.snapshot().await;
    let ledger = snapshot
        .ledger()
        .ok_or_else(|| anyhow!("session {program_id} is no longer active"))?;
    println!("{}", serde_json::to_string_pretty(&ledger.records().collect::<Vec<_>>())?);
    Ok(())
}
