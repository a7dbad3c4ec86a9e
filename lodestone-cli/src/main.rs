//! Lodestone CLI
//!
//! Scripted client over the store's request surface. Exit codes:
//! 0 success, 1 runtime error, 2 unknown area, 3 connect timeout.

use clap::{Parser, Subcommand};
use lodestone_client::{dump_all_from_multiple, ClientError, StoreClient};
use lodestone_types::consts::{CONNECT_TIMEOUT, PROCESS_TIMEOUT, TTL_INFINITY_MS};
use lodestone_types::wire::WireFilterParams;
use lodestone_types::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::process::ExitCode;

const EXIT_RUNTIME: u8 = 1;
const EXIT_UNKNOWN_AREA: u8 = 2;
const EXIT_CONNECT_TIMEOUT: u8 = 3;

#[derive(Parser, Debug)]
#[command(name = "lodestone", version, about = "Lodestone store client")]
struct Args {
    /// Store endpoint.
    #[arg(long, default_value = "127.0.0.1:9090")]
    store: SocketAddr,

    /// Client name reported to the store.
    #[arg(long, default_value = "lodestone-cli")]
    name: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch specific keys from an area.
    Get {
        area: String,
        keys: Vec<String>,
    },
    /// Write a key into an area.
    Set {
        area: String,
        key: String,
        value: String,
        #[arg(long, default_value_t = 1)]
        version: u64,
        #[arg(long)]
        originator: String,
        /// TTL in milliseconds; 0 means never expire.
        #[arg(long, default_value_t = 300_000)]
        ttl_ms: i64,
    },
    /// Dump an area, optionally filtered by key prefix patterns.
    Dump {
        area: String,
        #[arg(long)]
        prefix: Vec<String>,
        #[arg(long)]
        originator: Vec<String>,
    },
    /// Dump an area as hashes only.
    Hashes {
        area: String,
        #[arg(long)]
        prefix: Vec<String>,
    },
    /// List an area's peers.
    Peers { area: String },
    /// Add a peer to an area.
    AddPeer {
        area: String,
        peer_name: String,
        peer_addr: String,
    },
    /// Remove a peer from an area.
    DelPeer { area: String, peer_name: String },
    /// Show spanning-tree state for an area.
    Spt { area: String },
    /// List configured areas.
    Areas,
    /// Dump the same area from several stores and merge the results.
    MultiDump {
        area: String,
        #[arg(long, required = true)]
        endpoint: Vec<SocketAddr>,
        #[arg(long, default_value = "")]
        prefix: String,
    },
    /// Stream an area's publications (snapshot first).
    Watch {
        area: String,
        #[arg(long)]
        prefix: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(exit_code(&e))
        }
    }
}

fn exit_code(e: &ClientError) -> u8 {
    if e.is_connect_timeout() {
        EXIT_CONNECT_TIMEOUT
    } else if e.is_unknown_area() {
        EXIT_UNKNOWN_AREA
    } else {
        EXIT_RUNTIME
    }
}

async fn run(args: Args) -> Result<(), ClientError> {
    let client = StoreClient::new(args.store, args.name.clone());
    match args.command {
        Command::Get { area, keys } => {
            let key_vals = client.get_key_vals(&area, keys).await?;
            print_key_vals(&key_vals);
        }
        Command::Set {
            area,
            key,
            value,
            version,
            originator,
            ttl_ms,
        } => {
            let ttl_ms = if ttl_ms == 0 { TTL_INFINITY_MS } else { ttl_ms };
            let record = Value::full(version, originator, value.into_bytes(), ttl_ms, 1);
            client
                .set_key_vals(&area, HashMap::from([(key, record)]))
                .await?;
        }
        Command::Dump {
            area,
            prefix,
            originator,
        } => {
            let key_vals = client
                .dump_key_vals(&area, filters(prefix, originator), false)
                .await?;
            print_key_vals(&key_vals);
        }
        Command::Hashes { area, prefix } => {
            let key_vals = client.dump_hashes(&area, filters(prefix, vec![])).await?;
            let mut keys: Vec<_> = key_vals.keys().collect();
            keys.sort();
            for key in keys {
                let v = &key_vals[key];
                println!(
                    "{key}\tv{}\t{}\thash={:016x}",
                    v.version,
                    v.originator_id,
                    v.hash().unwrap_or(0)
                );
            }
        }
        Command::Peers { area } => {
            for peer in client.get_peers(&area).await? {
                println!("{}\t{}\t{}", peer.peer_name, peer.addr, peer.state);
            }
        }
        Command::AddPeer {
            area,
            peer_name,
            peer_addr,
        } => client.add_peer(&area, &peer_name, &peer_addr).await?,
        Command::DelPeer { area, peer_name } => client.del_peer(&area, &peer_name).await?,
        Command::Spt { area } => {
            let reply = client.get_spt_infos(&area).await?;
            for info in reply.infos {
                println!(
                    "root={} state={} cost={} parent={} children=[{}]",
                    info.root_id,
                    if info.passive { "passive" } else { "active" },
                    info.cost,
                    info.parent.as_deref().unwrap_or("-"),
                    info.children.join(",")
                );
            }
            println!("flood-peers: [{}]", reply.flood_peers.join(","));
        }
        Command::Areas => {
            for area in client.get_areas().await? {
                println!("{area}");
            }
        }
        Command::MultiDump {
            area,
            endpoint,
            prefix,
        } => {
            let (merged, unreachable) = dump_all_from_multiple(
                &area,
                &endpoint,
                &prefix,
                CONNECT_TIMEOUT,
                PROCESS_TIMEOUT,
            )
            .await;
            match merged {
                Some(key_vals) => print_key_vals(&key_vals),
                None => eprintln!("no store responded"),
            }
            for addr in &unreachable {
                eprintln!("unreachable: {addr}");
            }
        }
        Command::Watch { area, prefix } => {
            let mut stream = client
                .subscribe(vec![area], filters(prefix, vec![]), false, false)
                .await?;
            while let Some(publication) = stream.next().await? {
                for (key, value) in &publication.key_vals {
                    let body = value
                        .value
                        .as_deref()
                        .map(render_bytes)
                        .unwrap_or_else(|| "<ttl-update>".to_string());
                    println!("[{}] {key} v{} {}", publication.area, value.version, body);
                }
                for key in &publication.expired_keys {
                    println!("[{}] {key} expired", publication.area);
                }
            }
        }
    }
    Ok(())
}

fn filters(prefixes: Vec<String>, originators: Vec<String>) -> Option<WireFilterParams> {
    if prefixes.is_empty() && originators.is_empty() {
        return None;
    }
    Some(WireFilterParams {
        key_prefixes: prefixes,
        originator_ids: originators,
        operator: 0,
    })
}

fn print_key_vals(key_vals: &HashMap<String, Value>) {
    let mut keys: Vec<_> = key_vals.keys().collect();
    keys.sort();
    for key in keys {
        let v = &key_vals[key];
        let body = v
            .value()
            .map(render_bytes)
            .unwrap_or_else(|| "<no value>".to_string());
        println!(
            "{key}\tv{}\t{}\tttl={}ms\tttlv={}\t{}",
            v.version, v.originator_id, v.ttl_ms, v.ttl_version, body
        );
    }
}

fn render_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) if !s.contains(char::is_control) => s.to_string(),
        _ => format!("0x{}", hex::encode(bytes)),
    }
}
