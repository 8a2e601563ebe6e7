use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use argh::FromArgs;
use futures::future::join_all;
use num_bigint::BigUint;
use tracing::warn;

use mpc::cluster::LocalCluster;
use mpc::config::ClusterConfig;
use mpc::engine::PartyEngine;
use mpc::interpreter::{self, Instruction};
use mpc::transport::{net, ChannelTransport, ProtocolMessage};

/// Execute a secret sharing MPC program.
#[derive(FromArgs, Debug)]
struct Options {
    /// path to the instruction program
    #[argh(option)]
    program: String,

    /// path prefix for input files; party i reads <inputs><i>
    #[argh(option)]
    inputs: Option<String>,

    /// path to the p/n/t configuration file
    #[argh(option)]
    config: Option<String>,

    /// join a networked computation as the party with this index
    #[argh(option)]
    party: Option<usize>,

    /// comma-separated party addresses ordered by index (networked mode)
    #[argh(option)]
    peers: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let options: Options = argh::from_env();

    let config = load_config(options.config.as_deref());
    let source = std::fs::read_to_string(&options.program).expect("cannot read program file");
    let program = interpreter::parse_program(&source);

    match (options.party, options.peers.as_deref()) {
        (Some(index), Some(peers)) => {
            let inputs = load_inputs(options.inputs.as_deref(), index);
            run_networked(config, program, inputs, index, peers).await;
        }
        (None, None) => run_locally(config, program, options.inputs.as_deref()).await,
        _ => panic!("--party and --peers must be given together"),
    }
}

/// Missing config files fall back to the defaults (P=4001, n=3, t=1).
fn load_config(path: Option<&str>) -> ClusterConfig {
    match path {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(source) => ClusterConfig::parse(&source),
            Err(_) => {
                warn!("config file {} missing, using defaults", path);
                ClusterConfig::default()
            }
        },
        None => ClusterConfig::default(),
    }
}

fn load_inputs(prefix: Option<&str>, index: usize) -> HashMap<String, BigUint> {
    let Some(prefix) = prefix else {
        return HashMap::new();
    };
    let path = format!("{prefix}{index}");
    match std::fs::read_to_string(&path) {
        Ok(source) => interpreter::parse_inputs(&source),
        Err(_) => {
            warn!("no input file at {}, party {} runs without inputs", path, index);
            HashMap::new()
        }
    }
}

/// Run all parties of the computation inside this process and print the
/// output map of party 1.
async fn run_locally(config: ClusterConfig, program: Vec<Instruction>, inputs_prefix: Option<&str>) {
    let cluster = LocalCluster::connect(config.scheme());

    let results = join_all(cluster.parties().iter().map(|party| {
        let party = party.clone();
        let program = program.clone();
        let inputs = load_inputs(inputs_prefix, party.index());
        async move { interpreter::execute(&party, &program, &inputs).await }
    }))
    .await;

    for (slot, result) in results.iter().enumerate() {
        if let Err(err) = result {
            eprintln!("party {} failed: {}", slot + 1, err);
        }
    }
    if let Ok(outputs) = &results[0] {
        for (id, value) in outputs {
            println!("{} {}", id, value);
        }
    }
}

/// Join a computation distributed across hosts as a single party.
async fn run_networked(
    config: ClusterConfig,
    program: Vec<Instruction>,
    inputs: HashMap<String, BigUint>,
    index: usize,
    peers: &str,
) {
    let addresses: Vec<SocketAddr> = peers
        .split(',')
        .map(|address| address.trim().parse().expect("invalid peer address"))
        .collect();
    assert_eq!(
        addresses.len(),
        config.parties,
        "one address per party is required"
    );

    let channels = net::connect_parties::<ProtocolMessage>(&addresses, index)
        .await
        .expect("multiparty connection failed");
    let (transport, inbox) = ChannelTransport::new(channels, index);
    let engine = Arc::new(PartyEngine::new(config.scheme(), index, Box::new(transport)));
    let _pump = engine.clone().spawn_pump(inbox);

    match interpreter::execute(&engine, &program, &inputs).await {
        Ok(outputs) => {
            for (id, value) in &outputs {
                println!("{} {}", id, value);
            }
        }
        Err(err) => eprintln!("party {} failed: {}", index, err),
    }
}
