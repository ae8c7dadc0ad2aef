//! Generate a threshold group key among simulated members.
//!
//! Every member runs in its own task and talks to the others over an in-memory broadcast channel.
//! Members are identified on the channel by an ECDSA public key and mapped to their member identifier
//! by a shared membership table.
//!
//! # Usage
//!
//! ```bash
//! cargo run --release --bin beacon-dkg-simulate -- --size 5 --threshold 2
//! ```
//!
//! Members listed in `--silent` never start. The others wait `--timeout-ms` for them in the first phase
//! and then continue without them:
//!
//! ```bash
//! cargo run --release --bin beacon-dkg-simulate -- --size 7 --threshold 3 --silent 6 --timeout-ms 500
//! ```

use beacon_dkg::{
    cancellation,
    dispatch::Dispatcher,
    local::Network,
    primitives::{point_to_bytes, Point},
    Config, Member, MemberId, Runner,
};
use clap::Parser;
use futures::future::join_all;
use p256::ecdsa::SigningKey;
use rand::{rngs::StdRng, SeedableRng};
use std::{collections::BTreeMap, pin::pin, time::Duration};
use tracing::{error, info, Level};

/// Simulate a run of the key generation.
#[derive(Parser)]
pub struct App {
    /// The log level for traces. opts: (error, debug, info, warn, trace)
    #[arg(long, default_value_t = Level::INFO)]
    log_level: Level,

    /// The number of members in the group.
    #[arg(long, default_value_t = 5)]
    size: u16,

    /// The maximum number of dishonest members the group key tolerates.
    #[arg(long, default_value_t = 2)]
    threshold: u16,

    /// The time each phase waits for silent members.
    #[arg(long, default_value_t = 1_000)]
    timeout_ms: u64,

    /// Members that never start.
    #[arg(long, value_delimiter = ',')]
    silent: Vec<u16>,

    /// Seed for all randomness of the simulation.
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

/// Encode bytes as lowercase hex.
fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[tokio::main]
async fn main() {
    let app = App::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(app.log_level)
        .init();

    // Validate configuration
    let config = Config {
        group_size: app.size,
        dishonest_threshold: app.threshold,
        phase_timeout: Duration::from_millis(app.timeout_ms),
    };
    if let Err(err) = config.validate() {
        error!(?err, "invalid configuration");
        return;
    }

    // Assign every member a signing key
    let mut rng = StdRng::seed_from_u64(app.seed);
    let keys = (1..=config.group_size)
        .map(|id| {
            let signer = SigningKey::random(&mut rng);
            let public_key = hex(&point_to_bytes(&Point::from(*signer.verifying_key().as_affine())));
            (MemberId::new(id), public_key)
        })
        .collect::<BTreeMap<_, _>>();
    let membership = keys
        .iter()
        .map(|(id, public_key)| (public_key.clone(), *id))
        .collect::<BTreeMap<_, _>>();
    for (id, public_key) in &keys {
        info!(member = %id, %public_key, "assigned key");
    }

    // Start every member that is not silent
    let network = Network::new();
    let mut runs = Vec::new();
    let mut cancellers = Vec::new();
    for (id, public_key) in &keys {
        if app.silent.contains(&id.get()) {
            info!(member = %id, "member is silent");
            continue;
        }
        let (sender, receiver) = match network.register(public_key.clone()) {
            Ok(handles) => handles,
            Err(err) => {
                error!(member = %id, ?err, "failed to register");
                return;
            }
        };
        let dispatcher = Dispatcher::new(sender, receiver, membership.clone(), config.clone());
        let member_rng = StdRng::seed_from_u64(app.seed.wrapping_add(u64::from(id.get())));
        let member = match Member::new(config.clone(), *id, member_rng) {
            Ok(member) => member,
            Err(err) => {
                error!(member = %id, ?err, "failed to create member");
                return;
            }
        };
        let (canceller, cancellation) = cancellation();
        let id = *id;
        let handle = tokio::spawn(async move {
            let outcome = Runner::new(member, dispatcher).run(cancellation).await;
            (id, outcome)
        });
        runs.push(handle);
        cancellers.push(canceller);
    }

    // Wait for all members (or cancel them on interrupt)
    let mut outcomes = pin!(join_all(runs));
    let results = tokio::select! {
        results = &mut outcomes => results,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, cancelling runs");
            for canceller in cancellers {
                canceller.cancel();
            }
            outcomes.await
        },
    };

    // Report outcomes
    for result in results {
        let (id, outcome) = match result {
            Ok(result) => result,
            Err(err) => {
                error!(?err, "member task failed");
                continue;
            }
        };
        match outcome {
            Ok(material) => {
                let group_public_key = hex(&point_to_bytes(material.group_public_key()));
                info!(
                    member = %id,
                    %group_public_key,
                    qualified = ?material.qualified(),
                    disqualified = ?material.disqualified(),
                    "generated group key"
                );
            }
            Err(abort) => error!(member = %id, %abort, "run aborted"),
        }
    }
}
