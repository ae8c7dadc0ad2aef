//! Asynchronous driver of a single run.
//!
//! The [Runner] owns a [Member] and a [Dispatcher]. It is the only task that mutates the member: it
//! broadcasts the member's message for each phase, feeds it inbound messages one at a time, and ends a
//! phase as soon as every qualified member submitted or once the phase timeout elapses (whichever comes
//! first). The run stops on completion, on abort, or when the owning application cancels it through
//! the [Canceller].

use crate::{
    dispatch::{Dispatcher, Inbound, Membership, Receiver, Sender},
    Abort, AbortReason, GroupKeyMaterial, Member,
};
use futures::channel::oneshot;
use rand::{CryptoRng, RngCore};
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

/// Handle used to cancel a run.
pub struct Canceller(oneshot::Sender<()>);

impl Canceller {
    /// Abort the run (if it is still in progress).
    pub fn cancel(self) {
        let _ = self.0.send(());
    }
}

/// Signal observed by a run to learn that it was cancelled.
///
/// Dropping the [Canceller] without calling [Canceller::cancel] leaves the run uncancellable.
pub struct Cancellation(oneshot::Receiver<()>);

/// Create a linked [Canceller] and [Cancellation].
pub fn cancellation() -> (Canceller, Cancellation) {
    let (sender, receiver) = oneshot::channel();
    (Canceller(sender), Cancellation(receiver))
}

/// Drives a [Member] over a transport.
pub struct Runner<G, S, R, M>
where
    G: RngCore + CryptoRng,
    S: Sender,
    R: Receiver,
    M: Membership<R::PublicKey>,
{
    member: Member<G>,
    dispatcher: Dispatcher<S, R, M>,
    timeout: Duration,
}

impl<G, S, R, M> Runner<G, S, R, M>
where
    G: RngCore + CryptoRng + Send,
    S: Sender,
    R: Receiver,
    M: Membership<R::PublicKey>,
{
    pub fn new(member: Member<G>, dispatcher: Dispatcher<S, R, M>) -> Self {
        let timeout = member.config().phase_timeout;
        Self {
            member,
            dispatcher,
            timeout,
        }
    }

    /// Run until the group key is generated or the run aborts.
    pub async fn run(mut self, cancellation: Cancellation) -> Result<GroupKeyMaterial, Abort> {
        let mut cancelled = cancellation.0;
        let mut armed = true;
        let mut deadline = Instant::now() + self.timeout;
        loop {
            if let Some(outcome) = self.member.take_outcome() {
                match &outcome {
                    Ok(material) => info!(
                        me = %self.member.me(),
                        qualified = material.qualified().len(),
                        "run completed"
                    ),
                    Err(abort) => info!(me = %self.member.me(), %abort, "run aborted"),
                }
                return outcome;
            }

            // Broadcast our message for the phase
            if let Some(payload) = self.member.outbound() {
                if let Err(err) = self.dispatcher.broadcast(&payload).await {
                    self.member
                        .abort(AbortReason::Transport(err.to_string()));
                }
                continue;
            }

            // End the phase early if everyone submitted
            if self.member.is_complete() {
                self.member.advance();
                deadline = Instant::now() + self.timeout;
                continue;
            }

            tokio::select! {
                biased;

                result = &mut cancelled, if armed => match result {
                    Ok(()) => self.member.abort(AbortReason::Cancelled),
                    Err(_) => {
                        debug!(me = %self.member.me(), "canceller dropped");
                        armed = false;
                    }
                },
                _ = sleep_until(deadline) => {
                    debug!(me = %self.member.me(), phase = %self.member.phase(), "phase timed out");
                    self.member.advance();
                    deadline = Instant::now() + self.timeout;
                },
                result = self.dispatcher.recv() => match result {
                    Ok(Inbound { sender, payload }) => {
                        if let Err(err) = self.member.receive(sender, payload) {
                            debug!(me = %self.member.me(), %sender, ?err, "rejected message");
                        }
                    }
                    Err(err) => self.member.abort(AbortReason::Transport(err.to_string())),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        local::{self, Network},
        threshold::recover_public_key,
        Config, MemberId, Phase,
    };
    use rand::{rngs::StdRng, SeedableRng};
    use std::collections::BTreeMap;

    type LocalRunner =
        Runner<StdRng, local::Sender<u64>, local::Receiver<u64>, BTreeMap<u64, MemberId>>;

    fn config(group_size: u16, dishonest_threshold: u16) -> Config {
        Config {
            group_size,
            dishonest_threshold,
            phase_timeout: Duration::from_secs(10),
        }
    }

    /// Public key of member `id` on the local network.
    fn public_key(id: u16) -> u64 {
        1_000 + u64::from(id)
    }

    fn setup(cfg: &Config, network: &Network<u64>, id: u16) -> LocalRunner {
        let membership = (1..=cfg.group_size)
            .map(|id| (public_key(id), MemberId::new(id)))
            .collect::<BTreeMap<_, _>>();
        let (sender, receiver) = network.register(public_key(id)).unwrap();
        let dispatcher = Dispatcher::new(sender, receiver, membership, cfg.clone());
        let rng = StdRng::seed_from_u64(u64::from(id));
        let member = Member::new(cfg.clone(), MemberId::new(id), rng).unwrap();
        Runner::new(member, dispatcher)
    }

    /// Run members `running` of a group and collect their outcomes.
    async fn run(cfg: Config, running: &[u16]) -> Vec<Result<GroupKeyMaterial, Abort>> {
        let network = Network::new();
        let runners = running
            .iter()
            .map(|id| setup(&cfg, &network, *id))
            .collect::<Vec<_>>();
        let mut handles = Vec::new();
        for runner in runners {
            let (canceller, cancellation) = cancellation();
            drop(canceller);
            handles.push(tokio::spawn(runner.run(cancellation)));
        }
        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }
        outcomes
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_honest() {
        let start = Instant::now();
        let outcomes = run(config(5, 2), &[1, 2, 3, 4, 5]).await;
        let materials = outcomes
            .iter()
            .map(|outcome| outcome.as_ref().unwrap())
            .collect::<Vec<_>>();

        // Every phase ended early
        assert!(start.elapsed() < Duration::from_secs(10));

        // Everyone agrees on the group key
        let group_public_key = materials[0].group_public_key();
        for material in &materials {
            assert_eq!(material.group_public_key(), group_public_key);
            assert_eq!(material.qualified().len(), 5);
        }
        let recovered = recover_public_key(3, materials[0].public_shares()).unwrap();
        assert_eq!(&recovered, group_public_key);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_member_times_out() {
        let start = Instant::now();
        let outcomes = run(config(5, 2), &[1, 2, 3, 4]).await;

        // Only the first phase waited for the timeout
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(10));
        assert!(elapsed < Duration::from_secs(20));
        for outcome in &outcomes {
            let material = outcome.as_ref().unwrap();
            assert_eq!(
                material.qualified(),
                &[1, 2, 3, 4].map(MemberId::new)
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_quorum_lost() {
        let outcomes = run(config(4, 2), &[1, 2]).await;
        for outcome in outcomes {
            let abort = outcome.unwrap_err();
            assert_eq!(abort.phase, Phase::Initializing);
            assert_eq!(abort.reason, AbortReason::QuorumLost { required: 3 });
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let cfg = config(3, 1);
        let network = Network::new();
        let runner = setup(&cfg, &network, 1);
        let (canceller, cancellation) = cancellation();
        let handle = tokio::spawn(runner.run(cancellation));
        tokio::time::sleep(Duration::from_secs(1)).await;
        canceller.cancel();
        let abort = handle.await.unwrap().unwrap_err();
        assert_eq!(
            abort,
            Abort {
                phase: Phase::Initializing,
                qualified: 1,
                reason: AbortReason::Cancelled,
            }
        );
    }
}
