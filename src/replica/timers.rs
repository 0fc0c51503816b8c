use crate::actor::ActorClient;
use crate::ids::PeerId;
use crate::replica::replica_api::LeaderTimerTick;
use crate::wal::Term;
use rand::Rng;
use std::ops::RangeInclusive;
use tokio::time;
use tokio::time::{Duration, Instant};

/// Drives one peer's replication cadence while the local replica is leader.
/// Dropping the handle stops the timer task, so losing leadership (which
/// drops the whole leader state) silences all heartbeats.
pub(crate) struct LeaderTimerHandle {
    // will be dropped
    _stopper: stop_signal::Stopper,
}

impl LeaderTimerHandle {
    pub(crate) fn spawn_background_task(
        heartbeat_duration: Duration,
        actor_client: ActorClient,
        peer_id: PeerId,
        term: Term,
    ) -> Self {
        let (stopper, stop_check) = stop_signal::new();

        tokio::task::spawn(Self::leader_timer_task(
            stop_check,
            heartbeat_duration,
            actor_client,
            peer_id,
            term,
        ));

        LeaderTimerHandle { _stopper: stopper }
    }

    async fn leader_timer_task(
        stop_check: stop_signal::StopCheck,
        heartbeat_duration: Duration,
        actor_client: ActorClient,
        peer_id: PeerId,
        term: Term,
    ) {
        let event = LeaderTimerTick { peer_id, term };

        // Eagerly publish a tick before the first interval elapses, so a
        // newly elected leader announces itself immediately.
        actor_client.leader_timer(event.clone()).await;

        let mut interval = time::interval(heartbeat_duration);
        // The first interval tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            if stop_check.should_stop() {
                break;
            }
            actor_client.leader_timer(event.clone()).await;
        }
    }
}

/// Watches for leader silence while the local replica is follower or
/// candidate. Each heartbeat resets the deadline; if the deadline passes
/// without a reset, a follower-timeout event fires and the replica starts an
/// election. The deadline is randomized per reset to reduce split votes.
pub(crate) struct FollowerTimerHandle {
    queue: flume::Sender<Instant>,
    timeout_range: RangeInclusive<Duration>,
}

impl FollowerTimerHandle {
    pub(crate) fn spawn_background_task(
        min_timeout: Duration,
        max_timeout: Duration,
        actor_client: ActorClient,
    ) -> Self {
        let (tx, rx) = flume::unbounded();

        let handle = FollowerTimerHandle {
            queue: tx,
            timeout_range: RangeInclusive::new(min_timeout, max_timeout),
        };
        handle.reset_timeout();

        tokio::task::spawn(Self::follower_timer_task(rx, actor_client));

        handle
    }

    pub(crate) fn reset_timeout(&self) {
        match self.queue.try_send(self.random_timeout()) {
            Ok(_) => {}
            Err(flume::TrySendError::Disconnected(_)) => {
                // Timer task already fired and exited; the pending
                // follower-timeout event supersedes this reset.
            }
            Err(flume::TrySendError::Full(_)) => {
                unreachable!("unbounded queue can't be full")
            }
        }
    }

    fn random_timeout(&self) -> Instant {
        let rand_timeout = rand::thread_rng().gen_range(self.timeout_range.clone());
        Instant::now() + rand_timeout
    }

    async fn follower_timer_task(queue: flume::Receiver<Instant>, actor_client: ActorClient) {
        loop {
            match queue.try_recv() {
                Ok(wake_time) => {
                    tokio::time::sleep_until(wake_time).await;
                }
                Err(flume::TryRecvError::Empty) => {
                    // Slept until the last deadline and no reset arrived:
                    // the leader has gone quiet. If the handle was dropped in
                    // the meantime (role change), Disconnected is hit instead.
                    actor_client.follower_timeout().await;
                    return;
                }
                Err(flume::TryRecvError::Disconnected) => {
                    return;
                }
            }
        }
    }
}

mod stop_signal {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    pub(super) struct Stopper {
        stop_signal: Arc<AtomicBool>,
    }

    pub(super) struct StopCheck {
        stop_signal: Arc<AtomicBool>,
    }

    impl Drop for Stopper {
        fn drop(&mut self) {
            self.stop_signal.store(true, Ordering::Release);
        }
    }

    impl StopCheck {
        pub(super) fn should_stop(&self) -> bool {
            self.stop_signal.load(Ordering::Acquire)
        }
    }

    pub(super) fn new() -> (Stopper, StopCheck) {
        let stop_signal = Arc::new(AtomicBool::new(false));

        let stopper = Stopper {
            stop_signal: stop_signal.clone(),
        };
        let stop_check = StopCheck { stop_signal };

        (stopper, stop_check)
    }
}
