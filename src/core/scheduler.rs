use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const MIN_PERIOD: Duration = Duration::from_millis(1);


/// Owns the pipeline's background loops. Dropping it does not stop the loops;
/// call [`BackgroundTasks::shutdown`].
pub struct BackgroundTasks {
    token: CancellationToken,
    handles: Vec<(String, JoinHandle<()>)>,
}

impl BackgroundTasks {
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            handles: Vec::new(),
        }
    }


    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }


    /// Runs `tick` every `period`, skipping the immediate first tick. A zero
    /// period is raised to one millisecond.
    pub fn spawn_periodic<F, Fut>(&mut self, name: &str, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if period < MIN_PERIOD {
            warn!("Background task {} configured with period {:?}, using {:?}", name, period, MIN_PERIOD);
        }
        let period = period.max(MIN_PERIOD);
        let token = self.token.clone();
        let task_name = name.to_string();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        debug!("Background task {} tick", task_name);
                        tick().await;
                    }
                }
            }
            debug!("Background task {} stopped", task_name);
        });

        info!("Started background task {} (every {:?})", name, period);
        self.handles.push((name.to_string(), handle));
    }


    /// Spawns a long-lived task that receives the shutdown token.
    pub fn spawn<F, Fut>(&mut self, name: &str, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task(self.token.clone()));
        info!("Started background task {}", name);
        self.handles.push((name.to_string(), handle));
    }


    pub fn len(&self) -> usize {
        self.handles.len()
    }


    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }


    pub async fn shutdown(self) {
        self.token.cancel();
        for (name, handle) in self.handles {
            if let Err(e) = handle.await {
                warn!("Background task {} ended abnormally: {}", name, e);
            }
        }
        info!("Background tasks stopped");
    }
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}
