// Resource monitor: CPU/RAM sampling over a supervised process tree
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, Stream};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::application::constants::MONITOR_INTERVAL;
use crate::domain::ResourceSample;
use crate::port::{ChildResourceProbe, ProbeError, ProbeUsage, ProcessTreeProbe};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    pub interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: MONITOR_INTERVAL,
        }
    }
}

/// Samples a process and its descendants at a fixed interval.
///
/// Descendants claimed by a child probe (e.g. container clients) are
/// accounted with that probe's figures instead of their own counters.
pub struct ResourceMonitor {
    tree: Arc<dyn ProcessTreeProbe>,
    child_probes: Vec<Arc<dyn ChildResourceProbe>>,
    config: MonitorConfig,
}

struct SampleState {
    started: Instant,
    exited: watch::Receiver<bool>,
    first: bool,
}

impl ResourceMonitor {
    pub fn new(tree: Arc<dyn ProcessTreeProbe>, config: MonitorConfig) -> Self {
        Self {
            tree,
            child_probes: Vec::new(),
            config,
        }
    }

    pub fn with_child_probe(mut self, probe: Arc<dyn ChildResourceProbe>) -> Self {
        self.child_probes.push(probe);
        self
    }

    pub fn tree_probe(&self) -> &Arc<dyn ProcessTreeProbe> {
        &self.tree
    }

    /// One summed reading of the whole tree rooted at `root`
    pub async fn sample_once(&self, root: u32) -> Result<ProbeUsage, ProbeError> {
        let processes = self.tree.tree(root).await?;
        let mut total = ProbeUsage::default();

        for process in &processes {
            let usage = match self.child_probes.iter().find(|p| p.accepts(process)) {
                Some(probe) => match probe.usage(process).await {
                    Ok(usage) => usage,
                    Err(ProbeError::Vanished(pid)) => return Err(ProbeError::Vanished(pid)),
                    Err(e) => {
                        debug!(
                            pid = process.pid,
                            probe = probe.name(),
                            error = %e,
                            "Child probe failed, using process counters"
                        );
                        ProbeUsage::from(process)
                    }
                },
                None => ProbeUsage::from(process),
            };
            total.cpu_percent += usage.cpu_percent;
            total.ram_mb += usage.ram_mb;
        }

        Ok(total)
    }

    /// Lazy, finite sequence of samples for the tree rooted at `root`.
    ///
    /// `t` is measured from `started`. The sequence ends once `exited`
    /// turns true (or its sender is dropped) or the root is gone. Ticks
    /// where a process vanishes mid-read are skipped.
    pub fn sample(
        &self,
        root: u32,
        started: Instant,
        exited: watch::Receiver<bool>,
    ) -> impl Stream<Item = ResourceSample> + '_ {
        let state = SampleState {
            started,
            exited,
            first: true,
        };

        stream::unfold(state, move |mut state| async move {
            loop {
                if !state.first && !wait_tick(self.config.interval, &mut state.exited).await {
                    return None;
                }
                state.first = false;
                if *state.exited.borrow() {
                    return None;
                }

                match self.sample_once(root).await {
                    Ok(usage) => {
                        let sample = ResourceSample::new(
                            state.started.elapsed().as_secs_f64(),
                            usage.cpu_percent,
                            usage.ram_mb,
                        );
                        debug!(
                            pid = root,
                            t = sample.time_secs,
                            cpu = sample.cpu_percent,
                            ram_mb = sample.ram_mb,
                            "Resource sample"
                        );
                        return Some((sample, state));
                    }
                    Err(ProbeError::Vanished(pid)) if pid == root => {
                        debug!(pid = root, "Supervised process gone, monitor stopping");
                        return None;
                    }
                    Err(ProbeError::Vanished(pid)) => {
                        debug!(pid, "Process vanished mid-read, skipping tick");
                    }
                    Err(e) => {
                        warn!(pid = root, error = %e, "Sampling tick failed, skipping");
                    }
                }
            }
        })
    }
}

/// Sleep one interval; false once the process has exited
async fn wait_tick(interval: Duration, exited: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(interval) => !*exited.borrow(),
        changed = exited.changed() => changed.is_ok() && !*exited.borrow(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::process_probe::mocks::{stat, ScriptedTreeProbe, StaticChildProbe};
    use futures::StreamExt;

    fn monitor(snapshots: Vec<Result<Vec<crate::port::ProcessStat>, ProbeError>>) -> ResourceMonitor {
        ResourceMonitor::new(
            Arc::new(ScriptedTreeProbe::new(snapshots)),
            MonitorConfig {
                interval: Duration::from_millis(1),
            },
        )
    }

    #[tokio::test]
    async fn test_sums_tree_until_root_vanishes() {
        let monitor = monitor(vec![
            Ok(vec![stat(10, None, "sh", 5.0, 10.0), stat(11, Some(10), "tool", 95.0, 200.0)]),
            Ok(vec![stat(10, None, "sh", 0.0, 10.0)]),
        ]);
        let (_tx, rx) = watch::channel(false);

        let samples: Vec<_> = monitor.sample(10, Instant::now(), rx).collect().await;

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].cpu_percent, 100.0);
        assert_eq!(samples[0].ram_mb, 210.0);
        assert_eq!(samples[1].ram_mb, 10.0);
        assert!(samples[1].time_secs >= samples[0].time_secs);
    }

    #[tokio::test]
    async fn test_vanished_descendant_skips_tick() {
        let monitor = monitor(vec![
            Ok(vec![stat(10, None, "sh", 1.0, 1.0)]),
            Err(ProbeError::Vanished(11)),
            Err(ProbeError::Unavailable("proc table busy".into())),
            Ok(vec![stat(10, None, "sh", 2.0, 2.0)]),
        ]);
        let (_tx, rx) = watch::channel(false);

        let samples: Vec<_> = monitor.sample(10, Instant::now(), rx).collect().await;
        let cpu: Vec<f64> = samples.iter().map(|s| s.cpu_percent).collect();
        assert_eq!(cpu, vec![1.0, 2.0]);
    }

    #[tokio::test]
    async fn test_child_probe_replaces_client_counters() {
        let monitor = monitor(vec![Ok(vec![
            stat(10, None, "bosh", 1.0, 30.0),
            stat(12, Some(10), "docker", 0.5, 15.0),
        ])])
        .with_child_probe(Arc::new(StaticChildProbe {
            process_name: "docker".into(),
            usage: ProbeUsage {
                cpu_percent: 180.0,
                ram_mb: 1024.0,
            },
        }));

        let usage = monitor.sample_once(10).await.unwrap();
        assert_eq!(usage.cpu_percent, 181.0);
        assert_eq!(usage.ram_mb, 1054.0);
    }

    #[tokio::test]
    async fn test_exit_signal_ends_sequence() {
        let snapshots = (0..1000)
            .map(|_| Ok(vec![stat(10, None, "sleep", 0.0, 1.0)]))
            .collect();
        let monitor = monitor(snapshots);
        let (tx, rx) = watch::channel(false);

        let stream = monitor.sample(10, Instant::now(), rx);
        futures::pin_mut!(stream);

        assert!(stream.next().await.is_some());
        tx.send(true).unwrap();
        assert!(stream.next().await.is_none());
    }
}
