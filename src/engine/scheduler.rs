//! Dependency-ordered parallel application of hosts
//!
//! Every host gets a thread and a bounded channel. A host waits on its own
//! channel until each of its dependencies has reported, applies itself,
//! and then broadcasts its completion to every channel. A failure is
//! broadcast the same way so that waiting hosts give up instead of
//! hanging. Each host broadcasts exactly once, so a capacity of one slot
//! per host means no send ever blocks.

use anyhow::{Result, anyhow, bail};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc::{self, SyncSender};
use std::thread;

use crate::blueprint::Dependencies;
use crate::tasks::Outputs;

type Shared = std::result::Result<Outputs, Arc<anyhow::Error>>;

/// Completion record broadcast by a host
#[derive(Debug, Clone)]
struct Done {
    name: String,
    result: Shared,
}

fn broadcast(channels: &[SyncSender<Done>], done: &Done) {
    for tx in channels {
        // A closed channel belongs to a host that has already finished.
        let _ = tx.send(done.clone());
    }
}

/// Apply `hosts` in dependency order, running independent hosts in
/// parallel.
///
/// `seed` holds outputs produced before scheduling; every host starts from
/// a copy of it and merges in what its dependencies report. `apply` is
/// called once per host with the outputs visible to it and returns the
/// outputs the host produced. The first failure is returned.
pub fn schedule<F>(
    hosts: &[String],
    dependencies: &Dependencies,
    seed: &Outputs,
    apply: F,
) -> Result<Outputs>
where
    F: Fn(&str, &Outputs) -> Result<Outputs> + Sync,
{
    let deps: Dependencies = hosts
        .iter()
        .map(|h| (h.clone(), dependencies.get(h).to_vec()))
        .collect();
    for (host, wanted) in deps.iter() {
        if let Some(dep) = wanted.iter().find(|d| !hosts.contains(*d)) {
            bail!("{host} depends on {dep} but {dep} is not scheduled to be applied");
        }
    }
    if let Some(host) = deps.find_circular_dependencies() {
        bail!("circular dependency in {host}");
    }

    let capacity = hosts.len().max(1);
    let (senders, receivers): (Vec<_>, Vec<_>) = hosts
        .iter()
        .map(|_| mpsc::sync_channel::<Done>(capacity))
        .unzip();
    let (results_tx, results_rx) = mpsc::channel::<Shared>();

    thread::scope(|scope| {
        for (name, inbox) in hosts.iter().zip(receivers) {
            let senders = senders.clone();
            let results = results_tx.clone();
            let deps = &deps;
            let apply = &apply;

            scope.spawn(move || {
                let result = unit(name, deps.get(name), seed, &inbox, &senders, apply);
                let _ = results.send(result);
            });
        }
    });
    drop(senders);
    drop(results_tx);

    let mut outputs = Outputs::new();
    let mut first_error = None;
    for result in results_rx.try_iter() {
        match result {
            Ok(produced) => outputs.extend(produced),
            Err(e) if first_error.is_none() => first_error = Some(e),
            Err(_) => {}
        }
    }

    match first_error {
        Some(e) => Err(Arc::try_unwrap(e).unwrap_or_else(|e| anyhow!("{e:#}"))),
        None => Ok(outputs),
    }
}

/// One host's life: wait, apply, broadcast
fn unit<F>(
    name: &str,
    deps: &[String],
    seed: &Outputs,
    inbox: &mpsc::Receiver<Done>,
    channels: &[SyncSender<Done>],
    apply: &F,
) -> Shared
where
    F: Fn(&str, &Outputs) -> Result<Outputs>,
{
    let mut visible = seed.clone();
    let mut remaining = deps.to_vec();

    while !remaining.is_empty() {
        log::info!("{name}: waiting for {}...", remaining.join(", "));

        let Ok(done) = inbox.recv() else {
            let err = Arc::new(anyhow!("{name}: dependency channel closed"));
            broadcast(channels, &Done {
                name: name.to_string(),
                result: Err(Arc::clone(&err)),
            });
            return Err(err);
        };
        remaining.retain(|d| d != &done.name);

        match done.result {
            Ok(produced) => visible.extend(produced),
            Err(err) => {
                log::debug!("{name}: giving up, {} failed", done.name);
                broadcast(channels, &Done {
                    name: name.to_string(),
                    result: Err(Arc::clone(&err)),
                });
                return Err(err);
            }
        }
    }

    let result = panic::catch_unwind(AssertUnwindSafe(|| apply(name, &visible)))
        .unwrap_or_else(|_| Err(anyhow!("{name}: apply panicked")))
        .map_err(Arc::new);

    broadcast(channels, &Done {
        name: name.to_string(),
        result: result.clone(),
    });
    result
}
