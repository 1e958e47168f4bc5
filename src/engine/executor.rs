//! Applying a blueprint
//!
//! Local hosts run first, one at a time, so that what they produce is
//! available to everything else. The remaining hosts go to the scheduler.
//! Each host gets its own worker session: dial, upload the binary, start
//! the worker, gather facts, then decode and apply its tasks in order.

use anyhow::{Context, Result};
use serde_json::{Value, json};

use super::differ::{self, Summary};
use super::planner::ExecutionPlan;
use super::scheduler;
use crate::blueprint::{Blueprint, Options};
use crate::hosts::{Connector, Host};
use crate::tasks::Outputs;
use crate::tasks::facts::GATHER_FACTS;
use crate::ui;

/// Load the blueprint at `opts.path` and apply every selected host
pub fn apply(opts: &Options) -> Result<Summary> {
    let blueprint = Blueprint::load(opts)?;
    let plan = ExecutionPlan::new(&blueprint)?;
    if plan.is_empty() {
        ui::warn("No hosts selected");
        return Ok(Summary::default());
    }
    log::debug!(
        "plan: local [{}], remote [{}]",
        plan.local.join(", "),
        plan.remote.join(", ")
    );

    let outputs = run(&blueprint, &plan)?;
    let summary = Summary::new(&outputs);
    differ::print_summary(&summary, blueprint.config.dry_run);
    Ok(summary)
}

/// Execute a plan and return every output produced
pub fn run(blueprint: &Blueprint, plan: &ExecutionPlan) -> Result<Outputs> {
    let mut outputs = Outputs::new();
    for name in &plan.local {
        let produced = apply_host(blueprint, name, &outputs)?;
        outputs.extend(produced);
    }

    let remote = scheduler::schedule(&plan.remote, &plan.dependencies, &outputs, |name, seed| {
        apply_host(blueprint, name, seed)
    })?;
    outputs.extend(remote);
    Ok(outputs)
}

/// Apply one host, seeing `seed` as the outputs of everything before it.
///
/// Returns only the outputs this host produced.
fn apply_host(blueprint: &Blueprint, name: &str, seed: &Outputs) -> Result<Outputs> {
    let host = blueprint
        .host(name)
        .with_context(|| format!("{name}: host is not part of the blueprint"))?;

    let ctx = blueprint.context(host, &json!({}), seed);
    let Some(mut conn) = host.decode(&ctx)? else {
        log::info!("{name}: condition is false, skipping");
        return Ok(Outputs::new());
    };

    log::info!("{}: dialing {} host...", conn.name(), host.kind);
    conn.dial()
        .with_context(|| format!("{}: dial failed", conn.name()))?;

    let result = session(blueprint, host, conn.as_mut(), seed);
    let closed = conn.close();
    let produced = result?;
    closed?;
    if produced.is_empty() {
        log::info!("{name}: no tasks bound");
    }
    Ok(produced)
}

fn session(
    blueprint: &Blueprint,
    host: &Host,
    conn: &mut dyn Connector,
    seed: &Outputs,
) -> Result<Outputs> {
    conn.upload_binary()
        .with_context(|| format!("{}: upload failed", host.name))?;
    let mut ctrl = conn.start()?;

    let result = apply_tasks(blueprint, host, &mut ctrl, seed);
    let closed = ctrl.close();
    let produced = result?;
    closed.with_context(|| format!("{}: closing worker", host.name))?;
    Ok(produced)
}

fn apply_tasks(
    blueprint: &Blueprint,
    host: &Host,
    ctrl: &mut rpc::Controller,
    seed: &Outputs,
) -> Result<Outputs> {
    log::info!("{}: gathering facts...", host.name);
    let facts: Value = ctrl
        .call(GATHER_FACTS, json!({}))
        .with_context(|| format!("{}: gathering facts", host.name))?;

    let mut visible = seed.clone();
    let mut produced = Outputs::new();

    for role in blueprint.roles_for(host) {
        for task in &role.tasks {
            // Earlier tasks of this host feed `out.this`.
            let ctx = blueprint.context(host, &facts, &visible);
            let Some(decoded) =
                task.decode(&ctx, &host.name, &role.name, &role.dir, &blueprint.config)?
            else {
                continue;
            };

            log::debug!("{}: applying", decoded.label());
            let output = decoded.apply(ctrl)?;
            differ::display(&output);
            visible.push(output.clone());
            produced.push(output);
        }
    }

    Ok(produced)
}
