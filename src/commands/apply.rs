use anyhow::Result;

use crate::Context;
use crate::blueprint::Options;
use crate::cli::ApplyArgs;
use crate::config::Config;
use crate::engine;
use crate::hosts::Filter;
use crate::ui;

pub fn run(ctx: &Context, args: ApplyArgs) -> Result<()> {
    let config = Config::load(ctx.config.as_deref())?;
    let opts = Options {
        path: args.file,
        config,
        filter: Filter {
            hosts: args.hosts,
            tags: args.tags,
        },
        dry_run: args.dry_run,
    };

    if !ctx.quiet {
        let title = if opts.dry_run {
            format!("Checking {}", opts.path.display())
        } else {
            format!("Applying {}", opts.path.display())
        };
        ui::header(&title);
    }

    engine::apply(&opts)?;
    Ok(())
}
