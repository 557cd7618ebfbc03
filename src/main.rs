use deps::*;

use std::path::PathBuf;

use bevy::{app::AppExit, prelude::*};
use clap::Parser;

use swarm::formation::{Formation, FormationAsset};
use swarm::math::*;
use swarm::{Swarm, SwarmConfig, SwarmPlugin, SwarmSystems};

/// Runs the swarm headless and reports how far it got into the formation.
#[derive(Debug, Clone, clap::Parser)]
#[clap(version, about)]
struct Cli {
    /// RON swarm config. Defaults are used when omitted.
    #[clap(long)]
    config: Option<PathBuf>,
    /// Baked formation, JSON or RON.
    #[clap(long)]
    formation: Option<PathBuf>,
    #[clap(long, default_value_t = 600)]
    ticks: u32,
    /// Fixed step in seconds. Overrides the config.
    #[clap(long)]
    dt: Option<TReal>,
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let _log_guard = setup_tracing()?;
    let args = Cli::parse();

    let mut config = match &args.config {
        Some(path) => SwarmConfig::load(path)?,
        None => SwarmConfig::default(),
    };
    if let Some(dt) = args.dt {
        config.fixed_dt = Some(dt);
    }
    config.fixed_dt.get_or_insert(1. / 60.);
    config.validate()?;

    let mut swarm = Swarm::new(&config)?;
    if let Some(path) = &args.formation {
        let asset = FormationAsset::load(path)?;
        if asset.is_rigged {
            eyre::bail!("rigged formation at {path:?} needs a live skeleton");
        }
        swarm.set_formation(Some(Formation::activate(&asset, None)?));
    }
    tracing::info!(
        agents = swarm.agents().len(),
        ticks = args.ticks,
        dt = ?config.fixed_dt,
        "starting run"
    );

    App::new()
        .insert_resource(config)
        .insert_resource(swarm)
        .insert_resource(RunLength {
            ticks: args.ticks,
            done: 0,
        })
        .add_plugins(MinimalPlugins)
        .add_plugin(SwarmPlugin)
        .add_system(stop_after_ticks.after(SwarmSystems::Sync))
        .run();
    Ok(())
}

fn setup_tracing() -> eyre::Result<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::prelude::*;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info,swarm=debug"))?;
    let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(writer))
        .with(tracing_error::ErrorLayer::default())
        .try_init()?;
    Ok(guard)
}

struct RunLength {
    ticks: u32,
    done: u32,
}

fn stop_after_ticks(
    mut run: ResMut<RunLength>,
    swarm: Res<Swarm>,
    mut exit: EventWriter<AppExit>,
) {
    run.done += 1;
    if run.done < run.ticks {
        return;
    }
    let agents = swarm.agents();
    let count = agents.len().max(1) as TReal;
    let mean_speed = agents.velocities.iter().map(|v| v.length()).sum::<TReal>() / count;
    let mean_error = swarm.formation().map(|formation| {
        agents
            .positions
            .iter()
            .zip(agents.target_indices.iter())
            .map(|(pos, &target)| pos.distance(formation.resolve(target as usize)))
            .sum::<TReal>()
            / count
    });
    tracing::info!(
        ticks = run.done,
        elapsed = swarm.elapsed(),
        phase = ?swarm.phase(),
        attached = agents.attached_count(),
        mean_speed,
        ?mean_error,
        "run finished"
    );
    exit.send(AppExit);
}
