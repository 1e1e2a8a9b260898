//! Breakfield headless runner
//!
//! Loads a level file (and optionally a settings JSON), plays it with a simple
//! paddle autopilot for a fixed span of simulated time, then logs a summary.
//!
//! Usage: `breakfield <level-file> [settings.json] [seconds]`

use std::path::Path;
use std::process::ExitCode;

use breakfield::Settings;
use breakfield::sim::{GamePhase, LogListener, SimContext, Simulation, TickInput, load_level_file};

const DEFAULT_SECONDS: f32 = 60.0;
/// Frame length the runner feeds to `Simulation::advance`
const FRAME_DT: f32 = 1.0 / 60.0;

/// Idle/demo mode: follow the lowest ball that is heading down
fn autopilot(sim: &Simulation) -> TickInput {
    let target = sim
        .balls
        .iter()
        .filter(|b| !b.is_loaded_in_cannon() && b.dir.y < 0.0)
        .min_by(|a, b| a.center.y.total_cmp(&b.center.y))
        .map(|b| b.center.x);
    TickInput {
        target_x: target,
        launch: sim.phase == GamePhase::Serve,
        ..Default::default()
    }
}

fn run(level_path: &Path, settings: Settings, seconds: f32) -> Result<(), Box<dyn std::error::Error>> {
    let mut ctx = SimContext::from_settings(&settings);
    if settings.log_events {
        ctx.register_listener(Box::new(LogListener));
    }
    let level = load_level_file(level_path, &mut ctx)?;
    log::info!(
        "Loaded level '{}' ({}x{}, {} pieces to clear)",
        level.name(),
        level.width(),
        level.height(),
        level.pieces_left()
    );
    let mut sim = Simulation::with_settings(level, ctx, &settings);

    let frames = (seconds / FRAME_DT).ceil() as u32;
    for _ in 0..frames {
        let input = autopilot(&sim);
        sim.advance(FRAME_DT, &input);
        if sim.is_complete() {
            break;
        }
    }

    let stars = sim.level.stars_for_score(sim.score());
    log::info!(
        "After {:.1}s: score {} ({} stars), {} pieces left, {} balls lost, {} items dropped{}",
        sim.ctx.now(),
        sim.score(),
        stars,
        sim.level.pieces_left(),
        sim.balls_lost,
        sim.dropped_items.len(),
        if sim.is_complete() { ", level complete" } else { "" }
    );
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(level_path) = args.first() else {
        eprintln!("usage: breakfield <level-file> [settings.json] [seconds]");
        return ExitCode::FAILURE;
    };
    let settings = match args.get(1) {
        Some(path) => match Settings::load(Path::new(path)) {
            Ok(settings) => settings,
            Err(e) => {
                log::error!("{}", e);
                return ExitCode::FAILURE;
            }
        },
        None => Settings::default(),
    };
    let seconds = match args.get(2).map(|s| s.parse::<f32>()) {
        Some(Ok(s)) if s > 0.0 => s,
        Some(_) => {
            log::error!("seconds must be a positive number");
            return ExitCode::FAILURE;
        }
        None => DEFAULT_SECONDS,
    };

    match run(Path::new(level_path), settings, seconds) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
