//! Operator console for the rig auto-leveler.
//!
//! Thin display/input layer over the leveling engine: zeroing, one-shot
//! leveling, stay-on supervision, manual jogs, and preset management.
//! `--simulate` drives a software rig instead of the relay bank and
//! signal conditioner, for bench-free checkout.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use plumbline::clock::{Clock, SystemClock};
use plumbline::hardware::{GpioSwitchBank, SerialAdc, DEFAULT_GPIO_CHIP, DEFAULT_SERIAL_PORT};
use plumbline::settings::SettingsDoc;
use plumbline::sim::SimRig;
use plumbline::{
    Axis, Direction, EngineEvent, LevelingEngine, RelayPins, SettingsStore, SharedTransport,
};

#[derive(Parser, Debug)]
#[command(name = "level_tool")]
#[command(about = "Rig auto-leveler operator console")]
struct Args {
    /// Settings file (seeded with factory defaults if missing)
    #[arg(long, default_value = "settings.json")]
    settings: PathBuf,

    /// Drive a simulated rig instead of real hardware
    #[arg(long)]
    simulate: bool,

    /// GPIO character device for the relay bank
    #[arg(long, default_value = DEFAULT_GPIO_CHIP)]
    chip: String,

    /// Serial device for the signal conditioner
    #[arg(long, default_value = DEFAULT_SERIAL_PORT)]
    port: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Measure and store zero references for both axes
    Zero {
        /// Set zero to the absolute origin instead of measuring
        #[arg(long)]
        origin: bool,
    },
    /// Zero both axes, then run one leveling invocation
    Level {
        /// Set zero to the absolute origin instead of measuring
        #[arg(long)]
        origin: bool,
        /// Level roll before pitch
        #[arg(long)]
        roll_first: bool,
    },
    /// Zero both axes, then keep the rig level until interrupted
    Watch {
        /// Set zero to the absolute origin instead of measuring
        #[arg(long)]
        origin: bool,
    },
    /// Pulse one direction manually with the XS pulse duration
    Jog {
        /// up, down, left, or right
        direction: String,
        #[arg(short, long, default_value = "1")]
        count: u32,
    },
    /// Print the active preset and sensor setup
    Show,
    /// Select and persist the active rig/precision preset
    Select {
        /// midload, light-load, abcs, or llr
        rig: String,
        /// t-level or inch-level
        precision: String,
    },
    /// Swap an axis's output mapping and persist the inversion flag
    Invert {
        /// pitch or roll
        axis: String,
    },
    /// Persist the raw-display flag (counts instead of minutes)
    Raw {
        /// on or off
        mode: String,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut engine = build_engine(&args)?;
    engine.register_callback(|event| match event {
        EngineEvent::StateChanged { state } => println!("  [state] {state}"),
        EngineEvent::Pulse {
            axis,
            direction,
            tier,
        } => println!("  [pulse] {axis} {direction} ({tier})"),
        EngineEvent::ZeroSet { axis, zero } => println!("  [zero]  {axis} = {zero:.2}"),
        EngineEvent::Finished { reason, elapsed } => {
            println!("  [end]   {reason} after {:.2}s", elapsed.as_secs_f64())
        }
        EngineEvent::Reading { .. } => {}
    });

    match &args.command {
        Command::Zero { origin } => {
            zero(&mut engine, *origin)?;
        }
        Command::Level { origin, roll_first } => {
            if *roll_first {
                engine.set_priority(Axis::Roll);
            }
            zero(&mut engine, *origin)?;
            let outcome = engine.level_once()?;
            println!(
                "{}: {:.2}s elapsed",
                outcome.reason,
                outcome.elapsed.as_secs_f64()
            );
        }
        Command::Watch { origin } => {
            zero(&mut engine, *origin)?;
            let threshold = engine.settings().active().threshold;
            info!("watching with threshold {threshold} min; interrupt to stop");
            engine.flags().set_stay_on(true);
            engine.stay_on_loop()?;
        }
        Command::Jog { direction, count } => {
            let direction = parse_direction(direction)?;
            for _ in 0..*count {
                engine.jog(direction);
            }
        }
        Command::Show => {
            let settings = engine.settings();
            println!(
                "active preset: {} / {}",
                settings.rig(),
                settings.precision()
            );
            println!("{}", serde_json::to_string_pretty(settings.active())?);
            println!("{}", serde_json::to_string_pretty(settings.sensor_setup())?);
        }
        Command::Select { rig, precision } => {
            let rig = rig.parse()?;
            let precision = precision.parse()?;
            engine.select_preset(rig, precision)?;
            println!("selected {rig} / {precision}");
        }
        Command::Invert { axis } => {
            let mut edited = engine.settings().active().clone();
            match axis.to_ascii_lowercase().as_str() {
                "pitch" => edited.pitch_invert = !edited.pitch_invert,
                "roll" => edited.roll_invert = !edited.roll_invert,
                other => bail!("unknown axis {other:?} (want pitch or roll)"),
            }
            let (pitch_invert, roll_invert) = (edited.pitch_invert, edited.roll_invert);
            engine.update_preset(edited)?;
            println!("pitch inverted: {pitch_invert}, roll inverted: {roll_invert}");
        }
        Command::Raw { mode } => {
            let show_raw = match mode.to_ascii_lowercase().as_str() {
                "on" => true,
                "off" => false,
                other => bail!("unknown mode {other:?} (want on or off)"),
            };
            engine.set_raw_display(show_raw)?;
            println!("raw display: {show_raw}");
        }
    }

    Ok(())
}

fn zero(engine: &mut LevelingEngine, origin: bool) -> Result<()> {
    if origin {
        engine.save_zeros_at_origin();
    } else {
        println!("measuring zero references...");
        engine.save_zeros().context("failed to measure zeros")?;
    }
    Ok(())
}

fn parse_direction(s: &str) -> Result<Direction> {
    match s.to_ascii_lowercase().as_str() {
        "up" => Ok(Direction::Up),
        "down" => Ok(Direction::Down),
        "left" => Ok(Direction::Left),
        "right" => Ok(Direction::Right),
        other => bail!("unknown direction {other:?} (want up, down, left, or right)"),
    }
}

fn build_engine(args: &Args) -> Result<LevelingEngine> {
    let pins = RelayPins::default();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());

    if args.simulate {
        // The simulated rig has its own linear sensor model; give it a
        // matching settings file under the temp dir rather than distorting
        // readings through the operator's stored calibration.
        let path = std::env::temp_dir().join("plumbline_sim_settings.json");
        let mut doc = SettingsDoc::seed();
        let points = SimRig::calibration_points();
        doc.sensor_setup.pitch_raw = points.iter().map(|p| p.0).collect();
        doc.sensor_setup.pitch_minutes = points.iter().map(|p| p.1).collect();
        doc.sensor_setup.roll_raw = doc.sensor_setup.pitch_raw.clone();
        doc.sensor_setup.roll_minutes = doc.sensor_setup.pitch_minutes.clone();
        doc.sensor_setup.order = 1;
        std::fs::write(&path, serde_json::to_string_pretty(&doc)?)
            .context("failed to write simulation settings")?;
        let settings = SettingsStore::load(path)?;

        let rig = SimRig::new(pins, 2.0, clock.clone());
        let transport: SharedTransport = Arc::new(Mutex::new(rig.adc()));
        info!("driving simulated rig");
        Ok(LevelingEngine::new(
            settings,
            transport,
            Box::new(rig.switch_bank()),
            pins,
            clock,
        )?)
    } else {
        let settings = SettingsStore::open_or_seed(&args.settings)?;
        let bank = GpioSwitchBank::new(&args.chip, pins)?;
        let adc = SerialAdc::open(&args.port)?;
        let transport: SharedTransport = Arc::new(Mutex::new(adc));
        Ok(LevelingEngine::new(
            settings,
            transport,
            Box::new(bank),
            pins,
            clock,
        )?)
    }
}
