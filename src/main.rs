use std::process::ExitCode;

use clap::Parser;
use sauscript_synth::audio_io::CpalAudioDev;
use sauscript_synth::cli::Cli;
use sauscript_synth::wav_sink::HoundWavFile;
use sauscript_synth::{Generator, Program, RenderConfig};

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("sauscript: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), String> {
    let program = load_program(&cli)?;

    if cli.print_info {
        println!(
            "voices={} operators={} events={} total_wait_samples={}",
            program.voice_count,
            program.operator_count,
            program.events.len(),
            program.total_wait_samples(),
        );
    }

    let requested_rate = cli.sample_rate.unwrap_or(48000);

    if cli.check_only {
        Generator::new(program, requested_rate).map_err(|e| e.to_string())?;
        return Ok(());
    }

    let mut config = RenderConfig::new(requested_rate);

    // Open the device first so the Generator (and every sink) is built
    // against whatever rate it actually negotiates — §4.6's
    // AdoptDeviceRate policy means adopting it everywhere, not just in
    // the config struct.
    let mut device = if cli.audio_enabled() {
        let (dev, actual_rate) =
            CpalAudioDev::open(if config.stereo { 2 } else { 1 }, requested_rate).map_err(|e| e.to_string())?;
        if actual_rate != requested_rate {
            log::warn!("device opened at {actual_rate} Hz instead of requested {requested_rate} Hz");
            config.sample_rate = actual_rate;
        }
        Some(dev)
    } else {
        None
    };

    let mut generator = Generator::new(program, config.sample_rate).map_err(|e| e.to_string())?;

    let mut wav = match &cli.output {
        Some(path) => Some(
            HoundWavFile::create(path, if config.stereo { 2 } else { 1 }, config.sample_rate)
                .map_err(|e| e.to_string())?,
        ),
        None => None,
    };

    let device_ref = device.as_mut().map(|d| d as &mut dyn sauscript_synth::audio_io::AudioDev);
    let wav_ref = wav.as_mut().map(|w| w as &mut dyn sauscript_synth::wav_sink::WavFile);

    sauscript_synth::render::run_loop(&mut generator, &config, device_ref, wav_ref).map_err(|e| e.to_string())?;

    if let Some(mut dev) = device {
        dev.close();
    }
    if let Some(mut sink) = wav {
        sink.close().map_err(|e| e.to_string())?;
    }

    Ok(())
}

fn load_program(cli: &Cli) -> Result<Program, String> {
    let first = cli
        .inputs
        .first()
        .ok_or_else(|| "no program input given".to_string())?;

    let json = if cli.inline {
        first.clone()
    } else {
        std::fs::read_to_string(first).map_err(|e| format!("reading {first}: {e}"))?
    };

    serde_json::from_str(&json).map_err(|e| format!("parsing program: {e}"))
}
