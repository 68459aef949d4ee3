//! Command-line surface (§6). The core treats the script compiler as an
//! external collaborator, so positional arguments here name paths to (or
//! inline, with `-e`) pre-compiled Program JSON rather than script
//! source — the boundary decision recorded in SPEC_FULL.md.

use clap::Parser;

/// A text-driven modular FM/PM/AM synthesizer renderer.
#[derive(Parser, Debug)]
#[command(name = "sauscript", version, about, disable_version_flag = true)]
pub struct Cli {
    /// Program JSON paths, or inline Program JSON when `-e` is given.
    pub inputs: Vec<String>,

    /// Enable the system audio device output.
    #[arg(short = 'a', long = "audio")]
    pub audio: bool,

    /// Print version and exit (§6: `-v` is version, not clap's default `-V`).
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    pub version: (),

    /// Disable the system audio device output (overrides `-a`).
    #[arg(short = 'm', long = "mute")]
    pub mute: bool,

    /// Sample rate in Hz.
    #[arg(short = 'r', long = "rate")]
    pub sample_rate: Option<u32>,

    /// Write a WAV file to this path.
    #[arg(short = 'o', long = "output")]
    pub output: Option<String>,

    /// Treat positional arguments as inline Program JSON rather than paths.
    #[arg(short = 'e', long = "inline")]
    pub inline: bool,

    /// Validate the program and exit without rendering.
    #[arg(short = 'c', long = "check")]
    pub check_only: bool,

    /// Print program statistics (voice/operator/event counts) and continue.
    #[arg(short = 'p', long = "print")]
    pub print_info: bool,
}

impl Cli {
    pub fn audio_enabled(&self) -> bool {
        self.audio && !self.mute
    }
}
