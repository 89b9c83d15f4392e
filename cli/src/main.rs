mod profile;
mod wav;

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tonelink_core::{
    loopback_self_test, self_test_waveform, verify_self_test, AudioChannel, ListenEvent, Listener,
    ModemConfig, ModemError, TransmissionController,
};

use profile::Profile;
use wav::{write_wav, WavInput, WavOutput};

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Modem(#[from] ModemError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Invalid profile: {0}")]
    Profile(#[from] serde_json::Error),

    #[error("No frame decoded from {0}")]
    NoFrame(String),
}

#[derive(Parser)]
#[command(name = "tonelink")]
#[command(about = "Send short payloads between devices over sound")]
struct Cli {
    /// JSON profile with modem parameters (see `tonelink profile`)
    #[arg(long, global = true, value_name = "FILE")]
    profile: Option<PathBuf>,

    /// Use the audible 5/6 kHz profile instead of the near-ultrasonic one
    #[arg(long, global = true, conflicts_with = "profile")]
    audible: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a payload to a WAV file
    Encode {
        /// Input binary file, or the payload itself with --text
        #[arg(value_name = "INPUT")]
        input: String,

        /// Output WAV file
        #[arg(value_name = "OUTPUT.WAV")]
        output: PathBuf,

        /// Treat INPUT as literal text rather than a file path
        #[arg(long)]
        text: bool,
    },

    /// Decode every frame found in a WAV file
    Decode {
        /// Input WAV file
        #[arg(value_name = "INPUT.WAV")]
        input: PathBuf,

        /// Write the first decoded payload here
        #[arg(value_name = "OUTPUT")]
        output: Option<PathBuf>,

        /// Samples delivered to the demodulator per chunk
        #[arg(long, default_value = "1024")]
        chunk_size: usize,
    },

    /// Check parameter agreement with a known pattern
    SelfTest {
        /// Write the self-test waveform for a peer to play
        #[arg(long, value_name = "FILE.WAV", conflicts_with = "verify")]
        write: Option<PathBuf>,

        /// Verify a captured self-test recording
        #[arg(long, value_name = "FILE.WAV")]
        verify: Option<PathBuf>,
    },

    /// Print the active profile as JSON
    Profile,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config = load_config(cli.profile.as_deref(), cli.audible)?;

    match cli.command {
        Commands::Encode {
            input,
            output,
            text,
        } => encode_command(&config, &input, &output, text),
        Commands::Decode {
            input,
            output,
            chunk_size,
        } => decode_command(&config, &input, output.as_deref(), chunk_size),
        Commands::SelfTest { write, verify } => {
            self_test_command(&config, write.as_deref(), verify.as_deref())
        }
        Commands::Profile => {
            println!("{}", serde_json::to_string_pretty(&Profile::from_config(&config))?);
            Ok(())
        }
    }
}

fn load_config(profile: Option<&Path>, audible: bool) -> Result<ModemConfig, CliError> {
    match profile {
        Some(path) => Profile::load(path)?.to_config(),
        None if audible => Ok(ModemConfig::audible()),
        None => Ok(ModemConfig::default()),
    }
}

fn encode_command(
    config: &ModemConfig,
    input: &str,
    output_path: &Path,
    text: bool,
) -> Result<(), CliError> {
    let data = if text {
        input.as_bytes().to_vec()
    } else {
        std::fs::read(input)?
    };
    tracing::info!("Read {} bytes", data.len());

    let controller = TransmissionController::new(config, WavOutput::new(output_path))?;
    let waveform = controller.transmit(&data)?;

    println!(
        "Encoded {} bytes into {} samples ({:.2} s), wrote {}",
        data.len(),
        waveform.len(),
        waveform.duration().as_secs_f32(),
        output_path.display()
    );
    Ok(())
}

fn decode_command(
    config: &ModemConfig,
    input_path: &Path,
    output_path: Option<&Path>,
    chunk_size: usize,
) -> Result<(), CliError> {
    let mut listener =
        Listener::new(config, WavInput::new(input_path))?.with_chunk_size(chunk_size);
    let events = listener.events();
    listener.start()?;

    let mut payloads = Vec::new();
    let mut failure = None;
    loop {
        let event = events.recv().map_err(|_| ModemError::StreamClosed)?;
        match event {
            ListenEvent::Decoded(payload) => {
                println!(
                    "Decoded {} bytes: {}",
                    payload.len(),
                    String::from_utf8_lossy(&payload)
                );
                payloads.push(payload);
            }
            ListenEvent::Failed(e) => {
                tracing::warn!("Frame lost: {}", e);
                failure.get_or_insert(e);
            }
            ListenEvent::Ended => break,
        }
    }
    listener.stop()?;

    let first = match payloads.first() {
        Some(p) => p,
        None => {
            return Err(match failure {
                Some(e) => e.into(),
                None => CliError::NoFrame(input_path.display().to_string()),
            })
        }
    };
    if let Some(path) = output_path {
        std::fs::write(path, first)?;
        println!("Wrote {} bytes to {}", first.len(), path.display());
    }
    Ok(())
}

fn self_test_command(
    config: &ModemConfig,
    write: Option<&Path>,
    verify: Option<&Path>,
) -> Result<(), CliError> {
    if let Some(path) = write {
        let waveform = self_test_waveform(config)?;
        write_wav(path, &waveform)?;
        println!("Wrote self-test waveform to {}", path.display());
        return Ok(());
    }

    if let Some(path) = verify {
        let mut input = WavInput::new(path);
        let mut samples = Vec::new();
        {
            let mut channel = AudioChannel::acquire(
                &mut input,
                config.signal.sample_rate,
                tonelink_core::DEFAULT_CHUNK_SIZE,
            )?;
            while let Some(chunk) = channel.next_chunk()? {
                samples.extend(chunk);
            }
        }
        verify_self_test(config, &samples)?;
        println!("Self-test pattern verified from {}", path.display());
        return Ok(());
    }

    loopback_self_test(config)?;
    println!("Loopback self-test passed");
    Ok(())
}
