use std::env;
use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

use emount::engine::GocryptfsCommand;
use emount::error::Result;
use emount::passphrase::{
    self, ConstantPassphraseReader, LinePassphraseReader, PassphraseReader,
    TerminalPassphraseReader,
};
use emount::volume;
use zeroize::Zeroizing;

#[derive(Parser, Debug)]
#[command(
    name = "emount",
    version,
    about = "run commands against encrypted volumes (gocryptfs wrapper)"
)]
struct Cli {
    /// Read passphrase from stdin instead of from terminal
    #[arg(long = "passphrase-stdin", action = ArgAction::SetTrue, global = true)]
    passphrase_stdin: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize a new encrypted volume
    ///
    /// The volume path must not exist yet or must be an empty directory.
    /// The passphrase is prompted for (with confirmation and a strength
    /// check) unless EMOUNT_PASSWORD is set or --passphrase-stdin is used.
    Init {
        /// Path of the volume to create
        volume: PathBuf,
        /// Populate the new volume with a recursive copy of this folder
        #[arg(short = 'f', long = "from")]
        from: Option<PathBuf>,
    },
    /// Mount a volume, run a command against the decrypted view, unmount
    ///
    /// The command receives the mountpoint in the EMOUNT_FOLDER environment
    /// variable. The default mountpoint is a temporary directory; override
    /// it with --mount (must be an existing empty directory).
    Run {
        /// Path of the encrypted volume
        volume: PathBuf,
        /// Mountpoint for the decrypted view
        #[arg(short = 'm', long = "mount")]
        mountpoint: Option<PathBuf>,
        /// Command and arguments to execute
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}

/// Passphrase from EMOUNT_PASSWORD if set and non-empty.
fn env_passphrase() -> Option<Zeroizing<String>> {
    match env::var(passphrase::ENV_PASSWORD_KEY) {
        Ok(value) if !value.is_empty() => Some(Zeroizing::new(value)),
        _ => None,
    }
}

/// Reader for unlocking an existing volume.
fn unlock_reader(passphrase_stdin: bool) -> Box<dyn PassphraseReader> {
    if let Some(passphrase) = env_passphrase() {
        Box::new(ConstantPassphraseReader::new((*passphrase).clone()))
    } else if passphrase_stdin {
        Box::new(LinePassphraseReader::from_stdin())
    } else {
        Box::new(TerminalPassphraseReader::new("Enter encryption passphrase: "))
    }
}

/// Interactive reader for choosing a new volume passphrase: confirmation
/// plus the entropy gate. Non-interactive sources skip both (automation is
/// assumed to supply a passphrase of adequate strength).
struct NewPassphrasePrompt;

impl PassphraseReader for NewPassphrasePrompt {
    fn read_passphrase(&mut self) -> Result<Zeroizing<String>> {
        passphrase::prompt_new_passphrase(
            "Enter encryption passphrase: ",
            passphrase::MIN_NEW_PASSPHRASE_ENTROPY,
        )
    }
}

fn new_volume_reader(passphrase_stdin: bool) -> Box<dyn PassphraseReader> {
    if let Some(passphrase) = env_passphrase() {
        Box::new(ConstantPassphraseReader::new((*passphrase).clone()))
    } else if passphrase_stdin {
        Box::new(LinePassphraseReader::from_stdin())
    } else {
        Box::new(NewPassphrasePrompt)
    }
}

fn main() {
    let cli = Cli::parse();
    let engine = GocryptfsCommand::default();

    let result = match cli.command {
        Commands::Init { volume, from } => {
            let mut reader = new_volume_reader(cli.passphrase_stdin);
            volume::init_volume(&engine, &volume, from.as_deref(), reader.as_mut())
        }
        Commands::Run {
            volume: vol,
            mountpoint,
            command,
        } => {
            let mut reader = unlock_reader(cli.passphrase_stdin);
            volume::run_with_volume(
                &engine,
                &vol,
                mountpoint.as_deref(),
                &command,
                reader.as_mut(),
            )
        }
    };

    if let Err(err) = result {
        eprintln!("ERROR: {}", err);
        std::process::exit(1);
    }
}
