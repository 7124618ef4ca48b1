//! Passphrase acquisition
//!
//! The encryption engine takes the passphrase as a single line on stdin, so
//! everything here works in terms of one trimmed line of text.

use crate::error::{EmountError, ErrorCategory, ErrorKind, Result};
use std::io::{self, BufRead, IsTerminal, Write};
use zeroize::Zeroizing;

/// Environment variable consulted before any interactive prompting.
pub const ENV_PASSWORD_KEY: &str = "EMOUNT_PASSWORD";

/// Minimum entropy (in bits) required of a newly chosen passphrase.
///
/// This is a better metric for passphrase strength than length and number of
/// symbols. Adjust here to enforce security policy cryptographic controls.
/// Examples of passphrases that score slightly above 24 include
/// "horse-table", "summurr", "ostrich/3" and "factory8717".
pub const MIN_NEW_PASSPHRASE_ENTROPY: f64 = 24.0;

const MAX_NEW_PASSPHRASE_TRIES: usize = 10;

/// Trait for reading passphrases from various sources
pub trait PassphraseReader {
    /// Read a passphrase as a single trimmed line of text.
    ///
    /// Returns the passphrase wrapped in `Zeroizing` to ensure it is securely
    /// wiped from memory when dropped.
    fn read_passphrase(&mut self) -> Result<Zeroizing<String>>;
}

/// Returns a fixed passphrase (environment variable, or tests)
pub struct ConstantPassphraseReader {
    passphrase: Zeroizing<String>,
}

impl ConstantPassphraseReader {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: Zeroizing::new(passphrase.into()),
        }
    }
}

impl PassphraseReader for ConstantPassphraseReader {
    fn read_passphrase(&mut self) -> Result<Zeroizing<String>> {
        Ok(Zeroizing::new((*self.passphrase).clone()))
    }
}

/// Reads a single passphrase line from any `BufRead` source.
///
/// Only one line is consumed so that, when the source is stdin, the remainder
/// stays available to the command being run against the mounted volume.
pub struct LinePassphraseReader {
    reader: Box<dyn BufRead>,
}

impl LinePassphraseReader {
    pub fn new(reader: Box<dyn BufRead>) -> Self {
        Self { reader }
    }

    pub fn from_stdin() -> Self {
        Self::new(Box::new(io::BufReader::new(io::stdin())))
    }
}

impl PassphraseReader for LinePassphraseReader {
    fn read_passphrase(&mut self) -> Result<Zeroizing<String>> {
        let mut line = Zeroizing::new(String::new());
        self.reader.read_line(&mut line).map_err(|e| {
            EmountError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Io,
                format!("error reading passphrase: {}", e),
                e,
            )
        })?;
        Ok(Zeroizing::new(line.trim().to_string()))
    }
}

/// Reads passphrase from terminal with no echo
pub struct TerminalPassphraseReader {
    prompt: String,
}

impl TerminalPassphraseReader {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
        }
    }
}

impl PassphraseReader for TerminalPassphraseReader {
    fn read_passphrase(&mut self) -> Result<Zeroizing<String>> {
        if !io::stdin().is_terminal() {
            return Err(EmountError::with_kind(
                ErrorCategory::User,
                ErrorKind::PassphraseUnavailable,
                "cannot read passphrase from terminal - stdin is not a terminal \
                 (set EMOUNT_PASSWORD or use --passphrase-stdin)",
            ));
        }

        io::stderr()
            .write_all(self.prompt.as_bytes())
            .and_then(|_| io::stderr().flush())
            .map_err(|e| {
                EmountError::with_kind_and_source(
                    ErrorCategory::Internal,
                    ErrorKind::Io,
                    format!("failed to write prompt: {}", e),
                    e,
                )
            })?;

        // Read passphrase *without echo*
        let passphrase = rpassword::read_password().map_err(|e| {
            EmountError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::PassphraseUnavailable,
                format!("failure reading passphrase: {}", e),
                e,
            )
        })?;

        Ok(Zeroizing::new(passphrase.trim().to_string()))
    }
}

/// Estimated passphrase strength in bits, scored by zxcvbn.
pub fn entropy_bits(passphrase: &str) -> f64 {
    zxcvbn::zxcvbn(passphrase, &[]).guesses_log10() * std::f64::consts::LOG2_10
}

/// Whether a candidate new passphrase clears the entropy bar.
pub fn is_acceptable_new_passphrase(passphrase: &str, min_entropy: f64) -> bool {
    !passphrase.is_empty() && entropy_bits(passphrase) >= min_entropy
}

/// Prompts the user for a new volume passphrase.
///
/// The user must type the passphrase a second time for confirmation, and the
/// passphrase must meet the minimum entropy. If unsure, a value of 50.0 is
/// reasonable for a moderately strong passphrase.
pub fn prompt_new_passphrase(prompt: &str, min_entropy: f64) -> Result<Zeroizing<String>> {
    for _ in 0..MAX_NEW_PASSPHRASE_TRIES {
        let passphrase = TerminalPassphraseReader::new(prompt).read_passphrase()?;
        if !is_acceptable_new_passphrase(&passphrase, min_entropy) {
            eprintln!("Passphrase too weak - please try again\n");
            continue;
        }
        let confirm = match TerminalPassphraseReader::new("Confirm passphrase: ").read_passphrase()
        {
            Ok(confirm) => confirm,
            Err(_) => {
                eprintln!("Input error - please try again\n");
                continue;
            }
        };
        if *passphrase != *confirm {
            eprintln!("Passphrases did not match - please try again\n");
            continue;
        }
        return Ok(passphrase);
    }
    Err(EmountError::with_kind(
        ErrorCategory::User,
        ErrorKind::PassphraseUnavailable,
        "too many attempts - please try again later",
    ))
}
