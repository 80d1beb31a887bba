use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};

use lexdict_cli::commands::{config_ops, dict_ops, edit_ops, suggest_ops};
use lexdict_cli::trace_init::init_tracing;
use lexdict_cli::CliError;
use lexdict_core::dict::{FormatVersion, ShortcutTarget};

#[derive(Parser)]
#[command(name = "dictool", about = "Predictive-text dictionary tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    #[value(name = "2")]
    V2,
    #[value(name = "3")]
    V3,
    #[value(name = "4")]
    V4,
}

impl From<Format> for FormatVersion {
    fn from(f: Format) -> Self {
        match f {
            Format::V2 => FormatVersion::StaticV2,
            Format::V3 => FormatVersion::DynamicV3,
            Format::V4 => FormatVersion::DynamicV4,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Build a dictionary from a combined word list
    Create {
        /// Word list (word=...,f=... lines)
        input: PathBuf,
        /// Output dictionary file
        output: PathBuf,
        /// Binary format version
        #[arg(long, value_enum, default_value = "2")]
        format: Format,
        /// Store decaying usage history instead of fixed probabilities
        #[arg(long)]
        forgetting_curve: bool,
    },
    /// Show header attributes and counts
    Info {
        /// Dictionary file
        dict_file: PathBuf,
    },
    /// Show everything stored for one word
    Lookup {
        /// Dictionary file
        dict_file: PathBuf,
        /// Word (exact case)
        word: String,
    },
    /// Print every word as a combined word list
    Dump {
        /// Dictionary file
        dict_file: PathBuf,
        /// Emit a JSON array instead
        #[arg(long)]
        json: bool,
    },
    /// Next-word predictions after a word
    Predict {
        /// Dictionary file
        dict_file: PathBuf,
        /// Previous word
        prev_word: String,
        /// Only words starting with this prefix
        #[arg(long, default_value = "")]
        prefix: String,
        /// Number of results
        #[arg(short, long, default_value = "18")]
        n: usize,
    },
    /// Suggestions for letters typed on a QWERTY keyboard
    Suggest {
        /// Dictionary file
        dict_file: PathBuf,
        /// Typed letters
        typed: String,
        /// Previous word
        #[arg(long)]
        prev: Option<String>,
        /// Number of results
        #[arg(short, long, default_value = "18")]
        n: usize,
    },
    /// Add or update a word in a dynamic dictionary
    AddWord {
        /// Dictionary file
        dict_file: PathBuf,
        word: String,
        /// Probability (0-255)
        probability: u8,
        #[arg(long)]
        not_a_word: bool,
        #[arg(long)]
        blacklisted: bool,
        /// Shortcut target, optionally with probability (target:0-15)
        #[arg(long = "shortcut")]
        shortcuts: Vec<String>,
    },
    /// Remove a word from a dynamic dictionary
    RemoveWord {
        /// Dictionary file
        dict_file: PathBuf,
        word: String,
    },
    /// Add or update a bigram in a dynamic dictionary
    AddBigram {
        /// Dictionary file
        dict_file: PathBuf,
        word0: String,
        word1: String,
        /// Probability (0-255)
        probability: u8,
    },
    /// Remove a bigram from a dynamic dictionary
    RemoveBigram {
        /// Dictionary file
        dict_file: PathBuf,
        word0: String,
        word1: String,
    },
    /// Compact a dynamic dictionary
    Gc {
        /// Dictionary file
        dict_file: PathBuf,
    },
    /// Export default settings as TOML
    SettingsExport,
    /// Validate a custom settings TOML file
    SettingsValidate {
        /// Path to the TOML file
        file: PathBuf,
    },
}

fn parse_shortcut(arg: &str) -> Result<ShortcutTarget, CliError> {
    match arg.rsplit_once(':') {
        Some((target, p)) => {
            let probability = p
                .parse()
                .map_err(|_| CliError::InvalidArgument(format!("bad shortcut probability '{p}'")))?;
            Ok(ShortcutTarget::new(target, probability))
        }
        None => Ok(ShortcutTarget::new(arg, 0)),
    }
}

fn run(command: Command, out: &mut impl Write) -> Result<(), CliError> {
    match command {
        Command::Create {
            input,
            output,
            format,
            forgetting_curve,
        } => {
            let opts = dict_ops::CreateOptions {
                version: format.into(),
                forgetting_curve,
            };
            dict_ops::create(&input, &output, &opts, out)
        }
        Command::Info { dict_file } => dict_ops::info(&dict_file, out),
        Command::Lookup { dict_file, word } => dict_ops::lookup(&dict_file, &word, out),
        Command::Dump { dict_file, json } => dict_ops::dump(&dict_file, json, out),
        Command::Predict {
            dict_file,
            prev_word,
            prefix,
            n,
        } => suggest_ops::predict(&dict_file, &prev_word, &prefix, n, out),
        Command::Suggest {
            dict_file,
            typed,
            prev,
            n,
        } => suggest_ops::suggest(&dict_file, &typed, prev.as_deref(), n, out),
        Command::AddWord {
            dict_file,
            word,
            probability,
            not_a_word,
            blacklisted,
            shortcuts,
        } => {
            let opts = edit_ops::WordOptions {
                not_a_word,
                blacklisted,
                shortcuts: shortcuts
                    .iter()
                    .map(|s| parse_shortcut(s))
                    .collect::<Result<_, _>>()?,
            };
            edit_ops::add_word(&dict_file, &word, probability, &opts, out)
        }
        Command::RemoveWord { dict_file, word } => edit_ops::remove_word(&dict_file, &word, out),
        Command::AddBigram {
            dict_file,
            word0,
            word1,
            probability,
        } => edit_ops::add_bigram(&dict_file, &word0, &word1, probability, out),
        Command::RemoveBigram {
            dict_file,
            word0,
            word1,
        } => edit_ops::remove_bigram(&dict_file, &word0, &word1, out),
        Command::Gc { dict_file } => edit_ops::gc(&dict_file, out),
        Command::SettingsExport => config_ops::settings_export(out),
        Command::SettingsValidate { file } => config_ops::settings_validate(&file, out),
    }
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    if let Err(e) = run(cli.command, &mut out) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
