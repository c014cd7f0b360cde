use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::format::CompressionPolicy;

#[derive(Parser, Debug)]
#[command(name = "archiver")]
#[command(version)]
#[command(about = "Create, extract, inspect and repair ZIP, 7z and RAR archives", long_about = None)]
#[command(after_help = "Examples:\n  \
  archiver pack -o photos.7z -l maximum a.jpg b.jpg   pack two files with LZMA2 preset 9\n  \
  archiver unpack -d out backup.zip                    extract backup.zip into out/\n  \
  archiver list -v backup.zip                          show sizes and ratios\n  \
  archiver repair broken.zip                           write broken_repaired.zip")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Quiet mode (-qq => errors only)
    #[arg(short = 'q', global = true, action = clap::ArgAction::Count, conflicts_with = "verbose")]
    pub quiet: u8,

    /// Verbose listing and more log output (-vv => debug)
    #[arg(short = 'v', long = "verbose", global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List archive contents
    ///
    /// With -v, prints a table of sizes and compression ratios.
    List {
        #[command(flatten)]
        password: PasswordArg,

        #[arg(value_name = "ARCHIVE", required = true)]
        archives: Vec<PathBuf>,
    },

    /// Create an archive from files
    Pack {
        /// Archive to create; the extension selects the format
        #[arg(short = 'o', long = "output", value_name = "DEST")]
        output: PathBuf,

        /// Compression level: none, fastest, normal, maximum (or 0-3)
        #[arg(short = 'l', long = "level", value_name = "LEVEL", default_value = "normal")]
        level: CompressionPolicy,

        /// Store paths relative to BASE instead of bare file names
        #[arg(long = "keep-paths", value_name = "BASE")]
        keep_paths: Option<PathBuf>,

        /// Fail instead of ignoring a password the format cannot use
        #[arg(long = "strict-password")]
        strict_password: bool,

        #[command(flatten)]
        password: PasswordArg,

        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,
    },

    /// Extract archives
    Unpack {
        /// Extract into DIR (default: next to each archive)
        #[arg(short = 'd', value_name = "DIR")]
        dir: Option<PathBuf>,

        /// Never overwrite existing files
        #[arg(short = 'n')]
        never_overwrite: bool,

        #[command(flatten)]
        password: PasswordArg,

        #[arg(value_name = "ARCHIVE", required = true)]
        archives: Vec<PathBuf>,
    },

    /// Recover the readable entries of damaged archives
    Repair {
        #[command(flatten)]
        password: PasswordArg,

        #[arg(value_name = "ARCHIVE", required = true)]
        archives: Vec<PathBuf>,
    },

    /// Check every entry against its stored checksum
    Test {
        #[command(flatten)]
        password: PasswordArg,

        #[arg(value_name = "ARCHIVE", required = true)]
        archives: Vec<PathBuf>,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct PasswordArg {
    /// Archive password
    #[arg(short = 'p', long = "password", env = "ARCHIVER_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

impl PasswordArg {
    /// The password, with an empty value treated as none.
    pub fn get(&self) -> Option<&str> {
        self.password.as_deref().filter(|p| !p.is_empty())
    }
}

impl Cli {
    pub fn is_quiet(&self) -> bool {
        self.quiet > 0
    }

    /// Log level selected by the `-q`/`-v` counts.
    pub fn log_level(&self) -> log::LevelFilter {
        match (self.quiet, self.verbose) {
            (q, _) if q > 1 => log::LevelFilter::Error,
            (1, _) => log::LevelFilter::Warn,
            (_, 0) => log::LevelFilter::Warn,
            (_, 1) => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pack_command() {
        let cli = Cli::try_parse_from([
            "archiver", "pack", "-o", "out.7z", "-l", "max", "-p", "pw", "a.txt", "b.txt",
        ])
        .unwrap();
        match cli.command {
            Command::Pack {
                output,
                level,
                password,
                files,
                keep_paths,
                strict_password,
            } => {
                assert_eq!(output, PathBuf::from("out.7z"));
                assert_eq!(level, CompressionPolicy::Maximum);
                assert_eq!(password.get(), Some("pw"));
                assert_eq!(files.len(), 2);
                assert!(keep_paths.is_none());
                assert!(!strict_password);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_level() {
        assert!(Cli::try_parse_from(["archiver", "pack", "-o", "x.zip", "-l", "ultra", "a"]).is_err());
    }

    #[test]
    fn verbosity_maps_to_log_level() {
        let cli = Cli::try_parse_from(["archiver", "-vv", "list", "a.zip"]).unwrap();
        assert_eq!(cli.log_level(), log::LevelFilter::Debug);
        let cli = Cli::try_parse_from(["archiver", "-qq", "list", "a.zip"]).unwrap();
        assert_eq!(cli.log_level(), log::LevelFilter::Error);
        let cli = Cli::try_parse_from(["archiver", "list", "a.zip"]).unwrap();
        assert_eq!(cli.log_level(), log::LevelFilter::Warn);
    }

    #[test]
    fn unpack_requires_an_archive() {
        assert!(Cli::try_parse_from(["archiver", "unpack", "-d", "out"]).is_err());
    }
}
