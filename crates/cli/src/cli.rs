use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::path::{Path, PathBuf};

/// svtracker: game server population tracker
///
/// Polls the Steam master list, records every server's player count into
/// compact history files and publishes a ranked snapshot for the web front
/// end.
#[derive(Debug, Parser, Clone)]
#[command(about, long_about, version)]
pub(crate) struct Cli {
    /// Path to configuration file.
    #[arg(short, long, value_parser = validate_file)]
    pub(crate) conffile: Option<PathBuf>,

    /// Override `tracker.data_dir` from the configuration.
    #[arg(short, long)]
    pub(crate) data_dir: Option<PathBuf>,

    /// Run a single poll cycle and exit.
    #[arg(long)]
    pub(crate) once: bool,

    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    pub(crate) dump_config: bool,

    /// Path to log file.
    ///
    /// Logs go to stderr when omitted.
    #[arg(short, long)]
    pub(crate) logfile: Option<PathBuf>,

    #[command(flatten)]
    pub(crate) verbosity: Verbosity<InfoLevel>,
}

/// Check if the file exists.
#[inline(always)]
fn validate_file(file: &str) -> Result<PathBuf, String> {
    let path = Path::new(file);
    if path.exists() {
        Ok(path.to_owned())
    } else {
        Err(format!("File not found: {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_modes() {
        let cli = Cli::try_parse_from(["svtracker", "--once", "-d", "/srv/data", "-vv"]).unwrap();
        assert!(cli.once);
        assert!(!cli.dump_config);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/srv/data")));
    }

    #[test]
    fn rejects_missing_conffile() {
        let err = Cli::try_parse_from(["svtracker", "-c", "/nonexistent/svtracker.toml"]);
        assert!(err.is_err());
    }
}
