//! CLI argument definitions for trap2json.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// SNMP trap to JSON converter and fan-out router.
///
/// Reads delimited trap records emitted by snmptrapd on stdin, parses
/// them into structured events, optionally correlates raise/clear
/// pairs, and forwards JSON to the configured destinations.
#[derive(Parser, Debug)]
#[command(name = "trap2json")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "/etc/trap2json/config.yml")]
    pub config: PathBuf,

    /// Generate an snmptrapd configuration file at the given path and
    /// exit instead of running the pipeline.
    #[arg(long)]
    pub generate: Option<PathBuf>,

    /// Do not try to terminate the external snmptrapd process on
    /// shutdown (useful when feeding records from a file or a pipe).
    #[arg(long)]
    pub no_snmptrapd: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = Cli::parse_from(["trap2json"]);
        assert_eq!(cli.config, PathBuf::from("/etc/trap2json/config.yml"));
        assert!(cli.generate.is_none());
        assert!(!cli.no_snmptrapd);
    }

    #[test]
    fn generate_mode() {
        let cli = Cli::parse_from(["trap2json", "--generate", "/tmp/snmptrapd.conf"]);
        assert_eq!(cli.generate, Some(PathBuf::from("/tmp/snmptrapd.conf")));
    }

    #[test]
    fn custom_config_path() {
        let cli = Cli::parse_from(["trap2json", "-c", "/opt/t2j.yml"]);
        assert_eq!(cli.config, PathBuf::from("/opt/t2j.yml"));
    }
}
