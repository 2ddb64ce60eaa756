use std::path::PathBuf;

use clap::Parser;
use regex::Regex;

#[derive(Parser, Debug)]
#[command(version, about)]
pub(crate) struct Args {
    /// Project file describing certificates, clusters, routers and listeners
    #[arg(short, long, default_value = "envoy-xds.yaml")]
    pub(crate) config: PathBuf,

    /// Compile the xDS files and deploy the changed ones
    #[arg(short, long)]
    pub(crate) build: bool,

    /// Print the compiled xDS files instead of deploying them
    #[arg(short, long)]
    pub(crate) test: bool,

    /// Only handle files whose name (envoy, lds, cds, tls_<name>) matches this regex
    #[arg(short, long)]
    pub(crate) filter: Option<Regex>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Build,
    Test,
}

impl Args {
    /// `--test` wins when both pipelines are requested.
    pub(crate) fn mode(&self) -> Option<Mode> {
        if self.test {
            Some(Mode::Test)
        } else if self.build {
            Some(Mode::Build)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("envoy-xds").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults() {
        let args = parse(&[]);

        assert_eq!(args.config, PathBuf::from("envoy-xds.yaml"));
        assert_eq!(args.mode(), None);
        assert!(args.filter.is_none());
    }

    #[test]
    fn test_wins_over_build() {
        assert_eq!(parse(&["-b"]).mode(), Some(Mode::Build));
        assert_eq!(parse(&["-t"]).mode(), Some(Mode::Test));
        assert_eq!(parse(&["--build", "--test"]).mode(), Some(Mode::Test));
    }

    #[test]
    fn config_and_filter() {
        let args = parse(&["-c", "/etc/xds/project.yaml", "-f", "^tls_"]);

        assert_eq!(args.config, PathBuf::from("/etc/xds/project.yaml"));
        assert!(args.filter.as_ref().unwrap().is_match("tls_example.com"));
        assert!(!args.filter.as_ref().unwrap().is_match("lds"));
    }

    #[test]
    fn invalid_filter_is_rejected() {
        let result = Args::try_parse_from(["envoy-xds", "--filter", "("]);

        assert!(result.is_err());
    }
}
