use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Parser};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::commands::{expand_command_abbrev, known_command_names};
use crate::config::Config;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

/// `--rc KEY=VALUE`
pub fn parse_override(s: &str) -> anyhow::Result<(String, String)> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(anyhow!("override key cannot be empty: {s}"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "orchard",
    version,
    about = "Orchard: a small to-do list where every task is a fruit",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count)]
    pub quiet: u8,

    #[arg(long = "rc", value_name = "KEY=VALUE", value_parser = parse_override, action = ArgAction::Append)]
    pub rc_overrides: Vec<(String, String)>,

    #[arg(long = "orchardrc")]
    pub orchardrc: Option<PathBuf>,

    #[arg(long = "data")]
    pub data: Option<PathBuf>,

    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub rest: Vec<OsString>,
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = match (quiet, verbose) {
        (q, _) if q >= 2 => "error",
        (1, _) => "warn",
        (_, v) if v >= 3 => "trace",
        (_, 2) => "debug",
        (_, 1) => "info",
        _ => "warn",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls `rc.KEY=VALUE` and `rc.KEY:VALUE` tokens out of the argument list.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> PreprocessedArgs {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        let parsed = s.strip_prefix("rc.").and_then(|rest| {
            rest.split_once('=')
                .or_else(|| rest.split_once(':'))
                .map(|(k, v)| (format!("rc.{k}"), v.to_string()))
        });

        match parsed {
            Some((k, v)) => {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((k, v));
            }
            None => cleaned.push(arg),
        }
    }

    PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    }
}

/// What to run: task ids given before the command, the command, and the
/// words after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub targets: Vec<u64>,
    pub command: String,
    pub command_args: Vec<String>,
}

impl Invocation {
    #[tracing::instrument(skip(cfg, rest))]
    pub fn parse(cfg: &Config, rest: Vec<OsString>) -> anyhow::Result<Self> {
        let tokens: Vec<String> = rest
            .into_iter()
            .map(|arg| arg.to_string_lossy().to_string())
            .collect();

        let default_command = cfg
            .get("default.command")
            .unwrap_or_else(|| "list".to_string());

        let split = tokens
            .iter()
            .position(|tok| tok.parse::<u64>().is_err())
            .unwrap_or(tokens.len());
        let (id_tokens, remainder) = tokens.split_at(split);

        let targets = id_tokens
            .iter()
            .map(|tok| tok.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()?;

        let Some((first, command_args)) = remainder.split_first() else {
            let command = if targets.is_empty() {
                debug!(command = %default_command, "no explicit command, using default");
                default_command
            } else {
                debug!(?targets, "bare ids interpreted as task info query");
                "info".to_string()
            };
            return Ok(Self {
                targets,
                command,
                command_args: vec![],
            });
        };

        let known = known_command_names();
        let command = expand_command_abbrev(first, &known)
            .ok_or_else(|| anyhow!("unknown command: {first}"))?;
        debug!(token = %first, expanded = %command, "resolved command token");

        Ok(Self {
            targets,
            command: command.to_string(),
            command_args: command_args.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use super::{GlobalCli, Invocation, parse_override, preprocess_args};
    use clap::Parser;
    use crate::config::Config;

    fn os(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    #[test]
    fn extracts_positional_rc_overrides() {
        let pre = preprocess_args(&os(&[
            "orchard",
            "rc.color=off",
            "add",
            "rc.default.importance:general",
            "Buy",
        ]));
        assert_eq!(pre.cleaned_args, os(&["orchard", "add", "Buy"]));
        assert_eq!(
            pre.rc_overrides,
            vec![
                ("rc.color".to_string(), "off".to_string()),
                ("rc.default.importance".to_string(), "general".to_string()),
            ]
        );
    }

    #[test]
    fn empty_invocation_uses_default_command() {
        let inv = Invocation::parse(&Config::default(), vec![]).expect("parse");
        assert_eq!(inv.command, "list");
        assert!(inv.targets.is_empty());
    }

    #[test]
    fn bare_id_means_info() {
        let inv = Invocation::parse(&Config::default(), os(&["3"])).expect("parse");
        assert_eq!(inv.command, "info");
        assert_eq!(inv.targets, vec![3]);
    }

    #[test]
    fn ids_before_abbreviated_command() {
        let inv = Invocation::parse(
            &Config::default(),
            os(&["1", "4", "mod", "Pay", "rent", "imp:important"]),
        )
        .expect("parse");
        assert_eq!(
            inv,
            Invocation {
                targets: vec![1, 4],
                command: "modify".to_string(),
                command_args: vec![
                    "Pay".to_string(),
                    "rent".to_string(),
                    "imp:important".to_string()
                ],
            }
        );
    }

    #[test]
    fn numbers_after_command_stay_arguments() {
        let inv = Invocation::parse(&Config::default(), os(&["add", "Buy", "2", "apples"]))
            .expect("parse");
        assert_eq!(inv.command, "add");
        assert!(inv.targets.is_empty());
        assert_eq!(inv.command_args, vec!["Buy", "2", "apples"]);
    }

    #[test]
    fn unknown_or_ambiguous_command_fails() {
        assert!(Invocation::parse(&Config::default(), os(&["frobnicate"])).is_err());
        // `d` matches both delete and done
        assert!(Invocation::parse(&Config::default(), os(&["d"])).is_err());
    }

    #[test]
    fn rc_flag_collects_key_value_pairs() {
        assert_eq!(
            parse_override(" color = off ").expect("parse"),
            ("color".to_string(), "off".to_string())
        );
        assert!(parse_override("color").is_err());
        assert!(parse_override("=off").is_err());

        let cli = GlobalCli::try_parse_from(["orchard", "--rc", "color=off", "--rc", "a=b", "list"])
            .expect("parse cli");
        assert_eq!(
            cli.rc_overrides,
            vec![
                ("color".to_string(), "off".to_string()),
                ("a".to_string(), "b".to_string()),
            ]
        );
        assert_eq!(cli.rest, vec![std::ffi::OsString::from("list")]);
    }
}
