use anyhow::{Context, Result, anyhow, bail};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const DEFAULT_CONFIG_PATH: &str = "conf/config.toml";

pub const USAGE: &str = "\
Usage: tafsir-player [--config <path>] <command>

Commands:
  chapters [--audio]              List chapters (only those with audio)
  read <chapter>                  Print a chapter's verses
  play <chapter> [--part N]       Listen to a chapter (parts are numbered from 1)
  progress <chapter>              Show the saved listening position
  forget <chapter>                Clear the saved listening position
  tokens register <token>         Register a device token
  tokens remove <token>           Remove a device token
  tokens list                     List registered device tokens
  tokens prune-stale [days]       Drop tokens not seen for this many days
  notify --title T --body B [--data key=value]...
                                  Publish to every device (admin key in TAFSIR_ADMIN_KEY)
  config                          Print the effective configuration";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Chapters { audio_only: bool },
    Read { chapter_id: u32 },
    Play { chapter_id: u32, part: Option<usize> },
    Progress { chapter_id: u32 },
    Forget { chapter_id: u32 },
    TokensRegister { token: String },
    TokensRemove { token: String },
    TokensList,
    TokensPruneStale { days: Option<u32> },
    Notify {
        title: String,
        body: String,
        data: BTreeMap<String, String>,
    },
    Config,
    Help,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CliArgs {
    pub config_path: PathBuf,
    pub command: Command,
}

pub fn parse_args<I>(args: I) -> Result<CliArgs>
where
    I: IntoIterator<Item = String>,
{
    let mut config_path = PathBuf::from(DEFAULT_CONFIG_PATH);
    let mut rest = Vec::new();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args
                    .next()
                    .ok_or_else(|| anyhow!("--config needs a path"))?;
                config_path = PathBuf::from(path);
            }
            "-h" | "--help" => {
                return Ok(CliArgs {
                    config_path,
                    command: Command::Help,
                });
            }
            _ => rest.push(arg),
        }
    }

    let mut rest = rest.into_iter();
    let command = match rest.next().as_deref() {
        None | Some("help") => Command::Help,
        Some("chapters") => match rest.next().as_deref() {
            None => Command::Chapters { audio_only: false },
            Some("--audio") => Command::Chapters { audio_only: true },
            Some(other) => bail!("unexpected argument for chapters: {other}"),
        },
        Some("config") => Command::Config,
        Some("read") => Command::Read {
            chapter_id: chapter_arg(rest.next())?,
        },
        Some("play") => {
            let chapter_id = chapter_arg(rest.next())?;
            let mut part = None;
            while let Some(flag) = rest.next() {
                match flag.as_str() {
                    "--part" => {
                        let value = rest
                            .next()
                            .ok_or_else(|| anyhow!("--part needs a number"))?;
                        part = Some(part_number(&value)?);
                    }
                    other => bail!("unexpected argument for play: {other}"),
                }
            }
            Command::Play { chapter_id, part }
        }
        Some("progress") => Command::Progress {
            chapter_id: chapter_arg(rest.next())?,
        },
        Some("forget") => Command::Forget {
            chapter_id: chapter_arg(rest.next())?,
        },
        Some("tokens") => match rest.next().as_deref() {
            Some("register") => Command::TokensRegister {
                token: required(rest.next(), "token")?,
            },
            Some("remove") => Command::TokensRemove {
                token: required(rest.next(), "token")?,
            },
            Some("list") => Command::TokensList,
            Some("prune-stale") => Command::TokensPruneStale {
                days: rest
                    .next()
                    .map(|days| {
                        days.parse::<u32>()
                            .with_context(|| format!("invalid day count: {days}"))
                    })
                    .transpose()?,
            },
            Some(other) => bail!("unknown tokens subcommand: {other}"),
            None => bail!("tokens needs a subcommand (register, remove, list, prune-stale)"),
        },
        Some("notify") => {
            let mut title = None;
            let mut body = None;
            let mut data = BTreeMap::new();
            while let Some(flag) = rest.next() {
                match flag.as_str() {
                    "--title" => title = Some(required(rest.next(), "--title value")?),
                    "--body" => body = Some(required(rest.next(), "--body value")?),
                    "--data" => {
                        let pair = required(rest.next(), "--data key=value")?;
                        let (key, value) = pair
                            .split_once('=')
                            .ok_or_else(|| anyhow!("--data expects key=value, got {pair}"))?;
                        data.insert(key.trim().to_string(), value.trim().to_string());
                    }
                    other => bail!("unexpected argument for notify: {other}"),
                }
            }
            Command::Notify {
                title: title.ok_or_else(|| anyhow!("notify needs --title"))?,
                body: body.ok_or_else(|| anyhow!("notify needs --body"))?,
                data,
            }
        }
        Some(other) => bail!("unknown command: {other}\n\n{USAGE}"),
    };
    Ok(CliArgs {
        config_path,
        command,
    })
}

fn required(value: Option<String>, what: &str) -> Result<String> {
    value.ok_or_else(|| anyhow!("missing {what}"))
}

fn chapter_arg(value: Option<String>) -> Result<u32> {
    let value = required(value, "chapter number")?;
    value
        .parse::<u32>()
        .with_context(|| format!("invalid chapter number: {value}"))
}

/// Human part numbers start at 1.
pub fn part_number(value: &str) -> Result<usize> {
    let number: usize = value
        .trim()
        .parse()
        .with_context(|| format!("invalid part number: {value}"))?;
    if number == 0 {
        bail!("parts are numbered from 1");
    }
    Ok(number - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<CliArgs> {
        parse_args(args.iter().map(|arg| arg.to_string()))
    }

    #[test]
    fn no_arguments_prints_help() {
        let cli = parse(&[]).expect("parse");
        assert_eq!(cli.command, Command::Help);
        assert_eq!(cli.config_path, PathBuf::from(DEFAULT_CONFIG_PATH));
    }

    #[test]
    fn config_flag_works_anywhere() {
        let cli = parse(&["play", "18", "--config", "/etc/tafsir.toml", "--part", "2"])
            .expect("parse");
        assert_eq!(cli.config_path, PathBuf::from("/etc/tafsir.toml"));
        assert_eq!(
            cli.command,
            Command::Play {
                chapter_id: 18,
                part: Some(1),
            }
        );
    }

    #[test]
    fn chapters_can_be_limited_to_audio() {
        assert_eq!(
            parse(&["chapters"]).expect("parse").command,
            Command::Chapters { audio_only: false }
        );
        assert_eq!(
            parse(&["chapters", "--audio"]).expect("parse").command,
            Command::Chapters { audio_only: true }
        );
        assert!(parse(&["chapters", "--all"]).is_err());
        assert_eq!(parse(&["config"]).expect("parse").command, Command::Config);
    }

    #[test]
    fn part_zero_and_bad_chapters_are_rejected() {
        assert!(parse(&["play", "1", "--part", "0"]).is_err());
        assert!(parse(&["read", "first"]).is_err());
        assert!(parse(&["read"]).is_err());
    }

    #[test]
    fn token_subcommands() {
        assert_eq!(
            parse(&["tokens", "prune-stale"]).expect("parse").command,
            Command::TokensPruneStale { days: None }
        );
        assert_eq!(
            parse(&["tokens", "prune-stale", "30"]).expect("parse").command,
            Command::TokensPruneStale { days: Some(30) }
        );
        assert!(parse(&["tokens", "shuffle"]).is_err());
    }

    #[test]
    fn notify_collects_data_pairs() {
        let cli = parse(&[
            "notify", "--title", "New", "--body", "Al-Kahf", "--data", "chapter_id=18", "--data",
            "part = 2",
        ])
        .expect("parse");
        let Command::Notify { title, body, data } = cli.command else {
            panic!("expected notify");
        };
        assert_eq!(title, "New");
        assert_eq!(body, "Al-Kahf");
        assert_eq!(data.get("chapter_id").map(String::as_str), Some("18"));
        assert_eq!(data.get("part").map(String::as_str), Some("2"));
        assert!(parse(&["notify", "--title", "x"]).is_err());
    }
}
