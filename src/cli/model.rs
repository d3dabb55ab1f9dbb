use std::{path::PathBuf, str::FromStr};

use clap::Parser;
use clap_derive::{Parser, Subcommand};

use crate::service::HostState;

use super::error::DispatchError;

/// Records firmware POST codes per boot cycle
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Host node number
    #[arg(long, default_value_t = 0)]
    pub host: u16,
    /// RON config file, defaults are used when missing
    #[arg(long, default_value = "./config.ron")]
    pub config: PathBuf,
    /// Log filter directive, for example `info` or `post_code_manager=debug`
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// One line read from the console
#[derive(Parser, Debug, Clone)]
pub struct Console {
    #[command(subcommand)]
    pub command: ConsoleCommand,
}

impl Console {
    pub fn parse(line: &str) -> Result<Self, DispatchError> {
        let words = shlex::split(line).ok_or(DispatchError::Quoting)?;
        let res = Self::try_parse_from(std::iter::once("post-code".to_string()).chain(words))?;
        Ok(res)
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConsoleCommand {
    /// Record a post code
    Post {
        /// Primary code, decimal or 0x prefixed hex
        #[arg(value_parser = parse_u64)]
        primary: u64,
        /// Secondary payload as hex bytes
        secondary: Option<HexBytes>,
    },
    /// Report a host power state change
    Host { state: HostState },
    /// List the codes of a boot cycle
    #[command(alias = "ls")]
    List {
        /// 1 is the current cycle, 2 the one before, ...
        #[arg(default_value_t = 1)]
        cycle: u16,
        /// Include timestamps
        #[arg(short, long)]
        timestamps: bool,
    },
    /// Delete all boot cycle history
    DeleteAll,
    /// Show rotation counters
    Status,
    /// Show the last code received
    Current,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexBytes(pub Vec<u8>);

impl FromStr for HexBytes {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        Ok(Self(hex::decode(s)?))
    }
}

fn parse_u64(s: &str) -> Result<u64, String> {
    let res = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    res.map_err(|e| format!("invalid code `{s}`: {e}"))
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(line: &str) -> ConsoleCommand {
        Console::parse(line).unwrap().command
    }

    #[test]
    fn test_parse_console_lines() {
        assert!(matches!(
            parse("post 0xA1"),
            ConsoleCommand::Post { primary: 0xA1, secondary: None }
        ));
        assert!(matches!(
            parse("post 17 dead"),
            ConsoleCommand::Post { primary: 17, secondary: Some(HexBytes(ref b)) } if b == &vec![0xde, 0xad]
        ));
        assert!(matches!(
            parse("host xyz.openbmc_project.State.Host.HostState.Off"),
            ConsoleCommand::Host { state: HostState::Off }
        ));
        assert!(matches!(
            parse("ls"),
            ConsoleCommand::List { cycle: 1, timestamps: false }
        ));
        assert!(matches!(
            parse("list 3 --timestamps"),
            ConsoleCommand::List { cycle: 3, timestamps: true }
        ));
        assert!(matches!(parse("delete-all"), ConsoleCommand::DeleteAll));
    }

    #[test]
    fn test_rejects_bad_lines() {
        assert!(Console::parse("post zz").is_err());
        assert!(Console::parse("post 1 xyz").is_err());
        assert!(Console::parse("host Sideways").is_err());
        assert!(Console::parse("list \"1").is_err());
        assert!(Console::parse("reboot").is_err());
    }

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["post-code-manager", "--host", "2"]).unwrap();
        assert_eq!(args.host, 2);
        assert_eq!(args.config, PathBuf::from("./config.ron"));
        assert_eq!(args.log_level, "info");
    }
}
