use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use longid::{ConfiguredTable, LongId};
use longid_sqlite::DEFAULT_TABLE_NAME;

/// Command line configuration for the `longid` binary.
///
/// Every global option can also be set through the environment (or a `.env`
/// file in the working directory).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "longid",
    version,
    about = "Install, inspect, bootstrap and allocate typed 64-bit identifiers"
)]
pub struct CliArgs {
    /// Path of the SQLite database.
    ///
    /// Environment variable: `LONGID_DATABASE`
    #[arg(long, env = "LONGID_DATABASE", default_value = "longid.db")]
    pub database: PathBuf,

    /// Name of the backing table holding the last value of every type.
    ///
    /// Environment variable: `LONGID_TABLE`
    #[arg(long, env = "LONGID_TABLE", default_value_t = String::from(DEFAULT_TABLE_NAME))]
    pub table: String,

    /// Shard encoded into identifiers seeded by `install`.
    ///
    /// Environment variable: `LONGID_SHARD`
    #[arg(long, env = "LONGID_SHARD", default_value_t = 0)]
    pub shard: u32,

    /// Reserved byte encoded into identifiers seeded by `install`.
    ///
    /// Environment variable: `LONGID_RESERVED`
    #[arg(long, env = "LONGID_RESERVED", default_value_t = 0)]
    pub reserved: u32,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CliCommand {
    /// Create the backing table and map data tables onto types.
    Install {
        /// `TYPE=TABLE` or `TYPE=TABLE:KEY_COLUMN`, e.g. `1=orders:order_id`.
        /// `TABLE` may be schema-qualified (`aux.orders`). `TYPE` is decimal
        /// or `0x` hexadecimal.
        #[arg(long = "map", value_name = "TYPE=[SCHEMA.]TABLE[:KEY]")]
        maps: Vec<String>,

        /// Also consider unique keys when the primary key does not qualify.
        #[arg(long, default_value_t = false)]
        unique: bool,
    },
    /// Print the backing table.
    Show,
    /// Recompute last values from `MAX(key)` of every mapped table and
    /// persist them.
    Bootstrap,
    /// Allocate identifiers and persist the new last value.
    Next {
        /// Type to allocate for, decimal or `0x` hexadecimal.
        #[arg(long = "type", value_name = "TYPE")]
        type_id: String,

        /// How many identifiers to allocate.
        #[arg(long, default_value_t = 1)]
        count: u32,
    },
    /// Print the fields of an identifier (decimal, negative or `0x` hex).
    Decode {
        #[arg(allow_hyphen_values = true)]
        id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Install {
        tables: Vec<ConfiguredTable>,
        use_unique: bool,
    },
    Show,
    Bootstrap,
    Next {
        type_id: u16,
        count: u32,
    },
    Decode {
        id: LongId,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database: PathBuf,
    pub table: String,
    pub shard: u8,
    pub reserved: u8,
    pub command: Command,
}

impl TryFrom<CliArgs> for Config {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let shard = u8::try_from(args.shard)
            .with_context(|| format!("LONGID_SHARD ({}) must fit in 8 bits", args.shard))?;
        let reserved = u8::try_from(args.reserved)
            .with_context(|| format!("LONGID_RESERVED ({}) must fit in 8 bits", args.reserved))?;

        if args.table.trim().is_empty() {
            bail!("LONGID_TABLE must not be empty");
        }

        let command = match args.command {
            CliCommand::Install { maps, unique } => Command::Install {
                tables: maps
                    .iter()
                    .map(|map| parse_table_map(map))
                    .collect::<anyhow::Result<_>>()?,
                use_unique: unique,
            },
            CliCommand::Show => Command::Show,
            CliCommand::Bootstrap => Command::Bootstrap,
            CliCommand::Next { type_id, count } => {
                if count == 0 {
                    bail!("--count must be greater than 0");
                }
                Command::Next {
                    type_id: parse_type(&type_id)?,
                    count,
                }
            }
            CliCommand::Decode { id } => Command::Decode { id: parse_id(&id)? },
        };

        Ok(Self {
            database: args.database,
            table: args.table,
            shard,
            reserved,
            command,
        })
    }
}

fn parse_u64(value: &str) -> anyhow::Result<u64> {
    let value = value.trim().replace('_', "");
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.with_context(|| format!("invalid number {value:?}"))
}

fn parse_type(value: &str) -> anyhow::Result<u16> {
    let raw = parse_u64(value)?;
    u16::try_from(raw).with_context(|| format!("type {raw} must fit in 16 bits"))
}

fn parse_id(value: &str) -> anyhow::Result<LongId> {
    let trimmed = value.trim();
    if trimmed.starts_with('-') {
        let signed: i64 = trimmed
            .parse()
            .with_context(|| format!("invalid identifier {trimmed:?}"))?;
        return Ok(LongId::from_i64(signed));
    }
    Ok(LongId::from_raw(parse_u64(trimmed)?))
}

/// Parses `TYPE=[SCHEMA.]TABLE[:KEY]`.
fn parse_table_map(value: &str) -> anyhow::Result<ConfiguredTable> {
    let Some((type_id, target)) = value.split_once('=') else {
        bail!("invalid table mapping {value:?}, expected TYPE=TABLE[:KEY]");
    };
    let (table_name, key_column) = match target.split_once(':') {
        Some((table, key)) => (table, Some(key)),
        None => (target, None),
    };

    let table_name = table_name.trim();
    let mut table = match table_name.split_once('.') {
        Some((schema, name)) => ConfiguredTable::new(parse_type(type_id)?, name.trim())?
            .with_schema(schema.trim()),
        None => ConfiguredTable::new(parse_type(type_id)?, table_name)?,
    };
    if let Some(key) = key_column.map(str::trim).filter(|key| !key.is_empty()) {
        table = table.with_key_column(key);
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(args: &[&str]) -> anyhow::Result<Config> {
        let argv = ["longid", "--database", "ids.db"].iter().chain(args);
        Config::try_from(CliArgs::try_parse_from(argv)?)
    }

    #[test]
    fn parses_install_mappings() {
        let config = config(&[
            "install",
            "--map",
            "1=orders:order_id",
            "--map",
            "0x10=users",
            "--map",
            "2=aux.items",
            "--unique",
        ])
        .unwrap();

        assert_eq!(config.database, PathBuf::from("ids.db"));
        assert_eq!(
            config.command,
            Command::Install {
                tables: vec![
                    ConfiguredTable::new(1, "orders")
                        .unwrap()
                        .with_key_column("order_id"),
                    ConfiguredTable::new(0x10, "users").unwrap(),
                    ConfiguredTable::new(2, "items").unwrap().with_schema("aux"),
                ],
                use_unique: true,
            }
        );
    }

    #[test]
    fn parses_next() {
        let config = config(&["next", "--type", "0x1FEE", "--count", "3"]).unwrap();
        assert_eq!(
            config.command,
            Command::Next {
                type_id: 0x1FEE,
                count: 3
            }
        );
    }

    #[test]
    fn parses_identifiers_in_every_notation() {
        let expected = LongId::from_raw(0x1FEE_CCBB_4433_2211);
        for notation in ["0x1FEECCBB44332211", "2301001564308054545"] {
            let config = config(&["decode", notation]).unwrap();
            assert_eq!(config.command, Command::Decode { id: expected });
        }

        let config = config(&["decode", "-1"]).unwrap();
        assert_eq!(config.command, Command::Decode { id: LongId::from_raw(u64::MAX) });
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(config(&["--shard", "256", "show"]).is_err());
        assert!(config(&["--reserved", "300", "show"]).is_err());
        assert!(config(&["next", "--type", "65536"]).is_err());
        assert!(config(&["next", "--type", "1", "--count", "0"]).is_err());
    }

    #[test]
    fn rejects_bad_mappings() {
        assert!(config(&["install", "--map", "orders"]).is_err());
        assert!(config(&["install", "--map", "0=orders"]).is_err());
        assert!(config(&["install", "--map", "1="]).is_err());
    }
}
