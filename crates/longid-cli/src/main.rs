mod config;
mod telemetry;

use std::io::{self, Write};

use clap::Parser;
use config::{CliArgs, Command, Config};
use longid::LongIdAllocator;
use longid_sqlite::{Installer, SqliteStorage};
use telemetry::init_telemetry;

fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = Config::try_from(args)?;

    init_telemetry()?;
    log_startup_info(&config);

    let stdout = io::stdout();
    run(&config, &mut stdout.lock())
}

fn log_startup_info(config: &Config) {
    if cfg!(debug_assertions) {
        tracing::debug!("Starting with full config: {config:#?}");
    } else {
        tracing::debug!(
            database = %config.database.display(),
            table = %config.table,
            "Starting"
        );
    }
}

fn run(config: &Config, out: &mut impl Write) -> anyhow::Result<()> {
    let open = || SqliteStorage::open(&config.database, config.table.as_str());

    match &config.command {
        Command::Install { tables, use_unique } => {
            let storage = open()?;
            let installer = Installer::new(&storage);
            if installer.create_table()? {
                writeln!(out, "created table {}", storage.table_name())?;
            }
            let rows = installer.install(config.shard, config.reserved, *use_unique, tables)?;
            for row in rows {
                writeln!(
                    out,
                    "type {:#06x} -> {}.{} starting at {}",
                    row.type_id,
                    row.table_name.unwrap_or_default(),
                    row.key_name.unwrap_or_default(),
                    row.id
                )?;
            }
        }
        Command::Show => {
            writeln!(
                out,
                "{:<8} {:<22} {:<6} {:<8} {:<10} {:<20} KEY",
                "TYPE", "ID", "SHARD", "RESERVED", "SEQUENCE", "TABLE"
            )?;
            for row in open()?.rows()? {
                writeln!(
                    out,
                    "{:<8} {:<22} {:<6} {:<8} {:<10} {:<20} {}",
                    format!("{:#06x}", row.type_id),
                    row.id,
                    row.id.shard(),
                    row.id.reserved(),
                    row.id.sequence(),
                    row.table_name.as_deref().unwrap_or("-"),
                    row.key_name.as_deref().unwrap_or("-"),
                )?;
            }
        }
        Command::Bootstrap => {
            let allocator = LongIdAllocator::with_bootstrap(open()?)?;
            for id in allocator.snapshot() {
                writeln!(out, "type {:#06x} last {}", id.type_id(), id)?;
            }
        }
        Command::Next { type_id, count } => {
            let allocator = LongIdAllocator::new(open()?)?;
            let range = allocator.create_many(*type_id, *count)?;
            // Persist before handing the ids out.
            allocator.flush_type(*type_id)?;
            for id in range {
                writeln!(out, "{id}")?;
            }
        }
        Command::Decode { id } => {
            writeln!(out, "{id:?}")?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use longid::{ConfiguredTable, LongId, LongIdStorage};
    use std::path::Path;

    fn config(database: &Path, command: Command) -> Config {
        Config {
            database: database.to_path_buf(),
            table: "ids".to_owned(),
            shard: 2,
            reserved: 0,
            command,
        }
    }

    fn run_to_string(config: &Config) -> String {
        let mut out = Vec::new();
        run(config, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn install_next_and_bootstrap() {
        let dir = tempfile::tempdir().unwrap();
        let database = dir.path().join("ids.db");
        {
            let storage = SqliteStorage::open(&database, "ids").unwrap();
            storage
                .connection()
                .execute_batch("CREATE TABLE orders (id BIGINT PRIMARY KEY)")
                .unwrap();
        }

        let install = Command::Install {
            tables: vec![ConfiguredTable::new(1, "orders").unwrap()],
            use_unique: false,
        };
        let output = run_to_string(&config(&database, install));
        assert!(output.contains("created table ids"));
        assert!(output.contains("orders.id"));

        let output = run_to_string(&config(&database, Command::Next { type_id: 1, count: 2 }));
        let issued: Vec<LongId> = output
            .lines()
            .map(|line| LongId::from_raw(line.parse().unwrap()))
            .collect();
        assert_eq!(
            issued,
            vec![
                LongId::from_components(1, 2, 0, 1),
                LongId::from_components(1, 2, 0, 2),
            ]
        );

        // Rows inserted by another writer are picked up by the bootstrap.
        {
            let storage = SqliteStorage::open(&database, "ids").unwrap();
            storage
                .connection()
                .execute(
                    "INSERT INTO orders (id) VALUES (?1)",
                    [LongId::from_components(1, 2, 0, 40).to_i64()],
                )
                .unwrap();
        }
        let output = run_to_string(&config(&database, Command::Bootstrap));
        assert!(output.contains(&LongId::from_components(1, 2, 0, 40).to_string()));

        let storage = SqliteStorage::open(&database, "ids").unwrap();
        assert_eq!(
            storage.load(false).unwrap(),
            vec![LongId::from_components(1, 2, 0, 40)]
        );

        let output = run_to_string(&config(&database, Command::Show));
        assert_eq!(output.lines().count(), 2);
        assert!(output.contains("orders"));
    }

    #[test]
    fn next_for_an_unknown_type_fails() {
        let dir = tempfile::tempdir().unwrap();
        let database = dir.path().join("ids.db");
        run_to_string(&config(
            &database,
            Command::Install {
                tables: Vec::new(),
                use_unique: false,
            },
        ));

        let mut out = Vec::new();
        let err = run(&config(&database, Command::Next { type_id: 9, count: 1 }), &mut out)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<longid::Error>(),
            Some(longid::Error::UnknownType { type_id: 9 })
        ));
        assert!(out.is_empty());
    }

    #[test]
    fn decode_prints_the_layout() {
        let dir = tempfile::tempdir().unwrap();
        let id = LongId::from_raw(0x1FEE_CCBB_4433_2211);
        let output = run_to_string(&config(&dir.path().join("ids.db"), Command::Decode { id }));
        assert_eq!(output.trim_end(), format!("{id:?}"));
        assert!(!dir.path().join("ids.db").exists());
    }
}
