mod commands;

use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use commands::{
    Brc20Command, Brc20IndexCommand, Command, ConfigCommand, DatabaseCommand, IndexCommand, Opts,
    ServiceCommand,
};
use config::generator::generate_toml_config;
use config::Config;
use indexer_postgres::pg_pool;
use metaord::db::{migrate_dbs, reset_dbs};
use metaord::meta_protocols::brc20::index::reindex_cumulative_hashes;
use metaord::service::runloops::{build_bitmap_service, build_brc20_service, build_sns_service};
use metaord::service::{ProtocolIndexer, Service};
use metaord::try_info;
use metaord::utils::Context;

pub fn main() {
    let logger = hiro_system_kit::log::setup_logger();
    let _guard = hiro_system_kit::log::setup_global_logger(logger.clone());
    let ctx = Context {
        logger: Some(logger),
        tracer: false,
    };

    let opts: Opts = match Opts::try_parse() {
        Ok(opts) => opts,
        Err(e) => {
            println!("{}", e);
            process::exit(1);
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_moved = shutdown.clone();
    let ctrlc_ctx = ctx.clone();
    let _ = ctrlc::set_handler(move || {
        try_info!(ctrlc_ctx, "Shutdown signal received, finishing the current block");
        shutdown_moved.store(true, Ordering::SeqCst);
    });

    if let Err(e) = hiro_system_kit::nestable_block_on(handle_command(opts, shutdown, &ctx)) {
        error!(ctx.expect_logger(), "{e}");
        std::thread::sleep(std::time::Duration::from_millis(500));
        process::exit(1);
    }
}

fn confirm_destructive_action(prompt: &str) -> Result<(), String> {
    println!("{prompt} Confirm? [Y/n]");
    let mut buffer = String::new();
    std::io::stdin().read_line(&mut buffer).unwrap();
    if buffer.starts_with('n') {
        return Err("Aborted".to_string());
    }
    Ok(())
}

async fn roll_back_blocks<P: ProtocolIndexer>(
    service: &mut Service<P>,
    blocks: u32,
) -> Result<(), String> {
    let Some(chain_tip) = service.get_index_chain_tip().await? else {
        return Err("Nothing indexed yet, nothing to rollback".to_string());
    };
    confirm_destructive_action(&format!(
        "Index chain tip is at #{chain_tip}, {blocks} blocks will be dropped."
    ))?;
    match service.roll_back(chain_tip as i32 - blocks as i32).await {
        Ok(()) => {
            println!("{blocks} blocks dropped");
            Ok(())
        }
        Err(e) => Err(format!("{e:?}")),
    }
}

async fn handle_command(
    opts: Opts,
    shutdown: Arc<AtomicBool>,
    ctx: &Context,
) -> Result<(), String> {
    match opts {
        Opts::Brc20(subcmd) => match subcmd {
            Brc20Command::Service(ServiceCommand::Start(cmd)) => {
                let config = Config::from_file_path(&cmd.config_path)?;
                migrate_dbs(&config, ctx).await?;
                let mut service = build_brc20_service(&config, shutdown, ctx)?;
                if let Some(start_block) = service.get_index_chain_tip().await? {
                    try_info!(ctx, "Index chain tip is at #{start_block}");
                }
                service.run().await
            }
            Brc20Command::Index(Brc20IndexCommand::Rollback(cmd)) => {
                let config = Config::from_file_path(&cmd.config_path)?;
                let mut service = build_brc20_service(&config, shutdown, ctx)?;
                roll_back_blocks(&mut service, cmd.blocks).await
            }
            Brc20Command::Index(Brc20IndexCommand::ReindexHashes(cmd)) => {
                let config = Config::from_file_path(&cmd.config_path)?;
                let brc20_config = config.assert_brc20_config()?;
                let pool = pg_pool(&brc20_config.db)?;
                reindex_cumulative_hashes(&pool, ctx).await
            }
            Brc20Command::Database(subcmd) => {
                handle_database_command(subcmd, ctx).await
            }
        },
        Opts::Bitmap(subcmd) => match subcmd {
            Command::Service(ServiceCommand::Start(cmd)) => {
                let config = Config::from_file_path(&cmd.config_path)?;
                migrate_dbs(&config, ctx).await?;
                let mut service = build_bitmap_service(&config, shutdown, ctx)?;
                service.run().await
            }
            Command::Index(IndexCommand::Rollback(cmd)) => {
                let config = Config::from_file_path(&cmd.config_path)?;
                let mut service = build_bitmap_service(&config, shutdown, ctx)?;
                roll_back_blocks(&mut service, cmd.blocks).await
            }
            Command::Database(subcmd) => {
                handle_database_command(subcmd, ctx).await
            }
        },
        Opts::Sns(subcmd) => match subcmd {
            Command::Service(ServiceCommand::Start(cmd)) => {
                let config = Config::from_file_path(&cmd.config_path)?;
                migrate_dbs(&config, ctx).await?;
                let mut service = build_sns_service(&config, shutdown, ctx)?;
                service.run().await
            }
            Command::Index(IndexCommand::Rollback(cmd)) => {
                let config = Config::from_file_path(&cmd.config_path)?;
                let mut service = build_sns_service(&config, shutdown, ctx)?;
                roll_back_blocks(&mut service, cmd.blocks).await
            }
            Command::Database(subcmd) => {
                handle_database_command(subcmd, ctx).await
            }
        },
        Opts::Config(ConfigCommand::New(cmd)) => {
            use std::fs::File;
            use std::io::Write;
            let network = match (cmd.mainnet, cmd.testnet, cmd.regtest) {
                (true, false, false) => "mainnet",
                (false, true, false) => "testnet",
                (false, false, true) => "regtest",
                _ => return Err("Invalid network".into()),
            };
            let config_content = generate_toml_config(network);
            let file_path = "Indexer.toml";
            let mut file = File::create(file_path)
                .map_err(|e| format!("unable to open file {}\n{}", file_path, e))?;
            file.write_all(config_content.as_bytes())
                .map_err(|e| format!("unable to write file {}\n{}", file_path, e))?;
            println!("Created file Indexer.toml");
            Ok(())
        }
    }
}

async fn handle_database_command(
    subcmd: DatabaseCommand,
    ctx: &Context,
) -> Result<(), String> {
    match subcmd {
        DatabaseCommand::Migrate(cmd) => {
            let config = Config::from_file_path(&cmd.config_path)?;
            migrate_dbs(&config, ctx).await
        }
        DatabaseCommand::Reset(cmd) => {
            let config = Config::from_file_path(&cmd.config_path)?;
            confirm_destructive_action("Every indexed table will be dropped.")?;
            reset_dbs(&config, ctx).await
        }
    }
}
