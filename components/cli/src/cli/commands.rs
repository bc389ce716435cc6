use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[clap(name = "metaprotocol-indexer", author, version, about, long_about = None)]
pub enum Opts {
    /// BRC-20 token indexer commands
    #[clap(subcommand)]
    Brc20(Brc20Command),
    /// Bitmap claim indexer commands
    #[clap(subcommand)]
    Bitmap(Command),
    /// SNS name indexer commands
    #[clap(subcommand)]
    Sns(Command),
    /// Generate a new configuration file
    #[clap(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, PartialEq, Clone, Debug)]
pub enum Command {
    /// Stream and index metaprotocol blocks
    #[clap(subcommand)]
    Service(ServiceCommand),
    /// Perform maintenance operations on the local index
    #[clap(subcommand)]
    Index(IndexCommand),
    /// Database operations
    #[clap(subcommand)]
    Database(DatabaseCommand),
}

#[derive(Subcommand, PartialEq, Clone, Debug)]
pub enum Brc20Command {
    /// Stream and index metaprotocol blocks
    #[clap(subcommand)]
    Service(ServiceCommand),
    /// Perform maintenance operations on the local index
    #[clap(subcommand)]
    Index(Brc20IndexCommand),
    /// Database operations
    #[clap(subcommand)]
    Database(DatabaseCommand),
}

#[derive(Subcommand, PartialEq, Clone, Debug)]
pub enum ServiceCommand {
    /// Start service
    #[clap(name = "start", bin_name = "start")]
    Start(ServiceStartCommand),
}

#[derive(Parser, PartialEq, Clone, Debug)]
pub struct ServiceStartCommand {
    #[clap(long = "config-path")]
    pub config_path: String,
}

#[derive(Subcommand, PartialEq, Clone, Debug)]
pub enum IndexCommand {
    /// Rollback index blocks
    #[clap(name = "rollback", bin_name = "rollback")]
    Rollback(RollbackIndexCommand),
}

#[derive(Subcommand, PartialEq, Clone, Debug)]
pub enum Brc20IndexCommand {
    /// Rollback index blocks
    #[clap(name = "rollback", bin_name = "rollback")]
    Rollback(RollbackIndexCommand),
    /// Recompute the digest chain from the persisted event log
    #[clap(name = "reindex-hashes", bin_name = "reindex-hashes")]
    ReindexHashes(ReindexHashesCommand),
}

#[derive(Parser, PartialEq, Clone, Debug)]
pub struct RollbackIndexCommand {
    /// Number of blocks to rollback from the index tip
    pub blocks: u32,
    #[clap(long = "config-path")]
    pub config_path: String,
}

#[derive(Parser, PartialEq, Clone, Debug)]
pub struct ReindexHashesCommand {
    #[clap(long = "config-path")]
    pub config_path: String,
}

#[derive(Subcommand, PartialEq, Clone, Debug)]
pub enum DatabaseCommand {
    /// Migrates the database
    #[clap(name = "migrate", bin_name = "migrate")]
    Migrate(DatabaseConfigCommand),
    /// Drops every table of the database
    #[clap(name = "reset", bin_name = "reset")]
    Reset(DatabaseConfigCommand),
}

#[derive(Parser, PartialEq, Clone, Debug)]
pub struct DatabaseConfigCommand {
    #[clap(long = "config-path")]
    pub config_path: String,
}

#[derive(Subcommand, PartialEq, Clone, Debug)]
#[clap(bin_name = "config", aliases = &["config"])]
pub enum ConfigCommand {
    /// Generate new config
    #[clap(name = "new", bin_name = "new", aliases = &["generate"])]
    New(NewConfigCommand),
}

#[derive(Parser, PartialEq, Clone, Debug)]
pub struct NewConfigCommand {
    /// Target Regtest network
    #[clap(
        long = "regtest",
        conflicts_with = "testnet",
        conflicts_with = "mainnet"
    )]
    pub regtest: bool,
    /// Target Testnet network
    #[clap(
        long = "testnet",
        conflicts_with = "regtest",
        conflicts_with = "mainnet"
    )]
    pub testnet: bool,
    /// Target Mainnet network
    #[clap(
        long = "mainnet",
        conflicts_with = "testnet",
        conflicts_with = "regtest"
    )]
    pub mainnet: bool,
}
