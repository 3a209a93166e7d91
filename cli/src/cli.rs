use clap::{Parser, Subcommand, ValueHint};
use koral::execution::QueryExecutionTreeType;
use std::path::PathBuf;

#[derive(Parser)]
#[command(about, version, name = "koral")]
/// Koral distributed RDF query execution engine
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the master of a cluster
    Master {
        /// The TOML configuration of the cluster
        ///
        /// By default the configuration printed by `koral config` is used.
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        config: Option<PathBuf>,
        /// A query to execute, e.g., `?s 42 ?o . ?o 7 ?x`
        ///
        /// The results are written to stdout and the master stops afterward. Without a query,
        /// the master runs until it is interrupted.
        #[arg(short, long)]
        query: Option<String>,
        /// The variables to return, e.g., `?o,?s`
        ///
        /// By default all variables are returned in the order of their first appearance.
        #[arg(long, value_delimiter = ',', requires = "query")]
        select: Vec<String>,
        /// The number of results to skip
        #[arg(long, requires = "query")]
        offset: Option<u64>,
        /// The maximum number of results to return
        #[arg(long, requires = "query")]
        limit: Option<u64>,
        /// The shape of the query execution tree: left-linear, right-linear or bushy
        #[arg(long, default_value_t = QueryExecutionTreeType::LeftLinear)]
        tree_type: QueryExecutionTreeType,
    },
    /// Start a slave of a cluster
    Slave {
        /// The TOML configuration of the cluster
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        config: Option<PathBuf>,
        /// The id of this slave, starting at 1
        ///
        /// Overrides `current_id` of the configuration.
        #[arg(long)]
        id: Option<u16>,
        /// A file of dictionary-encoded triples to load before joining the cluster
        ///
        /// Each line holds `subject property object` ids, optionally followed by the
        /// comma-separated ids of the other slaves that store the triple.
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        load: Option<PathBuf>,
    },
    /// Print the default configuration
    Config,
}
