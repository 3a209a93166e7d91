use crate::cli::{Args, Command};
use anyhow::{bail, Context};
use clap::Parser;
use koral::common::KoralConfig;
use koral::execution::{ClientMessage, QueryExecutionTreeType, QueryPlan};
use koral::network::NetworkContext;
use koral::{KoralMaster, KoralSlave};
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod cli;

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let matches = Args::parse();
    match matches.command {
        Command::Master {
            config,
            query,
            select,
            offset,
            limit,
            tree_type,
        } => {
            let config = load_config(config.as_deref())?;
            init_logging(&config);
            let plan = query
                .map(|query| query_plan(&query, &select, offset, limit))
                .transpose()?;
            master(config, plan, tree_type).await
        }
        Command::Slave { config, id, load } => {
            let mut config = load_config(config.as_deref())?;
            if id.is_some() {
                config.current_id = id;
            }
            init_logging(&config);
            slave(config, load).await
        }
        Command::Config => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(KoralConfig::default().to_toml()?.as_bytes())?;
            stdout.flush()?;
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<KoralConfig> {
    let Some(path) = path else {
        return Ok(KoralConfig::default());
    };
    KoralConfig::load(path)
        .with_context(|| format!("Could not load the configuration {}", path.display()))
}

fn init_logging(config: &KoralConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Parses `query` and projects it to `select`, or to all of its variables if `select` is empty.
fn query_plan(
    query: &str,
    select: &[String],
    offset: Option<u64>,
    limit: Option<u64>,
) -> anyhow::Result<QueryPlan> {
    let plan = query.parse::<QueryPlan>().context("Invalid query")?;
    let mut plan = if select.is_empty() {
        let names = plan.variable_names().to_vec();
        plan.with_projection(names.as_slice())?
    } else {
        plan.with_projection(select)?
    };
    if let Some(offset) = offset {
        plan = plan.with_offset(offset);
    }
    if let Some(limit) = limit {
        plan = plan.with_limit(limit);
    }
    Ok(plan)
}

async fn master(
    config: KoralConfig,
    plan: Option<QueryPlan>,
    tree_type: QueryExecutionTreeType,
) -> anyhow::Result<()> {
    let master = Arc::new(
        KoralMaster::bind(NetworkContext::current()?, config)
            .await
            .context("Could not start the master")?,
    );
    master.start()?;
    let control = tokio::task::spawn_blocking({
        let master = Arc::clone(&master);
        move || master.run()
    });

    let result = match plan {
        Some(plan) => execute(&master, &plan, tree_type).await,
        None => tokio::signal::ctrl_c()
            .await
            .context("Could not wait for ctrl-c"),
    };
    master.shutdown();
    control.await?;
    result
}

/// Runs `plan` and writes the header and every result row to stdout, separated by tabs.
async fn execute(
    master: &KoralMaster,
    plan: &QueryPlan,
    tree_type: QueryExecutionTreeType,
) -> anyhow::Result<()> {
    let (sink, mut results) = mpsc::unbounded_channel::<ClientMessage>();
    let query_id = master.submit_query(plan, tree_type, Box::new(sink))?;

    let header = plan
        .projection()
        .unwrap_or_default()
        .iter()
        .map(|variable| {
            plan.variable_name(*variable)
                .map_or_else(|| variable.to_string(), |name| format!("?{name}"))
        })
        .collect::<Vec<_>>();
    writeln!(io::stdout().lock(), "{}", header.join("\t"))?;

    while let Some(message) = results.recv().await {
        match message {
            ClientMessage::WorkInProgress => debug!(query_id, "Query is still running"),
            ClientMessage::QueryResult { rows } => {
                let mut stdout = io::stdout().lock();
                for row in rows {
                    let row = row.iter().map(u64::to_string).collect::<Vec<_>>();
                    writeln!(stdout, "{}", row.join("\t"))?;
                }
            }
            ClientMessage::Succeeded => {
                info!(query_id, "Query succeeded");
                return Ok(());
            }
            ClientMessage::Failed(cause) => bail!("The query failed: {cause}"),
        }
    }
    bail!("The query stopped without a result")
}

async fn slave(config: KoralConfig, load: Option<PathBuf>) -> anyhow::Result<()> {
    let slave = Arc::new(
        KoralSlave::bind(NetworkContext::current()?, &config)
            .await
            .context("Could not start the slave")?,
    );
    if let Some(path) = load {
        let loader = Arc::clone(&slave);
        tokio::task::spawn_blocking(move || -> anyhow::Result<usize> {
            let file = File::open(&path)
                .with_context(|| format!("Could not open {}", path.display()))?;
            loader
                .load(BufReader::new(file))
                .with_context(|| format!("Could not load {}", path.display()))
        })
        .await??;
    }

    slave.start()?;
    let control = tokio::task::spawn_blocking({
        let slave = Arc::clone(&slave);
        move || slave.run()
    });
    let result = tokio::signal::ctrl_c()
        .await
        .context("Could not wait for ctrl-c");
    slave.shutdown();
    control.await?;
    result
}

#[cfg(test)]
#[allow(clippy::panic_in_result_fn, reason = "Tests")]
mod tests {
    use super::*;
    use anyhow::Result;
    use assert_cmd::Command;
    use predicates::prelude::*;

    fn cli_command() -> Command {
        let mut command = Command::new(env!("CARGO"));
        command.arg("run").arg("--bin").arg("koral");
        command.arg("--");
        command
    }

    #[test]
    fn cli_help() {
        cli_command()
            .assert()
            .failure()
            .stdout("")
            .stderr(predicate::str::contains("Usage"));
    }

    #[test]
    fn cli_config_prints_defaults() {
        cli_command()
            .arg("config")
            .assert()
            .success()
            .stdout(predicate::str::contains("mapping_bundle_size = 100"))
            .stdout(predicate::str::contains("master = \"127.0.0.1:4710\""));
    }

    #[test]
    fn cli_master_requires_existing_config() {
        cli_command()
            .arg("master")
            .arg("--config")
            .arg("/nonexistent/koral.toml")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Could not load the configuration"));
    }

    #[test]
    fn cli_select_requires_query() {
        cli_command()
            .arg("master")
            .arg("--select")
            .arg("?s")
            .assert()
            .failure();
    }

    #[test]
    fn query_plan_projects_all_variables_by_default() -> Result<()> {
        let plan = query_plan("?s 42 ?o . ?o 7 ?x", &[], Some(2), None)?;
        let projected = plan
            .projection()
            .unwrap_or_default()
            .iter()
            .filter_map(|variable| plan.variable_name(*variable))
            .collect::<Vec<_>>();
        assert_eq!(projected, ["s", "o", "x"]);
        assert_eq!(plan.offset(), Some(2));
        assert_eq!(plan.limit(), None);
        Ok(())
    }

    #[test]
    fn query_plan_rejects_unknown_selection() {
        let error = query_plan("?s 42 ?o", &["?x".to_owned()], None, None).unwrap_err();
        assert_eq!(
            error.to_string(),
            "The projected variable ?x does not occur in the query"
        );
    }

    #[test]
    fn clap_debug() {
        use clap::CommandFactory;

        Args::command().debug_assert()
    }
}
