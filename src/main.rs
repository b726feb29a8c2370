use std::{collections::BTreeSet, path::Path, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use flowctl::{
    agent::HttpAgentClient,
    cluster_state::StoredClusterState,
    config::{
        ApplyArgs, Cli, ClientConfigAction, ClusterMapAction, Command, Config, RuleKindArg,
        RulesAction, UnbindArgs,
    },
    coordinator::ClusterAssignmentCoordinator,
    domain::{AssignmentRequest, validate_app},
    rules::{DegradeRule, FlowRule, RuleKind, RuleRepository},
    store::TopologyStore,
    topology::ClusterConfigPublisher,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let store: Arc<dyn TopologyStore> = Arc::new(cli.config.topology_store());

    match cli.command {
        Command::Apply(args) => apply(&cli.config, store, args).await,
        Command::Unbind(args) => unbind(&cli.config, store, args).await,
        Command::Rules { action } => rules(store, action).await,
        Command::ClientConfig {
            action: ClientConfigAction::Push { app, file },
        } => push_client_config(store, &app, &file).await,
        Command::ClusterMap {
            action: ClusterMapAction::Show { app },
        } => {
            validate_app(&app)?;
            let groups = ClusterConfigPublisher::new(store)
                .fetch_cluster_map(&app)
                .await
                .context("read cluster map")?;
            print_json(&groups)
        }
    }
}

fn coordinator(
    config: &Config,
    store: Arc<dyn TopologyStore>,
) -> Result<ClusterAssignmentCoordinator> {
    let agents = HttpAgentClient::try_new().context("build agent http client")?;
    let cluster_state = StoredClusterState::new(ClusterConfigPublisher::new(store.clone()));
    Ok(ClusterAssignmentCoordinator::new(
        Arc::new(agents),
        store,
        Arc::new(cluster_state),
        config.coordinator_options(),
    ))
}

async fn apply(config: &Config, store: Arc<dyn TopologyStore>, args: ApplyArgs) -> Result<()> {
    let raw = read_file(&args.file).await?;
    let request: AssignmentRequest = serde_json::from_slice(&raw)
        .with_context(|| format!("parse assignment plan {}", args.file.display()))?;

    let result = coordinator(config, store)?
        .apply_assignment(
            &args.app,
            request.cluster_map.as_deref(),
            &request.remaining_list,
        )
        .await?;
    if !result.is_clean() {
        info!(app = %args.app, "assignment finished with failures");
    }
    print_json(&result)
}

async fn unbind(config: &Config, store: Arc<dyn TopologyStore>, args: UnbindArgs) -> Result<()> {
    let coordinator = coordinator(config, store)?;
    let result = match args.machine_ids.as_slice() {
        [machine_id] => coordinator.unbind_server(&args.app, machine_id).await?,
        machine_ids => {
            let set: BTreeSet<String> = machine_ids.iter().cloned().collect();
            coordinator.unbind_servers(&args.app, &set).await?
        }
    };
    print_json(&result)
}

async fn rules(store: Arc<dyn TopologyStore>, action: RulesAction) -> Result<()> {
    match action {
        RulesAction::Push { app, kind, file } => {
            validate_app(&app)?;
            let raw = read_file(&file).await?;
            match kind {
                RuleKindArg::Flow => push_rules::<FlowRule>(store, &app, &raw).await,
                RuleKindArg::Degrade => push_rules::<DegradeRule>(store, &app, &raw).await,
            }
        }
        RulesAction::Show { app, kind } => {
            validate_app(&app)?;
            match kind {
                RuleKindArg::Flow => show_rules::<FlowRule>(store, &app).await,
                RuleKindArg::Degrade => show_rules::<DegradeRule>(store, &app).await,
            }
        }
    }
}

async fn push_rules<R: RuleKind>(
    store: Arc<dyn TopologyStore>,
    app: &str,
    raw: &[u8],
) -> Result<()> {
    let rules: Vec<R> =
        serde_json::from_slice(raw).with_context(|| format!("parse {} rules", R::NAME))?;
    let path = store.path_for(app, R::DATA_ID);
    RuleRepository::<R>::new(store)
        .publish(app, &rules)
        .await
        .with_context(|| format!("publish {} rules", R::NAME))?;
    println!("{path}");
    Ok(())
}

async fn show_rules<R: RuleKind>(store: Arc<dyn TopologyStore>, app: &str) -> Result<()> {
    let rules = RuleRepository::<R>::new(store)
        .fetch(app)
        .await
        .with_context(|| format!("read {} rules", R::NAME))?;
    print_json(&rules)
}

async fn push_client_config(
    store: Arc<dyn TopologyStore>,
    app: &str,
    file: &Path,
) -> Result<()> {
    validate_app(app)?;
    let raw = read_file(file).await?;
    let data = String::from_utf8(raw).context("client config is not utf-8")?;
    let publisher = ClusterConfigPublisher::new(store);
    let written = publisher
        .publish_client_config(app, &data)
        .await
        .context("publish client config")?;
    if written {
        println!(
            "{}",
            publisher
                .store()
                .path_for(app, flowctl::store::CLIENT_CONFIG_DATA_ID)
        );
    } else {
        info!(app = %app, "client config is blank; nothing written");
    }
    Ok(())
}

async fn read_file(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("read {}", path.display()))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
