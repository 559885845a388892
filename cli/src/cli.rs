use crate::session::Session;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use hitlflow_client::{
    ChannelCallbacks, ClientConfig, HostCallbacks, HttpWorkflowApi, InstanceId, Notification,
    ResumeAction, StartRequest, ViewRegistries, WorkflowApi, WorkflowHandlers,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// How long buffered notifications may take to print on exit
const NOTIFICATION_FLUSH_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Debug, Parser)]
#[command(name = "hitlflow", author, version, about = "Drive checkpoint-driven remote workflows")]
pub struct Cli {
    /// API root, overrides HITLFLOW_BASE_URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Bearer token, overrides HITLFLOW_AUTH_TOKEN
    #[arg(long, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a workflow instance and follow it
    Start(StartArgs),
    /// Print the current snapshot of an instance
    State(StateArgs),
    /// Follow an instance, answering its checkpoints
    Watch(FollowArgs),
    /// Continue a paused instance and follow it
    Run(FollowArgs),
    /// Answer the checkpoint an instance waits at
    Resume(ResumeArgs),
    /// Cancel an instance
    Cancel(InstanceArgs),
    /// Pause a running instance
    Pause(InstanceArgs),
}

#[derive(Debug, Args)]
struct StartArgs {
    workflow_id: String,

    /// Input as a file path or a JSON string; anything else is sent as a string
    #[arg(long, short, default_value = "{}")]
    input: String,

    #[arg(long)]
    conversation: Option<String>,

    /// Approve every checkpoint without asking
    #[arg(long)]
    auto_approve: bool,
}

#[derive(Debug, Args)]
struct StateArgs {
    instance_id: String,

    /// Print the raw snapshot
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct FollowArgs {
    instance_id: String,

    #[arg(long)]
    auto_approve: bool,
}

#[derive(Debug, Args)]
struct ResumeArgs {
    instance_id: String,

    /// approve, edit or reject
    action: ResumeAction,

    /// Data sent with the action (file path or JSON string)
    #[arg(long, short)]
    data: Option<String>,
}

#[derive(Debug, Args)]
struct InstanceArgs {
    instance_id: String,
}

/// File contents or the argument itself, as JSON when it parses, as a string otherwise.
fn parse_json_arg(arg: &str) -> serde_json::Value {
    let text = std::fs::read_to_string(arg).unwrap_or_else(|_| arg.to_string());
    serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
}

async fn print_notifications(mut rx: mpsc::UnboundedReceiver<Notification>) {
    while let Some(notification) = rx.recv().await {
        println!("{}", notification);
    }
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let mut config = ClientConfig::from_env().context("invalid HITLFLOW_* configuration")?;
        if let Some(base_url) = self.base_url {
            config = config.with_base_url(base_url);
        }
        if let Some(token) = self.token {
            config = config.with_auth_token(token);
        }
        let api: Arc<dyn WorkflowApi> =
            Arc::new(HttpWorkflowApi::new(&config).context("cannot build http client")?);
        tracing::debug!(base_url = %config.base_url, "client configured");

        let (callbacks, notifications) = ChannelCallbacks::new();
        let printer = tokio::spawn(print_notifications(notifications));
        let result = execute(self.command, api, Arc::new(callbacks)).await;

        // every sender is gone once the handlers are dropped
        if tokio::time::timeout(NOTIFICATION_FLUSH_TIMEOUT, printer)
            .await
            .is_err()
        {
            tracing::debug!("notification printer did not finish");
        }
        result
    }
}

async fn execute(
    command: Command,
    api: Arc<dyn WorkflowApi>,
    callbacks: Arc<dyn HostCallbacks>,
) -> Result<()> {
    let views = ViewRegistries::default();
    match command {
        Command::Start(args) => {
            let mut request = StartRequest::new(args.workflow_id.as_str(), parse_json_arg(&args.input));
            if let Some(conversation) = args.conversation {
                request = request.with_conversation_id(conversation);
            }
            let handlers = WorkflowHandlers::start(api, request, callbacks)
                .await
                .with_context(|| format!("cannot start workflow {}", args.workflow_id))?;
            println!("started instance {}", handlers.instance_id());
            let mut session = Session::new(handlers, views, args.auto_approve);
            session.follow_start().await?;
            session.drive().await
        }
        Command::State(args) => {
            let instance_id = InstanceId::new(args.instance_id);
            let state = api
                .get_state(&instance_id)
                .await
                .with_context(|| format!("cannot fetch instance {}", instance_id))?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&state)?);
            } else {
                print!("{}", views.get_workflow_view(&state.workflow_id).render(&state, None));
            }
            Ok(())
        }
        Command::Watch(args) => {
            let handlers = attach(&args.instance_id, api, callbacks).await?;
            Session::new(handlers, views, args.auto_approve).drive().await
        }
        Command::Run(args) => {
            let handlers = attach(&args.instance_id, api, callbacks).await?;
            let mut session = Session::new(handlers, views, args.auto_approve);
            session.follow_run().await?;
            session.drive().await
        }
        Command::Resume(args) => {
            let handlers = attach(&args.instance_id, api, callbacks).await?;
            let data = args.data.as_deref().map(parse_json_arg);
            let mut session = Session::new(handlers, views, false);
            session.follow_resume(args.action, data).await?;
            session.render();
            Ok(())
        }
        Command::Cancel(args) => {
            let handlers = attach(&args.instance_id, api, callbacks).await?;
            handlers
                .cancel()
                .await
                .with_context(|| format!("cannot cancel instance {}", args.instance_id))
        }
        Command::Pause(args) => {
            let handlers = attach(&args.instance_id, api, callbacks).await?;
            handlers
                .pause()
                .await
                .with_context(|| format!("cannot pause instance {}", args.instance_id))?;
            Session::new(handlers, views, false).render();
            Ok(())
        }
    }
}

async fn attach(
    instance_id: &str,
    api: Arc<dyn WorkflowApi>,
    callbacks: Arc<dyn HostCallbacks>,
) -> Result<WorkflowHandlers> {
    WorkflowHandlers::attach(InstanceId::new(instance_id), api, callbacks)
        .await
        .with_context(|| format!("cannot load instance {}", instance_id))
}
