//! Interactive follow loop for one instance.

use anyhow::{Context, Result};
use hitlflow_client::{
    resolve_mode, DrainOutcome, ModeInputs, ResumeAction, ViewRegistries, WorkflowEvent,
    WorkflowEventType, WorkflowHandlers, WorkflowInstanceState, WorkflowSnapshot, WorkflowStatus,
    WorkspaceMode,
};
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};

/// Snapshot poll interval while the engine runs an instance we do not stream
const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq)]
enum Decision {
    Approve,
    Edit(serde_json::Value),
    Reject,
    Cancel,
    Quit,
}

impl Decision {
    fn parse(line: &str) -> std::result::Result<Self, String> {
        let line = line.trim();
        let (command, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        match command {
            "a" | "approve" => Ok(Decision::Approve),
            "r" | "reject" => Ok(Decision::Reject),
            "c" | "cancel" => Ok(Decision::Cancel),
            "q" | "quit" => Ok(Decision::Quit),
            "e" | "edit" => serde_json::from_str(rest.trim())
                .map(Decision::Edit)
                .map_err(|e| format!("edit needs JSON data: {}", e)),
            other => Err(format!("unknown command: {}", other)),
        }
    }
}

pub struct Session {
    handlers: WorkflowHandlers,
    views: ViewRegistries,
    auto_approve: bool,
    stdin: Lines<BufReader<Stdin>>,
}

impl Session {
    pub fn new(handlers: WorkflowHandlers, views: ViewRegistries, auto_approve: bool) -> Self {
        Self {
            handlers,
            views,
            auto_approve,
            stdin: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    pub fn render(&self) {
        let snapshot = WorkflowSnapshot::capture(&self.handlers);
        let inputs = ModeInputs {
            workflow: Some(snapshot.slot()),
            ..Default::default()
        };
        match resolve_mode(&inputs) {
            WorkspaceMode::WorkflowLoading { instance_id } => {
                println!("{}: loading...", instance_id)
            }
            WorkspaceMode::Workflow {
                state,
                current_event,
                ..
            } => {
                let view = self.views.get_workflow_view(&state.workflow_id);
                print!("{}", view.render(state, current_event));
            }
            mode => tracing::debug!(kind = %mode.kind(), "nothing to render"),
        }
    }

    pub async fn follow_start(&mut self) -> Result<DrainOutcome> {
        let handlers = self.handlers.clone();
        self.follow(async move {
            handlers
                .join_started()
                .await
                .unwrap_or(Ok(DrainOutcome::Ended))
        })
        .await
    }

    pub async fn follow_run(&mut self) -> Result<DrainOutcome> {
        let handlers = self.handlers.clone();
        self.follow(async move { handlers.run().await }).await
    }

    pub async fn follow_resume(
        &mut self,
        action: ResumeAction,
        data: Option<serde_json::Value>,
    ) -> Result<DrainOutcome> {
        let handlers = self.handlers.clone();
        match action {
            ResumeAction::Approve => self.follow(async move { handlers.approve(data).await }).await,
            ResumeAction::Edit => {
                let data = data.context("edit needs --data")?;
                self.follow(async move { handlers.edit(data).await }).await
            }
            ResumeAction::Reject => self.follow(async move { handlers.reject().await }).await,
        }
    }

    /// Print progress of `operation` until it settles. Ctrl-C cancels the instance.
    async fn follow<F>(&mut self, operation: F) -> Result<DrainOutcome>
    where
        F: Future<Output = hitlflow_client::Result<DrainOutcome>>,
    {
        let mut events = self.handlers.subscribe_current_event();
        tokio::pin!(operation);
        loop {
            tokio::select! {
                outcome = &mut operation => {
                    let outcome = outcome?;
                    tracing::debug!(?outcome, "operation settled");
                    return Ok(outcome);
                }
                changed = events.changed() => {
                    if changed.is_err() {
                        return Ok((&mut operation).await?);
                    }
                    if let Some(event) = events.borrow_and_update().clone() {
                        print_event(&event);
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    println!("cancelling {}", self.handlers.instance_id());
                    self.handlers.cancel().await?;
                    // settled by cancel, resolves at once
                    let _ = (&mut operation).await;
                    return Ok(DrainOutcome::Cancelled);
                }
            }
        }
    }

    /// Answer checkpoints until the instance stops needing input.
    pub async fn drive(&mut self) -> Result<()> {
        loop {
            self.render();
            let Some(state) = self.handlers.state() else {
                return Ok(());
            };
            match state.status {
                WorkflowStatus::Waiting if state.is_waiting_at_checkpoint() => {
                    let decision = if self.auto_approve {
                        Decision::Approve
                    } else {
                        self.prompt(&state).await?
                    };
                    let handlers = self.handlers.clone();
                    match decision {
                        Decision::Approve => {
                            self.follow(async move { handlers.approve(None).await })
                                .await?
                        }
                        Decision::Edit(data) => {
                            self.follow(async move { handlers.edit(data).await }).await?
                        }
                        Decision::Reject => {
                            self.follow(async move { handlers.reject().await }).await?
                        }
                        Decision::Cancel => {
                            self.handlers.cancel().await?;
                            return Ok(());
                        }
                        Decision::Quit => return Ok(()),
                    };
                }
                WorkflowStatus::Running => {
                    tokio::select! {
                        _ = tokio::time::sleep(POLL_INTERVAL) => {}
                        _ = tokio::signal::ctrl_c() => return Ok(()),
                    }
                    self.handlers.refresh().await?;
                }
                WorkflowStatus::Paused | WorkflowStatus::Pending => {
                    println!(
                        "{} is {}, continue it with `hitlflow run {}`",
                        state.instance_id, state.status, state.instance_id
                    );
                    return Ok(());
                }
                _ => return Ok(()),
            }
        }
    }

    async fn prompt(&mut self, state: &WorkflowInstanceState) -> Result<Decision> {
        if let Some(node) = &state.current_node {
            if let Some(data) = state.step_data.get(&node.id) {
                println!("{}", serde_json::to_string_pretty(data)?);
            }
        }
        loop {
            let mut stdout = tokio::io::stdout();
            stdout
                .write_all(b"[a]pprove, [e]dit <json>, [r]eject, [c]ancel, [q]uit > ")
                .await?;
            stdout.flush().await?;
            let line = tokio::select! {
                line = self.stdin.next_line() => line.context("cannot read stdin")?,
                _ = tokio::signal::ctrl_c() => return Ok(Decision::Quit),
            };
            let Some(line) = line else {
                return Ok(Decision::Quit);
            };
            match Decision::parse(&line) {
                Ok(decision) => return Ok(decision),
                Err(message) => println!("{}", message),
            }
        }
    }
}

fn print_event(event: &WorkflowEvent) {
    let node = event
        .node_name
        .as_deref()
        .or(event.node_id.as_deref())
        .unwrap_or("-");
    match event.event_type {
        WorkflowEventType::StepStart => println!("> {}", node),
        WorkflowEventType::StepComplete => println!("+ {}", node),
        WorkflowEventType::StepProgress => {
            let data = event.data.as_ref().map(|d| d.to_string()).unwrap_or_default();
            println!("  {} {}", node, data)
        }
        other => tracing::debug!(event_type = %other, "not printed"),
    }
}
