//! Run dispatch and the worker catch-all.
//!
//! A generation run lives on its own tokio task so the caller can start
//! draining the event queue immediately. Whatever the strategy loop
//! returns, the queue sees a terminal event: normal completion
//! publishes `MessageEnd` from inside the loop, and any error lands
//! here and becomes the terminal `Error`.

use skein_domain::config::AgentStrategy;
use skein_domain::Result;

use crate::base::AgentRunner;
use crate::cot::CotAgentRunner;
use crate::fc::FcAgentRunner;

/// Run one agent turn with the configured strategy.
pub async fn run_agent(base: AgentRunner) -> Result<()> {
    match base.config.strategy {
        AgentStrategy::ChainOfThought => CotAgentRunner { base }.run().await,
        AgentStrategy::FunctionCalling => FcAgentRunner { base }.run().await,
    }
}

/// Spawn the run as a worker task.
///
/// The single-terminal-event guarantee is anchored here: an `Err` from
/// the strategy loop is converted into a published error, and the queue
/// manager itself drops anything after the first terminal.
pub fn spawn_agent_run(base: AgentRunner) -> tokio::task::JoinHandle<()> {
    let queue = base.queue.clone();
    tokio::spawn(async move {
        let task_id = queue.task_id().to_owned();
        if let Err(e) = run_agent(base).await {
            tracing::error!(task_id = %task_id, error = %e, "agent run failed");
            queue.publish_error(e).await;
        }
    })
}
