use crate::error::TestkitError;
use penguiflow_core::{Flow, FlowOutput, Message, Registry};

/// Start `flow`, emit one message, fetch exactly one result, stop the flow.
///
/// This is the single-message happy path most node/graph tests want; for
/// anything that needs several in-flight messages or streamed chunks, drive
/// `Flow` directly.
pub async fn run_one(
    flow: &mut Flow,
    message: Message,
    registry: Option<Registry>,
) -> Result<FlowOutput, TestkitError> {
    flow.run(registry, Vec::new(), None).await?;
    flow.emit(message).await?;
    let output = flow.fetch().await.ok_or(TestkitError::NoOutput);
    flow.stop().await;
    output
}
