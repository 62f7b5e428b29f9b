//! Exchange names, routing keys and the shared topology every process declares.

use crate::bus::{ExchangeKind, MessageBus, QueueOptions};
use convoy_core::ConvoyResult;

/// Task assignments, routed `task.<taskType>`.
pub const TASKS_EXCHANGE: &str = "tasks";
/// Status updates, routed `agent.<agent-id>.status`.
pub const STATUS_EXCHANGE: &str = "status";
/// Trace events, routed `agent.<agent-id>.logs`.
pub const LOGS_EXCHANGE: &str = "logs";
/// Capability announcements.
pub const CAPABILITIES_EXCHANGE: &str = "capabilities";

/// Queue the orchestrator consumes status updates from.
pub const STATUS_QUEUE: &str = "status-updates";
/// Binding of [`STATUS_QUEUE`] on [`STATUS_EXCHANGE`].
pub const STATUS_BINDING: &str = "agent.*.status";
/// Routing key of every capability announcement.
pub const CAPABILITIES_ROUTING_KEY: &str = "agent.capabilities";

/// Binding of the dead-letter holding queue: every rejected task is kept.
pub const DEAD_LETTER_BINDING: &str = "#";

const SHARED_EXCHANGES: [&str; 4] = [
    TASKS_EXCHANGE,
    STATUS_EXCHANGE,
    LOGS_EXCHANGE,
    CAPABILITIES_EXCHANGE,
];

/// `task.<taskType>`, used both to publish a task and to bind a capability queue.
pub fn task_routing_key(task_type: &str) -> String {
    format!("task.{task_type}")
}

/// `agent.<agent-id>.status`.
pub fn status_routing_key(agent_id: &str) -> String {
    format!("agent.{agent_id}.status")
}

/// `agent.<agent-id>.logs`.
pub fn logs_routing_key(agent_id: &str) -> String {
    format!("agent.{agent_id}.logs")
}

/// Declare the four shared exchanges. All are durable topic exchanges.
pub async fn declare_shared_exchanges(bus: &dyn MessageBus) -> ConvoyResult<()> {
    for name in SHARED_EXCHANGES {
        bus.declare_exchange(name, ExchangeKind::Topic).await?;
    }
    Ok(())
}

/// Declare `exchange` as a topic exchange and a durable holding queue of the
/// same name bound with [`DEAD_LETTER_BINDING`], so messages dead-lettered to
/// it stay on the broker.
pub async fn declare_dead_letter(bus: &dyn MessageBus, exchange: &str) -> ConvoyResult<()> {
    bus.declare_exchange(exchange, ExchangeKind::Topic).await?;
    bus.declare_queue(exchange, &QueueOptions::default()).await?;
    bus.bind_queue(exchange, exchange, DEAD_LETTER_BINDING).await
}

/// Topic-exchange match: `*` is exactly one word, `#` zero or more words.
pub fn routing_key_matches(pattern: &str, key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = key.split('.').collect();
    match_words(&pattern, &key)
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| match_words(rest, &key[skip..])),
        Some((word, rest)) => match key.split_first() {
            Some((head, tail)) => (*word == "*" || word == head) && match_words(rest, tail),
            None => false,
        },
    }
}
