//! ToolScheduler: read/write partitioning for one step's tool calls (spec §4.4).

use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};

use crate::message::{Message, ToolCall};
use crate::tool::{ToolCallContext, ToolDefinition, ToolResult};
use crate::tool_router::ToolRouter;

pub struct ToolScheduler {
    max_parallelism: usize,
}

impl ToolScheduler {
    pub fn new(max_parallelism: usize) -> Self {
        Self {
            max_parallelism: max_parallelism.max(1),
        }
    }

    /// Runs `calls` against `router`, returning one tool-role [`Message`] per
    /// call in the original LLM-given order, regardless of execution
    /// interleaving (spec §4.4 "observable ordering guarantee").
    pub async fn run_step(
        &self,
        router: &ToolRouter,
        calls: &[ToolCall],
        definitions: &(dyn Fn(&str) -> Option<ToolDefinition> + Sync),
        ctx: &ToolCallContext,
    ) -> Vec<Message> {
        let mut read_only = Vec::new();
        let mut mutating = Vec::new();
        for (idx, call) in calls.iter().enumerate() {
            let is_read_only = definitions(&call.name)
                .map(|d| !d.mutating && d.supports_parallel)
                .unwrap_or(false);
            if is_read_only {
                read_only.push(idx);
            } else {
                mutating.push(idx);
            }
        }

        let mut results: Vec<Option<ToolResult>> = vec![None; calls.len()];

        // Reads complete first, bounded by max_parallelism.
        let mut chunks = read_only.chunks(self.max_parallelism);
        while let Some(chunk) = chunks.next() {
            let mut futs = FuturesUnordered::new();
            for &idx in chunk {
                let call = &calls[idx];
                futs.push(async move {
                    let r = router
                        .call_tool(&call.id, &call.name, call.parameters.clone(), ctx)
                        .await;
                    (idx, r)
                });
            }
            while let Some((idx, r)) = futs.next().await {
                results[idx] = Some(r);
            }
        }

        // Mutations run sequentially in the order provided by the LLM.
        for idx in mutating {
            let call = &calls[idx];
            let r = router
                .call_tool(&call.id, &call.name, call.parameters.clone(), ctx)
                .await;
            results[idx] = Some(r);
        }

        calls
            .iter()
            .zip(results.into_iter())
            .map(|(call, r)| {
                let r = r.expect("every call index is populated");
                Message::tool(call.id.clone(), r.to_message_content())
            })
            .collect()
    }
}
