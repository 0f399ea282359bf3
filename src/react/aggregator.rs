//! 流式聚合：按到达顺序拼接 delta
//!
//! 流中途失败时改用非流式请求取完整结果；若也失败，则以已收到的部分作为最终内容并标记截断。
//! 流在打开前就失败时直接返回后端错误。

use futures_util::StreamExt;

use crate::llm::{LlmError, TokenStream};
use crate::react::Planner;
use crate::session::Message;

/// 聚合结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregated {
    pub content: String,
    /// 仅含部分内容（流中断且回退失败）
    pub truncated: bool,
    /// 内容来自非流式回退
    pub recovered: bool,
}

/// 单调增长的缓冲区
#[derive(Debug, Default)]
pub struct StreamAggregator {
    buffer: String,
    chunks: usize,
}

impl StreamAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, delta: &str) {
        self.buffer.push_str(delta);
        self.chunks += 1;
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn chunks(&self) -> usize {
        self.chunks
    }

    pub fn into_content(self) -> String {
        self.buffer
    }

    /// 消费整条流；返回首个错误（之前的 delta 已入缓冲）
    pub async fn consume<F>(&mut self, mut stream: TokenStream, on_delta: &mut F) -> Result<(), LlmError>
    where
        F: FnMut(&str, &str) + Send,
    {
        while let Some(item) = stream.next().await {
            let delta = item?;
            if delta.is_empty() {
                continue;
            }
            self.push(&delta);
            on_delta(&delta, &self.buffer);
        }
        Ok(())
    }
}

/// 流式请求一步决策；on_delta 收到 (本次 delta, 目前缓冲)
pub async fn stream_step<F>(
    planner: &Planner,
    messages: &[Message],
    system: &str,
    on_delta: &mut F,
) -> Result<Aggregated, LlmError>
where
    F: FnMut(&str, &str) + Send,
{
    let stream = planner.plan_stream(messages, system).await?;
    let mut agg = StreamAggregator::new();

    match agg.consume(stream, on_delta).await {
        Ok(()) => Ok(Aggregated {
            content: agg.into_content(),
            truncated: false,
            recovered: false,
        }),
        Err(stream_err) => {
            tracing::warn!(error = %stream_err, received = agg.chunks(), "stream interrupted, falling back to full request");
            match planner.plan(messages, system).await {
                Ok(full) => Ok(Aggregated {
                    content: full,
                    truncated: false,
                    recovered: true,
                }),
                Err(fallback_err) if agg.buffer().is_empty() => Err(fallback_err),
                Err(fallback_err) => {
                    tracing::warn!(error = %fallback_err, "fallback failed, keeping partial output");
                    Ok(Aggregated {
                        content: agg.into_content(),
                        truncated: true,
                        recovered: false,
                    })
                }
            }
        }
    }
}
