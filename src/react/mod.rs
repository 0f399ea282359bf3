//! 认知层：决策解码、流式聚合、回合循环

pub mod aggregator;
pub mod events;
pub mod loop_;
pub mod planner;

pub use aggregator::{stream_step, Aggregated, StreamAggregator};
pub use events::TurnEvent;
pub use loop_::{render_tool_result, run_turn, TurnContext, TurnLimits, TurnOutcome};
pub use planner::{
    build_system_prompt, decode, looks_structured, DecodeError, Decision, HandoffRequest, Planner, ToolCall,
};
