//! Agent：结构化定义、目录（启动期校验）与交接路由

pub mod catalog;
pub mod definition;
pub mod router;

pub use catalog::{default_definitions, load_definitions, parse_definitions, AgentCatalog, ORCHESTRATOR};
pub use definition::AgentDefinition;
pub use router::{HandoffRouter, HopCounter};
