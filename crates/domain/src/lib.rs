//! 聊天分发系统核心领域模型
//!
//! 包含消息实体、值对象、领域事件，以及会话归属等业务规则。

pub mod errors;
pub mod events;
pub mod message;
pub mod value_objects;

// 重新导出常用类型
pub use errors::*;
pub use events::*;
pub use message::*;
pub use value_objects::*;
