//! 차트 업데이트 도메인 모델.

mod record;
mod task;

pub use record::*;
pub use task::*;
