//! Domain - ドメインモデル
//!
//! - **status**: TaskStatus の状態機械と TaskResultCode
//! - **ids**: ULID ベースの型付き ID（TaskId, PipelineId）
//! - **errors**: エラー型
//! - **value**: タスク値のログ表示用レンダリング

pub mod errors;
pub mod ids;
pub mod status;
pub mod value;

pub use errors::{CancelError, ConfigError, PluginError, SharedError, TaskError, shared_error};
pub use ids::{PipelineId, TaskId};
pub use status::{TaskResultCode, TaskStatus};
pub use value::render_value;
