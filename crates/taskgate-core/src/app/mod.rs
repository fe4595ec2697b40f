//! App - アプリケーション層
//!
//! task と ports を組み合わせてパイプラインを動かします。
//!
//! # 主要コンポーネント
//! - **DriverBuilder**: パイプラインの構築とワイヤリング
//! - **PipelineDriver**: タスクをプラグイン列に流す（start → run* → finalize）
//! - **PipelineContext**: パイプライン単位の共有状態（prepare の一回性）
//! - **PluginRegistry**: kind → PluginFactory の登録簿
//! - **TaskStatusView**: ログ・レスポンス用のタスクのスナップショット

pub mod builder;
pub mod context;
pub mod driver;
pub mod registry;
pub mod status;

#[cfg(test)]
pub(crate) mod testing;

pub use self::builder::{BuildError, DriverBuilder};
pub use self::context::PipelineContext;
pub use self::driver::PipelineDriver;
pub use self::registry::{DynFactory, PluginRegistry, RegistryError, TypedFactory};
pub use self::status::TaskStatusView;
