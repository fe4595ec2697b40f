//! taskgate-core
//!
//! Task lifecycle and cancellation engine for a plugin pipeline gateway.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（status, ids, errors, value rendering）
//! - **ports**: 抽象化レイヤー（Clock, IdGenerator, Plugin, PluginConfig, PluginFactory）
//! - **task**: Task 本体（状態遷移, callbacks, values, cancellation）
//! - **app**: アプリケーションロジック（builder, driver, context, registry, status）
//! - **config**: GatewayConfig / TaskBudget / PluginSpec

pub mod app;
pub mod config;
pub mod domain;
pub mod ports;
pub mod task;

pub use app::{DriverBuilder, PipelineContext, PipelineDriver, PluginRegistry, TaskStatusView};
pub use config::GatewayConfig;
pub use domain::{CancelError, PluginError, TaskResultCode, TaskStatus};
pub use ports::{Plugin, PluginConfig, PluginFactory};
pub use task::{CancelHandle, Task};
