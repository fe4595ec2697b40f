//! Plugin port - プラグイン契約
//!
//! パイプラインはプラグインの列で、各プラグインが同じ Task を順に処理します。
//!
//! Rules a plugin must follow:
//!
//! 1. `run` returns an error only when
//!    - the plugin instance needs reconstruction (e.g. a backend failure
//!      invalidated its client), or
//!    - the task was cancelled under it (the pipeline was updated while the
//!      plugin ran; the task will be re-run on the new plugin).
//!
//!    Errors caused by user input are recorded on the task instead.
//! 2. A plugin is stateless and re-entrant on the same task. One instance may
//!    serve several running instances of a pipeline.
//! 3. `prepare` is called once per (pipeline context, plugin instance) before
//!    the first `run` in that context.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::app::PipelineContext;
use crate::domain::{ConfigError, PluginError};
use crate::task::Task;

/// Plugin はパイプラインの 1 ステップ
///
/// # ライフサイクル
/// - `prepare`: コンテキストごとに最初の `run` の前に 1 回
/// - `run`: タスクごとに呼ばれる（同時に複数タスクから呼ばれうる）
/// - `close`: パイプライン破棄時に 1 回
#[async_trait]
pub trait Plugin: Send + Sync {
    /// パイプライン内で一意な名前
    fn name(&self) -> &str;

    async fn prepare(&self, ctx: &PipelineContext);

    async fn run(&self, ctx: &PipelineContext, task: &Task) -> Result<(), PluginError>;

    async fn close(&self);
}

/// PluginConfig はプラグインを構築するための設定
pub trait PluginConfig: Send + Sync {
    fn plugin_name(&self) -> &str;

    /// Validate the config against the pipelines that will use the plugin.
    fn prepare(&self, pipeline_names: &[String]) -> Result<(), ConfigError>;
}

/// PluginFactory は型付き設定からプラグインを構築する
///
/// `Config` は JSON から decode されるので、kind ごとに独自の設定型を持てます。
///
/// # 使用例
/// ```ignore
/// struct EchoFactory;
///
/// impl PluginFactory for EchoFactory {
///     type Config = EchoConfig;
///     const KIND: &'static str = "echo";
///
///     fn construct(&self, config: EchoConfig) -> Result<Arc<dyn Plugin>, PluginError> {
///         Ok(Arc::new(Echo::new(config)))
///     }
/// }
/// ```
pub trait PluginFactory: Send + Sync + 'static {
    type Config: PluginConfig + DeserializeOwned;

    /// Key the factory is registered under.
    const KIND: &'static str;

    fn construct(&self, config: Self::Config) -> Result<Arc<dyn Plugin>, PluginError>;
}
