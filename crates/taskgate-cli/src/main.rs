use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio::time::{Duration, sleep};

use taskgate_core::app::RegistryError;
use taskgate_core::domain::ConfigError;
use taskgate_core::{
    DriverBuilder, GatewayConfig, PipelineContext, PipelineDriver, Plugin, PluginConfig,
    PluginError, PluginFactory, PluginRegistry, Task, TaskResultCode, TaskStatusView,
};

// --- auth: "user" 値が無ければ 401 で打ち切る ---

#[derive(Debug, Deserialize)]
struct AuthConfig {
    name: String,
    #[serde(default)]
    allowed_users: Vec<String>,
}

impl PluginConfig for AuthConfig {
    fn plugin_name(&self) -> &str {
        &self.name
    }

    fn prepare(&self, _pipeline_names: &[String]) -> Result<(), ConfigError> {
        if self.allowed_users.is_empty() {
            return Err(ConfigError::Invalid {
                plugin: self.name.clone(),
                reason: "allowed_users must not be empty".into(),
            });
        }
        Ok(())
    }
}

struct AuthPlugin {
    config: AuthConfig,
}

#[async_trait]
impl Plugin for AuthPlugin {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn prepare(&self, ctx: &PipelineContext) {
        tracing::info!(pipeline = ctx.pipeline_name(), plugin = self.name(), "auth ready");
    }

    async fn run(&self, _ctx: &PipelineContext, task: &Task) -> Result<(), PluginError> {
        let allowed = task
            .value_as::<String>("user")
            .is_some_and(|user| self.config.allowed_users.contains(&*user));
        if !allowed {
            task.set_error("unauthorized", TaskResultCode(401));
        }
        Ok(())
    }

    async fn close(&self) {}
}

struct AuthFactory;

impl PluginFactory for AuthFactory {
    type Config = AuthConfig;
    const KIND: &'static str = "auth";

    fn construct(&self, config: AuthConfig) -> Result<Arc<dyn Plugin>, PluginError> {
        Ok(Arc::new(AuthPlugin { config }))
    }
}

// --- backend: 遅い上流。キャンセルされたら抜ける ---

#[derive(Debug, Deserialize)]
struct BackendConfig {
    name: String,
    latency_ms: u64,
}

impl PluginConfig for BackendConfig {
    fn plugin_name(&self) -> &str {
        &self.name
    }

    fn prepare(&self, _pipeline_names: &[String]) -> Result<(), ConfigError> {
        Ok(())
    }
}

struct BackendPlugin {
    config: BackendConfig,
}

#[async_trait]
impl Plugin for BackendPlugin {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn prepare(&self, _ctx: &PipelineContext) {}

    async fn run(&self, _ctx: &PipelineContext, task: &Task) -> Result<(), PluginError> {
        let cancel = task.cancel();
        tokio::select! {
            cause = cancel.cancelled() => Err(PluginError::Cancelled(cause)),
            _ = sleep(Duration::from_millis(self.config.latency_ms)) => {
                task.with_value("response", serde_json::json!({"status": "ok"}));
                task.finish();
                Ok(())
            }
        }
    }

    async fn close(&self) {
        tracing::info!(plugin = self.name(), "backend connections released");
    }
}

struct BackendFactory;

impl PluginFactory for BackendFactory {
    type Config = BackendConfig;
    const KIND: &'static str = "backend";

    fn construct(&self, config: BackendConfig) -> Result<Arc<dyn Plugin>, PluginError> {
        Ok(Arc::new(BackendPlugin { config }))
    }
}

const CONFIG: &str = r#"{
    "budget": {"deadline_ms": 200},
    "value_preview_len": 32,
    "plugins": [
        {"kind": "auth", "config": {"name": "auth", "allowed_users": ["alice"]}},
        {"kind": "backend", "config": {"name": "backend", "latency_ms": 50}}
    ]
}"#;

fn registry() -> Result<PluginRegistry, RegistryError> {
    let mut registry = PluginRegistry::new();
    registry.register(AuthFactory)?;
    registry.register(BackendFactory)?;
    Ok(registry)
}

async fn serve(driver: &PipelineDriver, label: &str, task: Task) -> Result<(), Box<dyn std::error::Error>> {
    task.add_finished_callback("access-log", |task: &Task, status| {
        tracing::info!(task_id = %task.id(), %status, code = %task.result_code(), "request done");
    });
    driver.run(&task).await?;
    let view = TaskStatusView::capture(&task, 32);
    println!("{label}: {}", serde_json::to_string_pretty(&view)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = GatewayConfig::from_json_str(CONFIG)?;
    let driver = DriverBuilder::from_config(&registry()?, &config, "api")?
        .expect_plugins(&["auth", "backend"])
        .build()?;

    // (A) 正常系
    let task = driver.new_task();
    task.with_value("user", "alice".to_string());
    serve(&driver, "allowed", task).await?;

    // (B) 認証エラー -> recovery で匿名ユーザーとして続行
    let task = driver.new_task();
    task.with_value("user", "mallory".to_string());
    task.add_recovery_func("anonymous", |task: &Task, plugin: &str| {
        tracing::warn!(task_id = %task.id(), plugin, "continuing as anonymous");
        task.with_value("user", "anonymous".to_string());
        true
    });
    serve(&driver, "recovered", task).await?;

    // (C) 認証エラー、recovery なし
    let task = driver.new_task();
    serve(&driver, "rejected", task).await?;

    // (D) deadline 超過
    let slow = DriverBuilder::from_config(&registry()?, &config, "slow")?
        .budget(taskgate_core::config::TaskBudget {
            deadline_ms: Some(10),
        })
        .build()?;
    let task = slow.new_task();
    task.with_value("user", "alice".to_string());
    serve(&slow, "deadline", task).await?;

    driver.close().await;
    slow.close().await;
    Ok(())
}
