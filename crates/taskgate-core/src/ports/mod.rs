//! Ports - 抽象化レイヤー
//!
//! Task エンジンと外側をつなぐ trait をまとめています。
//!
//! - **Clock**: 時刻の抽象化（テストでは FixedClock）
//! - **IdGenerator**: ID 生成の抽象化
//! - **Plugin / PluginConfig / PluginFactory**: プラグイン契約

pub mod clock;
pub mod id_generator;
pub mod plugin;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::plugin::{Plugin, PluginConfig, PluginFactory};
