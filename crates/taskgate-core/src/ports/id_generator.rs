//! IdGenerator port - ID 生成の抽象化
//!
//! Task と Pipeline の ID を生成するためのインターフェースです。
//! テスト容易性のために、trait として抽象化しています。
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）

use crate::domain::ids::{PipelineId, TaskId};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は時刻でソート可能な ID を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数スレッドから使える）
pub trait IdGenerator: Send + Sync {
    /// Task ID を生成
    fn generate_task_id(&self) -> TaskId;

    /// Pipeline ID を生成
    fn generate_pipeline_id(&self) -> PipelineId;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// Clock の現在時刻を ULID の timestamp 部に使います。
/// FixedClock を渡せば timestamp 部が決定的な ID になります。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    /// 新しい UlidGenerator を作成
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_task_id(&self) -> TaskId {
        TaskId::from(self.next_ulid())
    }

    fn generate_pipeline_id(&self) -> PipelineId {
        PipelineId::from(self.next_ulid())
    }
}
