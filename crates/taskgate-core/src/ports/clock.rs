//! Clock port - 時刻の抽象化
//!
//! Task は開始時刻・終了時刻・deadline をすべて `Clock` 経由で読みます。
//! テストでは `FixedClock` を使うことで、sleep せずに deadline を進められます。
//!
//! # 実装
//! - **SystemClock**: 壁時計（本番用）
//! - **FixedClock**: 手動で進める時計（テスト用）

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::sync::Arc;

/// Clock は現在時刻を提供
///
/// # テスト容易性
/// - trait により時刻を差し替え可能
/// - テストでは FixedClock を使用
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// 壁時計と同じ速さで進むか
    ///
    /// true なら deadline 待ちは deadline まで一度に sleep できる。
    /// false の時計（FixedClock など）は外から動かされるので、待機側が定期的に読み直す。
    fn is_wall_time(&self) -> bool {
        false
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }

    fn is_wall_time(&self) -> bool {
        (**self).is_wall_time()
    }
}

/// SystemClock は `Utc::now()` を返す
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn is_wall_time(&self) -> bool {
        true
    }
}

/// FixedClock はテスト用の固定時計
///
/// `set` / `advance` を呼んだときだけ進みます。
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
