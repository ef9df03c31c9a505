//! ストア呼び出しのタイムアウトとリトライ
//!
//! 各呼び出しを `tokio::time::timeout` で包み、一時的な失敗（Unavailable / Timeout）は
//! 指数バックオフで上限回数までリトライします。一時的でない失敗は即座に返します。

use std::{future::Future, time::Duration};

use crate::domain::StoreError;

/// リトライ方針
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 最大試行回数（1 以上）
    pub attempts: u32,
    /// 初回リトライまでの待機時間（以降は倍々）
    pub backoff: Duration,
    /// 1回の呼び出しのタイムアウト
    pub timeout: Duration,
}

/// バックオフの上限
const MAX_BACKOFF: Duration = Duration::from_secs(5);

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(100),
            timeout: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// リトライなしの方針
    pub fn once(timeout: Duration) -> Self {
        Self {
            attempts: 1,
            backoff: Duration::ZERO,
            timeout,
        }
    }

    fn delay(&self, retry: u32) -> Duration {
        self.backoff
            .saturating_mul(2u32.saturating_pow(retry))
            .min(MAX_BACKOFF)
    }

    /// ストア操作を実行
    ///
    /// # Arguments
    ///
    /// * `operation` - ログ用の操作名
    /// * `call` - 試行ごとに呼ばれ、新しい Future を返すクロージャ
    ///
    /// # Returns
    ///
    /// 最後の試行の結果。試行回数を使い切った場合は最後のエラー
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match tokio::time::timeout(self.timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout(self.timeout)),
            };
            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < attempts => {
                    let delay = self.delay(attempt - 1);
                    tracing::warn!(
                        operation,
                        attempt,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "store call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if e.is_transient() {
                        tracing::error!(operation, attempts, error = %e, "store call failed, giving up");
                    }
                    return Err(e);
                }
            }
        }
    }
}
