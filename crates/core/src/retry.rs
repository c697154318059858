use std::time::Duration;

/// 指数退避配置
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    pub base_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    /// 0 表示不加抖动
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }
}

impl BackoffConfig {
    /// 第 `attempt` 次失败后的等待时间（从0开始）：1s, 2s, 4s, …
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_interval.as_secs_f64();
        let max = self.max_interval.as_secs_f64();

        // 计算指数退避间隔并限制最大值
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let capped = (base * self.multiplier.powi(exponent)).min(max);

        // 添加随机抖动以避免雷群效应
        let jitter = if self.jitter_factor > 0.0 {
            capped * self.jitter_factor * (rand::random::<f64>() - 0.5) * 2.0
        } else {
            0.0
        };
        let interval = (capped + jitter).clamp(0.0, max.max(base));

        Duration::try_from_secs_f64(interval).unwrap_or(self.max_interval)
    }
}

const RETRYABLE_PATTERNS: &[&str] = &[
    "502",
    "503",
    "429",
    "timeout",
    "timed out",
    "temporarily unavailable",
];

/// 可重试错误分类：网关错误、限流、超时、暂时不可用；其余视为致命
pub fn is_retryable_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    RETRYABLE_PATTERNS.iter().any(|p| lower.contains(p))
}
